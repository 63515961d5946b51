//! NuGet plugin protocol wire types.
//!
//! Messages are newline-delimited JSON objects with PascalCase property
//! names. Enums travel as their variant names. Payloads are method-specific
//! and kept as an opaque `serde_json::Value` on the envelope; the typed
//! payload structs below are decoded on demand.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use token_login_core::LogLevel;

use crate::error::{ProtocolError, ProtocolResult};

// ── Versions ─────────────────────────────────────────────────

/// Highest protocol version this plugin speaks.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(2, 0, 0);

/// Lowest protocol version this plugin accepts.
pub const MINIMUM_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(1, 0, 0);

/// A `major.minor.patch` protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolVersion {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Patch component.
    pub patch: u32,
}

impl ProtocolVersion {
    /// Create a version.
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ProtocolVersion {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidVersion(s.to_string());
        // Pre-release and build metadata do not take part in negotiation.
        let core = s.trim().split(['-', '+']).next().unwrap_or_default();
        let parts = core
            .split('.')
            .map(|p| p.parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        match parts.as_slice() {
            [major, minor] => Ok(Self::new(*major, *minor, 0)),
            [major, minor, patch] => Ok(Self::new(*major, *minor, *patch)),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProtocolVersion> for String {
    fn from(value: ProtocolVersion) -> Self {
        value.to_string()
    }
}

/// Pick the version both sides speak, if any: the highest version inside
/// both `[minimum, maximum]` ranges.
#[must_use]
pub fn negotiate(
    ours: (ProtocolVersion, ProtocolVersion),
    theirs: (ProtocolVersion, ProtocolVersion),
) -> Option<ProtocolVersion> {
    let (our_min, our_max) = ours;
    let (their_min, their_max) = theirs;
    if their_min > their_max || their_max < our_min || their_min > our_max {
        return None;
    }
    Some(our_max.min(their_max))
}

// ── Envelope ─────────────────────────────────────────────────

/// Kind of a protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// A request expecting a response.
    Request,
    /// The answer to a request.
    Response,
    /// Keep-alive for a long-running request.
    Progress,
    /// The request failed at the protocol level.
    Fault,
    /// The sender no longer wants the response.
    Cancel,
}

/// Method of a protocol message. Unknown methods are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageMethod {
    /// Protocol version negotiation.
    Handshake,
    /// Client information, sent once after the handshake.
    Initialize,
    /// Which operations the plugin supports.
    GetOperationClaims,
    /// Minimum level for plugin log messages.
    SetLogLevel,
    /// Credentials the client already has for a source.
    SetCredentials,
    /// Ask for credentials for a package source.
    GetAuthenticationCredentials,
    /// Client process id to watch.
    MonitorNuGetProcessExit,
    /// The client is done with the plugin.
    Close,
    /// Plugin log line (plugin to client).
    Log,
    /// Any method this plugin does not know.
    Other(String),
}

impl MessageMethod {
    /// Wire name of the method.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Handshake => "Handshake",
            Self::Initialize => "Initialize",
            Self::GetOperationClaims => "GetOperationClaims",
            Self::SetLogLevel => "SetLogLevel",
            Self::SetCredentials => "SetCredentials",
            Self::GetAuthenticationCredentials => "GetAuthenticationCredentials",
            Self::MonitorNuGetProcessExit => "MonitorNuGetProcessExit",
            Self::Close => "Close",
            Self::Log => "Log",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for MessageMethod {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Handshake" => Self::Handshake,
            "Initialize" => Self::Initialize,
            "GetOperationClaims" => Self::GetOperationClaims,
            "SetLogLevel" => Self::SetLogLevel,
            "SetCredentials" => Self::SetCredentials,
            "GetAuthenticationCredentials" => Self::GetAuthenticationCredentials,
            "MonitorNuGetProcessExit" => Self::MonitorNuGetProcessExit,
            "Close" => Self::Close,
            "Log" => Self::Log,
            _ => Self::Other(value),
        }
    }
}

impl From<MessageMethod> for String {
    fn from(value: MessageMethod) -> Self {
        match value {
            MessageMethod::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Message {
    /// Correlates a response with its request.
    pub request_id: String,
    /// Message kind.
    #[serde(rename = "Type")]
    pub kind: MessageType,
    /// Method.
    pub method: MessageMethod,
    /// Method-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Message {
    /// Build a request.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn request<P: Serialize + ?Sized>(
        request_id: impl Into<String>,
        method: MessageMethod,
        payload: &P,
    ) -> ProtocolResult<Self> {
        Ok(Self {
            request_id: request_id.into(),
            kind: MessageType::Request,
            method,
            payload: Some(serde_json::to_value(payload)?),
        })
    }

    /// Build the response to `request`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn response<P: Serialize + ?Sized>(request: &Self, payload: &P) -> ProtocolResult<Self> {
        Ok(Self {
            request_id: request.request_id.clone(),
            kind: MessageType::Response,
            method: request.method.clone(),
            payload: Some(serde_json::to_value(payload)?),
        })
    }

    /// Build a fault answering `request`.
    #[must_use]
    pub fn fault(request: &Self, message: impl Into<String>) -> Self {
        Self {
            request_id: request.request_id.clone(),
            kind: MessageType::Fault,
            method: request.method.clone(),
            payload: Some(serde_json::json!({ "Message": message.into() })),
        }
    }

    /// Decode the payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingPayload`] when there is no payload, or
    /// a JSON error when it does not have the expected shape.
    pub fn payload_as<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        let payload = self
            .payload
            .as_ref()
            .ok_or_else(|| ProtocolError::MissingPayload {
                method: self.method.to_string(),
            })?;
        Ok(T::deserialize(payload)?)
    }

    /// Encode as one line of JSON, without the trailing newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_line(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode one line of JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the line is not a valid message.
    pub fn from_line(line: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

// ── Payloads ─────────────────────────────────────────────────

/// Outcome code carried by most responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageResponseCode {
    /// The request succeeded.
    Success,
    /// The request failed.
    Error,
    /// The plugin has nothing for this request.
    NotFound,
}

/// Response carrying only a response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusResponse {
    /// Outcome.
    pub response_code: MessageResponseCode,
}

impl StatusResponse {
    /// A `Success` response.
    pub const SUCCESS: Self = Self {
        response_code: MessageResponseCode::Success,
    };
}

/// `Handshake` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HandshakeRequest {
    /// Highest version the sender speaks.
    pub protocol_version: ProtocolVersion,
    /// Lowest version the sender accepts.
    pub minimum_protocol_version: ProtocolVersion,
}

/// `Handshake` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HandshakeResponse {
    /// Outcome.
    pub response_code: MessageResponseCode,
    /// Negotiated version, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<ProtocolVersion>,
}

/// `Initialize` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InitializeRequest {
    /// Version of the package-manager client.
    pub client_version: String,
    /// Client UI culture.
    pub culture: String,
    /// Client request timeout, as a `hh:mm:ss` string.
    pub request_timeout: String,
}

/// An operation a plugin may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationClaim {
    /// Providing credentials.
    Authentication,
}

/// `GetOperationClaims` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GetOperationClaimsRequest {
    /// Source repository, when asking about a specific source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_source_repository: Option<String>,
    /// Service index of that source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_index: Option<Value>,
}

/// `GetOperationClaims` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetOperationClaimsResponse {
    /// Supported operations.
    pub claims: Vec<OperationClaim>,
}

/// `SetLogLevel` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SetLogLevelRequest {
    /// Minimum level the client wants.
    pub log_level: LogLevel,
}

/// `SetCredentials` request.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SetCredentialsRequest {
    /// Source the credentials belong to.
    pub package_source_repository: String,
    /// Proxy user name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_username: Option<String>,
    /// Proxy password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_password: Option<String>,
    /// Source user name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Source password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl fmt::Debug for SetCredentialsRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetCredentialsRequest")
            .field("package_source_repository", &self.package_source_repository)
            .field("proxy_username", &self.proxy_username)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// `GetAuthenticationCredentials` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetAuthenticationCredentialsRequest {
    /// Package source URL credentials are wanted for.
    pub uri: String,
    /// Previous credentials were rejected.
    #[serde(default)]
    pub is_retry: bool,
    /// The client cannot prompt.
    #[serde(default)]
    pub is_non_interactive: bool,
    /// The client allows a dialog.
    #[serde(default)]
    pub can_show_dialog: bool,
}

/// `GetAuthenticationCredentials` response.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetAuthenticationCredentialsResponse {
    /// User name, or a sentinel when the password is a token.
    pub username: String,
    /// Password or token.
    pub password: String,
    /// Message shown by the client.
    pub message: String,
    /// Authentication schemes the credential works with.
    pub authentication_types: Vec<String>,
    /// Outcome.
    pub response_code: MessageResponseCode,
}

impl fmt::Debug for GetAuthenticationCredentialsResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetAuthenticationCredentialsResponse")
            .field("username", &self.username)
            .field("password", &"***")
            .field("message", &self.message)
            .field("authentication_types", &self.authentication_types)
            .field("response_code", &self.response_code)
            .finish()
    }
}

/// `MonitorNuGetProcessExit` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MonitorNuGetProcessExitRequest {
    /// Client process id.
    pub process_id: u32,
}

/// `Log` request, plugin to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogRequest {
    /// Severity.
    pub log_level: LogLevel,
    /// Text.
    pub message: String,
}

/// Payload of a `Fault` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FaultPayload {
    /// Description of the failure.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_version_parse_and_display() {
        let v: ProtocolVersion = "2.0.0".parse().unwrap();
        assert_eq!(v, PROTOCOL_VERSION);
        assert_eq!(v.to_string(), "2.0.0");
        assert_eq!("1.2".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::new(1, 2, 0));
        assert_eq!(
            "3.1.4-beta+abc".parse::<ProtocolVersion>().unwrap(),
            ProtocolVersion::new(3, 1, 4)
        );
        assert!("two".parse::<ProtocolVersion>().is_err());
        assert!("1".parse::<ProtocolVersion>().is_err());
        assert!("1.2.3.4".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn test_negotiate() {
        let ours = (MINIMUM_PROTOCOL_VERSION, PROTOCOL_VERSION);
        assert_eq!(
            negotiate(ours, (ProtocolVersion::new(1, 0, 0), ProtocolVersion::new(2, 0, 0))),
            Some(PROTOCOL_VERSION)
        );
        assert_eq!(
            negotiate(ours, (ProtocolVersion::new(1, 0, 0), ProtocolVersion::new(1, 0, 0))),
            Some(ProtocolVersion::new(1, 0, 0))
        );
        assert_eq!(
            negotiate(ours, (ProtocolVersion::new(2, 0, 0), ProtocolVersion::new(3, 0, 0))),
            Some(PROTOCOL_VERSION)
        );
        assert_eq!(
            negotiate(ours, (ProtocolVersion::new(3, 0, 0), ProtocolVersion::new(4, 0, 0))),
            None
        );
        assert_eq!(
            negotiate(ours, (ProtocolVersion::new(0, 1, 0), ProtocolVersion::new(0, 9, 0))),
            None
        );
    }

    #[test]
    fn test_message_wire_shape() {
        let message = Message::request(
            "42",
            MessageMethod::SetLogLevel,
            &SetLogLevelRequest {
                log_level: LogLevel::Minimal,
            },
        )
        .unwrap();
        let value: Value = serde_json::from_str(&message.to_line().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "RequestId": "42",
                "Type": "Request",
                "Method": "SetLogLevel",
                "Payload": { "LogLevel": "Minimal" }
            })
        );
    }

    #[test]
    fn test_unknown_method_is_preserved() {
        let line = r#"{"RequestId":"1","Type":"Request","Method":"PrefetchPackage","Payload":{}}"#;
        let message = Message::from_line(line).unwrap();
        assert_eq!(message.method, MessageMethod::Other("PrefetchPackage".into()));
        let back: Value = serde_json::from_str(&message.to_line().unwrap()).unwrap();
        assert_eq!(back["Method"], "PrefetchPackage");
    }

    #[test]
    fn test_message_without_payload() {
        let message = Message::from_line(r#"{"RequestId":"9","Type":"Request","Method":"Close"}"#)
            .unwrap();
        assert_eq!(message.method, MessageMethod::Close);
        assert!(message.payload.is_none());
        assert!(matches!(
            message.payload_as::<StatusResponse>(),
            Err(ProtocolError::MissingPayload { .. })
        ));
    }

    #[test]
    fn test_response_and_fault_reuse_request_id() {
        let request = Message::request("abc", MessageMethod::Initialize, &json!({})).unwrap();
        let response = Message::response(&request, &StatusResponse::SUCCESS).unwrap();
        assert_eq!(response.request_id, "abc");
        assert_eq!(response.kind, MessageType::Response);
        assert_eq!(response.payload, Some(json!({ "ResponseCode": "Success" })));

        let fault = Message::fault(&request, "boom");
        assert_eq!(fault.kind, MessageType::Fault);
        assert_eq!(
            fault.payload_as::<FaultPayload>().unwrap().message,
            "boom"
        );
    }

    #[test]
    fn test_authentication_request_defaults() {
        let request: GetAuthenticationCredentialsRequest =
            serde_json::from_value(json!({ "Uri": "https://a/index.json" })).unwrap();
        assert_eq!(request.uri, "https://a/index.json");
        assert!(!request.is_retry);
    }

    #[test]
    fn test_authentication_response_shape() {
        let response = GetAuthenticationCredentialsResponse {
            username: "PasswordIsToken".into(),
            password: "tok".into(),
            message: String::new(),
            authentication_types: vec!["Basic".into()],
            response_code: MessageResponseCode::Success,
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "Username": "PasswordIsToken",
                "Password": "tok",
                "Message": "",
                "AuthenticationTypes": ["Basic"],
                "ResponseCode": "Success"
            })
        );
        assert!(format!("{response:?}").contains(r#"password: "***""#));
    }

    #[test]
    fn test_operation_claims_context_detection() {
        let empty: GetOperationClaimsRequest = serde_json::from_value(json!({})).unwrap();
        assert!(empty.package_source_repository.is_none() && empty.service_index.is_none());

        let with_source: GetOperationClaimsRequest = serde_json::from_value(json!({
            "PackageSourceRepository": "https://a/index.json",
            "ServiceIndex": { "version": "3.0.0" }
        }))
        .unwrap();
        assert!(with_source.service_index.is_some());
    }

    #[test]
    fn test_set_credentials_debug_hides_passwords() {
        let request = SetCredentialsRequest {
            package_source_repository: "https://a/".into(),
            password: Some("hunter2".into()),
            proxy_password: Some("proxy-pw".into()),
            ..Default::default()
        };
        let debug = format!("{request:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("proxy-pw"));
    }
}
