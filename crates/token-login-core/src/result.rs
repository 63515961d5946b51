//! Outcome of one credential resolution attempt.

use std::fmt;

/// Result of resolving a credential. Exactly one shape applies.
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialProviderResult {
    /// This provider does not handle the request; the host should try the
    /// next credential provider.
    NotSupported,
    /// The provider handles the request but failed.
    Error {
        /// Message shown verbatim by the host.
        message: String,
    },
    /// A bearer token was obtained.
    Success {
        /// The bearer token.
        token: String,
        /// Human-readable summary.
        success_message: String,
    },
}

impl CredentialProviderResult {
    /// Build an `Error` result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Build a `Success` result.
    #[must_use]
    pub fn success(token: impl Into<String>, success_message: impl Into<String>) -> Self {
        Self::Success {
            token: token.into(),
            success_message: success_message.into(),
        }
    }

    /// Short name of the shape, for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotSupported => "NotSupported",
            Self::Error { .. } => "Error",
            Self::Success { .. } => "Success",
        }
    }
}

impl fmt::Debug for CredentialProviderResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSupported => f.write_str("NotSupported"),
            Self::Error { message } => f.debug_struct("Error").field("message", message).finish(),
            Self::Success {
                success_message, ..
            } => f
                .debug_struct("Success")
                .field("token", &"***")
                .field("success_message", success_message)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        assert_eq!(
            CredentialProviderResult::error("boom"),
            CredentialProviderResult::Error {
                message: "boom".into()
            }
        );
        assert_eq!(CredentialProviderResult::success("t", "ok").kind(), "Success");
        assert_eq!(CredentialProviderResult::NotSupported.kind(), "NotSupported");
    }

    #[test]
    fn test_debug_hides_token() {
        let result = CredentialProviderResult::success("very-secret", "done");
        assert!(!format!("{result:?}").contains("very-secret"));
    }
}
