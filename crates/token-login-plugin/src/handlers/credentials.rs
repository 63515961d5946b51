//! `GetAuthenticationCredentials`: the credential resolution entry point.

use std::sync::Arc;

use async_trait::async_trait;
use token_login_core::{CredentialProviderResult, CredentialResolution};

use super::TypedHandler;
use crate::protocol::{
    GetAuthenticationCredentialsRequest, GetAuthenticationCredentialsResponse,
    MessageResponseCode,
};

/// Username telling the client that the password field holds a token.
pub const PASSWORD_IS_TOKEN: &str = "PasswordIsToken";

/// Authentication scheme the token is usable with.
const BASIC: &str = "Basic";

/// Resolves credentials for the requested package source.
#[derive(Debug, Clone)]
pub struct AuthenticationCredentialsHandler {
    resolution: Arc<CredentialResolution>,
}

impl AuthenticationCredentialsHandler {
    /// Create the handler.
    #[must_use]
    pub fn new(resolution: Arc<CredentialResolution>) -> Self {
        Self { resolution }
    }
}

fn to_response(result: CredentialProviderResult) -> GetAuthenticationCredentialsResponse {
    match result {
        CredentialProviderResult::NotSupported => GetAuthenticationCredentialsResponse {
            username: String::new(),
            password: String::new(),
            message: String::new(),
            authentication_types: Vec::new(),
            response_code: MessageResponseCode::NotFound,
        },
        CredentialProviderResult::Error { message } => GetAuthenticationCredentialsResponse {
            username: String::new(),
            password: String::new(),
            message,
            authentication_types: Vec::new(),
            response_code: MessageResponseCode::Error,
        },
        CredentialProviderResult::Success { token, .. } => GetAuthenticationCredentialsResponse {
            username: PASSWORD_IS_TOKEN.to_string(),
            password: token,
            message: String::new(),
            authentication_types: vec![BASIC.to_string()],
            response_code: MessageResponseCode::Success,
        },
    }
}

#[async_trait]
impl TypedHandler for AuthenticationCredentialsHandler {
    type Request = GetAuthenticationCredentialsRequest;
    type Response = GetAuthenticationCredentialsResponse;

    async fn handle_request(
        &self,
        request: GetAuthenticationCredentialsRequest,
    ) -> GetAuthenticationCredentialsResponse {
        to_response(self.resolution.resolve(&request.uri).await)
    }
}
