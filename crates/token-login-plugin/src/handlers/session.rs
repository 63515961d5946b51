//! Handlers that set up the session: nothing here touches credentials.

use async_trait::async_trait;
use token_login_core::PluginLogger;

use super::TypedHandler;
use crate::protocol::{
    GetOperationClaimsRequest, GetOperationClaimsResponse, InitializeRequest, OperationClaim,
    SetCredentialsRequest, SetLogLevelRequest, StatusResponse,
};

/// `Initialize`: always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitializeHandler;

#[async_trait]
impl TypedHandler for InitializeHandler {
    type Request = InitializeRequest;
    type Response = StatusResponse;

    async fn handle_request(&self, _request: InitializeRequest) -> StatusResponse {
        StatusResponse::SUCCESS
    }
}

/// `GetOperationClaims`: claims authentication only when asked without a
/// source context.
#[derive(Debug, Clone)]
pub struct OperationClaimsHandler {
    logger: PluginLogger,
}

impl OperationClaimsHandler {
    /// Create the handler.
    #[must_use]
    pub fn new(logger: PluginLogger) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl TypedHandler for OperationClaimsHandler {
    type Request = GetOperationClaimsRequest;
    type Response = GetOperationClaimsResponse;

    async fn handle_request(&self, request: GetOperationClaimsRequest) -> GetOperationClaimsResponse {
        if request.service_index.is_none() && request.package_source_repository.is_none() {
            return GetOperationClaimsResponse {
                claims: vec![OperationClaim::Authentication],
            };
        }

        self.logger
            .warning("Ignoring a plugin request not related to authentication.");
        GetOperationClaimsResponse { claims: Vec::new() }
    }
}

/// `SetLogLevel`: records the level, and starts the log pump once the
/// response is on its way.
#[derive(Debug, Clone)]
pub struct SetLogLevelHandler {
    logger: PluginLogger,
}

impl SetLogLevelHandler {
    /// Create the handler.
    #[must_use]
    pub fn new(logger: PluginLogger) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl TypedHandler for SetLogLevelHandler {
    type Request = SetLogLevelRequest;
    type Response = StatusResponse;

    async fn handle_request(&self, request: SetLogLevelRequest) -> StatusResponse {
        self.logger.set_level(request.log_level);
        StatusResponse::SUCCESS
    }

    fn after_response(&self) {
        // Log requests sent before this point hang the host.
        self.logger.debug("Starting plugin logger.");
        self.logger.start();
    }
}

/// `SetCredentials`: accepted and ignored; nothing is cached.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetCredentialsHandler;

#[async_trait]
impl TypedHandler for SetCredentialsHandler {
    type Request = SetCredentialsRequest;
    type Response = StatusResponse;

    fn secrets(&self, request: &SetCredentialsRequest) -> Vec<String> {
        [&request.password, &request.proxy_password]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }

    async fn handle_request(&self, _request: SetCredentialsRequest) -> StatusResponse {
        StatusResponse::SUCCESS
    }
}
