//! Request handlers, one per inbound protocol method.
//!
//! Every handler runs through [`LoggedHandler`], which logs the request and
//! response through the redacting logger and paces the response (see
//! [`ResponseTiming`]).

mod credentials;
mod session;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use token_login_core::{CredentialResolution, PluginLogger};

pub use credentials::{AuthenticationCredentialsHandler, PASSWORD_IS_TOKEN};
pub use session::{
    InitializeHandler, OperationClaimsHandler, SetCredentialsHandler, SetLogLevelHandler,
};

use crate::connection::Connection;
use crate::error::ProtocolResult;
use crate::protocol::{Message, MessageMethod};

/// Handles one inbound request, including sending its response.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle `request` and answer it on `connection`.
    ///
    /// # Errors
    ///
    /// Returns an error when the request payload does not decode or the
    /// response cannot be sent. The caller answers with a fault.
    async fn handle(&self, connection: &Connection, request: &Message) -> ProtocolResult<()>;
}

/// A handler with typed request and response payloads.
#[async_trait]
pub trait TypedHandler: Send + Sync + 'static {
    /// Request payload.
    type Request: DeserializeOwned + Serialize + Send + Sync;
    /// Response payload.
    type Response: Serialize + Send + Sync;

    /// Secret values inside the request. They are redacted before the
    /// request is logged.
    fn secrets(&self, _request: &Self::Request) -> Vec<String> {
        Vec::new()
    }

    /// Compute the response.
    async fn handle_request(&self, request: Self::Request) -> Self::Response;

    /// Runs after the response was handed to the writer.
    fn after_response(&self) {}
}

/// Pacing of responses.
///
/// The host has proven unreliable when answers arrive right after log
/// traffic, so each response waits for the log queue to drain (bounded by
/// `drain_wait`) and then a further `send_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseTiming {
    /// Longest wait for the log queue to empty.
    pub drain_wait: Duration,
    /// Fixed delay before the response is sent.
    pub send_delay: Duration,
}

impl Default for ResponseTiming {
    fn default() -> Self {
        Self {
            drain_wait: Duration::from_millis(500),
            send_delay: Duration::from_secs(1),
        }
    }
}

impl ResponseTiming {
    /// No pacing at all.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            drain_wait: Duration::ZERO,
            send_delay: Duration::ZERO,
        }
    }
}

/// Runs a [`TypedHandler`] with request/response logging and pacing.
pub struct LoggedHandler<H> {
    inner: H,
    logger: PluginLogger,
    timing: ResponseTiming,
}

impl<H> LoggedHandler<H> {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: H, logger: PluginLogger, timing: ResponseTiming) -> Self {
        Self {
            inner,
            logger,
            timing,
        }
    }
}

#[async_trait]
impl<H: TypedHandler> RequestHandler for LoggedHandler<H> {
    async fn handle(&self, connection: &Connection, request: &Message) -> ProtocolResult<()> {
        let payload: H::Request = request.payload_as()?;
        for secret in self.inner.secrets(&payload) {
            self.logger.add_redacted_value(&secret);
        }
        self.logger.debug(format!(
            "Received request: {}",
            self.logger.serialize_for_logging(request)
        ));

        let response = self.inner.handle_request(payload).await;

        self.logger.debug(format!(
            "Sending response: {}",
            self.logger.serialize_for_logging(&response)
        ));
        self.logger.pause_for_empty(self.timing.drain_wait).await;
        if !self.timing.send_delay.is_zero() {
            tokio::time::sleep(self.timing.send_delay).await;
        }

        connection.send_response(request, &response)?;
        self.inner.after_response();
        Ok(())
    }
}

/// Handlers keyed by method.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageMethod, Arc<dyn RequestHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field(
                "methods",
                &self.handlers.keys().map(MessageMethod::as_str).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The five credential-provider handlers, all logged and paced.
    #[must_use]
    pub fn standard(
        logger: &PluginLogger,
        resolution: Arc<CredentialResolution>,
        timing: ResponseTiming,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(
            MessageMethod::Initialize,
            Arc::new(LoggedHandler::new(InitializeHandler, logger.clone(), timing)),
        );
        registry.register(
            MessageMethod::GetOperationClaims,
            Arc::new(LoggedHandler::new(
                OperationClaimsHandler::new(logger.clone()),
                logger.clone(),
                timing,
            )),
        );
        registry.register(
            MessageMethod::SetLogLevel,
            Arc::new(LoggedHandler::new(
                SetLogLevelHandler::new(logger.clone()),
                logger.clone(),
                timing,
            )),
        );
        registry.register(
            MessageMethod::SetCredentials,
            Arc::new(LoggedHandler::new(SetCredentialsHandler, logger.clone(), timing)),
        );
        registry.register(
            MessageMethod::GetAuthenticationCredentials,
            Arc::new(LoggedHandler::new(
                AuthenticationCredentialsHandler::new(resolution),
                logger.clone(),
                timing,
            )),
        );
        registry
    }

    /// Register `handler` for `method`, replacing any previous one.
    pub fn register(&mut self, method: MessageMethod, handler: Arc<dyn RequestHandler>) {
        self.handlers.insert(method, handler);
    }

    /// Handler for `method`.
    #[must_use]
    pub fn get(&self, method: &MessageMethod) -> Option<Arc<dyn RequestHandler>> {
        self.handlers.get(method).cloned()
    }
}
