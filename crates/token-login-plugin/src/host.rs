//! The plugin host: connection lifecycle and request dispatch.

use std::sync::Arc;
use std::time::Duration;

use token_login_core::{HostLogSink, PluginLogger};
use token_login_telemetry::RequestContext;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::connection::{Connection, ConnectionOptions};
use crate::error::{ProtocolError, ProtocolResult};
use crate::handlers::HandlerRegistry;
use crate::protocol::{
    HandshakeRequest, HandshakeResponse, Message, MessageMethod, MessageResponseCode,
    MessageType, MonitorNuGetProcessExitRequest, StatusResponse, negotiate,
};

/// The only accepted command line argument.
pub const PLUGIN_ARGUMENT: &str = "-Plugin";

/// How long the log pump may drain after the connection closed.
pub const LOG_DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// Check the command line (without the program name).
///
/// # Errors
///
/// Returns the usage message unless the arguments are exactly `-Plugin`.
pub fn validate_activation<S: AsRef<str>>(args: &[S]) -> Result<(), String> {
    match args {
        [only] if only.as_ref() == PLUGIN_ARGUMENT => Ok(()),
        _ => Err(format!(
            "A single argument '{PLUGIN_ARGUMENT}' is expected. Received {} arguments.",
            args.len()
        )),
    }
}

/// Owns one plugin session from handshake to close.
pub struct PluginHost {
    logger: PluginLogger,
    handlers: Arc<HandlerRegistry>,
    options: ConnectionOptions,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("handlers", &self.handlers)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl PluginHost {
    /// Create a host. `shutdown` is the process-wide cancellation source; it
    /// fires when the session ends.
    #[must_use]
    pub fn new(
        logger: PluginLogger,
        handlers: HandlerRegistry,
        options: ConnectionOptions,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            logger,
            handlers: Arc::new(handlers),
            options,
            shutdown,
        }
    }

    /// Run a session over `reader`/`writer` until the client closes it.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::HandshakeFailed`] when the plugin's own
    /// handshake is rejected or times out.
    pub async fn run<R, W>(&self, reader: R, writer: W) -> ProtocolResult<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (connection, inbound) =
            Connection::start(reader, writer, &self.shutdown, self.options.request_timeout);
        let sink: Arc<dyn HostLogSink> = Arc::clone(&connection) as Arc<dyn HostLogSink>;
        self.logger.attach_host(sink);

        let dispatcher = tokio::spawn(dispatch_loop(
            Arc::clone(&connection),
            inbound,
            Arc::clone(&self.handlers),
            self.options,
        ));

        let handshake = self.handshake(&connection).await;
        if let Err(e) = &handshake {
            warn!(error = %e, "handshake failed");
            connection.close();
        } else {
            info!("plugin connection established");
            connection.closed().await;
            info!("plugin connection closed");
        }

        self.shutdown.cancel();
        self.logger.stop(LOG_DRAIN_DEADLINE).await;
        if let Err(e) = dispatcher.await {
            debug!(error = %e, "dispatch task ended abnormally");
        }
        handshake
    }

    async fn handshake(&self, connection: &Connection) -> ProtocolResult<()> {
        let request = HandshakeRequest {
            protocol_version: self.options.protocol_version,
            minimum_protocol_version: self.options.minimum_protocol_version,
        };
        let response: HandshakeResponse = connection
            .send_request_with_timeout(
                MessageMethod::Handshake,
                &request,
                self.options.handshake_timeout,
            )
            .await
            .map_err(|e| ProtocolError::HandshakeFailed(e.to_string()))?;

        match (response.response_code, response.protocol_version) {
            (MessageResponseCode::Success, Some(version)) => {
                debug!(%version, "handshake negotiated");
                Ok(())
            },
            (code, _) => Err(ProtocolError::HandshakeFailed(format!(
                "the client answered {code:?}"
            ))),
        }
    }
}

async fn dispatch_loop(
    connection: Arc<Connection>,
    mut inbound: mpsc::UnboundedReceiver<Message>,
    handlers: Arc<HandlerRegistry>,
    options: ConnectionOptions,
) {
    loop {
        let message = tokio::select! {
            biased;
            () = connection.closed() => break,
            message = inbound.recv() => message,
        };
        let Some(message) = message else {
            break;
        };

        if message.kind == MessageType::Cancel {
            debug!(request_id = %message.request_id, method = %message.method, "cancel received");
            continue;
        }

        match message.method.clone() {
            MessageMethod::Close => {
                debug!("close requested");
                connection.close();
                break;
            },
            MessageMethod::Handshake => answer_handshake(&connection, &message, options),
            MessageMethod::MonitorNuGetProcessExit => {
                match message.payload_as::<MonitorNuGetProcessExitRequest>() {
                    Ok(request) => {
                        debug!(process_id = request.process_id, "client process monitoring requested");
                    },
                    Err(e) => debug!(error = %e, "unreadable process monitoring request"),
                }
                if let Err(e) = connection.send_response(&message, &StatusResponse::SUCCESS) {
                    debug!(error = %e, "failed to acknowledge process monitoring");
                }
            },
            method => match handlers.get(&method) {
                Some(handler) => {
                    let ctx = RequestContext::new(method.as_str(), message.request_id.as_str());
                    let span = ctx.span();
                    let connection = Arc::clone(&connection);
                    tokio::spawn(
                        async move {
                            if let Err(e) = handler.handle(&connection, &message).await {
                                warn!(error = %e, "request handler failed");
                                let _ = connection.send_fault(&message, e.to_string());
                            }
                            debug!(elapsed_ms = ctx.elapsed_ms(), "request handled");
                        }
                        .instrument(span),
                    );
                },
                None => {
                    debug!(method = %method, "no handler registered");
                    let _ = connection.send_fault(
                        &message,
                        format!("No request handler is registered for method '{method}'."),
                    );
                },
            },
        }
    }
    debug!("dispatch loop stopped");
}

fn answer_handshake(connection: &Connection, message: &Message, options: ConnectionOptions) {
    let negotiated = message
        .payload_as::<HandshakeRequest>()
        .ok()
        .and_then(|theirs| {
            negotiate(
                (options.minimum_protocol_version, options.protocol_version),
                (theirs.minimum_protocol_version, theirs.protocol_version),
            )
        });

    let response = HandshakeResponse {
        response_code: if negotiated.is_some() {
            MessageResponseCode::Success
        } else {
            MessageResponseCode::Error
        },
        protocol_version: negotiated,
    };
    if let Err(e) = connection.send_response(message, &response) {
        debug!(error = %e, "failed to answer handshake");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_activation() {
        assert!(validate_activation(&["-Plugin"]).is_ok());
        assert_eq!(
            validate_activation::<&str>(&[]).unwrap_err(),
            "A single argument '-Plugin' is expected. Received 0 arguments."
        );
        assert_eq!(
            validate_activation(&["-Plugin", "-Extra"]).unwrap_err(),
            "A single argument '-Plugin' is expected. Received 2 arguments."
        );
        assert!(validate_activation(&["-plugin"]).is_err());
        assert!(validate_activation(&["--Plugin"]).is_err());
    }
}
