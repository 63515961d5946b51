//! The stdio connection to the package-manager client.
//!
//! A reader task parses inbound lines and routes them: responses and faults
//! complete the matching outbound request, everything else is forwarded to
//! the host on the inbound channel. A writer task owns the output stream so
//! concurrent senders never interleave lines.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use token_login_core::{CoreError, CoreResult, EnvSource, HostLogSink, LogLevel};
use tracing::{debug, warn};

use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::{
    FaultPayload, LogRequest, MINIMUM_PROTOCOL_VERSION, Message, MessageMethod,
    MessageResponseCode, MessageType, PROTOCOL_VERSION, ProtocolVersion, StatusResponse,
};

/// Overrides the handshake timeout, in whole seconds.
pub const HANDSHAKE_TIMEOUT_ENV: &str = "NUGET_PLUGIN_HANDSHAKE_TIMEOUT_IN_SECONDS";

/// Overrides the outbound request timeout, in whole seconds.
pub const REQUEST_TIMEOUT_ENV: &str = "NUGET_PLUGIN_REQUEST_TIMEOUT_IN_SECONDS";

/// Connection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Highest version offered in the handshake.
    pub protocol_version: ProtocolVersion,
    /// Lowest version accepted in the handshake.
    pub minimum_protocol_version: ProtocolVersion,
    /// How long the plugin's own handshake may take.
    pub handshake_timeout: Duration,
    /// How long any other outbound request may take.
    pub request_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            minimum_protocol_version: MINIMUM_PROTOCOL_VERSION,
            handshake_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectionOptions {
    /// Defaults with timeouts overridden from the environment. Values that
    /// are not positive integers are ignored.
    #[must_use]
    pub fn from_env(env: &dyn EnvSource) -> Self {
        let seconds = |key: &str| {
            env.var(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
        };

        let defaults = Self::default();
        Self {
            handshake_timeout: seconds(HANDSHAKE_TIMEOUT_ENV).unwrap_or(defaults.handshake_timeout),
            request_timeout: seconds(REQUEST_TIMEOUT_ENV).unwrap_or(defaults.request_timeout),
            ..defaults
        }
    }
}

/// A live connection. Cheap to share behind an `Arc`.
pub struct Connection {
    outbound: mpsc::UnboundedSender<Message>,
    pending: Arc<DashMap<String, oneshot::Sender<Message>>>,
    closed: CancellationToken,
    request_timeout: Duration,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("pending", &self.pending.len())
            .field("closed", &self.closed.is_cancelled())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Connection {
    /// Spawn the reader and writer tasks and return the connection with the
    /// channel of inbound requests and cancels.
    ///
    /// The connection closes on end of input, on a read error, on
    /// [`Connection::close`], or when `shutdown` fires.
    pub fn start<R, W>(
        reader: R,
        writer: W,
        shutdown: &CancellationToken,
        request_timeout: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Message>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(DashMap::new());
        let closed = shutdown.child_token();

        tokio::spawn(write_loop(writer, outbound_rx, closed.clone()));
        tokio::spawn(read_loop(
            reader,
            inbound_tx,
            Arc::clone(&pending),
            closed.clone(),
        ));

        let connection = Arc::new(Self {
            outbound: outbound_tx,
            pending,
            closed,
            request_timeout,
        });
        (connection, inbound_rx)
    }

    /// Whether the connection is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait until the connection closes.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Close the connection. Pending outbound requests fail with
    /// [`ProtocolError::ConnectionClosed`].
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Send a request and wait for its response payload, using the default
    /// request timeout.
    ///
    /// # Errors
    ///
    /// Fails when the connection closes, the peer faults or times out, or the
    /// response payload does not decode.
    pub async fn send_request<Req, Resp>(
        &self,
        method: MessageMethod,
        payload: &Req,
    ) -> ProtocolResult<Resp>
    where
        Req: Serialize + Sync + ?Sized,
        Resp: DeserializeOwned,
    {
        self.send_request_with_timeout(method, payload, self.request_timeout)
            .await
    }

    /// [`Connection::send_request`] with an explicit timeout.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send_request`].
    pub async fn send_request_with_timeout<Req, Resp>(
        &self,
        method: MessageMethod,
        payload: &Req,
        timeout: Duration,
    ) -> ProtocolResult<Resp>
    where
        Req: Serialize + Sync + ?Sized,
        Resp: DeserializeOwned,
    {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let message = Message::request(request_id.clone(), method.clone(), payload)?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);
        if self.outbound.send(message).is_err() {
            self.pending.remove(&request_id);
            return Err(ProtocolError::ConnectionClosed);
        }

        let reply = tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(ProtocolError::ConnectionClosed),
            reply = tokio::time::timeout(timeout, rx) => match reply {
                Ok(Ok(reply)) => Ok(reply),
                // Sender dropped: the reader cleared the table on close.
                Ok(Err(_)) => Err(ProtocolError::ConnectionClosed),
                Err(_) => Err(ProtocolError::Timeout {
                    method: method.to_string(),
                    after: timeout,
                }),
            },
        };
        self.pending.remove(&request_id);

        let reply = reply?;
        if reply.kind == MessageType::Fault {
            let message = reply
                .payload_as::<FaultPayload>()
                .map(|f| f.message)
                .unwrap_or_default();
            return Err(ProtocolError::Fault(message));
        }
        reply.payload_as()
    }

    /// Answer `request` with `payload`.
    ///
    /// # Errors
    ///
    /// Fails when the payload does not serialize or the connection is closed.
    pub fn send_response<Resp: Serialize + ?Sized>(
        &self,
        request: &Message,
        payload: &Resp,
    ) -> ProtocolResult<()> {
        self.send(Message::response(request, payload)?)
    }

    /// Answer `request` with a fault.
    ///
    /// # Errors
    ///
    /// Fails when the connection is closed.
    pub fn send_fault(&self, request: &Message, message: impl Into<String>) -> ProtocolResult<()> {
        self.send(Message::fault(request, message))
    }

    fn send(&self, message: Message) -> ProtocolResult<()> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.outbound
            .send(message)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }
}

#[async_trait]
impl HostLogSink for Connection {
    async fn send_log(&self, level: LogLevel, message: &str) -> CoreResult<()> {
        let request = LogRequest {
            log_level: level,
            message: message.to_string(),
        };
        let response: StatusResponse = self
            .send_request(MessageMethod::Log, &request)
            .await
            .map_err(|e| CoreError::HostSink(e.to_string()))?;
        match response.response_code {
            MessageResponseCode::Success => Ok(()),
            code => Err(CoreError::HostSink(format!(
                "the host answered the log request with {code:?}"
            ))),
        }
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    closed: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            biased;
            message = outbound.recv() => message,
            () = closed.cancelled() => break,
        };
        let Some(message) = message else {
            break;
        };
        if let Err(e) = write_line(&mut writer, &message).await {
            debug!(error = %e, "writer task: send failed");
            closed.cancel();
            break;
        }
    }

    // Flush whatever was queued before the close, e.g. a final fault.
    while let Ok(message) = outbound.try_recv() {
        if write_line(&mut writer, &message).await.is_err() {
            break;
        }
    }
    debug!("writer task stopped");
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> ProtocolResult<()> {
    let mut line = message.to_line()?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_loop<R>(
    reader: R,
    inbound: mpsc::UnboundedSender<Message>,
    pending: Arc<DashMap<String, oneshot::Sender<Message>>>,
    closed: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = tokio::select! {
            biased;
            () = closed.cancelled() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("input closed");
                break;
            },
            Err(e) => {
                warn!(error = %e, "failed to read from the host");
                break;
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        let message = match Message::from_line(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "failed to parse a host message");
                continue;
            },
        };

        match message.kind {
            MessageType::Response | MessageType::Fault => {
                match pending.remove(&message.request_id) {
                    Some((_, tx)) => {
                        let _ = tx.send(message);
                    },
                    None => debug!(
                        request_id = %message.request_id,
                        "no pending request for response"
                    ),
                }
            },
            MessageType::Progress => {
                debug!(request_id = %message.request_id, "progress received");
            },
            MessageType::Request | MessageType::Cancel => {
                if inbound.send(message).is_err() {
                    break;
                }
            },
        }
    }

    closed.cancel();
    // Dropping the senders fails every outstanding request.
    pending.clear();
    debug!("reader task stopped");
}
