//! Redacting plugin logger.
//!
//! Log lines fan out to two sinks:
//!
//! - an optional append-only file, written synchronously at log time;
//! - the host connection, fed by a single pump task draining an unbounded
//!   queue. The pump only starts once the host has told us its log level;
//!   sending log requests earlier hangs the connection.
//!
//! Redaction runs when a line reaches a sink, not when it is enqueued, so a
//! secret discovered after a line was queued is still scrubbed before the
//! host sees it.
//!
//! The logger is an explicit context object: clone it into every handler and
//! resolver that needs it.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::level::LogLevel;
use crate::redact::RedactionSet;
use crate::settings::{LOG_FILE_ENV, NO_REDACT_ENV, Settings};

/// Prefix the host shows in front of every forwarded line.
const HOST_PREFIX: &str = "    [token-login] ";

/// Attempts made for each file append.
const FILE_WRITE_ATTEMPTS: u32 = 5;

/// Pause between file append attempts.
const FILE_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Poll interval of [`PluginLogger::pause_for_empty`].
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Outbound log delivery to the host.
#[async_trait]
pub trait HostLogSink: Send + Sync {
    /// Deliver one already-redacted line and wait for the host to accept it.
    async fn send_log(&self, level: LogLevel, message: &str) -> CoreResult<()>;
}

/// One queued line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    /// Severity.
    pub level: LogLevel,
    /// Unredacted text, including the host prefix.
    pub text: String,
}

struct FileSink {
    path: PathBuf,
}

impl FileSink {
    /// Resolve the path, create its directory, and probe it with an empty
    /// append.
    fn open(path: &Path) -> CoreResult<Self> {
        let path = std::path::absolute(path)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let sink = Self { path };
        sink.append("")?;
        Ok(sink)
    }

    /// Best-effort append with a short bounded retry.
    fn append(&self, text: &str) -> CoreResult<()> {
        let mut last_error = None;
        for attempt in 0..FILE_WRITE_ATTEMPTS {
            if attempt > 0 {
                std::thread::sleep(FILE_RETRY_DELAY);
            }
            let result = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .and_then(|mut file| file.write_all(text.as_bytes()));
            match result {
                Ok(()) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.map_or_else(
            || CoreError::Io(std::io::Error::other("file append failed")),
            CoreError::Io,
        ))
    }
}

struct Inner {
    tx: mpsc::UnboundedSender<LogMessage>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<LogMessage>>>,
    queued: AtomicUsize,
    redactions: RedactionSet,
    file: Option<FileSink>,
    level: AtomicU8,
    host: OnceLock<Arc<dyn HostLogSink>>,
    started: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
    /// Fired by [`PluginLogger::stop`]: no more lines will be accepted.
    complete: CancellationToken,
    /// Hard stop: the pump quits without draining.
    stop: CancellationToken,
}

impl Inner {
    fn write(&self, level: LogLevel, message: &str, only_file: bool) {
        if let Some(file) = &self.file {
            let line = format!(
                "[{} {} {}] {}\n",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                std::process::id(),
                level.prefix(),
                self.redactions.redact(message),
            );
            // best effort
            let _ = file.append(&line);
        }

        if !only_file {
            self.queued.fetch_add(1, Ordering::SeqCst);
            let queued = self.tx.send(LogMessage {
                level,
                text: format!("{HOST_PREFIX}{message}"),
            });
            if queued.is_err() {
                self.queued.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.level.load(Ordering::SeqCst))
    }
}

/// Leveled, redacting logger shared by the whole process.
#[derive(Clone)]
pub struct PluginLogger {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PluginLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLogger")
            .field("level", &self.level())
            .field("started", &self.is_started())
            .field("file", &self.inner.file.as_ref().map(|s| &s.path))
            .field("redactions", &self.inner.redactions)
            .finish_non_exhaustive()
    }
}

impl PluginLogger {
    /// Create a logger. The pump stops early when `shutdown` fires.
    ///
    /// Problems with the log file are reported as log lines and disable the
    /// file sink; they never fail construction.
    #[must_use]
    pub fn new(settings: &Settings, shutdown: &CancellationToken) -> Self {
        let mut notices = Vec::new();

        let file = settings
            .log_file
            .as_ref()
            .and_then(|path| match FileSink::open(path) {
                Ok(sink) => {
                    notices.push(format!(
                        "{LOG_FILE_ENV} is enabled. Logs will be written to {}.",
                        sink.path.display()
                    ));
                    Some(sink)
                },
                Err(e) => {
                    notices.push(format!(
                        "Using {LOG_FILE_ENV} to write to {} failed. {e}",
                        path.display()
                    ));
                    None
                },
            });

        if !settings.redact {
            notices.push(format!(
                "{NO_REDACT_ENV} is enabled. Sensitive values will not be redacted from logs."
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let logger = Self {
            inner: Arc::new(Inner {
                tx,
                rx: Mutex::new(Some(rx)),
                queued: AtomicUsize::new(0),
                redactions: RedactionSet::new(settings.redact),
                file,
                level: AtomicU8::new(LogLevel::Debug.as_u8()),
                host: OnceLock::new(),
                started: AtomicBool::new(false),
                pump: Mutex::new(None),
                complete: CancellationToken::new(),
                stop: shutdown.child_token(),
            }),
        };

        for notice in notices {
            logger.log(LogLevel::Minimal, notice);
        }

        logger
    }

    /// Connect the host sink. Only the first call has an effect.
    pub fn attach_host(&self, sink: Arc<dyn HostLogSink>) {
        if self.inner.host.set(sink).is_err() {
            debug!("host log sink already attached");
        }
    }

    /// Minimum level forwarded to the host.
    #[must_use]
    pub fn level(&self) -> LogLevel {
        self.inner.level()
    }

    /// Set the minimum level forwarded to the host.
    pub fn set_level(&self, level: LogLevel) {
        self.inner.level.store(level.as_u8(), Ordering::SeqCst);
    }

    /// Whether the pump has been started.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Lines enqueued but not yet taken by the pump.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    /// The redaction set.
    #[must_use]
    pub fn redactions(&self) -> &RedactionSet {
        &self.inner.redactions
    }

    /// Add a secret value (and its JSON forms) to the redaction set.
    ///
    /// Call this before logging anything that may contain the value.
    pub fn add_redacted_value(&self, value: &str) {
        self.inner.redactions.add(value);
    }

    /// Redact `message` with the current set.
    #[must_use]
    pub fn redact(&self, message: &str) -> String {
        self.inner.redactions.redact(message)
    }

    /// Log a line to every sink.
    pub fn log(&self, level: LogLevel, message: impl AsRef<str>) {
        self.inner.write(level, message.as_ref(), false);
    }

    /// Log at [`LogLevel::Debug`].
    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Debug, message);
    }

    /// Log at [`LogLevel::Information`].
    pub fn information(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Information, message);
    }

    /// Log at [`LogLevel::Minimal`].
    pub fn minimal(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Minimal, message);
    }

    /// Log at [`LogLevel::Warning`].
    pub fn warning(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Warning, message);
    }

    /// Log at [`LogLevel::Error`].
    pub fn error(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Error, message);
    }

    /// Serialize a value to JSON and redact it.
    #[must_use]
    pub fn serialize_for_logging<T: Serialize + ?Sized>(&self, value: &T) -> String {
        match serde_json::to_string(value) {
            Ok(json) => self.redact(&json),
            Err(e) => format!("<unserializable: {e}>"),
        }
    }

    /// Log the decoded header and payload of a compact signed token.
    ///
    /// The token itself should already be in the redaction set.
    pub fn log_jwt_claims(&self, label: &str, token: &str) {
        match decode_jwt_segments(token) {
            Ok((header, payload)) => {
                self.debug(format!("Header in the {label} JWT: {header}"));
                self.debug(format!("Payload in the {label} JWT: {payload}"));
            },
            Err(e) => self.information(format!(
                "Could not parse the {label} JWT. It may be invalid. {e}"
            )),
        }
    }

    /// Start the host pump. Idempotent. Must be called inside a tokio runtime.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let rx = self
            .inner
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(rx) = rx else {
            return;
        };

        let handle = tokio::spawn(pump(Arc::clone(&self.inner), rx));
        *self
            .inner
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Wait until the queue is empty, the pump is not running, or `max`
    /// elapsed, polling every 200ms.
    pub async fn pause_for_empty(&self, max: Duration) {
        if max.is_zero() {
            return;
        }

        let started_at = Instant::now();
        loop {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            if !self.is_started() || started_at.elapsed() >= max || self.queued() == 0 {
                break;
            }
        }
    }

    /// Close the queue and let the pump drain for up to `deadline`, then
    /// force it to stop. Lines still queued after that are dropped.
    pub async fn stop(&self, deadline: Duration) {
        let handle = self
            .inner
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.inner.complete.cancel();

        if let Some(mut handle) = handle {
            if tokio::time::timeout(deadline, &mut handle).await.is_err() {
                debug!("log pump did not drain in time, cancelling");
                self.inner.stop.cancel();
                let _ = handle.await;
            }
        }

        self.inner.stop.cancel();
    }
}

async fn pump(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<LogMessage>) {
    let mut completing = false;
    loop {
        let next = tokio::select! {
            biased;
            () = inner.stop.cancelled() => break,
            () = inner.complete.cancelled(), if !completing => {
                // Stop accepting new lines; buffered ones are still received.
                completing = true;
                rx.close();
                continue;
            },
            message = rx.recv() => message,
        };

        let Some(message) = next else {
            break;
        };
        inner.queued.fetch_sub(1, Ordering::SeqCst);

        if message.level < inner.level() {
            continue;
        }
        let Some(host) = inner.host.get() else {
            continue;
        };

        let text = inner.redactions.redact(&message.text);
        tokio::select! {
            biased;
            () = inner.stop.cancelled() => break,
            result = host.send_log(message.level, &text) => {
                if let Err(e) = result {
                    warn!(error = %e, "failed to deliver log line to host");
                    inner.write(
                        LogLevel::Error,
                        &format!("Failed to write log to plugin host. {e}"),
                        true,
                    );
                }
            },
        }
    }
    debug!("log pump stopped");
}

/// Decode the header and payload segments of a compact signed token.
///
/// # Errors
///
/// Returns [`CoreError::InvalidJwt`] when there are fewer than two segments
/// or a segment is not unpadded base64url-encoded UTF-8.
pub fn decode_jwt_segments(token: &str) -> CoreResult<(String, String)> {
    let mut pieces = token.splitn(3, '.');
    let (Some(header), Some(payload)) = (pieces.next(), pieces.next()) else {
        return Err(CoreError::InvalidJwt(
            "The token does not contain a header and payload segment.".to_string(),
        ));
    };
    Ok((decode_segment(header)?, decode_segment(payload)?))
}

fn decode_segment(segment: &str) -> CoreResult<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| CoreError::InvalidJwt(format!("Invalid base64url segment: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| CoreError::InvalidJwt(format!("Segment is not UTF-8: {e}")))
}
