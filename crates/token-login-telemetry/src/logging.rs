//! Diagnostics configuration and setup.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{TelemetryError, TelemetryResult};

/// Environment variable holding the diagnostics filter (e.g. `debug`).
pub const TRACE_ENV: &str = "NUGET_TOKEN_TRACE";

/// Environment variable redirecting diagnostics into a file.
pub const TRACE_FILE_ENV: &str = "NUGET_TOKEN_TRACE_FILE";

/// Environment variable selecting the output format (`compact`, `json`,
/// `full`).
pub const TRACE_FORMAT_ENV: &str = "NUGET_TOKEN_TRACE_FORMAT";

/// Helper to convert init errors to our error type.
fn init_err<E: std::fmt::Display>(e: E) -> TelemetryError {
    TelemetryError::InitError(e.to_string())
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Compact single-line format (default).
    #[default]
    Compact,
    /// JSON format for structured logging.
    Json,
    /// Full format with all fields.
    Full,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            "full" => Ok(Self::Full),
            other => Err(TelemetryError::ConfigError(format!(
                "unknown {TRACE_FORMAT_ENV} value '{other}'"
            ))),
        }
    }
}

/// Diagnostics output target. Never stdout: that is the protocol channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LogTarget {
    /// Log to stderr.
    #[default]
    Stderr,
    /// Append to a single file (no rotation).
    File(PathBuf),
}

/// Diagnostics configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Level filter (e.g., "info", "debug", "trace").
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Output target.
    pub target: LogTarget,
    /// Directive overrides (e.g., `token_login_plugin=trace`).
    pub directives: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new("info")
    }
}

impl LogConfig {
    /// Create a new config with the specified level.
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            directives: Vec::new(),
        }
    }

    /// Build a config from the process environment.
    ///
    /// Returns `Ok(None)` when diagnostics are not requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the format variable holds an unknown value.
    pub fn from_env() -> TelemetryResult<Option<Self>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    ///
    /// The filter value is split on commas: the first entry becomes the
    /// level, the rest become directives.
    ///
    /// # Errors
    ///
    /// Returns an error if the format variable holds an unknown value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> TelemetryResult<Option<Self>> {
        let Some(filter) = lookup(TRACE_ENV) else {
            return Ok(None);
        };
        let mut parts = filter
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty());
        let Some(level) = parts.next() else {
            return Ok(None);
        };
        let mut config = Self::new(level);
        for directive in parts {
            config = config.with_directive(directive);
        }

        if let Some(format) = lookup(TRACE_FORMAT_ENV).filter(|f| !f.trim().is_empty()) {
            config = config.with_format(format.parse()?);
        }

        if let Some(path) = lookup(TRACE_FILE_ENV) {
            let path = path.trim();
            if !path.is_empty() {
                config = config.with_target(LogTarget::File(PathBuf::from(path)));
            }
        }

        Ok(Some(config))
    }

    /// Set the log format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the log target.
    #[must_use]
    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }

    /// Add a directive override.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Build the env filter from config.
    fn build_filter(&self) -> TelemetryResult<EnvFilter> {
        let mut filter = EnvFilter::try_new(&self.level)
            .map_err(|e| TelemetryError::ConfigError(e.to_string()))?;

        for directive in &self.directives {
            filter = filter.add_directive(directive.parse().map_err(
                |e: tracing_subscriber::filter::ParseError| {
                    TelemetryError::ConfigError(e.to_string())
                },
            )?);
        }

        Ok(filter)
    }
}

/// Set up diagnostics with the given configuration.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the log file cannot be
/// prepared, or a global subscriber is already installed.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = config.build_filter()?;

    match &config.target {
        LogTarget::Stderr => install(filter, config, std::io::stderr),
        LogTarget::File(path) => {
            let (dir, file_name) = split_file_path(path)?;
            std::fs::create_dir_all(&dir)?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            install(filter, config, appender)
        },
    }
}

fn split_file_path(path: &Path) -> TelemetryResult<(PathBuf, PathBuf)> {
    let file_name = path.file_name().ok_or_else(|| {
        TelemetryError::ConfigError(format!("log file path has no file name: {}", path.display()))
    })?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, PathBuf::from(file_name)))
}

fn install<W>(filter: EnvFilter, config: &LogConfig, writer: W) -> TelemetryResult<()>
where
    W: for<'a> tracing_subscriber::fmt::MakeWriter<'a> + Send + Sync + 'static,
{
    let base = fmt::layer().with_writer(writer).with_ansi(false);

    // Each format is a distinct layer type, hence the repetition.
    match config.format {
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(base.compact())
            .try_init()
            .map_err(init_err),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(base.json())
            .try_init()
            .map_err(init_err),
        LogFormat::Full => tracing_subscriber::registry()
            .with(filter)
            .with(base.with_file(true).with_line_number(true))
            .try_init()
            .map_err(init_err),
    }
}
