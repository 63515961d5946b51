//! Token Login Telemetry - process diagnostics for the credential provider.
//!
//! The plugin's stdout is the host protocol channel, so diagnostics can only
//! go to stderr or a file. They are disabled unless `NUGET_TOKEN_TRACE` is
//! set, and they never carry protocol payloads: anything that may contain a
//! secret goes through the redacting logger in `token-login-core` instead.
//!
//! # Example
//!
//! ```rust,no_run
//! use token_login_telemetry::{LogConfig, RequestContext, setup_logging};
//!
//! # fn main() -> Result<(), token_login_telemetry::TelemetryError> {
//! if let Some(config) = LogConfig::from_env()? {
//!     setup_logging(&config)?;
//! }
//!
//! let ctx = RequestContext::new("GetAuthenticationCredentials", "42");
//! let span = ctx.span();
//! let _guard = span.enter();
//! tracing::debug!("dispatching");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod context;
mod error;
mod logging;

pub use context::RequestContext;
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    LogConfig, LogFormat, LogTarget, TRACE_ENV, TRACE_FILE_ENV, TRACE_FORMAT_ENV, setup_logging,
};
