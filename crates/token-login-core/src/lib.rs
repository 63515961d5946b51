//! Token Login Core - credential resolution for the NuGet token credential
//! provider.
//!
//! This crate holds everything that does not depend on the host protocol:
//!
//! - the `NUGET_TOKEN_INFO` payload model ([`TokenInfo`]);
//! - the per-type [`CredentialResolver`]s and the [`CredentialResolution`]
//!   flow that picks one;
//! - the redacting [`PluginLogger`] with its file and host sinks.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use token_login_core::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> CoreResult<()> {
//! let logger = PluginLogger::new(&Settings::from_env(), &CancellationToken::new());
//! let registry = ResolverRegistry::new().with(Arc::new(GitHubActionsResolver::new(
//!     logger.clone(),
//!     Arc::new(ReqwestTokenFetcher::new()?),
//! )));
//! let resolution = CredentialResolution::new(logger, registry, Arc::new(ProcessEnv));
//!
//! match resolution.resolve("https://api.nuget.org/v3/index.json").await {
//!     CredentialProviderResult::Success { .. } => println!("got a token"),
//!     CredentialProviderResult::Error { message } => eprintln!("{message}"),
//!     CredentialProviderResult::NotSupported => {},
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod fetch;
pub mod level;
pub mod logger;
pub mod prelude;
pub mod redact;
pub mod resolution;
pub mod resolver;
pub mod result;
pub mod settings;
pub mod token_info;

pub use error::{CoreError, CoreResult};
pub use fetch::{ReqwestTokenFetcher, TokenEndpointResponse, TokenFetcher};
pub use level::LogLevel;
pub use logger::{HostLogSink, PluginLogger};
pub use redact::RedactionSet;
pub use resolution::CredentialResolution;
pub use resolver::{CredentialResolver, GitHubActionsResolver, ResolverRegistry};
pub use result::CredentialProviderResult;
pub use settings::{EnvSource, ProcessEnv, Settings};
pub use token_info::{GitHubActionsV1TokenInfo, TokenInfo, TokenInfoHeader};
