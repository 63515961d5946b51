//! Prelude module - commonly used types for convenient import.
//!
//! Use `use token_login_core::prelude::*;` to import all essential types.

// Errors
pub use crate::{CoreError, CoreResult};

// Resolution
pub use crate::{
    CredentialProviderResult, CredentialResolution, CredentialResolver, GitHubActionsResolver,
    ResolverRegistry,
};

// HTTP
pub use crate::{ReqwestTokenFetcher, TokenFetcher};

// Logging
pub use crate::{HostLogSink, LogLevel, PluginLogger};

// Environment
pub use crate::{EnvSource, ProcessEnv, Settings};
