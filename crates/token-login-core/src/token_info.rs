//! The token-info payload: which credential scheme to use and its inputs.
//!
//! The payload arrives as JSON in `NUGET_TOKEN_INFO`. Every variant carries
//! `type` and `packageSource`; the `type` tag selects the variant and
//! therefore which extra fields are required.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Tag of the GitHub Actions variant.
pub const GITHUB_ACTIONS_V1: &str = "GitHubActionsV1";

/// Fields shared by every token-info variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfoHeader {
    /// Variant discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// Absolute URL of the package source the credential is for.
    pub package_source: String,
}

impl TokenInfoHeader {
    /// Parse only the shared fields, ignoring variant-specific ones.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidTokenInfo`] for malformed JSON or missing
    /// `type` / `packageSource`.
    pub fn parse(json: &str) -> CoreResult<Self> {
        serde_json::from_str(json).map_err(|e| CoreError::InvalidTokenInfo(e.to_string()))
    }
}

/// A fully parsed token-info payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum TokenInfo {
    /// Exchange a GitHub Actions runtime token for a registry token.
    #[serde(rename = "GitHubActionsV1")]
    GitHubActionsV1(GitHubActionsV1TokenInfo),
}

impl TokenInfo {
    /// Parse a complete payload. An unknown `type` or a missing
    /// variant-specific field is an error, never a default.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidTokenInfo`] when the JSON does not match
    /// any variant.
    pub fn parse(json: &str) -> CoreResult<Self> {
        serde_json::from_str(json).map_err(|e| CoreError::InvalidTokenInfo(e.to_string()))
    }

    /// The variant discriminator.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GitHubActionsV1(_) => GITHUB_ACTIONS_V1,
        }
    }

    /// The package source this payload targets.
    #[must_use]
    pub fn package_source(&self) -> &str {
        match self {
            Self::GitHubActionsV1(info) => &info.package_source,
        }
    }
}

/// GitHub Actions OIDC exchange inputs.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubActionsV1TokenInfo {
    /// Absolute URL of the package source.
    pub package_source: String,
    /// Registry username; combined with the source host into the audience.
    pub username: String,
    /// Compact signed token issued by the CI runtime.
    pub runtime_token: String,
    /// Absolute HTTPS URL of the token-issuing endpoint.
    pub token_url: String,
}

impl fmt::Debug for GitHubActionsV1TokenInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubActionsV1TokenInfo")
            .field("package_source", &self.package_source)
            .field("username", &self.username)
            .field("runtime_token", &"***")
            .field("token_url", &self.token_url)
            .finish()
    }
}
