//! The credential resolution flow shared by every token-info type.

use std::sync::Arc;

use tracing::debug;

use crate::logger::PluginLogger;
use crate::resolver::ResolverRegistry;
use crate::result::CredentialProviderResult;
use crate::settings::{EnvSource, TOKEN_INFO_ENV};
use crate::token_info::TokenInfoHeader;

/// Resolves a credential for a package source URL from `NUGET_TOKEN_INFO`.
///
/// The token info is read on every call, never cached.
pub struct CredentialResolution {
    logger: PluginLogger,
    registry: ResolverRegistry,
    env: Arc<dyn EnvSource>,
}

impl std::fmt::Debug for CredentialResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialResolution")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl CredentialResolution {
    /// Create the flow over a resolver registry and an environment source.
    #[must_use]
    pub fn new(logger: PluginLogger, registry: ResolverRegistry, env: Arc<dyn EnvSource>) -> Self {
        Self {
            logger,
            registry,
            env,
        }
    }

    /// Resolve a credential for `uri` and log the outcome.
    pub async fn resolve(&self, uri: &str) -> CredentialProviderResult {
        let result = self.resolve_inner(uri).await;
        debug!(uri, result = result.kind(), "credential resolution finished");

        match &result {
            CredentialProviderResult::NotSupported => {},
            CredentialProviderResult::Error { message } => self.logger.error(message),
            CredentialProviderResult::Success {
                token,
                success_message,
            } => {
                self.logger.add_redacted_value(token);
                self.logger.log_jwt_claims("fetched", token);
                self.logger.minimal(success_message);
            },
        }

        result
    }

    async fn resolve_inner(&self, uri: &str) -> CredentialProviderResult {
        self.logger.debug(format!(
            "Beginning authentication credential request for package source '{uri}'."
        ));

        let Some(json) = self.env.var(TOKEN_INFO_ENV).filter(|v| !v.trim().is_empty()) else {
            self.logger.warning(format!(
                "The {TOKEN_INFO_ENV} environment variable is not set. \
                 The NuGet TokenCredentialProvider will not be used."
            ));
            return CredentialProviderResult::NotSupported;
        };

        for value in self.registry.values_to_redact(&json) {
            self.logger.add_redacted_value(&value);
        }
        self.logger.debug(format!(
            "Found {TOKEN_INFO_ENV} environment variable: {}",
            self.logger.redact(&json)
        ));

        let header = match TokenInfoHeader::parse(&json) {
            Ok(header) => header,
            Err(e) => {
                return CredentialProviderResult::error(format!(
                    "The {TOKEN_INFO_ENV} environment variable could not be deserialized. {e}"
                ));
            },
        };

        if header.package_source != uri {
            self.logger.warning(format!(
                "The package source '{}' in {TOKEN_INFO_ENV} does not match '{uri}' in the \
                 credential request.",
                header.package_source
            ));
            return CredentialProviderResult::NotSupported;
        }
        self.logger
            .debug(format!("Found a matching package source in {TOKEN_INFO_ENV}."));

        let Some(resolver) = self.registry.get(&header.kind) else {
            self.logger.warning(format!(
                "The '{}' type in the {TOKEN_INFO_ENV} is not recognized type.",
                header.kind
            ));
            return CredentialProviderResult::NotSupported;
        };

        self.logger.debug(format!(
            "Starting the {} credential provider.",
            resolver.name()
        ));
        resolver.resolve(&json).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;
    use url::Url;

    use super::*;
    use crate::error::CoreResult;
    use crate::fetch::{TokenEndpointResponse, TokenFetcher};
    use crate::level::LogLevel;
    use crate::logger::HostLogSink;
    use crate::resolver::GitHubActionsResolver;
    use crate::settings::Settings;

    const SOURCE: &str = "https://api.nuget.org/v3/index.json";

    struct StaticFetcher(&'static str);

    #[async_trait]
    impl TokenFetcher for StaticFetcher {
        async fn fetch(&self, _url: &Url, _bearer: &str) -> CoreResult<TokenEndpointResponse> {
            Ok(TokenEndpointResponse {
                status: 200,
                body: self.0.to_string(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        lines: std::sync::Mutex<Vec<(LogLevel, String)>>,
    }

    #[async_trait]
    impl HostLogSink for RecordingSink {
        async fn send_log(&self, level: LogLevel, message: &str) -> CoreResult<()> {
            self.lines.lock().unwrap().push((level, message.to_string()));
            Ok(())
        }
    }

    fn token_info(package_source: &str, token_url: &str) -> String {
        serde_json::json!({
            "type": "GitHubActionsV1",
            "packageSource": package_source,
            "username": "me",
            "runtimeToken": "a.b.c",
            "tokenUrl": token_url,
        })
        .to_string()
    }

    fn resolution(token_info: Option<String>) -> (CredentialResolution, PluginLogger) {
        let logger = PluginLogger::new(&Settings::default(), &CancellationToken::new());
        let registry = ResolverRegistry::new().with(Arc::new(GitHubActionsResolver::new(
            logger.clone(),
            Arc::new(StaticFetcher(r#"{"value":"tok123"}"#)),
        )));
        let env: HashMap<String, String> = token_info
            .map(|json| (TOKEN_INFO_ENV.to_string(), json))
            .into_iter()
            .collect();
        (
            CredentialResolution::new(logger.clone(), registry, Arc::new(env)),
            logger,
        )
    }

    async fn delivered(logger: &PluginLogger) -> Vec<(LogLevel, String)> {
        let sink = Arc::new(RecordingSink::default());
        logger.attach_host(sink.clone());
        logger.start();
        logger.stop(Duration::from_secs(5)).await;
        let lines = sink.lines.lock().unwrap().clone();
        lines
    }

    #[tokio::test]
    async fn test_matching_source_fetches_token() {
        let (resolution, logger) =
            resolution(Some(token_info(SOURCE, "https://example/endpoint")));

        let result = resolution.resolve(SOURCE).await;
        assert_eq!(
            result,
            CredentialProviderResult::success(
                "tok123",
                "Successfully fetched a GitHub Actions token for me@api.nuget.org."
            )
        );

        let lines = delivered(&logger).await;
        assert!(lines.iter().all(|(_, l)| !l.contains("tok123")));
        assert!(lines.iter().all(|(_, l)| !l.contains("a.b.c")));
        assert!(lines.iter().any(|(level, l)| {
            *level == LogLevel::Minimal && l.contains("Successfully fetched")
        }));
    }

    #[tokio::test]
    async fn test_plain_http_token_url_is_error() {
        let (resolution, logger) = resolution(Some(token_info(SOURCE, "http://example/endpoint")));

        let CredentialProviderResult::Error { message } = resolution.resolve(SOURCE).await else {
            panic!("expected an error");
        };
        assert!(message.contains("not a valid HTTPS URL"));

        let lines = delivered(&logger).await;
        assert!(lines
            .iter()
            .any(|(level, l)| *level == LogLevel::Error && l.contains("not a valid HTTPS URL")));
    }

    #[tokio::test]
    async fn test_unset_variable_declines() {
        let (resolution, logger) = resolution(None);
        assert_eq!(
            resolution.resolve(SOURCE).await,
            CredentialProviderResult::NotSupported
        );

        let lines = delivered(&logger).await;
        assert!(lines.iter().any(|(level, l)| {
            *level == LogLevel::Warning && l.contains("environment variable is not set")
        }));
    }

    #[tokio::test]
    async fn test_blank_variable_declines() {
        let (resolution, _logger) = resolution(Some("   ".to_string()));
        assert_eq!(
            resolution.resolve(SOURCE).await,
            CredentialProviderResult::NotSupported
        );
    }

    #[tokio::test]
    async fn test_mismatched_source_declines() {
        let (resolution, _logger) =
            resolution(Some(token_info("https://a/index.json", "https://example/endpoint")));
        assert_eq!(
            resolution.resolve("https://b/index.json").await,
            CredentialProviderResult::NotSupported
        );
    }

    #[tokio::test]
    async fn test_source_comparison_is_exact() {
        let (resolution, _logger) =
            resolution(Some(token_info(SOURCE, "https://example/endpoint")));
        for uri in [
            "https://api.nuget.org/v3/index.json/",
            "https://API.nuget.org/v3/index.json",
            "http://api.nuget.org/v3/index.json",
        ] {
            assert_eq!(
                resolution.resolve(uri).await,
                CredentialProviderResult::NotSupported
            );
        }
    }

    #[tokio::test]
    async fn test_malformed_token_info_is_error() {
        let (resolution, _logger) = resolution(Some("{not json".to_string()));
        let CredentialProviderResult::Error { message } = resolution.resolve(SOURCE).await else {
            panic!("expected an error");
        };
        assert!(message.starts_with(
            "The NUGET_TOKEN_INFO environment variable could not be deserialized."
        ));
    }

    #[tokio::test]
    async fn test_unknown_type_declines_with_warning() {
        let json = serde_json::json!({ "type": "Other", "packageSource": SOURCE }).to_string();
        let (resolution, logger) = resolution(Some(json));
        assert_eq!(
            resolution.resolve(SOURCE).await,
            CredentialProviderResult::NotSupported
        );

        let lines = delivered(&logger).await;
        assert!(lines.iter().any(|(level, l)| {
            *level == LogLevel::Warning
                && l.ends_with("The 'Other' type in the NUGET_TOKEN_INFO is not recognized type.")
        }));
    }

    /// The payload line of a resolution over `json`, as delivered to the host.
    async fn logged_payload(json: serde_json::Value) -> String {
        let (resolution, logger) = resolution(Some(json.to_string()));
        resolution.resolve(SOURCE).await;
        let lines = delivered(&logger).await;
        lines
            .into_iter()
            .find(|(_, l)| l.contains("Found NUGET_TOKEN_INFO environment variable: {"))
            .map(|(_, l)| l)
            .unwrap()
    }

    #[tokio::test]
    async fn test_runtime_token_redacted_when_variant_fields_missing() {
        let line = logged_payload(serde_json::json!({
            "type": "GitHubActionsV1",
            "packageSource": SOURCE,
            "runtimeToken": "SECRET-RT",
            "tokenUrl": "https://example/endpoint",
        }))
        .await;
        assert!(!line.contains("SECRET-RT"), "runtime token leaked: {line}");
        assert!(line.contains(r#""runtimeToken":"REDACTED""#));
    }

    #[tokio::test]
    async fn test_runtime_token_redacted_for_unknown_type() {
        let line = logged_payload(serde_json::json!({
            "type": "GitHubActionsV2",
            "packageSource": SOURCE,
            "username": "me",
            "runtimeToken": "SECRET-RT",
            "tokenUrl": "https://example/endpoint",
        }))
        .await;
        assert!(!line.contains("SECRET-RT"), "runtime token leaked: {line}");
    }

    #[tokio::test]
    async fn test_runtime_token_redacted_before_payload_logged() {
        let (resolution, logger) =
            resolution(Some(token_info("https://a/index.json", "https://example/endpoint")));
        resolution.resolve("https://b/index.json").await;

        assert!(logger.redactions().contains("a.b.c"));
        let lines = delivered(&logger).await;
        let payload_line = lines
            .iter()
            .find(|(_, l)| l.contains("Found NUGET_TOKEN_INFO environment variable: {"))
            .unwrap();
        assert!(payload_line.1.contains(r#""runtimeToken":"REDACTED""#));
    }
}
