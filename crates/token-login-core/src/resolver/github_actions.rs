//! GitHub Actions OIDC token exchange.
//!
//! The runtime token authenticates a GET against the workflow's token URL;
//! the endpoint answers with `{"value": "<token>"}` scoped to the requested
//! audience.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use url::Url;

use crate::error::{CoreError, CoreResult};
use crate::fetch::TokenFetcher;
use crate::logger::PluginLogger;
use crate::resolver::CredentialResolver;
use crate::result::CredentialProviderResult;
use crate::token_info::{GITHUB_ACTIONS_V1, GitHubActionsV1TokenInfo, TokenInfo};

/// RFC 3986 unreserved characters stay as-is, everything else is escaped.
const URI_DATA: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Secret fields, read from any payload regardless of `type` or missing
/// fields.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretFields {
    #[serde(default)]
    runtime_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    value: Option<String>,
}

/// Compute the audience `{username}@{host}` for a package source.
///
/// Only the host takes part: scheme, port, path and query are ignored.
///
/// # Errors
///
/// Returns [`CoreError::InvalidUrl`] if the package source is not an
/// absolute URL with a host.
pub fn audience(username: &str, package_source: &str) -> CoreResult<String> {
    let url = Url::parse(package_source).map_err(|e| CoreError::InvalidUrl {
        url: package_source.to_string(),
        reason: e.to_string(),
    })?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| CoreError::InvalidUrl {
            url: package_source.to_string(),
            reason: "the URL has no host".to_string(),
        })?;
    Ok(format!("{username}@{host}"))
}

/// Append `audience=<escaped>` to the token URL, keeping any existing query.
#[must_use]
pub fn token_request_url(token_url: &Url, audience: &str) -> Url {
    let param = format!("audience={}", utf8_percent_encode(audience, URI_DATA));
    let query = match token_url.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{param}"),
        _ => param,
    };
    let mut url = token_url.clone();
    url.set_query(Some(&query));
    url
}

fn parse_https_url(raw: &str) -> Option<Url> {
    Url::parse(raw).ok().filter(|url| url.scheme() == "https")
}

/// Resolver for `GitHubActionsV1` payloads.
pub struct GitHubActionsResolver {
    logger: PluginLogger,
    fetcher: Arc<dyn TokenFetcher>,
}

impl std::fmt::Debug for GitHubActionsResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubActionsResolver").finish_non_exhaustive()
    }
}

impl GitHubActionsResolver {
    /// Create a resolver using `fetcher` for the HTTPS call.
    #[must_use]
    pub fn new(logger: PluginLogger, fetcher: Arc<dyn TokenFetcher>) -> Self {
        Self { logger, fetcher }
    }

    fn parse(token_info_json: &str) -> CoreResult<GitHubActionsV1TokenInfo> {
        match TokenInfo::parse(token_info_json)? {
            TokenInfo::GitHubActionsV1(info) => Ok(info),
        }
    }

    async fn exchange(
        &self,
        info: &GitHubActionsV1TokenInfo,
        url: &Url,
    ) -> Result<String, CredentialProviderResult> {
        self.logger
            .debug("Fetching a token from the token URL provided in NUGET_TOKEN_INFO.");
        let started = Instant::now();
        let fetch_error = |cause: &dyn std::fmt::Display| {
            CredentialProviderResult::error(format!(
                "Failed to fetch token from '{}'. {cause}",
                info.token_url
            ))
        };

        let response = self
            .fetcher
            .fetch(url, &info.runtime_token)
            .await
            .map_err(|e| fetch_error(&e))?;
        self.logger.debug(format!(
            "Token URL returned HTTP {} after {}ms.",
            response.status,
            started.elapsed().as_millis()
        ));

        if !response.is_success() {
            return Err(fetch_error(&format!(
                "Response status code does not indicate success: {} ({}).",
                response.status,
                response.reason()
            )));
        }

        let body: TokenResponse =
            serde_json::from_str(&response.body).map_err(|e| fetch_error(&e))?;
        match body.value {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(CredentialProviderResult::error(
                "No token value was found in the token URL response.",
            )),
        }
    }
}

#[async_trait]
impl CredentialResolver for GitHubActionsResolver {
    fn name(&self) -> &'static str {
        "GitHubActionsResolver"
    }

    fn token_type(&self) -> &'static str {
        GITHUB_ACTIONS_V1
    }

    fn values_to_redact(&self, token_info_json: &str) -> Vec<String> {
        serde_json::from_str::<SecretFields>(token_info_json)
            .ok()
            .and_then(|fields| fields.runtime_token)
            .into_iter()
            .collect()
    }

    async fn resolve(&self, token_info_json: &str) -> CredentialProviderResult {
        let info = match Self::parse(token_info_json) {
            Ok(info) => info,
            Err(e) => {
                return CredentialProviderResult::error(format!(
                    "Failed to read GitHub Actions NUGET_TOKEN_INFO. {e}"
                ));
            },
        };

        let Some(token_url) = parse_https_url(&info.token_url) else {
            return CredentialProviderResult::error(format!(
                "The token URL '{}' in NUGET_TOKEN_INFO is not a valid HTTPS URL.",
                info.token_url
            ));
        };

        let audience = match audience(&info.username, &info.package_source) {
            Ok(audience) => audience,
            Err(_) => {
                return CredentialProviderResult::error(format!(
                    "The package source '{}' in NUGET_TOKEN_INFO is not a valid absolute URL.",
                    info.package_source
                ));
            },
        };
        self.logger
            .debug(format!("Using audience value '{audience}' from NUGET_TOKEN_INFO."));
        self.logger.log_jwt_claims("runtime", &info.runtime_token);

        let url = token_request_url(&token_url, &audience);
        match self.exchange(&info, &url).await {
            Ok(token) => CredentialProviderResult::success(
                token,
                format!("Successfully fetched a GitHub Actions token for {audience}."),
            ),
            Err(result) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::fetch::TokenEndpointResponse;
    use crate::settings::Settings;

    /// Serves canned responses and records requested URLs.
    struct FakeFetcher {
        response: CoreResult<TokenEndpointResponse>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl FakeFetcher {
        fn ok(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(TokenEndpointResponse {
                    status,
                    body: body.to_string(),
                }),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Err(CoreError::Http(message.to_string())),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TokenFetcher for FakeFetcher {
        async fn fetch(&self, url: &Url, bearer: &str) -> CoreResult<TokenEndpointResponse> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), bearer.to_string()));
            match &self.response {
                Ok(r) => Ok(r.clone()),
                Err(e) => Err(CoreError::Http(e.to_string())),
            }
        }
    }

    fn payload(token_url: &str) -> String {
        serde_json::json!({
            "type": "GitHubActionsV1",
            "packageSource": "https://api.nuget.org/v3/index.json",
            "username": "me",
            "runtimeToken": "a.b.c",
            "tokenUrl": token_url,
        })
        .to_string()
    }

    fn resolver(fetcher: Arc<FakeFetcher>) -> GitHubActionsResolver {
        let logger = PluginLogger::new(&Settings::default(), &CancellationToken::new());
        GitHubActionsResolver::new(logger, fetcher)
    }

    #[test]
    fn test_audience_uses_host_only() {
        assert_eq!(
            audience("me", "https://api.nuget.org/v3/index.json").unwrap(),
            "me@api.nuget.org"
        );
        assert_eq!(
            audience("me", "https://Example.com:8443/feed/index.json?x=1").unwrap(),
            "me@example.com"
        );
        assert!(audience("me", "not a url").is_err());
        assert!(audience("me", "/relative/index.json").is_err());
    }

    #[test]
    fn test_token_request_url_without_query() {
        let url = Url::parse("https://example/endpoint").unwrap();
        assert_eq!(
            token_request_url(&url, "me@api.nuget.org").as_str(),
            "https://example/endpoint?audience=me%40api.nuget.org"
        );
    }

    #[test]
    fn test_token_request_url_merges_query() {
        let url = Url::parse("https://example/endpoint?api-version=2.0").unwrap();
        assert_eq!(
            token_request_url(&url, "a b~c").as_str(),
            "https://example/endpoint?api-version=2.0&audience=a%20b~c"
        );
    }

    #[test]
    fn test_values_to_redact() {
        let r = resolver(FakeFetcher::ok(200, "{}"));
        assert_eq!(
            r.values_to_redact(&payload("https://example/endpoint")),
            vec!["a.b.c".to_string()]
        );
        assert!(r.values_to_redact("{not json").is_empty());
        assert!(r.values_to_redact(r#"{"type":"GitHubActionsV1"}"#).is_empty());
    }

    #[test]
    fn test_values_to_redact_ignores_type_and_missing_fields() {
        let r = resolver(FakeFetcher::ok(200, "{}"));
        let missing_username = serde_json::json!({
            "type": "GitHubActionsV1",
            "packageSource": "https://api.nuget.org/v3/index.json",
            "runtimeToken": "x.y.z",
        })
        .to_string();
        assert_eq!(r.values_to_redact(&missing_username), vec!["x.y.z".to_string()]);

        let other_type = serde_json::json!({
            "type": "GitHubActionsV2",
            "runtimeToken": "x.y.z",
        })
        .to_string();
        assert_eq!(r.values_to_redact(&other_type), vec!["x.y.z".to_string()]);
    }

    #[tokio::test]
    async fn test_successful_exchange() {
        let fetcher = FakeFetcher::ok(200, r#"{"value":"tok123"}"#);
        let r = resolver(fetcher.clone());

        let result = r.resolve(&payload("https://example/endpoint")).await;
        assert_eq!(
            result,
            CredentialProviderResult::success(
                "tok123",
                "Successfully fetched a GitHub Actions token for me@api.nuget.org."
            )
        );
        assert_eq!(
            fetcher.calls(),
            vec![(
                "https://example/endpoint?audience=me%40api.nuget.org".to_string(),
                "a.b.c".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_plain_http_token_url_is_rejected() {
        let fetcher = FakeFetcher::ok(200, r#"{"value":"tok123"}"#);
        let r = resolver(fetcher.clone());

        let CredentialProviderResult::Error { message } =
            r.resolve(&payload("http://example/endpoint")).await
        else {
            panic!("expected an error");
        };
        assert!(message.contains("not a valid HTTPS URL"));
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_relative_token_url_is_rejected() {
        let r = resolver(FakeFetcher::ok(200, "{}"));
        let result = r.resolve(&payload("/endpoint")).await;
        assert!(matches!(result, CredentialProviderResult::Error { .. }));
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let r = resolver(FakeFetcher::ok(401, "nope"));
        let CredentialProviderResult::Error { message } =
            r.resolve(&payload("https://example/endpoint")).await
        else {
            panic!("expected an error");
        };
        assert!(message.starts_with("Failed to fetch token from 'https://example/endpoint'."));
        assert!(message.contains("401 (Unauthorized)"));
    }

    #[tokio::test]
    async fn test_transport_failure_is_error() {
        let r = resolver(FakeFetcher::failing("connection refused"));
        let CredentialProviderResult::Error { message } =
            r.resolve(&payload("https://example/endpoint")).await
        else {
            panic!("expected an error");
        };
        assert!(message.ends_with("connection refused"));
    }

    #[tokio::test]
    async fn test_missing_or_empty_token_is_error() {
        for body in [r#"{}"#, r#"{"value":""}"#, r#"{"value":null}"#] {
            let r = resolver(FakeFetcher::ok(200, body));
            assert_eq!(
                r.resolve(&payload("https://example/endpoint")).await,
                CredentialProviderResult::error(
                    "No token value was found in the token URL response."
                )
            );
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_error() {
        let r = resolver(FakeFetcher::ok(200, "<html>"));
        let result = r.resolve(&payload("https://example/endpoint")).await;
        assert!(matches!(result, CredentialProviderResult::Error { .. }));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_error() {
        let r = resolver(FakeFetcher::ok(200, "{}"));
        let CredentialProviderResult::Error { message } = r
            .resolve(r#"{"type":"GitHubActionsV1","packageSource":"https://a/"}"#)
            .await
        else {
            panic!("expected an error");
        };
        assert!(message.starts_with("Failed to read GitHub Actions NUGET_TOKEN_INFO."));
    }

    #[tokio::test]
    async fn test_each_resolution_fetches_again() {
        let fetcher = FakeFetcher::ok(200, r#"{"value":"tok"}"#);
        let r = resolver(fetcher.clone());
        let json = payload("https://example/endpoint");
        r.resolve(&json).await;
        r.resolve(&json).await;
        assert_eq!(fetcher.calls().len(), 2);
    }
}
