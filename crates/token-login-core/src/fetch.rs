//! HTTP access to token-issuing endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use url::Url;

use crate::error::CoreResult;

/// `Accept` header sent to the token endpoint.
pub const TOKEN_ACCEPT: &str = "application/json; api-version=2.0";

/// Default timeout of one token request.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Raw response of a token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEndpointResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
}

impl TokenEndpointResponse {
    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Canonical reason phrase of the status, if known.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        reqwest::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown")
    }
}

/// Performs the authenticated GET against a token endpoint.
#[async_trait]
pub trait TokenFetcher: Send + Sync {
    /// Issue `GET url` with `Authorization: Bearer <bearer>`.
    ///
    /// Non-2xx statuses are returned, not turned into errors.
    async fn fetch(&self, url: &Url, bearer: &str) -> CoreResult<TokenEndpointResponse>;
}

/// [`TokenFetcher`] backed by `reqwest`. Every call is an independent
/// request; nothing is cached.
#[derive(Debug, Clone)]
pub struct ReqwestTokenFetcher {
    client: reqwest::Client,
}

impl ReqwestTokenFetcher {
    /// Build a fetcher with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new() -> CoreResult<Self> {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    /// Build a fetcher with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn with_timeout(timeout: Duration) -> CoreResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TokenFetcher for ReqwestTokenFetcher {
    async fn fetch(&self, url: &Url, bearer: &str) -> CoreResult<TokenEndpointResponse> {
        let response = self
            .client
            .get(url.as_str())
            .bearer_auth(bearer)
            .header(ACCEPT, TOKEN_ACCEPT)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(TokenEndpointResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server};

    use super::*;

    #[tokio::test]
    async fn test_fetch_sends_bearer_and_accept() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/token")
            .match_query(Matcher::UrlEncoded(
                "audience".into(),
                "me@api.nuget.org".into(),
            ))
            .match_header("authorization", "Bearer runtime-token")
            .match_header("accept", TOKEN_ACCEPT)
            .with_status(200)
            .with_body(r#"{"value":"tok123"}"#)
            .create_async()
            .await;

        let url = Url::parse(&format!(
            "{}/token?audience=me%40api.nuget.org",
            server.url()
        ))
        .unwrap();
        let fetcher = ReqwestTokenFetcher::new().unwrap();
        let response = fetcher.fetch(&url, "runtime-token").await.unwrap();

        mock.assert_async().await;
        assert!(response.is_success());
        assert_eq!(response.body, r#"{"value":"tok123"}"#);
    }

    #[tokio::test]
    async fn test_fetch_returns_error_statuses() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/token")
            .with_status(403)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/token", server.url())).unwrap();
        let fetcher = ReqwestTokenFetcher::new().unwrap();
        let response = fetcher.fetch(&url, "t").await.unwrap();
        assert_eq!(response.status, 403);
        assert!(!response.is_success());
        assert_eq!(response.reason(), "Forbidden");
    }

    #[tokio::test]
    async fn test_each_fetch_is_a_new_request() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/token")
            .with_status(200)
            .with_body(r#"{"value":"x"}"#)
            .expect(2)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/token", server.url())).unwrap();
        let fetcher = ReqwestTokenFetcher::new().unwrap();
        fetcher.fetch(&url, "t").await.unwrap();
        fetcher.fetch(&url, "t").await.unwrap();
        mock.assert_async().await;
    }

    #[test]
    fn test_reason_for_unknown_status() {
        let response = TokenEndpointResponse {
            status: 599,
            body: String::new(),
        };
        assert_eq!(response.reason(), "Unknown");
    }
}
