//! Credential resolvers, one per token-info `type`.

mod github_actions;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

pub use github_actions::{GitHubActionsResolver, audience, token_request_url};

use crate::result::CredentialProviderResult;

/// Turns a token-info payload of one `type` into a registry credential.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Name used in log lines.
    fn name(&self) -> &'static str;

    /// The token-info `type` this resolver handles.
    fn token_type(&self) -> &'static str;

    /// Secret values found in the payload. Must not fail: a payload that
    /// does not parse simply yields nothing.
    fn values_to_redact(&self, token_info_json: &str) -> Vec<String>;

    /// Perform the exchange for a payload whose `type` matched.
    async fn resolve(&self, token_info_json: &str) -> CredentialProviderResult;
}

/// Lookup table from token-info `type` to resolver.
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: BTreeMap<&'static str, Arc<dyn CredentialResolver>>,
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("types", &self.resolvers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ResolverRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver, replacing any previous one for the same type.
    #[must_use]
    pub fn with(mut self, resolver: Arc<dyn CredentialResolver>) -> Self {
        self.register(resolver);
        self
    }

    /// Register a resolver, replacing any previous one for the same type.
    pub fn register(&mut self, resolver: Arc<dyn CredentialResolver>) {
        self.resolvers.insert(resolver.token_type(), resolver);
    }

    /// Resolver for a token-info `type`.
    #[must_use]
    pub fn get(&self, token_type: &str) -> Option<&Arc<dyn CredentialResolver>> {
        self.resolvers.get(token_type)
    }

    /// Ask every resolver for secrets in the payload.
    #[must_use]
    pub fn values_to_redact(&self, token_info_json: &str) -> Vec<String> {
        self.resolvers
            .values()
            .flat_map(|r| r.values_to_redact(token_info_json))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, &'static str);

    #[async_trait]
    impl CredentialResolver for Fixed {
        fn name(&self) -> &'static str {
            "Fixed"
        }

        fn token_type(&self) -> &'static str {
            self.0
        }

        fn values_to_redact(&self, _token_info_json: &str) -> Vec<String> {
            vec![self.1.to_string()]
        }

        async fn resolve(&self, _token_info_json: &str) -> CredentialProviderResult {
            CredentialProviderResult::NotSupported
        }
    }

    #[test]
    fn test_lookup_by_type() {
        let registry = ResolverRegistry::new()
            .with(Arc::new(Fixed("A", "a-secret")))
            .with(Arc::new(Fixed("B", "b-secret")));

        assert!(registry.get("A").is_some());
        assert!(registry.get("a").is_none());
        assert_eq!(registry.get("B").unwrap().token_type(), "B");
    }

    #[test]
    fn test_values_to_redact_asks_every_resolver() {
        let registry = ResolverRegistry::new()
            .with(Arc::new(Fixed("A", "a-secret")))
            .with(Arc::new(Fixed("B", "b-secret")));
        assert_eq!(
            registry.values_to_redact("{}"),
            vec!["a-secret".to_string(), "b-secret".to_string()]
        );
    }
}
