//! Per-request authentication overrides.
//!
//! A run configuration may carry one override per tool source; the source
//! applies it to outbound calls for that run only, never mutating its own
//! static credentials.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tool::ToolContext;

/// Where an API key is placed on the outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    Header,
    Query,
}

/// Produces a bearer token at call time, e.g. minting a short-lived JWT
/// with request-scoped claims.
#[async_trait::async_trait]
pub trait TokenProducer: Send + Sync {
    async fn produce(&self, ctx: &ToolContext) -> Result<String>;
}

/// A bearer token, either fixed or minted per call.
#[derive(Clone)]
pub enum BearerSource {
    Static(String),
    Producer(Arc<dyn TokenProducer>),
}

impl BearerSource {
    pub async fn resolve(&self, ctx: &ToolContext) -> Result<String> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::Producer(producer) => producer.produce(ctx).await,
        }
    }
}

impl std::fmt::Debug for BearerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print token material.
        match self {
            Self::Static(_) => f.write_str("BearerSource::Static(***)"),
            Self::Producer(_) => f.write_str("BearerSource::Producer(..)"),
        }
    }
}

/// Authentication override for one tool source in one run.
#[derive(Debug, Clone, Default)]
pub enum AuthOverride {
    /// Strip authentication for this run's calls.
    #[default]
    None,
    Bearer {
        source: BearerSource,
    },
    ApiKey {
        name: String,
        location: ApiKeyLocation,
        key: String,
    },
}

impl AuthOverride {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            source: BearerSource::Static(token.into()),
        }
    }

    pub fn bearer_producer(producer: Arc<dyn TokenProducer>) -> Self {
        Self::Bearer {
            source: BearerSource::Producer(producer),
        }
    }

    pub fn api_key(
        name: impl Into<String>,
        location: ApiKeyLocation,
        key: impl Into<String>,
    ) -> Self {
        Self::ApiKey {
            name: name.into(),
            location,
            key: key.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::RunConfig;
    use uuid::Uuid;

    fn ctx() -> ToolContext {
        ToolContext {
            run_id: Uuid::new_v4(),
            thread_id: Uuid::new_v4(),
            config: Arc::new(RunConfig::new("m")),
        }
    }

    #[tokio::test]
    async fn static_bearer_resolves() {
        let source = BearerSource::Static("tok_abc".into());
        assert_eq!(source.resolve(&ctx()).await.unwrap(), "tok_abc");
    }

    #[tokio::test]
    async fn producer_bearer_sees_context() {
        struct RunIdToken;
        #[async_trait::async_trait]
        impl TokenProducer for RunIdToken {
            async fn produce(&self, ctx: &ToolContext) -> Result<String> {
                Ok(format!("run-{}", ctx.run_id))
            }
        }
        let source = BearerSource::Producer(Arc::new(RunIdToken));
        let c = ctx();
        assert_eq!(source.resolve(&c).await.unwrap(), format!("run-{}", c.run_id));
    }

    #[test]
    fn debug_redacts_token() {
        let s = format!("{:?}", BearerSource::Static("secret".into()));
        assert!(!s.contains("secret"));
    }
}
