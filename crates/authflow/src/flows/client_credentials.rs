//! Client credentials grant (RFC 6749 §4.4)
//!
//! The simplest grant: no user, no redirect, a single POST authenticated
//! with the client's own credentials.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::engine::FlowEngine;
use crate::error::{Error, Result};
use crate::params::RequestParams;
use crate::request::TokenJson;

use super::GrantFlow;

/// The client credentials grant.
pub struct ClientCredentialsFlow {
    engine: Arc<FlowEngine>,
}

impl ClientCredentialsFlow {
    /// Create a client credentials flow on `engine`.
    #[must_use]
    pub fn new(engine: Arc<FlowEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl GrantFlow for ClientCredentialsFlow {
    fn engine(&self) -> &Arc<FlowEngine> {
        &self.engine
    }

    fn grant_type(&self) -> &'static str {
        "client_credentials"
    }

    async fn run_grant(&self, extra: &RequestParams) -> Result<Option<TokenJson>> {
        let request = {
            let config = self.engine.config().await;
            config.require_client_id()?;
            if config.client_secret.is_none() {
                return Err(Error::NoClientSecret);
            }

            let mut body = RequestParams::new();
            if let Some(scope) = config.scope.as_deref().filter(|s| !s.is_empty()) {
                body.set("scope", scope);
            }
            body.merge(extra);
            FlowEngine::build_token_request(
                &config,
                config.effective_token_url(),
                "client_credentials",
                body,
            )
        };

        debug!("requesting token with client credentials");
        self.engine.obtain_token(request).await.map(Some)
    }
}
