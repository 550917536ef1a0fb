//! Implicit grant (RFC 6749 §4.2)
//!
//! The access token arrives directly in the redirect's URL fragment, so there
//! is no code exchange: `handle_redirect_url` validates the state, checks the
//! token type, and applies the fragment parameters as the token response.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::engine::FlowEngine;
use crate::error::{Error, Result};
use crate::params::RequestParams;
use crate::request::{self, TokenJson};

use super::{check_redirect_error, parse_redirect, validate_state, AuthPresenter, GrantFlow};

/// The implicit grant.
pub struct ImplicitFlow {
    engine: Arc<FlowEngine>,
    presenter: Option<Arc<dyn AuthPresenter>>,
}

impl ImplicitFlow {
    /// Create an implicit flow on `engine`.
    #[must_use]
    pub fn new(engine: Arc<FlowEngine>) -> Self {
        Self { engine, presenter: None }
    }

    /// Attach the presenter that opens the authorize URL for the user.
    #[must_use]
    pub fn with_presenter(mut self, presenter: Arc<dyn AuthPresenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    /// Build the authorize URL for this attempt (`response_type=token`).
    ///
    /// # Errors
    /// [`Error::NoClientId`] / [`Error::NoRedirectUrl`] when unconfigured.
    pub async fn authorize_url(&self, extra: &RequestParams) -> Result<String> {
        self.engine.authorize_url("token", true, extra).await
    }

    /// Process the redirect, reading the token response from the fragment.
    ///
    /// Only `bearer` tokens are accepted. The extracted parameters are
    /// applied to the configuration exactly like a token-endpoint response,
    /// and a suspended [`GrantFlow::authorize`] call is resumed with the same
    /// outcome.
    ///
    /// # Errors
    /// [`Error::InvalidRedirectUrl`] for a fragment-less redirect,
    /// state-validation errors, [`Error::NoTokenType`] /
    /// [`Error::UnsupportedTokenType`], or a mapped server error.
    pub async fn handle_redirect_url(&self, redirect_url: &str) -> Result<TokenJson> {
        let expected = self.engine.config().await.redirect_url.unwrap_or_default();

        let result = self.extract_token(redirect_url, &expected).await;
        self.engine.resolve_redirect(result.clone());
        result
    }

    async fn extract_token(&self, redirect_url: &str, expected: &str) -> Result<TokenJson> {
        let mut params = parse_redirect(redirect_url, expected, true)?;
        check_redirect_error(&params)?;
        validate_state(&self.engine, &params)?;
        params.remove("state");

        let mut json = TokenJson::new();
        for (key, value) in params.iter() {
            json.insert(key.to_string(), serde_json::Value::String(value.to_string()));
        }
        request::validate_token_type(&json)?;
        if json.get("access_token").and_then(|v| v.as_str()).is_none() {
            return Err(Error::Generic("no access token in redirect fragment".into()));
        }

        self.engine.apply_and_persist(&json).await;
        info!("access token received in redirect fragment");
        Ok(json)
    }
}

#[async_trait]
impl GrantFlow for ImplicitFlow {
    fn engine(&self) -> &Arc<FlowEngine> {
        &self.engine
    }

    fn grant_type(&self) -> &'static str {
        "implicit"
    }

    async fn run_grant(&self, extra: &RequestParams) -> Result<Option<TokenJson>> {
        let presenter = self
            .presenter
            .as_ref()
            .ok_or_else(|| Error::Generic("no authorization presenter configured".into()))?;

        let url = self.authorize_url(extra).await?;
        let (_attempt, resumed) = self.engine.begin_redirect_wait();
        presenter.present(&url).await?;

        let outcome = match resumed.await {
            Ok(result) => result,
            Err(_closed) => Err(Error::RequestCancelled),
        };
        presenter.dismiss().await;
        outcome.map(Some)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the implicit flow.
    use super::*;
    use crate::config::ClientConfig;
    use crate::testing::MockPerformer;

    fn flow() -> ImplicitFlow {
        let mut config =
            ClientConfig::new("https://auth.example.com/authorize", "https://auth.example.com/token");
        config.client_id = Some("client".to_string());
        config.redirect_url = Some("app://callback".to_string());

        ImplicitFlow::new(Arc::new(FlowEngine::new(config, Arc::new(MockPerformer::new()))))
    }

    async fn issued_state(flow: &ImplicitFlow) -> String {
        let url = flow.authorize_url(&RequestParams::new()).await.expect("url");
        url.split("state=")
            .nth(1)
            .and_then(|rest| rest.split('&').next())
            .expect("state in url")
            .to_string()
    }

    /// Validates `ImplicitFlow::handle_redirect_url` behavior for the
    /// fragment token scenario.
    ///
    /// Assertions:
    /// - Ensures the fragment parameters become the token response.
    /// - Ensures the access token lands in the configuration.
    #[tokio::test]
    async fn test_fragment_token() {
        let flow = flow();
        let state = issued_state(&flow).await;

        let json = flow
            .handle_redirect_url(&format!(
                "app://callback#access_token=tok&token_type=bearer&expires_in=3600&state={state}"
            ))
            .await
            .expect("fragment");
        assert_eq!(json.get("access_token").and_then(|v| v.as_str()), Some("tok"));
        assert!(json.get("state").is_none());

        let config = flow.engine().config().await;
        assert_eq!(config.access_token.as_deref(), Some("tok"));
        assert!(config.access_token_expiry.is_some());
    }

    /// Validates `ImplicitFlow::handle_redirect_url` behavior for the token
    /// type scenarios.
    #[tokio::test]
    async fn test_fragment_token_type() {
        let flow = flow();
        let state = issued_state(&flow).await;
        assert!(matches!(
            flow.handle_redirect_url(&format!("app://callback#access_token=t&state={state}"))
                .await,
            Err(Error::NoTokenType)
        ));

        let state = issued_state(&flow).await;
        assert!(matches!(
            flow.handle_redirect_url(&format!(
                "app://callback#access_token=t&token_type=mac&state={state}"
            ))
            .await,
            Err(Error::UnsupportedTokenType(_))
        ));
    }

    /// Validates `ImplicitFlow::handle_redirect_url` behavior for the
    /// missing fragment scenario.
    #[tokio::test]
    async fn test_query_only_redirect_rejected() {
        let flow = flow();
        assert!(matches!(
            flow.handle_redirect_url("app://callback?access_token=t").await,
            Err(Error::InvalidRedirectUrl(_))
        ));
    }
}
