//! Authorization code grant (RFC 6749 §4.1, PKCE per RFC 7636)
//!
//! The flow builds the authorize URL, hands it to the injected
//! [`AuthPresenter`], and suspends until the application feeds the redirect
//! back through [`AuthorizationCodeFlow::handle_redirect_url`], which
//! validates the CSRF state and exchanges the code at the token endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::engine::FlowEngine;
use crate::error::{Error, Result};
use crate::params::RequestParams;
use crate::request::TokenJson;

use super::{check_redirect_error, parse_redirect, validate_state, AuthPresenter, GrantFlow};

/// The authorization code grant.
pub struct AuthorizationCodeFlow {
    engine: Arc<FlowEngine>,
    presenter: Option<Arc<dyn AuthPresenter>>,
}

impl AuthorizationCodeFlow {
    /// Create a code flow on `engine`.
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

    /// Build the authorize URL for this attempt without presenting it.
    ///
    /// Carries `response_type=code`, the client id, redirect URI, CSRF state,
    /// scope, and a PKCE challenge when `use_pkce` is set.
    ///
    /// # Errors
    /// [`Error::NoClientId`] / [`Error::NoRedirectUrl`] when unconfigured.
    pub async fn authorize_url(&self, extra: &RequestParams) -> Result<String> {
        self.engine.authorize_url("code", true, extra).await
    }

    /// Process the redirect the authorization server sent the user back with.
    ///
    /// Validates the redirect against the configured redirect URL, maps a
    /// server `error` parameter, checks the CSRF `state`, then exchanges the
    /// authorization code (with the PKCE verifier when one was issued). The
    /// result also resumes a suspended [`GrantFlow::authorize`] call, so both
    /// callers observe the same outcome.
    ///
    /// # Errors
    /// [`Error::InvalidRedirectUrl`], [`Error::MissingState`],
    /// [`Error::InvalidState`], a mapped server error, or any token-exchange
    /// failure.
    pub async fn handle_redirect_url(&self, redirect_url: &str) -> Result<TokenJson> {
        let config = self.engine.config().await;
        let expected = config.redirect_url.clone().unwrap_or_default();

        let params = parse_redirect(redirect_url, &expected, false)?;
        check_redirect_error(&params)?;
        validate_state(&self.engine, &params)?;

        let code = params
            .get("code")
            .ok_or_else(|| Error::Generic("no authorization code in redirect".into()))?;

        debug!("exchanging authorization code");
        let request = {
            let mut body = RequestParams::new();
            body.set("code", code);
            if let Some(redirect) = config.redirect_url.as_deref() {
                body.set("redirect_uri", redirect);
            }
            if let Some(verifier) = self.engine.context().lock().code_verifier() {
                body.set("code_verifier", verifier);
            }
            FlowEngine::build_token_request(
                &config,
                config.effective_token_url(),
                "authorization_code",
                body,
            )
        };

        let result = self.engine.obtain_token(request).await;
        if self.engine.resolve_redirect(result.clone()) {
            debug!("resumed suspended authorize call");
        }
        if result.is_ok() {
            info!("authorization code exchanged");
        }
        result
    }
}

#[async_trait]
impl GrantFlow for AuthorizationCodeFlow {
    fn engine(&self) -> &Arc<FlowEngine> {
        &self.engine
    }

    fn grant_type(&self) -> &'static str {
        "authorization_code"
    }

    async fn run_grant(&self, extra: &RequestParams) -> Result<Option<TokenJson>> {
        let presenter = self
            .presenter
            .as_ref()
            .ok_or_else(|| Error::Generic("no authorization presenter configured".into()))?;

        let url = self.authorize_url(extra).await?;

        // Register the wait before presenting, in case the redirect arrives
        // while `present` is still returning.
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
