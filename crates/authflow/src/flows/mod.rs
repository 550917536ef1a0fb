//! Grant flow implementations
//!
//! Each RFC 6749 / RFC 8628 grant lives in its own module and shares the
//! [`GrantFlow`] orchestration: try the existing access token, try a refresh,
//! register the client when needed, then run the grant itself. Flows wrap an
//! `Arc<FlowEngine>` and delegate everything grant-independent to it.

pub mod client_credentials;
pub mod code;
pub mod device;
pub mod implicit;
pub mod password;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::engine::FlowEngine;
use crate::error::{Error, Result};
use crate::params::RequestParams;
use crate::request::TokenJson;

pub use client_credentials::ClientCredentialsFlow;
pub use code::AuthorizationCodeFlow;
pub use device::{DeviceAuthorization, DeviceFlow};
pub use implicit::ImplicitFlow;
pub use password::{PasswordFlow, PasswordGrantDelegate};

/// Presents an authorize URL to the user, typically in a browser or web view.
///
/// The presenter returns once presentation has started; the flow resumes when
/// the application feeds the redirect back through `handle_redirect_url`.
#[async_trait]
pub trait AuthPresenter: Send + Sync {
    /// Open `url` for user interaction.
    ///
    /// # Errors
    /// Presentation failures abort the authorize attempt.
    async fn present(&self, url: &str) -> Result<()>;

    /// Tear down any presented UI once the flow reached a terminal state.
    async fn dismiss(&self) {}
}

/// Shared orchestration for every grant type.
///
/// Implementors provide the grant-specific [`run_grant`](Self::run_grant);
/// the provided [`authorize`](Self::authorize) wraps it in the common
/// lifecycle: single-flight guard, short-circuit on a valid token, refresh
/// attempt, dynamic registration, and completion-handler delivery.
#[async_trait]
pub trait GrantFlow: Send + Sync {
    /// The engine this flow drives.
    fn engine(&self) -> &Arc<FlowEngine>;

    /// RFC grant type identifier sent as `grant_type`.
    fn grant_type(&self) -> &'static str;

    /// Whether this grant cannot run without a client id.
    fn client_id_mandatory(&self) -> bool {
        true
    }

    /// Run the grant itself, after the shared preamble decided a full
    /// authorization is needed.
    ///
    /// `Ok(None)` means the outcome arrives later through the completion
    /// handler (user interaction or background polling still pending); the
    /// lifecycle stays in its authorizing state until then.
    async fn run_grant(&self, extra: &RequestParams) -> Result<Option<TokenJson>>;

    /// Obtain authorization, preferring the cheapest path.
    ///
    /// Order: an unexpired access token short-circuits; a held refresh token
    /// is tried next (failures outside the fall-through set surface
    /// immediately); the client is registered dynamically when the grant
    /// mandates an id and none exists; finally the grant itself runs. Every
    /// terminal outcome is reported both to the caller and to the engine's
    /// completion handler.
    ///
    /// # Errors
    /// [`Error::AlreadyAuthorizing`] when called re-entrantly, otherwise
    /// whatever the selected path produced.
    async fn authorize(&self, extra: &RequestParams) -> Result<Option<TokenJson>> {
        let engine = self.engine();
        engine.begin_authorize()?;

        if engine.has_unexpired_access_token().await {
            info!("existing access token still valid, skipping authorization");
            let json = TokenJson::new();
            engine.finish_authorize(&Ok(json.clone()));
            return Ok(Some(json));
        }

        match engine.do_refresh_token_with(extra, self.client_id_mandatory()).await {
            Ok(json) => {
                engine.finish_authorize(&Ok(json.clone()));
                return Ok(Some(json));
            }
            Err(e) if e.allows_refresh_fallthrough() => {
                debug!("refresh unavailable ({e}), running full grant");
            }
            Err(e) => {
                engine.finish_authorize(&Err(e.clone()));
                return Err(e);
            }
        }

        if let Err(e) = engine.register_client_if_needed(self.client_id_mandatory()).await {
            engine.finish_authorize(&Err(e.clone()));
            return Err(e);
        }

        match self.run_grant(extra).await {
            Ok(Some(json)) => {
                engine.finish_authorize(&Ok(json.clone()));
                Ok(Some(json))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                engine.finish_authorize(&Err(e.clone()));
                Err(e)
            }
        }
    }
}

/// Split the interesting part out of a redirect URL.
///
/// Redirect-based grants deliver their result in the query (`code` grant) or
/// the fragment (`implicit` grant); `from_fragment` selects which. The
/// redirect must match the configured redirect URL up to its query/fragment.
fn parse_redirect(
    redirect_url: &str,
    expected_redirect: &str,
    from_fragment: bool,
) -> Result<RequestParams> {
    let separator = if from_fragment { '#' } else { '?' };
    let (base, payload) = redirect_url.split_once(separator).ok_or_else(|| {
        Error::InvalidRedirectUrl(format!("redirect carries no {separator} component"))
    })?;

    // Tolerate a query before the fragment when parsing implicit redirects,
    // and a trailing fragment when parsing query redirects.
    let base = base.split_once('?').map_or(base, |(b, _)| b);
    let payload = payload.split_once('#').map_or(payload, |(p, _)| p);
    if !expected_redirect.is_empty() && base != expected_redirect {
        return Err(Error::InvalidRedirectUrl(format!(
            "redirect does not match configured redirect URL ({base})"
        )));
    }

    Ok(RequestParams::parse_query(payload))
}

/// Reject redirects whose parameters report a server error.
fn check_redirect_error(params: &RequestParams) -> Result<()> {
    if let Some(code) = params.get("error") {
        let description = params.get("error_description").map(ToOwned::to_owned);
        return Err(Error::from_server_code(code, description));
    }
    Ok(())
}

/// Validate the CSRF `state` of a redirect against the issued one.
fn validate_state(engine: &FlowEngine, params: &RequestParams) -> Result<()> {
    let received = params.get("state").ok_or(Error::MissingState)?;
    if !engine.context().lock().matches_state(received) {
        return Err(Error::InvalidState);
    }
    Ok(())
}
