//! Client configuration and token state
//!
//! [`ClientConfig`] is the single source of truth for one client: endpoints,
//! credentials, the current token pair, and behavior flags. It is owned by a
//! flow engine and mutated only behind the engine's lock; callers configure
//! it up front and read results through the engine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::request::TokenJson;

/// The persistable token triple plus metadata.
///
/// This is what a [`TokenStore`](crate::store::TokenStore) receives after a
/// successful acquisition or refresh, and what it hands back at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_expiry: Option<DateTime<Utc>>,
}

/// Configuration and mutable token state for one OAuth2 client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// OAuth client id. Absent until set or dynamically registered.
    pub client_id: Option<String>,

    /// OAuth client secret (confidential clients only).
    pub client_secret: Option<String>,

    /// Space-separated scope string to request.
    pub scope: Option<String>,

    /// Authorization endpoint (redirect-based grants).
    pub authorize_url: String,

    /// Token endpoint. Falls back to `authorize_url` when unset.
    pub token_url: Option<String>,

    /// Refresh endpoint. Falls back to the token endpoint when unset.
    pub refresh_url: Option<String>,

    /// RFC 8628 device-authorization endpoint.
    pub device_authorize_url: Option<String>,

    /// RFC 7591 dynamic registration endpoint.
    pub registration_url: Option<String>,

    /// Redirect URI for browser-based grants.
    pub redirect_url: Option<String>,

    /// RFC 8707 resource indicators, in request order.
    pub resource_uris: Vec<String>,

    /// Username for the password grant.
    pub username: Option<String>,

    /// Password for the password grant.
    pub password: Option<String>,

    /// Current access token.
    pub access_token: Option<String>,

    /// Absolute expiry of the access token, when the server reported one.
    pub access_token_expiry: Option<DateTime<Utc>>,

    /// Current refresh token.
    pub refresh_token: Option<String>,

    /// OpenID Connect id token, when the server issued one.
    pub id_token: Option<String>,

    /// Send a PKCE challenge with redirect-based grants.
    pub use_pkce: bool,

    /// Send the client secret in the request body instead of Basic auth.
    pub secret_in_body: bool,

    /// Treat an access token without a recorded expiry as still valid.
    pub accept_unexpired_token: bool,

    /// Expect the server to rotate refresh tokens on every refresh. When
    /// set, a refresh response without a `refresh_token` field consumes the
    /// stored one; when unset the stored token is kept.
    pub refresh_token_rotation: bool,
}

impl ClientConfig {
    /// Create a configuration with the two endpoints every grant needs.
    #[must_use]
    pub fn new(authorize_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        Self {
            authorize_url: authorize_url.into(),
            token_url: Some(token_url.into()),
            ..Self::default()
        }
    }

    /// The effective token endpoint (`token_url`, else `authorize_url`).
    #[must_use]
    pub fn effective_token_url(&self) -> &str {
        self.token_url.as_deref().unwrap_or(&self.authorize_url)
    }

    /// The effective refresh endpoint (`refresh_url`, else token endpoint).
    #[must_use]
    pub fn effective_refresh_url(&self) -> &str {
        self.refresh_url.as_deref().unwrap_or_else(|| self.effective_token_url())
    }

    /// The configured client id, or [`Error::NoClientId`].
    pub fn require_client_id(&self) -> Result<&str> {
        self.client_id.as_deref().filter(|id| !id.is_empty()).ok_or(Error::NoClientId)
    }

    /// The configured redirect URL, or [`Error::NoRedirectUrl`].
    pub fn require_redirect_url(&self) -> Result<&str> {
        self.redirect_url.as_deref().filter(|u| !u.is_empty()).ok_or(Error::NoRedirectUrl)
    }

    /// Whether a non-empty, unexpired access token is held.
    ///
    /// A token without a recorded expiry counts only when
    /// `accept_unexpired_token` is set.
    #[must_use]
    pub fn has_unexpired_access_token(&self) -> bool {
        let has_token = self.access_token.as_deref().is_some_and(|t| !t.is_empty());
        if !has_token {
            return false;
        }
        match self.access_token_expiry {
            Some(expiry) => expiry > Utc::now(),
            None => self.accept_unexpired_token,
        }
    }

    /// Apply a successful token response.
    ///
    /// Replaces the access token and expiry; replaces or consumes the
    /// refresh token per `refresh_token_rotation`; records an id token when
    /// present. Single mutation point so the engine can hold its write lock
    /// across the whole replacement.
    pub fn apply_token_json(&mut self, json: &TokenJson) {
        if let Some(token) = json.get("access_token").and_then(|v| v.as_str()) {
            self.access_token = Some(token.to_string());
            self.access_token_expiry =
                expires_in_seconds(json).map(|secs| Utc::now() + Duration::seconds(secs));
        }
        match json.get("refresh_token").and_then(|v| v.as_str()) {
            Some(token) => self.refresh_token = Some(token.to_string()),
            None if self.refresh_token_rotation => self.refresh_token = None,
            None => {}
        }
        if let Some(token) = json.get("id_token").and_then(|v| v.as_str()) {
            self.id_token = Some(token.to_string());
        }
    }

    /// Snapshot of the token triple for persistence.
    #[must_use]
    pub fn token_state(&self) -> TokenState {
        TokenState {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            id_token: self.id_token.clone(),
            access_token_expiry: self.access_token_expiry,
        }
    }

    /// Restore a previously persisted token triple.
    pub fn restore_token_state(&mut self, state: TokenState) {
        self.access_token = state.access_token;
        self.refresh_token = state.refresh_token;
        self.id_token = state.id_token;
        self.access_token_expiry = state.access_token_expiry;
    }

    /// Drop all held tokens.
    pub fn forget_tokens(&mut self) {
        self.access_token = None;
        self.access_token_expiry = None;
        self.refresh_token = None;
        self.id_token = None;
    }
}

/// Extract `expires_in`, tolerating both numeric and string encodings.
fn expires_in_seconds(json: &TokenJson) -> Option<i64> {
    match json.get("expires_in")? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
