//! Error taxonomy for OAuth2 flow operations
//!
//! Every failure the library can produce is a variant of [`Error`]. Foreign
//! errors (HTTP transport, JSON decoding) are wrapped at the boundary where
//! they occur and never passed through raw.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by flow orchestration, token requests, and redirect handling.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    // --- configuration ---
    /// The grant requires a client id and none is configured.
    #[error("no client id configured")]
    NoClientId,

    /// The grant requires a client secret and none is configured.
    #[error("no client secret configured")]
    NoClientSecret,

    /// A redirect-based grant was started without a redirect URL.
    #[error("no redirect URL configured")]
    NoRedirectUrl,

    /// Dynamic registration was needed but no registration endpoint is set.
    #[error("no registration URL configured")]
    NoRegistrationUrl,

    /// The device flow was started without a device-authorization endpoint.
    #[error("no device authorization URL configured")]
    NoDeviceCodeUrl,

    /// The password grant was attempted without a username.
    #[error("no username")]
    NoUsername,

    /// The password grant was attempted without a password.
    #[error("no password")]
    NoPassword,

    /// A token-exchange operation requires an access token and none is held.
    #[error("no access token available")]
    NoAccessToken,

    /// Resource exchange requires at least one configured resource URI.
    #[error("no resource URI configured")]
    NoResourceUri,

    /// Refresh was attempted while no refresh token is held.
    #[error("no refresh token available")]
    NoRefreshToken,

    // --- protocol / state ---
    /// The redirect did not carry a `state` parameter.
    #[error("missing state parameter in redirect")]
    MissingState,

    /// The redirect `state` did not match the one issued for this attempt.
    #[error("state parameter mismatch (possible CSRF)")]
    InvalidState,

    /// The redirect URL could not be parsed or did not match expectations.
    #[error("invalid redirect URL: {0}")]
    InvalidRedirectUrl(String),

    /// The token response omitted `token_type`.
    #[error("no token type in response")]
    NoTokenType,

    /// The token response carried a token type other than `bearer`.
    #[error("unsupported token type {0:?}")]
    UnsupportedTokenType(String),

    // --- server-reported (RFC 6749 §5.2 / RFC 8628 §3.5) ---
    /// The resource owner or server denied the request.
    #[error("access denied{}", fmt_detail(.0))]
    AccessDenied(Option<String>),

    /// The client is not authorized for this grant (`unauthorized_client`).
    #[error("client not authorized{}", fmt_detail(.0))]
    UnauthorizedClient(Option<String>),

    /// The server rejected the request with HTTP 403.
    #[error("forbidden{}", fmt_detail(.0))]
    Forbidden(Option<String>),

    /// The server is temporarily unavailable (`temporarily_unavailable`).
    #[error("server temporarily unavailable{}", fmt_detail(.0))]
    TemporarilyUnavailable(Option<String>),

    /// Device flow: the user has not yet approved the authorization.
    #[error("authorization pending")]
    AuthorizationPending,

    /// Device flow: the client is polling too fast.
    #[error("slow down")]
    SlowDown,

    /// An error response that maps to no more specific variant.
    #[error("server error (HTTP {status}): {message}")]
    Response { status: u16, message: String },

    /// A generic error with a server-supplied or internal message.
    #[error("{0}")]
    Generic(String),

    // --- transport / parsing ---
    /// The response body was not valid JSON.
    #[error("failed to parse JSON response: {0}")]
    JsonParse(String),

    /// The response carried no body where one was required.
    #[error("no data in response")]
    NoDataInResponse,

    /// The HTTP transport failed before a response was received.
    #[error("network error: {0}")]
    Network(String),

    // --- user / flow ---
    /// `authorize` was called while a previous call is still in flight.
    #[error("already authorizing")]
    AlreadyAuthorizing,

    /// The in-flight request was cancelled by the caller.
    #[error("request cancelled")]
    RequestCancelled,

    /// The password grant needs credentials but no delegate is installed.
    #[error("no password grant delegate installed")]
    NoPasswordGrantDelegate,

    /// The password grant was rejected for the supplied credentials.
    #[error("wrong username or password")]
    WrongUsernamePassword,
}

fn fmt_detail(detail: &Option<String>) -> String {
    match detail {
        Some(d) => format!(": {d}"),
        None => String::new(),
    }
}

impl Error {
    /// Map an RFC 6749 / RFC 8628 `error` code to a typed variant.
    ///
    /// Codes with no dedicated variant become [`Error::Generic`], preferring
    /// the server's `error_description` when present.
    #[must_use]
    pub fn from_server_code(code: &str, description: Option<String>) -> Self {
        match code {
            "access_denied" => Self::AccessDenied(description),
            "unauthorized_client" => Self::UnauthorizedClient(description),
            "temporarily_unavailable" => Self::TemporarilyUnavailable(description),
            "authorization_pending" => Self::AuthorizationPending,
            "slow_down" => Self::SlowDown,
            other => Self::Generic(description.unwrap_or_else(|| other.to_string())),
        }
    }

    /// Whether `authorize` should fall through to a full authorization after
    /// this refresh failure instead of surfacing it.
    #[must_use]
    pub(crate) fn allows_refresh_fallthrough(&self) -> bool {
        matches!(
            self,
            Self::NoRefreshToken | Self::NoClientId | Self::UnauthorizedClient(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonParse(err.to_string())
    }
}
