//! Client-side OAuth 2.0 flow orchestration.
//!
//! The crate implements the standard grants — authorization code (with
//! PKCE), implicit, resource owner password, client credentials, and the
//! RFC 8628 device grant — plus RFC 8693 token exchange, RFC 8414 metadata
//! discovery, and a hook for RFC 7591 dynamic registration.
//!
//! Everything environment-specific is injected: the HTTP transport
//! ([`RequestPerformer`]), the UI that presents authorize URLs
//! ([`AuthPresenter`]), token persistence ([`TokenStore`]), and client
//! registration ([`ClientRegistrar`]). The [`FlowEngine`] owns the
//! [`ClientConfig`] and serializes every token mutation, so concurrent
//! refreshes and exchanges never interleave.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use authflow::flows::AuthorizationCodeFlow;
//! use authflow::{ClientConfig, FlowEngine, HttpPerformer};
//!
//! # async fn example() -> authflow::Result<()> {
//! let mut config = ClientConfig::new(
//!     "https://auth.example.com/authorize",
//!     "https://auth.example.com/token",
//! );
//! config.client_id = Some("my-client".into());
//! config.redirect_url = Some("app://oauth/callback".into());
//! config.use_pkce = true;
//!
//! let engine = Arc::new(FlowEngine::new(config, Arc::new(HttpPerformer::new())));
//! let flow = AuthorizationCodeFlow::new(engine.clone());
//!
//! // Elsewhere, once the redirect comes back from the browser:
//! let tokens = flow.handle_redirect_url("app://oauth/callback?code=...&state=...").await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod flows;
pub mod metadata;
pub mod params;
pub mod pkce;
pub mod registration;
pub mod request;
pub mod store;
pub mod testing;

pub use config::{ClientConfig, TokenState};
pub use engine::{CompletionHandler, FlowEngine};
pub use error::{Error, Result};
pub use flows::{
    AuthPresenter, AuthorizationCodeFlow, ClientCredentialsFlow, DeviceAuthorization, DeviceFlow,
    GrantFlow, ImplicitFlow, PasswordFlow, PasswordGrantDelegate,
};
pub use metadata::ServerMetadata;
pub use params::RequestParams;
pub use registration::ClientRegistrar;
pub use request::{AuthRequest, HttpMethod, HttpPerformer, RequestPerformer, Response, TokenJson};
pub use store::TokenStore;
