//! Dynamic client registration seam
//!
//! RFC 7591 registration wire details are a collaborator's problem: the
//! engine only knows *when* to register (no client id, registration endpoint
//! configured) and applies the standard `client_id`/`client_secret` fields of
//! whatever JSON the registrar returns.

use async_trait::async_trait;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::request::TokenJson;

/// Registers a client against the configured registration endpoint.
#[async_trait]
pub trait ClientRegistrar: Send + Sync {
    /// Perform registration and return the server's registration response.
    ///
    /// The snapshot carries the registration endpoint, redirect URL, and
    /// scope the registrar needs to build its request.
    ///
    /// # Errors
    /// Any failure is surfaced unchanged to the `authorize` caller.
    async fn register(&self, config: &ClientConfig) -> Result<TokenJson>;
}
