//! Token persistence seam
//!
//! The engine calls a [`TokenStore`] after every successful acquisition or
//! refresh, and once at startup to restore a previous session. Applications
//! back this with their platform keychain; tests use
//! [`MemoryTokenStore`](crate::testing::MemoryTokenStore).

use async_trait::async_trait;

use crate::config::TokenState;
use crate::error::Result;

/// Storage backend for the persisted token triple.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist the token state after a successful acquisition or refresh.
    ///
    /// # Errors
    /// Returns an error if the backend rejects the write; the engine logs
    /// the failure but does not fail the flow over it.
    async fn store_tokens(&self, tokens: &TokenState) -> Result<()>;

    /// Load previously persisted tokens, `None` when nothing is stored.
    ///
    /// # Errors
    /// Returns an error only for backend failures, not for absent tokens.
    async fn load_tokens(&self) -> Result<Option<TokenState>>;

    /// Remove any persisted tokens.
    async fn clear_tokens(&self) -> Result<()>;
}
