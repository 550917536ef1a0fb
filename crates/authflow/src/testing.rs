//! Test doubles for the injected collaborators
//!
//! [`MockPerformer`] replays scripted responses in order and records every
//! request; [`MemoryTokenStore`] keeps the persisted token state in memory.
//! Both are used by the crate's own tests and exported for downstream ones.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::config::TokenState;
use crate::error::{Error, Result};
use crate::request::{AuthRequest, RequestPerformer, Response};
use crate::store::TokenStore;

/// A [`RequestPerformer`] that replays scripted responses in FIFO order.
///
/// Running out of scripted responses surfaces as [`Error::Network`], which
/// reads like the server went away mid-flow.
#[derive(Debug, Default)]
pub struct MockPerformer {
    responses: parking_lot::Mutex<VecDeque<Response>>,
    requests: parking_lot::Mutex<Vec<AuthRequest>>,
}

impl MockPerformer {
    /// Create a performer with no scripted responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw response.
    pub fn push_response(&self, response: Response) {
        self.responses.lock().push_back(response);
    }

    /// Queue a JSON response with the given status.
    pub fn push_json(&self, status: u16, body: &serde_json::Value) {
        self.push_response(Response::new(status, body.to_string().into_bytes()));
    }

    /// Every request performed so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<AuthRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl RequestPerformer for MockPerformer {
    async fn perform(&self, request: AuthRequest) -> Result<Response> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Network("no scripted response left".into()))
    }
}

/// A [`TokenStore`] backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    state: parking_lot::Mutex<Option<TokenState>>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently stored state, if any.
    #[must_use]
    pub fn stored(&self) -> Option<TokenState> {
        self.state.lock().clone()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn store_tokens(&self, tokens: &TokenState) -> Result<()> {
        *self.state.lock() = Some(tokens.clone());
        Ok(())
    }

    async fn load_tokens(&self) -> Result<Option<TokenState>> {
        Ok(self.state.lock().clone())
    }

    async fn clear_tokens(&self) -> Result<()> {
        *self.state.lock() = None;
        Ok(())
    }
}
