//! Per-flow ephemeral context
//!
//! Holds the CSRF `state` and the PKCE verifier/challenge pair for one
//! authorization attempt. The state is generated lazily on first access and
//! reset once it has been matched against a redirect.

use crate::pkce;

/// Ephemeral CSRF/PKCE state for a single authorization attempt.
#[derive(Debug, Clone, Default)]
pub struct FlowContext {
    state: Option<String>,
    code_verifier: Option<String>,
}

impl FlowContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The CSRF state token, generating it on first use.
    pub fn state(&mut self) -> &str {
        if self.state.is_none() {
            self.state = Some(pkce::generate_state());
        }
        self.state.as_deref().unwrap_or_default()
    }

    /// Compare a redirect's `state` against the issued one without
    /// generating a new token.
    #[must_use]
    pub fn matches_state(&self, received: &str) -> bool {
        self.state.as_deref() == Some(received)
    }

    /// Generate a fresh PKCE verifier and return the derived challenge.
    pub fn generate_pkce(&mut self) -> String {
        let verifier = pkce::generate_code_verifier();
        let challenge = pkce::generate_code_challenge(&verifier);
        self.code_verifier = Some(verifier);
        challenge
    }

    /// The PKCE verifier for the current attempt, if one was generated.
    #[must_use]
    pub fn code_verifier(&self) -> Option<&str> {
        self.code_verifier.as_deref()
    }

    /// Clear state and verifier after terminal use.
    pub fn reset(&mut self) {
        self.state = None;
        self.code_verifier = None;
    }
}
