//! PKCE (Proof Key for Code Exchange) and CSRF state generation
//!
//! Implements RFC 7636 with the S256 challenge method. Used by redirect-based
//! flows where an authorization code could otherwise be intercepted.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// The only challenge method this crate emits.
pub const CHALLENGE_METHOD: &str = "S256";

/// Length of the CSRF `state` token.
const STATE_LEN: usize = 8;

/// Generate a cryptographically random code verifier.
///
/// 32 random bytes base64url-encoded yield 43 characters, the RFC 7636
/// minimum.
#[must_use]
pub fn generate_code_verifier() -> String {
    let mut rng = rand::thread_rng();
    let random_bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Derive the code challenge: BASE64URL(SHA256(ASCII(verifier))), no padding.
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate a random 8-character alphanumeric CSRF state token.
#[must_use]
pub fn generate_state() -> String {
    let mut rng = rand::thread_rng();
    (0..STATE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..62u8);
            match idx {
                0..=25 => (b'A' + idx) as char,
                26..=51 => (b'a' + (idx - 26)) as char,
                _ => (b'0' + (idx - 52)) as char,
            }
        })
        .collect()
}
