//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! The verifier is persisted in the credential store and sent during the
//! code exchange; the challenge goes into the authorization URL so the
//! provider can check the exchange comes from whoever started the flow.
//!
//! Canonical encoding: verifier = base64url-no-pad(32 random bytes),
//! challenge = base64url-no-pad(SHA-256(verifier as ASCII)).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::constants::CODE_CHALLENGE_METHOD;

/// Random bytes behind each verifier (43 base64url chars).
const VERIFIER_BYTES: usize = 32;

/// A verifier and the challenge derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
    pub method: &'static str,
}

impl PkcePair {
    /// Generate a fresh verifier and its S256 challenge.
    pub fn generate() -> Self {
        Self::from_verifier(generate_verifier())
    }

    /// Rebuild the pair for an already persisted verifier.
    pub fn from_verifier(verifier: String) -> Self {
        let challenge = compute_challenge(&verifier);
        Self {
            verifier,
            challenge,
            method: CODE_CHALLENGE_METHOD,
        }
    }
}

/// Fresh verifier: 32 bytes from the thread-local CSPRNG (seeded from the
/// OS), base64url without padding. Always 43 characters, all unreserved.
pub fn generate_verifier() -> String {
    let mut raw = [0u8; VERIFIER_BYTES];
    rand::rng().fill(&mut raw);
    URL_SAFE_NO_PAD.encode(raw)
}

/// S256 challenge for `verifier`, hashing its ASCII text.
pub fn compute_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
