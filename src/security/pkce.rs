// [library] Base64 encoding for PKCE material - RFC 7636 requires base64url without padding
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

// [library] Cryptographically secure random number generation for code verifiers
use rand::Rng;

// [library] SHA-256 cryptographic hash function for the PKCE S256 method
use sha2::{Digest, Sha256};

// [library] Structured error handling with automatic trait derivation
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PkceError {
    #[error("Invalid code verifier length: {0}. Must be between 43 and 128 characters")]
    InvalidVerifierLength(usize),
    #[error("Code verifier contains invalid characters")]
    InvalidVerifierCharacters,
    #[error("Entropy self test produced an inconsistent PKCE pair")]
    SelfTestFailed,
}

// [security] Client-side PKCE material for one authorization round trip.
// The verifier never leaves this service (it is held in the state store);
// only the challenge travels in the authorize URL.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    // [security] 64 random bytes of verifier material, base64url encoded to
    // 86 characters - comfortably inside RFC 7636's [43, 128] window
    pub fn generate() -> Self {
        let random_bytes: [u8; 64] = rand::thread_rng().gen();
        let verifier = URL_SAFE_NO_PAD.encode(random_bytes);
        let challenge = compute_challenge(&verifier);

        Self {
            verifier,
            challenge,
        }
    }
}

/// S256 code challenge for a verifier: base64url(SHA256(verifier)).
pub fn compute_challenge(code_verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code_verifier.as_bytes());
    let digest = hasher.finalize();

    URL_SAFE_NO_PAD.encode(digest)
}

/// Validate that a code verifier meets RFC 7636 requirements.
pub fn validate_verifier(code_verifier: &str) -> Result<(), PkceError> {
    let len = code_verifier.len();
    if !(43..=128).contains(&len) {
        return Err(PkceError::InvalidVerifierLength(len));
    }

    // RFC 7636: code_verifier uses [A-Z] / [a-z] / [0-9] / "-" / "." / "_" / "~"
    if !code_verifier
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
    {
        return Err(PkceError::InvalidVerifierCharacters);
    }

    Ok(())
}

/// Startup probe of the RNG and hash path. A broken OS entropy source makes
/// rand panic per request; generating one pair here at boot surfaces that as
/// a clean startup failure instead.
pub fn self_test() -> Result<(), PkceError> {
    let pair = PkcePair::generate();
    validate_verifier(&pair.verifier)?;

    if compute_challenge(&pair.verifier) != pair.challenge {
        return Err(PkceError::SelfTestFailed);
    }

    Ok(())
}
