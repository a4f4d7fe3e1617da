// [rust] Security module organization - cryptographic material for the unlock flow
pub mod pkce; // [security] Proof Key for Code Exchange (RFC 7636) client-side material

// [library] Base64url without padding - the encoding every token here uses
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

// [library] Cryptographically secure random number generation
use rand::Rng;

/// Opaque random token used for CSRF states and download credentials.
/// 32 random bytes encoded as 43 base64url characters, no padding.
pub fn generate_opaque_token() -> String {
    let random_bytes: [u8; 32] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(random_bytes)
}
