//! PKCE code verifier / code challenge generation (S256 method).

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::types::PkceChallenge;

/// Generate a fresh verifier/challenge pair.
///
/// The verifier is 32 random bytes base64url-encoded (43 chars, within the
/// 43..=128 range RFC 7636 requires); the challenge is the base64url-encoded
/// SHA-256 of the verifier.
pub fn generate() -> PkceChallenge {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    let verifier = URL_SAFE_NO_PAD.encode(bytes);
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    PkceChallenge {
        verifier,
        challenge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_length_in_rfc_range() {
        let pair = generate();
        assert!((43..=128).contains(&pair.verifier.len()));
    }

    #[test]
    fn test_challenge_is_s256_of_verifier() {
        let pair = generate();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(pair.verifier.as_bytes()));
        assert_eq!(pair.challenge, expected);
    }

    #[test]
    fn test_pairs_are_unique() {
        assert_ne!(generate().verifier, generate().verifier);
    }
}
