//! Opaque token generation.
//!
//! Every opaque identifier this server mints (RS access/refresh tokens,
//! transaction ids, authorization codes, registered client ids) is a
//! url-safe-base64 encoding of cryptographically random bytes.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

/// Generate `n` random bytes and encode them url-safe-base64 (no padding).
pub fn random_token(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// RS access/refresh token: 24+ random bytes per spec.md §3.
pub fn rs_token() -> String {
    random_token(24)
}

/// OAuth transaction id: 16 random bytes per spec.md §4.6.1.
pub fn txn_id() -> String {
    random_token(16)
}

/// Dynamic-registration client id: 12 random bytes per spec.md §4.6.4.
pub fn client_id() -> String {
    random_token(12)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_and_sized() {
        let a = rs_token();
        let b = rs_token();
        assert_ne!(a, b);
        // 24 bytes url-safe-base64-no-pad -> 32 chars
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn txn_id_is_16_bytes() {
        assert_eq!(txn_id().len(), 22);
    }
}
