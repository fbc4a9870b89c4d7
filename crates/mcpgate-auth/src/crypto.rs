//! AES-GCM 256-bit encryption for the file-backed token store (spec §4.1).
//!
//! The key is a 32-byte url-safe-base64 string. The nonce is 12 random bytes
//! prepended to the ciphertext; the tag is the standard 128-bit GCM tag
//! appended by the `aes-gcm` crate.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use mcpgate_core::{GateError, GateResult};

const NONCE_LEN: usize = 12;

/// A decoded 256-bit encryption key.
pub struct EncryptionKey(Key<Aes256Gcm>);

impl EncryptionKey {
    /// Decode a url-safe-base64-encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::configuration`] if the string does not decode to
    /// exactly 32 bytes.
    pub fn decode(encoded: &str) -> GateResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| GateError::configuration(format!("invalid encryption key encoding: {e}")))?;
        if bytes.len() != 32 {
            return Err(GateError::configuration(format!(
                "encryption key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(*Key::<Aes256Gcm>::from_slice(&bytes)))
    }
}

/// Encrypt `plaintext`, returning `nonce || ciphertext || tag`.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> GateResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(&key.0);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let mut sealed = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| GateError::storage(format!("encryption failed: {e}")))?;
    let mut out = nonce.to_vec();
    out.append(&mut sealed);
    Ok(out)
}

/// Decrypt a `nonce || ciphertext || tag` blob produced by [`encrypt`].
pub fn decrypt(key: &EncryptionKey, blob: &[u8]) -> GateResult<Vec<u8>> {
    if blob.len() < NONCE_LEN {
        return Err(GateError::storage("ciphertext shorter than nonce"));
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(&key.0);
    cipher
        .decrypt(nonce_bytes.into(), ciphertext)
        .map_err(|_| GateError::storage("decryption failed: bad key or corrupted data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_key() -> EncryptionKey {
        EncryptionKey::decode(&URL_SAFE_NO_PAD.encode([7u8; 32])).unwrap()
    }

    #[test]
    fn round_trips() {
        let key = test_key();
        let plaintext = b"{\"records\":[]}";
        let ciphertext = encrypt(&key, plaintext).unwrap();
        assert_eq!(decrypt(&key, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn wrong_key_fails() {
        let key1 = test_key();
        let key2 = EncryptionKey::decode(&URL_SAFE_NO_PAD.encode([9u8; 32])).unwrap();
        let ciphertext = encrypt(&key1, b"secret").unwrap();
        assert!(decrypt(&key2, &ciphertext).is_err());
    }

    #[test]
    fn rejects_bad_key_length() {
        assert!(EncryptionKey::decode(&URL_SAFE_NO_PAD.encode([1u8; 16])).is_err());
    }

    #[test]
    fn rejects_truncated_ciphertext() {
        let key = test_key();
        assert!(decrypt(&key, &[0u8; 4]).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_round_trips_any_plaintext(plaintext in prop::collection::vec(any::<u8>(), 0..512)) {
            let key = test_key();
            let ciphertext = encrypt(&key, &plaintext).unwrap();
            prop_assert_eq!(decrypt(&key, &ciphertext).unwrap(), plaintext);
        }

        #[test]
        fn prop_distinct_keys_never_decrypt_each_others_ciphertext(
            key_a in prop::collection::vec(any::<u8>(), 32..=32),
            key_b in prop::collection::vec(any::<u8>(), 32..=32),
            plaintext in prop::collection::vec(any::<u8>(), 1..128),
        ) {
            prop_assume!(key_a != key_b);
            let key_a = EncryptionKey::decode(&URL_SAFE_NO_PAD.encode(&key_a)).unwrap();
            let key_b = EncryptionKey::decode(&URL_SAFE_NO_PAD.encode(&key_b)).unwrap();
            let ciphertext = encrypt(&key_a, &plaintext).unwrap();
            prop_assert!(decrypt(&key_b, &ciphertext).is_err());
        }
    }
}
