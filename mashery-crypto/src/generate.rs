//! Lazy per-role RSA keypair generation.

use rsa::RsaPrivateKey;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};

use crate::error::{CryptoError, CryptoResult};

pub const ROLE_KEY_BITS: usize = 4096;

/// Generates a fresh 4096-bit RSA keypair off the async executor: keygen at
/// this size is CPU-bound and would otherwise stall the runtime.
pub async fn generate_role_keypair() -> CryptoResult<RsaPrivateKey> {
    tokio::task::spawn_blocking(|| {
        let mut rng = rand::thread_rng();
        RsaPrivateKey::new(&mut rng, ROLE_KEY_BITS)
    })
    .await
    .map_err(|e| CryptoError::KeyGeneration(format!("keygen task panicked: {e}")))?
    .map_err(|e| CryptoError::KeyGeneration(e.to_string()))
}

pub fn serialize_private_key(key: &RsaPrivateKey) -> CryptoResult<Vec<u8>> {
    key.to_pkcs1_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))
}

pub fn deserialize_private_key(bytes: &[u8]) -> CryptoResult<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs1_der(bytes).map_err(|e| CryptoError::KeyGeneration(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generated_key_serializes_round_trip() {
        // Keep the test key small; only the code path (not key strength) is under test.
        let key = tokio::task::spawn_blocking(|| {
            RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap()
        })
        .await
        .unwrap();
        let bytes = serialize_private_key(&key).unwrap();
        let back = deserialize_private_key(&bytes).unwrap();
        assert_eq!(key, back);
    }
}
