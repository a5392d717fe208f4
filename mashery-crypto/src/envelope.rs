//! Role-data envelope: JSON → gzip → RSA-OAEP(SHA-256) → PEM.

use flate2::Compression;
use flate2::read::{GzDecoder, GzEncoder};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::io::Read;

use crate::error::{CryptoError, CryptoResult};
use crate::pem::{PemBlock, ROLE_DATA_TAG};

/// The subset of a role's `Keys` that travels across the wire in an export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportedRoleKeys {
    pub area_id: String,
    pub area_nid: i64,
    pub api_key: String,
    pub key_secret: String,
    pub username: String,
    pub password: String,
    pub max_qps: i32,
    #[serde(default)]
    pub force_proxy_mode: bool,
    #[serde(default)]
    pub exportable: bool,
}

/// Optional term/use override the exporting side may attach; absent means
/// "the recipient inherits no additional bound beyond what it already has".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct ExportedUsageTerm {
    /// Unix seconds; `<= 0` is unbounded.
    pub explicit_term: i64,
    /// `<= 0` is unbounded.
    pub explicit_num_uses: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleDataExchange {
    pub role_data: ExportedRoleKeys,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_term: Option<ExportedUsageTerm>,
}

pub fn gzip_compress(data: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(data, Compression::default());
    let mut out = Vec::new();
    encoder
        .read_to_end(&mut out)
        .map_err(|e| CryptoError::Compression(e.to_string()))?;
    Ok(out)
}

pub fn gzip_decompress(data: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CryptoError::Compression(e.to_string()))?;
    Ok(out)
}

fn oaep() -> Oaep {
    Oaep::new::<Sha256>()
}

/// JSON-serializes, gzips, and RSA-OAEP-encrypts `exchange` under `recipient`,
/// with `oaep_label` as the per-mount OAEP label (so envelopes minted for one
/// mount cannot be consumed at another).
pub fn encrypt_envelope(
    exchange: &RoleDataExchange,
    recipient: &RsaPublicKey,
    oaep_label: &[u8],
) -> CryptoResult<Vec<u8>> {
    let json = serde_json::to_vec(exchange)
        .map_err(|e| CryptoError::Encryption(format!("serialize: {e}")))?;
    let gzipped = gzip_compress(&json)?;
    let mut padding = oaep();
    padding.label = Some(String::from_utf8_lossy(oaep_label).into_owned());
    let mut rng = rand::thread_rng();
    recipient
        .encrypt(&mut rng, padding, &gzipped)
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

/// Reverses `encrypt_envelope` exactly: OAEP-decrypt → gunzip → JSON-parse.
pub fn decrypt_envelope(
    ciphertext: &[u8],
    private_key: &RsaPrivateKey,
    oaep_label: &[u8],
) -> CryptoResult<RoleDataExchange> {
    let mut padding = oaep();
    padding.label = Some(String::from_utf8_lossy(oaep_label).into_owned());
    let gzipped = private_key
        .decrypt(padding, ciphertext)
        .map_err(|e| CryptoError::Decryption(e.to_string()))?;
    let json = gzip_decompress(&gzipped)?;
    serde_json::from_slice(&json).map_err(|e| CryptoError::Decryption(format!("parse: {e}")))
}

pub fn wrap_role_data_pem(ciphertext: Vec<u8>, headers: BTreeMap<String, String>) -> PemBlock {
    let mut block = PemBlock::new(ROLE_DATA_TAG, ciphertext);
    block.headers = headers;
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trip_arbitrary_bytes() {
        let samples: &[&[u8]] = &[b"", b"a", b"hello world", &[0u8; 4096], &[7u8; 1]];
        for sample in samples {
            let compressed = gzip_compress(sample).unwrap();
            let restored = gzip_decompress(&compressed).unwrap();
            assert_eq!(&restored, sample);
        }
    }

    #[test]
    fn envelope_round_trip() {
        let mut rng = rand::thread_rng();
        let private_key = rsa::RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public_key = private_key.to_public_key();
        let label = b"mount-label";

        let exchange = RoleDataExchange {
            role_data: ExportedRoleKeys {
                area_id: "area-1".into(),
                area_nid: 456,
                api_key: "k".into(),
                key_secret: "s".into(),
                username: "u".into(),
                password: "p".into(),
                max_qps: 2,
                force_proxy_mode: false,
                exportable: true,
            },
            usage_term: Some(ExportedUsageTerm {
                explicit_term: 0,
                explicit_num_uses: 5,
            }),
        };

        let ciphertext = encrypt_envelope(&exchange, &public_key, label).unwrap();
        let decoded = decrypt_envelope(&ciphertext, &private_key, label).unwrap();
        assert_eq!(decoded, exchange);
    }

    #[test]
    fn wrong_oaep_label_fails_to_decrypt() {
        let mut rng = rand::thread_rng();
        let private_key = rsa::RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public_key = private_key.to_public_key();
        let exchange = RoleDataExchange {
            role_data: ExportedRoleKeys {
                area_id: "a".into(),
                area_nid: 1,
                api_key: "k".into(),
                key_secret: "s".into(),
                username: "u".into(),
                password: "p".into(),
                max_qps: 2,
                force_proxy_mode: false,
                exportable: true,
            },
            usage_term: None,
        };
        let ciphertext = encrypt_envelope(&exchange, &public_key, b"mount-a").unwrap();
        assert!(decrypt_envelope(&ciphertext, &private_key, b"mount-b").is_err());
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(32))]

        /// P4: `gzip_decompress(gzip_compress(x)) = x` for arbitrary bytes.
        #[test]
        fn p4_gzip_round_trips_arbitrary_bytes(data in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..4096)) {
            let compressed = gzip_compress(&data).unwrap();
            let restored = gzip_decompress(&compressed).unwrap();
            proptest::prop_assert_eq!(restored, data);
        }

        /// P1: `import(export(R, C), K) = R'` for an arbitrary role-data payload —
        /// the envelope itself round-trips byte-for-byte through OAEP/gzip/JSON
        /// regardless of field content. The 1024-bit key is generated once,
        /// outside the property loop, to keep case generation cheap.
        #[test]
        fn p1_envelope_round_trips_arbitrary_role_data(
            area_id in "[a-z0-9-]{1,16}",
            area_nid in 0i64..1_000_000,
            api_key in "[a-zA-Z0-9]{1,16}",
            key_secret in "[a-zA-Z0-9]{1,16}",
            max_qps in 0i32..100,
            force_proxy_mode in proptest::prelude::any::<bool>(),
            explicit_num_uses in -1i64..1000,
        ) {
            let exchange = RoleDataExchange {
                role_data: ExportedRoleKeys {
                    area_id,
                    area_nid,
                    api_key,
                    key_secret,
                    username: "u".into(),
                    password: "p".into(),
                    max_qps,
                    force_proxy_mode,
                    exportable: true,
                },
                usage_term: Some(ExportedUsageTerm {
                    explicit_term: 0,
                    explicit_num_uses,
                }),
            };
            let ciphertext = encrypt_envelope(&exchange, &p1_test_public_key(), b"mount-label").unwrap();
            let decoded = decrypt_envelope(&ciphertext, &p1_test_private_key(), b"mount-label").unwrap();
            proptest::prop_assert_eq!(decoded, exchange);
        }
    }

    fn p1_test_private_key() -> RsaPrivateKey {
        use std::sync::OnceLock;
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("1024-bit test key"))
            .clone()
    }

    fn p1_test_public_key() -> RsaPublicKey {
        p1_test_private_key().to_public_key()
    }
}
