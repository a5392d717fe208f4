//! Self-signed "recipient certificate" minting and validation.
//!
//! A recipient certificate is not used for transport security; it is a
//! portable, self-attesting carrier for the RSA public key a role-data
//! envelope gets encrypted under. Minting reuses the same RSA keypair the
//! role already holds (or generates lazily) so the certificate's public key
//! and the role's private key are always a matched pair.

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rsa::RsaPublicKey;
use rsa::pkcs8::{DecodePublicKey, EncodePrivateKey};
use time::OffsetDateTime;

use crate::error::{CryptoError, CryptoResult};
use crate::pem::{PemBlock, ROLE_RECIPIENT_TAG};

pub const RECIPIENT_CERT_LIFETIME_SECS: i64 = 4 * 3600;
const ORGANIZATION: &str = "Mashery Secrets Engine";

/// Mints a self-signed recipient certificate over `private_key`'s public half,
/// valid from `now` for `RECIPIENT_CERT_LIFETIME_SECS`.
pub fn mint_recipient_certificate(
    private_key: &rsa::RsaPrivateKey,
    role: &str,
    common_name: Option<&str>,
    now_unix: i64,
) -> CryptoResult<PemBlock> {
    let common_name = common_name.unwrap_or("Bearer");
    let pkcs8_der = private_key
        .to_pkcs8_der()
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    let key_pair = KeyPair::from_der(pkcs8_der.as_bytes())
        .map_err(|e| CryptoError::CertificateParse(e.to_string()))?;

    let mut params = CertificateParams::new(Vec::new())
        .map_err(|e| CryptoError::CertificateParse(e.to_string()))?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, ORGANIZATION);
    params.distinguished_name = dn;

    let not_before = OffsetDateTime::from_unix_timestamp(now_unix)
        .map_err(|e| CryptoError::CertificateParse(e.to_string()))?;
    let not_after = OffsetDateTime::from_unix_timestamp(now_unix + RECIPIENT_CERT_LIFETIME_SECS)
        .map_err(|e| CryptoError::CertificateParse(e.to_string()))?;
    params.not_before = not_before;
    params.not_after = not_after;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CryptoError::CertificateParse(e.to_string()))?;

    Ok(PemBlock::new(ROLE_RECIPIENT_TAG, cert.der().to_vec())
        .with_header("NotAfter", (now_unix + RECIPIENT_CERT_LIFETIME_SECS).to_string())
        .with_header("Common-Name", common_name.to_string())
        .with_header("Role", role.to_string()))
}

/// Validates a recipient certificate block (PEM type, validity window) and
/// returns the RSA public key envelopes should be encrypted under.
pub fn validate_recipient_certificate(
    block: &PemBlock,
    now_unix: i64,
) -> CryptoResult<RsaPublicKey> {
    block.require_tag(ROLE_RECIPIENT_TAG)?;

    let (_, cert) = x509_parser::parse_x509_certificate(&block.contents)
        .map_err(|e| CryptoError::CertificateParse(e.to_string()))?;

    let not_before = cert.validity().not_before.timestamp();
    let not_after = cert.validity().not_after.timestamp();
    if now_unix < not_before {
        return Err(CryptoError::CertificateNotYetValid);
    }
    if now_unix > not_after {
        return Err(CryptoError::CertificateExpired);
    }

    let spki_der = cert.public_key().raw;
    RsaPublicKey::from_public_key_der(spki_der)
        .map_err(|e| CryptoError::CertificateParse(format!("not an RSA public key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;

    fn test_key() -> RsaPrivateKey {
        // A small key is used only to keep unit tests fast; production paths
        // always request `generate::ROLE_KEY_BITS`.
        let mut rng = rand::thread_rng();
        RsaPrivateKey::new(&mut rng, 1024).expect("tiny test key")
    }

    #[test]
    fn mints_and_validates_round_trip() {
        let key = test_key();
        let now = 1_000_000_000;
        let block = mint_recipient_certificate(&key, "r1", Some("alice"), now).unwrap();
        assert_eq!(block.tag, ROLE_RECIPIENT_TAG);
        assert_eq!(block.header("Common-Name"), Some("alice"));
        let pubkey = validate_recipient_certificate(&block, now + 10).unwrap();
        assert_eq!(pubkey, key.to_public_key());
    }

    #[test]
    fn rejects_not_yet_valid_certificate() {
        let key = test_key();
        let now = 1_000_000_000;
        let block = mint_recipient_certificate(&key, "r1", None, now).unwrap();
        let err = validate_recipient_certificate(&block, now - 10).unwrap_err();
        assert!(matches!(err, CryptoError::CertificateNotYetValid));
    }

    #[test]
    fn rejects_expired_certificate() {
        let key = test_key();
        let now = 1_000_000_000;
        let block = mint_recipient_certificate(&key, "r1", None, now).unwrap();
        let err =
            validate_recipient_certificate(&block, now + RECIPIENT_CERT_LIFETIME_SECS + 10)
                .unwrap_err();
        assert!(matches!(err, CryptoError::CertificateExpired));
    }
}
