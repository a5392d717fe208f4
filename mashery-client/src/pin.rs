//! TLS pinning engine: chain-position validators keyed by common-name,
//! serial number, and SHA-256 fingerprint.

use mashery_core::{PinDescriptor, TlsPinningConfig};
use sha2::{Digest, Sha256};

use crate::error::{ClientError, ClientResult};

/// One parsed chain position, extracted once per handshake so the three pin
/// levels can each be checked without re-parsing.
struct ChainPosition {
    common_name: Option<String>,
    serial_number: Vec<u8>,
    fingerprint: [u8; 32],
}

fn parse_position(der: &[u8]) -> ClientResult<ChainPosition> {
    let (_, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| ClientError::CertificateParse(e.to_string()))?;
    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);
    let serial_number = cert.raw_serial().to_vec();
    let fingerprint: [u8; 32] = Sha256::digest(der).into();
    Ok(ChainPosition {
        common_name,
        serial_number,
        fingerprint,
    })
}

/// A pin descriptor with no constraints matches anything; otherwise every
/// populated field must match.
fn matches(position: &ChainPosition, pin: &PinDescriptor) -> bool {
    if pin.is_empty() {
        return true;
    }
    if let Some(cn) = &pin.common_name {
        if position.common_name.as_deref() != Some(cn.as_str()) {
            return false;
        }
    }
    if let Some(serial) = &pin.serial_number {
        if &position.serial_number != serial {
            return false;
        }
    }
    if let Some(fp) = &pin.fingerprint {
        if position.fingerprint.as_slice() != fp.as_slice() {
            return false;
        }
    }
    true
}

/// Validates a DER certificate chain (`chain[0]` = leaf, last = root) against
/// configured pins. Each level is checked independently; a level with no
/// constraints imposes none.
pub fn chain_is_accepted(chain_der: &[Vec<u8>], pins: &TlsPinningConfig) -> ClientResult<bool> {
    let leaf = chain_der.first();
    let root = chain_der.last();
    let issuer = if chain_der.len() > 2 {
        chain_der.get(1)
    } else {
        None
    };

    let check = |der: Option<&Vec<u8>>, pin: &PinDescriptor| -> ClientResult<bool> {
        if pin.is_empty() {
            return Ok(true);
        }
        match der {
            None => Ok(false),
            Some(der) => Ok(matches(&parse_position(der)?, pin)),
        }
    };

    Ok(check(leaf, &pins.leaf)? && check(issuer, &pins.issuer)? && check(root, &pins.root)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, KeyPair};

    fn self_signed_der(cn: &str) -> Vec<u8> {
        let key_pair = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec![cn.to_string()]).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, cn);
        let cert = params.self_signed(&key_pair).unwrap();
        cert.der().to_vec()
    }

    #[test]
    fn empty_pins_accept_anything() {
        let chain = vec![self_signed_der("leaf.example.com")];
        assert!(chain_is_accepted(&chain, &TlsPinningConfig::default()).unwrap());
    }

    #[test]
    fn common_name_mismatch_is_rejected() {
        let chain = vec![self_signed_der("leaf.example.com")];
        let mut pins = TlsPinningConfig::default();
        pins.leaf.common_name = Some("other.example.com".to_string());
        assert!(!chain_is_accepted(&chain, &pins).unwrap());
    }

    #[test]
    fn common_name_match_is_accepted() {
        let chain = vec![self_signed_der("leaf.example.com")];
        let mut pins = TlsPinningConfig::default();
        pins.leaf.common_name = Some("leaf.example.com".to_string());
        assert!(chain_is_accepted(&chain, &pins).unwrap());
    }

    #[test]
    fn missing_chain_position_with_a_constraint_is_rejected() {
        let chain = vec![self_signed_der("leaf.example.com")];
        let mut pins = TlsPinningConfig::default();
        pins.root.common_name = Some("root.example.com".to_string());
        // Only one chain position was presented, so the root constraint cannot be met.
        assert!(!chain_is_accepted(&chain, &pins).unwrap());
    }
}
