//! PEM block framing with RFC 1421-style headers.
//!
//! The `pem` crate's `Pem` type models only a tag and body — it has no concept
//! of the `Key: Value` header lines this protocol relies on to carry metadata
//! (`NotAfter`, `Common-Name`, capability bits, …) alongside the encrypted
//! payload. Those headers are load-bearing here, so this module frames PEM
//! text by hand instead of reaching for a crate that would silently drop them.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::collections::BTreeMap;

use crate::error::{CryptoError, CryptoResult};

pub const ROLE_RECIPIENT_TAG: &str = "MASHERY ROLE RECIPIENT";
pub const ROLE_DATA_TAG: &str = "MASHERY ROLE DATA";

#[derive(Debug, Clone, PartialEq)]
pub struct PemBlock {
    pub tag: String,
    pub headers: BTreeMap<String, String>,
    pub contents: Vec<u8>,
}

impl PemBlock {
    pub fn new(tag: impl Into<String>, contents: Vec<u8>) -> Self {
        Self {
            tag: tag.into(),
            headers: BTreeMap::new(),
            contents,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn require_tag(&self, expected: &'static str) -> CryptoResult<()> {
        if self.tag != expected {
            return Err(CryptoError::WrongPemType {
                expected,
                actual: self.tag.clone(),
            });
        }
        Ok(())
    }

    pub fn encode(&self) -> String {
        let mut out = format!("-----BEGIN {}-----\n", self.tag);
        for (k, v) in &self.headers {
            out.push_str(&format!("{k}: {v}\n"));
        }
        if !self.headers.is_empty() {
            out.push('\n');
        }
        let body = BASE64.encode(&self.contents);
        for chunk in body.as_bytes().chunks(64) {
            out.push_str(std::str::from_utf8(chunk).expect("base64 is ascii"));
            out.push('\n');
        }
        out.push_str(&format!("-----END {}-----\n", self.tag));
        out
    }

    pub fn decode(text: &str) -> CryptoResult<Self> {
        let begin_marker = "-----BEGIN ";
        let begin_start = text
            .find(begin_marker)
            .ok_or_else(|| CryptoError::MalformedPem("missing BEGIN marker".into()))?;
        let after_begin = &text[begin_start + begin_marker.len()..];
        let begin_end = after_begin
            .find("-----")
            .ok_or_else(|| CryptoError::MalformedPem("malformed BEGIN marker".into()))?;
        let tag = after_begin[..begin_end].to_string();
        let end_marker = format!("-----END {tag}-----");
        let body_start = begin_start + begin_marker.len() + begin_end + "-----".len();
        let rest = &text[body_start..];
        let end_pos = rest
            .find(&end_marker)
            .ok_or_else(|| CryptoError::MalformedPem("missing matching END marker".into()))?;
        let inner = rest[..end_pos].trim_start_matches(['\r', '\n']);

        let mut headers = BTreeMap::new();
        let mut body_lines: Vec<&str> = Vec::new();
        let mut in_headers = true;
        for line in inner.lines() {
            if in_headers {
                if line.trim().is_empty() {
                    in_headers = false;
                    continue;
                }
                if let Some((k, v)) = line.split_once(':') {
                    headers.insert(k.trim().to_string(), v.trim().to_string());
                    continue;
                }
                // No header separator found: headers section was never present.
                in_headers = false;
            }
            if !line.trim().is_empty() {
                body_lines.push(line.trim());
            }
        }
        let body_b64: String = body_lines.concat();
        let contents = BASE64
            .decode(body_b64)
            .map_err(|e| CryptoError::MalformedPem(format!("invalid base64 body: {e}")))?;

        Ok(PemBlock { tag, headers, contents })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_preserves_tag_bytes_and_headers() {
        let block = PemBlock::new(ROLE_RECIPIENT_TAG, b"hello world, in binary".to_vec())
            .with_header("Common-Name", "Bearer")
            .with_header("Role", "r1")
            .with_header("NotAfter", "2026-07-28T12:00:00Z");
        let encoded = block.encode();
        let decoded = PemBlock::decode(&encoded).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(PemBlock::decode("not a pem document").is_err());
    }

    #[test]
    fn wrong_tag_is_rejected_explicitly() {
        let block = PemBlock::new(ROLE_DATA_TAG, vec![1, 2, 3]);
        let err = block.require_tag(ROLE_RECIPIENT_TAG).unwrap_err();
        assert!(matches!(err, CryptoError::WrongPemType { .. }));
    }

    #[test]
    fn headerless_block_round_trips() {
        let block = PemBlock::new(ROLE_DATA_TAG, b"payload".to_vec());
        let decoded = PemBlock::decode(&block.encode()).unwrap();
        assert_eq!(decoded, block);
    }

    proptest::proptest! {
        /// P2: encode-then-decode preserves block type, bytes, and header set
        /// for arbitrary contents and a handful of arbitrary headers.
        #[test]
        fn p2_encode_decode_round_trips_arbitrary_contents(
            contents in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..2048),
            header_values in proptest::collection::vec("[a-zA-Z0-9_-]{1,20}", 0..4),
        ) {
            let mut block = PemBlock::new(ROLE_DATA_TAG, contents);
            for (i, value) in header_values.iter().enumerate() {
                block = block.with_header(format!("X-Prop-{i}"), value.clone());
            }
            let decoded = PemBlock::decode(&block.encode()).unwrap();
            proptest::prop_assert_eq!(decoded, block);
        }
    }
}
