//! V2 signature computation: lowercase hex
//! `MD5(apiKey || keySecret || unix_now)`, recomputed before every V2 call.

use md5::{Digest, Md5};

/// `sig = lowercase-hex(MD5(api_key + key_secret + unix_now))`.
///
/// Uses `SystemTime::now()` seconds-since-epoch, UTC by construction.
pub fn v2_signature(api_key: &str, key_secret: &str, unix_now: i64) -> String {
    let mut hasher = Md5::new();
    hasher.update(api_key.as_bytes());
    hasher.update(key_secret.as_bytes());
    hasher.update(unix_now.to_string().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
