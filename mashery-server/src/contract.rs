//! Host-facing request/response contract (§6): `Operation`, `Request`,
//! `FieldData`, `Secret`, `Logger`. `Response` itself needs no new type —
//! `mashery_engine::EngineResponse` already has the `{Data, Headers,
//! Warnings, Secret?}` shape §6 calls for, so the path layer returns it
//! directly.
//!
//! Grounded on `framework.FieldData`/`framework.FieldSchema`,
//! `framework.Secret`, and `logical.Request`/`logical.Response` from the
//! Vault SDK that `original_source/mashery/plugin.go` is written against.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::error::ServerError;

/// `logical.Operation`, restricted to the five kinds the path table actually
/// dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    List,
}

/// `logical.Request`: the operation being invoked, the path it matched, and
/// the request body as an untyped field bag. Storage is not threaded through
/// here — every `Engine` is already bound to one mount's storage at
/// construction (§4.7), so a per-request `Storage` handle would be a second,
/// redundant route to the same data.
#[derive(Debug, Clone)]
pub struct Request {
    pub operation: Operation,
    pub path: String,
    pub data: BTreeMap<String, Value>,
}

impl Request {
    pub fn new(operation: Operation, path: impl Into<String>) -> Self {
        Self {
            operation,
            path: path.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with_data(mut self, data: BTreeMap<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn fields(&self) -> FieldData<'_> {
        FieldData { data: &self.data }
    }
}

/// `framework.FieldData`: typed extraction over the request's untyped field
/// bag. Missing fields read as `None` rather than a schema-default zero
/// value — every caller in this crate already treats "field absent" and
/// "leave existing value untouched" as the same thing for `Update`.
pub struct FieldData<'a> {
    data: &'a BTreeMap<String, Value>,
}

impl<'a> FieldData<'a> {
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.data.get(key).and_then(Value::as_str).map(str::to_string)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.data.get(key).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(Value::as_bool)
    }

    /// `framework.TypeCommaStringSlice`: accepts either a JSON array of
    /// strings or a single comma-separated string.
    pub fn get_comma_string_slice(&self, key: &str) -> Vec<String> {
        match self.data.get(key) {
            Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            Some(Value::String(s)) => s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect(),
            _ => Vec::new(),
        }
    }

    /// Decodes a hexadecimal field (serial numbers, fingerprints — §6 PEM
    /// headers and `config/certs/*`'s `sn`/`fp` fields are both hex strings).
    pub fn get_hex_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, ServerError> {
        match self.get_string(key) {
            None => Ok(None),
            Some(s) if s.is_empty() => Ok(None),
            Some(s) => decode_hex(&s).map(Some).map_err(|_| ServerError::InvalidField(key.to_string())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>, ()> {
    if s.len() % 2 != 0 {
        return Err(());
    }
    (0..s.len()).step_by(2).map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ())).collect()
}

/// `framework.Secret`: the lease-type registration a host keeps in its
/// secret table, distinct from the per-response `SecretLease` reference
/// embedded in an `EngineResponse`. `renew`/`revoke` are genuinely no-ops —
/// neither a V2 signature nor a V3 access token can be renewed or revoked at
/// the upstream (`noopRenewRevoke` in the donor).
#[derive(Clone, Copy)]
pub struct SecretDescriptor {
    pub lease_type: &'static str,
    pub default_duration: Duration,
}

impl SecretDescriptor {
    pub const fn new(lease_type: &'static str, default_duration_secs: u64) -> Self {
        Self {
            lease_type,
            default_duration: Duration::from_secs(default_duration_secs),
        }
    }

    /// `noopRenewRevoke`.
    pub fn renew(&self, _request: &Request) -> Result<(), ServerError> {
        Ok(())
    }

    /// `noopRenewRevoke`.
    pub fn revoke(&self, _request: &Request) -> Result<(), ServerError> {
        Ok(())
    }
}

pub const V2_ACCESS_SECRET: SecretDescriptor = SecretDescriptor::new("v2_access", 60);
pub const V3_ACCESS_SECRET: SecretDescriptor = SecretDescriptor::new("v3_access", 15 * 60);

/// `b.Logger()`: a thin facade over `tracing` so a host embedding this crate
/// never has to take a direct `tracing` dependency of its own to observe it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Logger;

impl Logger {
    pub fn info(&self, message: &str) {
        tracing::info!(target: "mashery_server", "{message}");
    }

    pub fn trace(&self, message: &str) {
        tracing::trace!(target: "mashery_server", "{message}");
    }

    pub fn error(&self, message: &str) {
        tracing::error!(target: "mashery_server", "{message}");
    }
}
