//! Per-pipeline heap capability variants: one concrete struct per capability
//! combination in place of extensible capability interfaces, with
//! `MappingRunner` projecting between them via explicit exporter/importer
//! closures.
//!
//! Grounded on `chainofresponsibility.go`'s `RoleContainer`,
//! `BackendConfigurationContainer`, `TLSPinningContainer`,
//! `V3TokenContextContainer`, and `path_role_grant.go`'s
//! `V2SignatureContainer`.

use mashery_client::v3::WrappedResponse;
use mashery_core::{BackendConfiguration, PinDescriptor, StoredRole};
use serde_json::Value;

/// Carries the role under mutation. The base capability every role-bound
/// handler pipeline starts from.
#[derive(Debug, Default)]
pub struct RoleHeap {
    pub role_name: String,
    pub role: Option<StoredRole>,
}

impl RoleHeap {
    pub fn new(role_name: impl Into<String>) -> Self {
        Self {
            role_name: role_name.into(),
            role: None,
        }
    }

    pub fn role(&self) -> Option<&StoredRole> {
        self.role.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinLevel {
    Leaf,
    Issuer,
    Root,
}

#[derive(Debug, Default)]
pub struct ConfigHeap {
    pub config: Option<BackendConfiguration>,
}

/// `BackendConfigurationContext` generalized to a specific pin level: target
/// cert position (leaf/issuer/root) plus the descriptor parsed from the request.
#[derive(Debug)]
pub struct PinningHeap {
    pub config: Option<BackendConfiguration>,
    pub level: PinLevel,
    pub descriptor: Option<PinDescriptor>,
}

impl PinningHeap {
    pub fn new(level: PinLevel) -> Self {
        Self {
            config: None,
            level,
            descriptor: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct V2SignatureHeap {
    pub role_name: String,
    pub role: Option<StoredRole>,
    pub signature: Option<String>,
}

#[derive(Debug, Default)]
pub struct V3TokenHeap {
    pub role_name: String,
    pub role: Option<StoredRole>,
    pub token: Option<String>,
}

/// `ApiResponseContext<T>`: carries the role, the upstream method/path being
/// invoked, and (once the call has run) the wrapped upstream response.
#[derive(Debug, Default)]
pub struct ApiResponseHeap {
    pub role_name: String,
    pub role: Option<StoredRole>,
    pub method: String,
    pub upstream_path: String,
    pub body: Option<Value>,
    pub response: Option<WrappedResponse>,
}

pub fn export_v2_signature_heap(from: &V2SignatureHeap) -> RoleHeap {
    RoleHeap {
        role_name: from.role_name.clone(),
        role: from.role.clone(),
    }
}

pub fn import_v2_signature_heap(parent: RoleHeap, into: &mut V2SignatureHeap) {
    into.role = parent.role;
}

pub fn export_v3_token_heap(from: &V3TokenHeap) -> RoleHeap {
    RoleHeap {
        role_name: from.role_name.clone(),
        role: from.role.clone(),
    }
}

pub fn import_v3_token_heap(parent: RoleHeap, into: &mut V3TokenHeap) {
    into.role = parent.role;
}

pub fn export_pinning_heap(from: &PinningHeap) -> ConfigHeap {
    ConfigHeap {
        config: from.config.clone(),
    }
}

pub fn import_pinning_heap(parent: ConfigHeap, into: &mut PinningHeap) {
    into.config = parent.config;
}
