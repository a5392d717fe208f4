//! Backend configuration stages (§4.7 Read/write config, Set/clear TLS pin).
//!
//! Grounded on `path_config.go`'s `readConfiguration`/`storeConfiguration`/
//! `pathCertConfig`'s `updateCert`/`resetCert` chains.

use std::sync::Arc;

use mashery_client::pool::ClientPool;
use mashery_core::{CoreError, PinDescriptor, RequestContext, Stage, StageOutcome, Storage, StorageJsonExt, paths};
use serde_json::json;

use crate::heap::{ConfigHeap, PinLevel, PinningHeap};
use crate::response::EngineResponse;

/// `readBackEndConfig`: loads the mount's configuration, defaulting it (with
/// a freshly generated OAEP label) on first use rather than erroring (§4.3).
pub fn load_or_default_config(storage: Arc<dyn Storage>, backend_uuid: String) -> impl Stage<ConfigHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut ConfigHeap| {
        let storage = storage.clone();
        let backend_uuid = backend_uuid.clone();
        async move {
            let cfg = storage.read_json(&paths::config(&backend_uuid)).await?;
            heap.config = Some(cfg.unwrap_or_else(|| mashery_core::BackendConfiguration::new(new_oaep_label())));
            Ok(StageOutcome::Continue)
        }
    }
}

fn new_oaep_label() -> Vec<u8> {
    use rand::RngCore;
    let mut label = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut label);
    label
}

/// `readConfiguration`: renders both the desired and effective TLS-pinning
/// mode, matching Q4's fallback (`custom` with no pins reads as `default`).
pub fn render_config() -> impl Stage<ConfigHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut ConfigHeap| async move {
        let cfg = heap.config.as_ref().expect("load_or_default_config ran first");
        let response = EngineResponse::new()
            .with("proxy_server_url", json!(cfg.proxy_server_url()))
            .with("proxy_auth_mode", json!(format!("{:?}", cfg.proxy_auth_mode)))
            .with("cli_write_enabled", json!(cfg.cli_write_enabled))
            .with("network_latency_ms", json!(cfg.effective_network_latency()))
            .with("tls_pinning (desired)", json!(cfg.tls_pinning))
            .with("tls_pinning (effective)", json!(cfg.effective_tls_pinning()))
            .with("tls_pin_leaf", json!(!cfg.tls_pins.leaf.is_empty()))
            .with("tls_pin_issuer", json!(!cfg.tls_pins.issuer.is_empty()))
            .with("tls_pin_root", json!(!cfg.tls_pins.root.is_empty()));
        Ok(StageOutcome::Respond(response))
    }
}

/// Request fields accepted by `storeConfiguration` (`path_config.go`'s `pathConfigFields`).
#[derive(Debug, Clone, Default)]
pub struct ConfigFields {
    pub oaep_label: Option<Vec<u8>>,
    pub proxy_server_url: Option<String>,
    pub proxy_auth_mode: Option<mashery_core::ProxyAuthMode>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
    pub cli_write_enabled: Option<bool>,
    pub network_latency_ms: Option<u32>,
    pub tls_pinning: Option<mashery_core::TlsPinningMode>,
}

/// `parseBackEndConfigurationFunc`: applies request fields onto the loaded config.
pub fn apply_field_overrides(fields: ConfigFields) -> impl Stage<ConfigHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut ConfigHeap| {
        let fields = fields.clone();
        async move {
            let cfg = heap.config.as_mut().expect("load_or_default_config ran first");
            if let Some(v) = fields.oaep_label {
                cfg.oaep_label = v;
            }
            if let Some(v) = fields.proxy_server_url {
                cfg.proxy_server_url = Some(v);
            }
            if let Some(v) = fields.proxy_auth_mode {
                cfg.proxy_auth_mode = v;
            }
            if let Some(v) = fields.proxy_username {
                cfg.proxy_username = Some(v);
            }
            if let Some(v) = fields.proxy_password {
                cfg.proxy_password = Some(v);
            }
            if let Some(v) = fields.cli_write_enabled {
                cfg.cli_write_enabled = v;
            }
            if let Some(v) = fields.network_latency_ms {
                cfg.network_latency_ms = v;
            }
            if let Some(v) = fields.tls_pinning {
                cfg.tls_pinning = v;
            }
            Ok(StageOutcome::Continue)
        }
    }
}

pub fn persist_config(storage: Arc<dyn Storage>, backend_uuid: String) -> impl Stage<ConfigHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut ConfigHeap| {
        let storage = storage.clone();
        let backend_uuid = backend_uuid.clone();
        async move {
            let cfg = heap.config.as_ref().expect("config staged before persist_config runs");
            storage.write_json(&paths::config(&backend_uuid), cfg).await?;
            Ok(StageOutcome::Continue)
        }
    }
}

/// `AcceptConfigurationUpdate`: every cached client and the OAuth helper are
/// torn down so both rebuild against the new TLS/proxy parameters (Q3).
pub fn invalidate_client_pool(pool: Arc<ClientPool>) -> impl Stage<ConfigHeap, EngineResponse> {
    move |_ctx: &RequestContext, _heap: &mut ConfigHeap| {
        let pool = pool.clone();
        async move {
            pool.accept_config_update();
            Ok(StageOutcome::Respond(EngineResponse::new().with("updated", json!(true))))
        }
    }
}

/// `wrapTargetCertPinSelector`: copies the relevant pin level from `ConfigHeap`
/// into a `PinningHeap` aimed at that level (export side of the `MappingRunner`
/// pairing for the set/clear-pin chain).
pub fn export_config_heap(from: &ConfigHeap) -> ConfigHeap {
    ConfigHeap {
        config: from.config.clone(),
    }
}

/// `parseCertificatePinConfiguration`: parses the request's pin descriptor and
/// merges it into the targeted level.
pub fn parse_pin_descriptor(descriptor: PinDescriptor) -> impl Stage<PinningHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut PinningHeap| {
        let descriptor = descriptor.clone();
        async move {
            if descriptor.is_empty() {
                return Err(CoreError::invalid("a certificate pin requires at least one of common_name, serial_number, or fingerprint"));
            }
            heap.descriptor = Some(descriptor);
            Ok(StageOutcome::Continue)
        }
    }
}

/// `resetCertificatePin`: clears the targeted level back to an empty descriptor.
pub fn reset_pin_descriptor() -> impl Stage<PinningHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut PinningHeap| async move {
        heap.descriptor = Some(PinDescriptor::default());
        Ok(StageOutcome::Continue)
    }
}

/// `mergeIntoConfig`: writes the level's descriptor back into the mount config.
pub fn merge_pin_into_config() -> impl Stage<PinningHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut PinningHeap| async move {
        let descriptor = heap.descriptor.clone().expect("parse_pin_descriptor or reset_pin_descriptor ran first");
        let cfg = heap.config.as_mut().expect("load_or_default_config ran first");
        match heap.level {
            PinLevel::Leaf => cfg.tls_pins.leaf = descriptor,
            PinLevel::Issuer => cfg.tls_pins.issuer = descriptor,
            PinLevel::Root => cfg.tls_pins.root = descriptor,
        }
        Ok(StageOutcome::Continue)
    }
}

pub fn render_pin_saved(level: PinLevel) -> impl Stage<PinningHeap, EngineResponse> {
    move |_ctx: &RequestContext, _heap: &mut PinningHeap| {
        let which = match level {
            PinLevel::Leaf => "leaf",
            PinLevel::Issuer => "issuer",
            PinLevel::Root => "root",
        };
        async move { Ok(StageOutcome::Respond(EngineResponse::new().with("pin", json!(which)).with("updated", json!(true)))) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mashery_core::{InMemoryStorage, RequestContext};

    #[tokio::test]
    async fn first_read_defaults_config_with_a_fresh_oaep_label() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let ctx = RequestContext::new("read_config", "config");
        let mut heap = ConfigHeap::default();
        load_or_default_config(storage, "b1".into()).run(&ctx, &mut heap).await.unwrap();
        assert_eq!(heap.config.as_ref().unwrap().oaep_label.len(), 32);
    }

    #[tokio::test]
    async fn q4_effective_pinning_falls_back_without_pins() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let ctx = RequestContext::new("read_config", "config");
        let mut heap = ConfigHeap::default();
        load_or_default_config(storage.clone(), "b1".into()).run(&ctx, &mut heap).await.unwrap();
        apply_field_overrides(ConfigFields {
            tls_pinning: Some(mashery_core::TlsPinningMode::Custom),
            ..Default::default()
        })
        .run(&ctx, &mut heap)
        .await
        .unwrap();
        let out = render_config().run(&ctx, &mut heap).await.unwrap();
        match out {
            StageOutcome::Respond(resp) => {
                assert_eq!(resp.data["tls_pinning (effective)"], json!("default"));
            }
            _ => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn empty_pin_descriptor_is_rejected() {
        let ctx = RequestContext::new("set_pin", "config/certs/leaf");
        let mut heap = PinningHeap::new(PinLevel::Leaf);
        heap.config = Some(mashery_core::BackendConfiguration::default());
        let err = parse_pin_descriptor(PinDescriptor::default()).run(&ctx, &mut heap).await.unwrap_err();
        assert!(matches!(err, CoreError::InputInvalid(_)));
    }
}
