//! Role lifecycle stages (§4.7 Create/Read/Update/Delete role).
//!
//! Grounded on `path_role.go`'s `handleWriteRoleKeys`/`handleReadRoleData`/
//! `handleUpdateRoleData`/`handleDeleteRoleData` chains.

use std::sync::Arc;

use mashery_core::{CoreError, RequestContext, Stage, StageOutcome, Storage, StorageJsonExt, StoredRole, now_unix, paths};
use serde_json::json;

use crate::heap::RoleHeap;
use crate::response::EngineResponse;

/// Request fields accepted by create/update (§4.7, `path_role.go`'s `pathRoleFields`).
#[derive(Debug, Clone, Default)]
pub struct RoleKeyFields {
    pub area_id: Option<String>,
    pub area_nid: Option<i64>,
    pub api_key: Option<String>,
    pub key_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub max_qps: Option<i32>,
}

/// `readRole[RoleContext](required)`: loads `Keys` and `Usage` into the heap.
/// Missing `Keys` is `Continue` when `required=false` (create path's first
/// probe) and `NotFound` when `required=true`.
pub fn read_role(storage: Arc<dyn Storage>, backend_uuid: String, required: bool) -> impl Stage<RoleHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut RoleHeap| {
        let storage = storage.clone();
        let backend_uuid = backend_uuid.clone();
        let role_name = heap.role_name.clone();
        async move {
            let keys = storage.read_json(&paths::role_keys(&backend_uuid, &role_name)).await?;
            match keys {
                None if required => Err(CoreError::not_found(format!("role {role_name}"))),
                None => Ok(StageOutcome::Continue),
                Some(keys) => {
                    let usage = storage
                        .read_json(&paths::role_usage(&backend_uuid, &role_name))
                        .await?
                        .unwrap_or_else(mashery_core::RoleUsage::unbounded);
                    heap.role = Some(StoredRole {
                        name: role_name.clone(),
                        keys,
                        usage,
                        private_key: None,
                    });
                    Ok(StageOutcome::Continue)
                }
            }
        }
    }
}

/// `blockOperationOnImportedRole`: an imported role's `Keys` are frozen.
pub fn block_if_imported() -> impl Stage<RoleHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut RoleHeap| async move {
        if let Some(role) = &heap.role {
            if role.keys.imported {
                return Err(CoreError::invariant("imported roles cannot be edited in place"));
            }
        }
        Ok(StageOutcome::Continue)
    }
}

/// `updateRoleKeysFromRequest`: merges request fields into (or creates) `Keys`.
pub fn update_keys_from_request(fields: RoleKeyFields) -> impl Stage<RoleHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut RoleHeap| {
        let fields = fields.clone();
        async move {
            let mut keys = heap.role.as_ref().map(|r| r.keys.clone()).unwrap_or_else(mashery_core::RoleKeys::new);
            if let Some(v) = fields.area_id {
                keys.area_id = v;
            }
            if let Some(v) = fields.area_nid {
                keys.area_nid = v;
            }
            if let Some(v) = fields.api_key {
                keys.api_key = v;
            }
            if let Some(v) = fields.key_secret {
                keys.key_secret = v;
            }
            if let Some(v) = fields.username {
                keys.username = v;
            }
            if let Some(v) = fields.password {
                keys.password = v;
            }
            if let Some(v) = fields.max_qps {
                keys.max_qps = v;
            }
            let usage = heap.role.as_ref().map(|r| r.usage.clone()).unwrap_or_else(mashery_core::RoleUsage::unbounded);
            heap.role = Some(StoredRole {
                name: heap.role_name.clone(),
                keys,
                usage,
                private_key: None,
            });
            Ok(StageOutcome::Continue)
        }
    }
}

pub fn save_keys(storage: Arc<dyn Storage>, backend_uuid: String) -> impl Stage<RoleHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut RoleHeap| {
        let storage = storage.clone();
        let backend_uuid = backend_uuid.clone();
        async move {
            let role = heap.role.as_ref().expect("keys staged before save_keys runs");
            storage.write_json(&paths::role_keys(&backend_uuid, &role.name), &role.keys).await?;
            Ok(StageOutcome::Continue)
        }
    }
}

/// `setInitialRoleUsage`: resets `Usage` to unbounded (create path only).
pub fn init_usage() -> impl Stage<RoleHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut RoleHeap| async move {
        if let Some(role) = heap.role.as_mut() {
            role.usage = mashery_core::RoleUsage::unbounded();
        }
        Ok(StageOutcome::Continue)
    }
}

pub fn save_usage(storage: Arc<dyn Storage>, backend_uuid: String) -> impl Stage<RoleHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut RoleHeap| {
        let storage = storage.clone();
        let backend_uuid = backend_uuid.clone();
        async move {
            let role = heap.role.as_ref().expect("usage staged before save_usage runs");
            storage.write_json(&paths::role_usage(&backend_uuid, &role.name), &role.usage).await?;
            Ok(StageOutcome::Continue)
        }
    }
}

/// `renderRole`: the read-role view (§4.7 Read role).
pub fn render_role() -> impl Stage<RoleHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut RoleHeap| async move {
        let role = heap.role.as_ref().expect("read_role(required=true) ran first");
        let now = now_unix();
        let response = EngineResponse::new()
            .with("role_name", json!(role.name))
            .with("v2_capable", json!(role.keys.is_v2_capable()))
            .with("v3_capable", json!(role.keys.is_v3_capable()))
            .with("qps", json!(role.keys.max_qps))
            .with("term", json!(role.usage.term_string()))
            .with("term_remaining", json!(role.usage.term_remaining_string(now)))
            .with("use_remaining", json!(role.usage.use_remaining_string()))
            .with("exportable", json!(role.keys.exportable))
            .with("forced_proxy_mode", json!(role.keys.force_proxy_mode))
            .with("imported", json!(role.keys.imported))
            .with("v3_token", json!(role.usage.token_status_string(now)))
            .with("v3_token_life", json!(role.usage.v3_token_life_string(now)));
        Ok(StageOutcome::Respond(response))
    }
}

/// Three-fold delete (§4.7 Delete role): reports the first failure, matching
/// `path_role.go`'s `handleDeleteRoleData` ordering (usage, private key, keys).
pub async fn delete_role(storage: &dyn Storage, backend_uuid: &str, role_name: &str) -> Result<(), CoreError> {
    storage.delete(&paths::role_usage(backend_uuid, role_name)).await?;
    storage.delete(&paths::role_private_key(backend_uuid, role_name)).await?;
    storage.delete(&paths::role_keys(backend_uuid, role_name)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mashery_core::{InMemoryStorage, RequestContext};

    #[tokio::test]
    async fn create_then_read_role_round_trips() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let backend_uuid = "b1".to_string();
        let ctx = RequestContext::new("create_role", "roles/r1");

        let mut heap = RoleHeap::new("r1");
        read_role(storage.clone(), backend_uuid.clone(), false).run(&ctx, &mut heap).await.unwrap();
        block_if_imported().run(&ctx, &mut heap).await.unwrap();
        update_keys_from_request(RoleKeyFields {
            area_nid: Some(456),
            api_key: Some("k".into()),
            key_secret: Some("s".into()),
            ..Default::default()
        })
        .run(&ctx, &mut heap)
        .await
        .unwrap();
        save_keys(storage.clone(), backend_uuid.clone()).run(&ctx, &mut heap).await.unwrap();
        init_usage().run(&ctx, &mut heap).await.unwrap();
        save_usage(storage.clone(), backend_uuid.clone()).run(&ctx, &mut heap).await.unwrap();

        let mut read_heap = RoleHeap::new("r1");
        read_role(storage.clone(), backend_uuid.clone(), true).run(&ctx, &mut read_heap).await.unwrap();
        let out = render_role().run(&ctx, &mut read_heap).await.unwrap();
        match out {
            StageOutcome::Respond(resp) => {
                assert_eq!(resp.data["v2_capable"], json!(true));
                assert_eq!(resp.data["v3_capable"], json!(false));
                assert_eq!(resp.data["term_remaining"], json!("\u{221e}"));
            }
            _ => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn imported_role_blocks_update() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let backend_uuid = "b1".to_string();
        let role_name = "r1";
        storage
            .write_json(
                &paths::role_keys(&backend_uuid, role_name),
                &mashery_core::RoleKeys {
                    imported: true,
                    ..mashery_core::RoleKeys::new()
                },
            )
            .await
            .unwrap();

        let ctx = RequestContext::new("update_role", "roles/r1");
        let mut heap = RoleHeap::new(role_name);
        read_role(storage.clone(), backend_uuid.clone(), true).run(&ctx, &mut heap).await.unwrap();
        let err = block_if_imported().run(&ctx, &mut heap).await.unwrap_err();
        assert!(matches!(err, CoreError::StateInvariant(_)));
    }
}
