//! Cached V3 token read/forget stages (§4.7 Fetch cached token, Forget cached token).
//!
//! Grounded on `path_role_token.go`'s `readRoleToken`/`forgetRoleToken`.

use std::sync::Arc;

use mashery_core::{CoreError, RequestContext, Stage, StageOutcome, Storage, StorageJsonExt, paths};
use serde_json::json;

use crate::heap::V3TokenHeap;
use crate::response::EngineResponse;

/// `readRoleToken`: refuses force-proxy roles (those never hand out
/// credentials by value) and returns the cached token verbatim — no refresh,
/// no *additional* quota decrement beyond the standard blocking chain that
/// runs ahead of this stage (see DESIGN.md on the "no decrement" wording).
pub fn render_cached_token_if_fresh() -> impl Stage<V3TokenHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut V3TokenHeap| async move {
        let role = heap.role.as_ref().expect("mapped from RoleHeap");
        if role.keys.force_proxy_mode {
            return Err(CoreError::invariant("operation is not permitted as this role requires proxy mode"));
        }
        let now = mashery_core::now_unix();
        if role.usage.v3_token.is_empty() || role.usage.v3_token_expired(now) {
            return Ok(StageOutcome::Continue);
        }
        let response = EngineResponse::new()
            .with("access_token", json!(role.usage.v3_token))
            .with("token_expiry", json!(role.usage.v3_token_expiry))
            .with("needs_renew", json!(role.usage.v3_token_needs_renew(now)));
        Ok(StageOutcome::Respond(response))
    }
}

/// `resetToken`: clears the cached token without touching quota or term state.
pub fn reset_token(storage: Arc<dyn Storage>, backend_uuid: String) -> impl Stage<V3TokenHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut V3TokenHeap| {
        let storage = storage.clone();
        let backend_uuid = backend_uuid.clone();
        async move {
            let role = heap.role.as_mut().expect("mapped from RoleHeap");
            role.usage.reset_token();
            storage.write_json(&paths::role_usage(&backend_uuid, &role.name), &role.usage).await?;
            Ok(StageOutcome::Respond(EngineResponse::new().with("token_status", json!("---NOT-SET---"))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mashery_core::{RequestContext, RoleKeys, StoredRole};

    #[tokio::test]
    async fn force_proxy_role_refuses_cached_token() {
        let ctx = RequestContext::new("token", "roles/r1/token");
        let mut heap = V3TokenHeap {
            role_name: "r1".into(),
            role: Some(StoredRole::new(
                "r1",
                RoleKeys {
                    force_proxy_mode: true,
                    ..RoleKeys::new()
                },
            )),
            token: None,
        };
        let err = render_cached_token_if_fresh().run(&ctx, &mut heap).await.unwrap_err();
        assert!(matches!(err, CoreError::StateInvariant(_)));
    }

    #[tokio::test]
    async fn missing_cached_token_continues() {
        let ctx = RequestContext::new("token", "roles/r1/token");
        let mut heap = V3TokenHeap {
            role_name: "r1".into(),
            role: Some(StoredRole::new("r1", RoleKeys::new())),
            token: None,
        };
        let out = render_cached_token_if_fresh().run(&ctx, &mut heap).await.unwrap();
        assert!(matches!(out, StageOutcome::Continue));
    }
}
