//! Issue-grant stages (§4.7 Issue grant V2/V3).
//!
//! Grounded on `path_role_grant.go`'s `issueGrant`, `createV3LeasedResponse`,
//! `v2SignatureFor`, and `transformers_v3.go`'s `ensureAccessTokenValid`.

use std::sync::Arc;

use mashery_core::{CoreError, RequestContext, Stage, StageOutcome, Storage, StorageJsonExt, now_unix, paths};
use serde_json::json;

use mashery_client::oauth::{V3Credentials, V3OAuthHelper};
use mashery_client::v3::TokenRefresher;

use crate::heap::{RoleHeap, V2SignatureHeap, V3TokenHeap};
use crate::response::{EngineResponse, v2_access_secret, v3_access_secret};

/// `blockOperationOnForceProxyRole`: grants are not issued by value for roles
/// that require the engine to always proxy the call on their behalf.
pub fn block_if_force_proxy() -> impl Stage<RoleHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut RoleHeap| async move {
        if heap.role.as_ref().is_some_and(|r| r.keys.force_proxy_mode) {
            return Err(CoreError::invariant("operation is not permitted as this role requires proxy mode"));
        }
        Ok(StageOutcome::Continue)
    }
}

/// `blockUsageExceedingLimits`: expired or depleted roles refuse every operation (I2, I3).
pub fn block_if_expired_or_depleted() -> impl Stage<RoleHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut RoleHeap| async move {
        let role = heap.role.as_ref().expect("read_role ran first");
        let now = now_unix();
        if role.usage.expired(now) {
            return Err(CoreError::invariant("this role has expired"));
        }
        if role.usage.depleted() {
            return Err(CoreError::invariant("this role has depleted its usage quota"));
        }
        Ok(StageOutcome::Continue)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    V2,
    V3,
}

/// `blockRoleIncapableOf(apiVersion)`.
pub fn block_if_not_capable(version: ApiVersion) -> impl Stage<RoleHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut RoleHeap| async move {
        let role = heap.role.as_ref().expect("read_role ran first");
        let capable = match version {
            ApiVersion::V2 => role.keys.is_v2_capable(),
            ApiVersion::V3 => role.keys.is_v3_capable(),
        };
        if !capable {
            let which = match version {
                ApiVersion::V2 => "V2",
                ApiVersion::V3 => "V3",
            };
            return Err(CoreError::invariant(format!("role is not capable of {which} calls")));
        }
        Ok(StageOutcome::Continue)
    }
}

/// `decreaseRemainingUsageQuota`: persists the decrement before any upstream
/// call is attempted (§5 Ordering guarantees, Q1).
pub fn decrement_quota(storage: Arc<dyn Storage>, backend_uuid: String) -> impl Stage<RoleHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut RoleHeap| {
        let storage = storage.clone();
        let backend_uuid = backend_uuid.clone();
        async move {
            let role = heap.role.as_mut().expect("read_role ran first");
            role.usage.reduce_remaining_quota();
            storage.write_json(&paths::role_usage(&backend_uuid, &role.name), &role.usage).await?;
            Ok(StageOutcome::Continue)
        }
    }
}

/// `retrieveV2Signature`.
pub fn retrieve_v2_signature() -> impl Stage<V2SignatureHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut V2SignatureHeap| async move {
        let role = heap.role.as_ref().expect("mapped from RoleHeap");
        heap.signature = Some(mashery_crypto::v2_signature(&role.keys.api_key, &role.keys.key_secret, now_unix()));
        Ok(StageOutcome::Continue)
    }
}

/// Renders the V2 grant by value: `{area_nid, api_key, sig}` (scenario 2).
pub fn render_v2_plain() -> impl Stage<V2SignatureHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut V2SignatureHeap| async move {
        let role = heap.role.as_ref().expect("role present");
        let sig = heap.signature.clone().expect("retrieve_v2_signature ran first");
        let response = EngineResponse::new()
            .with("area_nid", json!(role.keys.area_nid))
            .with("api_key", json!(role.keys.api_key))
            .with("sig", json!(sig));
        Ok(StageOutcome::Respond(response))
    }
}

pub fn render_v2_lease() -> impl Stage<V2SignatureHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut V2SignatureHeap| async move {
        let role = heap.role.as_ref().expect("role present");
        let sig = heap.signature.clone().expect("retrieve_v2_signature ran first");
        let response = EngineResponse::new()
            .with("area_nid", json!(role.keys.area_nid))
            .with("api_key", json!(role.keys.api_key))
            .with("sig", json!(sig))
            .with_secret(v2_access_secret(60));
        Ok(StageOutcome::Respond(response))
    }
}

/// `retrieveV3AccessToken`: refreshes the cached token (via the OAuth helper)
/// only when `V3TokenNeedsRenew` holds, then persists Usage (§4.6).
pub fn retrieve_v3_access_token(
    oauth: Arc<V3OAuthHelper>,
    storage: Arc<dyn Storage>,
    backend_uuid: String,
) -> impl Stage<V3TokenHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut V3TokenHeap| {
        let oauth = oauth.clone();
        let storage = storage.clone();
        let backend_uuid = backend_uuid.clone();
        async move {
            let role = heap.role.as_mut().expect("mapped from RoleHeap");
            let now = now_unix();
            if role.usage.v3_token_needs_renew(now) {
                let creds = V3Credentials {
                    api_key: role.keys.api_key.clone(),
                    key_secret: role.keys.key_secret.clone(),
                    username: role.keys.username.clone(),
                    password: role.keys.password.clone(),
                };
                let token = oauth
                    .retrieve_access_token_for(&creds)
                    .await
                    .map_err(|e| CoreError::Internal(format!("token acquisition failed: {e}")))?;
                role.usage.replace_access_token(token.access_token.clone(), token.obtained_unix, token.expiry_unix);
                storage.write_json(&paths::role_usage(&backend_uuid, &role.name), &role.usage).await?;
            }
            heap.token = Some(role.usage.v3_token.clone());
            Ok(StageOutcome::Continue)
        }
    }
}

pub fn render_v3_plain() -> impl Stage<V3TokenHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut V3TokenHeap| async move {
        let role = heap.role.as_ref().expect("role present");
        let token = heap.token.clone().expect("retrieve_v3_access_token ran first");
        let response = EngineResponse::new()
            .with("access_token", json!(token))
            .with("token_expiry", json!(role.usage.v3_token_expiry))
            .with("max_qps", json!(role.keys.max_qps));
        Ok(StageOutcome::Respond(response))
    }
}

pub fn render_v3_lease() -> impl Stage<V3TokenHeap, EngineResponse> {
    move |_ctx: &RequestContext, heap: &mut V3TokenHeap| async move {
        let role = heap.role.as_ref().expect("role present");
        let token = heap.token.clone().expect("retrieve_v3_access_token ran first");
        let lifetime = (role.usage.v3_token_expiry - role.usage.v3_token_obtained).max(0) as u64;
        let response = EngineResponse::new()
            .with("access_token", json!(token))
            .with("token_expiry", json!(role.usage.v3_token_expiry))
            .with("max_qps", json!(role.keys.max_qps))
            .with_secret(v3_access_secret(lifetime));
        Ok(StageOutcome::Respond(response))
    }
}

/// Bridges `mashery_client::v3::TokenRefresher` to the OAuth helper + storage,
/// so `V3Client::fetch_with_retry`'s stale-token retry can persist a refreshed
/// token without the client layer touching storage itself (§6 boundary).
pub struct StorageBackedRefresher {
    pub oauth: Arc<V3OAuthHelper>,
    pub storage: Arc<dyn Storage>,
    pub backend_uuid: String,
    pub role_name: String,
    pub credentials: V3Credentials,
}

#[async_trait::async_trait]
impl TokenRefresher for StorageBackedRefresher {
    async fn refresh(&self) -> mashery_client::ClientResult<mashery_client::AcquiredToken> {
        let token = self.oauth.retrieve_access_token_for(&self.credentials).await?;
        // Best-effort persistence: a storage failure here does not invalidate
        // the freshly-acquired token for the in-flight call, it only risks a
        // redundant refresh on the next request.
        if let Ok(Some(mut usage)) = self
            .storage
            .read_json::<mashery_core::RoleUsage>(&paths::role_usage(&self.backend_uuid, &self.role_name))
            .await
        {
            usage.replace_access_token(token.access_token.clone(), token.obtained_unix, token.expiry_unix);
            let _ = self.storage.write_json(&paths::role_usage(&self.backend_uuid, &self.role_name), &usage).await;
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mashery_core::{RequestContext, RoleKeys, StoredRole};

    #[tokio::test]
    async fn force_proxy_role_blocks_grant() {
        let ctx = RequestContext::new("grant", "roles/r1/grant");
        let mut heap = RoleHeap {
            role_name: "r1".into(),
            role: Some(StoredRole::new(
                "r1",
                RoleKeys {
                    force_proxy_mode: true,
                    ..RoleKeys::new()
                },
            )),
        };
        let err = block_if_force_proxy().run(&ctx, &mut heap).await.unwrap_err();
        assert!(matches!(err, CoreError::StateInvariant(m) if m.contains("proxy mode")));
    }

    #[tokio::test]
    async fn depleted_role_blocks_grant() {
        let ctx = RequestContext::new("grant", "roles/r1/grant");
        let mut role = StoredRole::new("r1", RoleKeys::new());
        role.usage.explicit_num_uses = 1;
        role.usage.remaining_num_uses = 0;
        let mut heap = RoleHeap {
            role_name: "r1".into(),
            role: Some(role),
        };
        let err = block_if_expired_or_depleted().run(&ctx, &mut heap).await.unwrap_err();
        assert!(matches!(err, CoreError::StateInvariant(m) if m.contains("depleted")));
    }
}
