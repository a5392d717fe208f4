//! Operation handlers (C7), proxy rendering (C8), and the host-facing error
//! taxonomy (§7) for the Mashery credential-custody engine.
//!
//! `Engine` is the single entry point a host adapter (`mashery-server`) or
//! the CLI smoke-test driver (`mashery-cli`) calls into: one method per row
//! of §4.7's operation catalogue, each composing the building-block stages
//! in `stages::*` over the heap capability variants in `heap`.

pub mod error;
pub mod heap;
pub mod response;
pub mod stages;

pub use error::{Error, EngineResult, ResponseError};
pub use response::{EngineResponse, SecretLease};

use std::sync::Arc;

use mashery_client::pool::ClientPool;
use mashery_client::v3::WrappedResponse;
use mashery_core::{
    BackendConfiguration, MappingRunner, PinDescriptor, RequestContext, Runner, SimpleRunner, Stage, StageOutcome, Storage, StorageJsonExt,
    paths,
};
use serde_json::Value;

use heap::{ApiResponseHeap, ConfigHeap, PinLevel, PinningHeap, RoleHeap, V2SignatureHeap, V3TokenHeap};
use stages::config::ConfigFields;
use stages::exchange::ExportParams;
use stages::grant::{ApiVersion, StorageBackedRefresher};
use stages::proxy::CliRenderMode;
use stages::role::RoleKeyFields;

/// The engine's single handle: storage, the backend's client pool, and the
/// mount identifier every persisted key is rooted under.
pub struct Engine {
    storage: Arc<dyn Storage>,
    backend_uuid: String,
    pool: Arc<ClientPool>,
}

/// Pulls a `StageOutcome::Respond` out of a pipeline that is expected to
/// always respond; a bare `Continue` at the end of a handler chain means a
/// stage was missing from the composition, which is a programming error, not
/// a user-visible one.
fn expect_response(outcome: StageOutcome<EngineResponse>) -> EngineResult<EngineResponse> {
    match outcome {
        StageOutcome::Respond(r) => Ok(r),
        StageOutcome::Continue => Err(Error::Internal("handler pipeline ran to completion without responding".to_string())),
    }
}

impl Engine {
    pub fn new(storage: Arc<dyn Storage>, backend_uuid: impl Into<String>, pool: Arc<ClientPool>) -> Self {
        Self {
            storage,
            backend_uuid: backend_uuid.into(),
            pool,
        }
    }

    async fn load_config(&self, ctx: &RequestContext) -> EngineResult<BackendConfiguration> {
        let mut heap = ConfigHeap::default();
        stages::config::load_or_default_config(self.storage.clone(), self.backend_uuid.clone())
            .run(ctx, &mut heap)
            .await
            .map_err(Error::from_core)?;
        Ok(heap.config.expect("load_or_default_config always populates config"))
    }

    // ---- Roles (§4.7 Create/Read/Update/Delete/List role) ------------------

    pub async fn create_role(&self, ctx: &RequestContext, role_name: &str, fields: RoleKeyFields) -> EngineResult<EngineResponse> {
        let runner = SimpleRunner::<RoleHeap, EngineResponse>::new()
            .append(stages::role::read_role(self.storage.clone(), self.backend_uuid.clone(), false))
            .append(stages::role::block_if_imported())
            .append(stages::role::update_keys_from_request(fields))
            .append(stages::role::save_keys(self.storage.clone(), self.backend_uuid.clone()))
            .append(stages::role::init_usage())
            .append(stages::role::save_usage(self.storage.clone(), self.backend_uuid.clone()))
            .append(stages::role::render_role());
        let mut heap = RoleHeap::new(role_name);
        let outcome = runner.run(ctx, &mut heap).await.map_err(Error::from_core)?;
        expect_response(outcome)
    }

    pub async fn update_role(&self, ctx: &RequestContext, role_name: &str, fields: RoleKeyFields) -> EngineResult<EngineResponse> {
        let runner = SimpleRunner::<RoleHeap, EngineResponse>::new()
            .append(stages::role::read_role(self.storage.clone(), self.backend_uuid.clone(), true))
            .append(stages::role::block_if_imported())
            .append(stages::role::update_keys_from_request(fields))
            .append(stages::role::save_keys(self.storage.clone(), self.backend_uuid.clone()))
            .append(stages::role::render_role());
        let mut heap = RoleHeap::new(role_name);
        let outcome = runner.run(ctx, &mut heap).await.map_err(Error::from_core)?;
        expect_response(outcome)
    }

    /// `readRole(required=true) → blockIfExpiredOrDepleted → decrementQuota
    /// → renderRoleView` (§8 scenario 4: each read of a term/use-limited role
    /// consumes one unit of quota, and the third read of a two-use role is the
    /// one that observes depletion and errors).
    pub async fn read_role(&self, ctx: &RequestContext, role_name: &str) -> EngineResult<EngineResponse> {
        let runner = SimpleRunner::<RoleHeap, EngineResponse>::new()
            .append(stages::role::read_role(self.storage.clone(), self.backend_uuid.clone(), true))
            .append(stages::grant::block_if_expired_or_depleted())
            .append(stages::grant::decrement_quota(self.storage.clone(), self.backend_uuid.clone()))
            .append(stages::role::render_role());
        let mut heap = RoleHeap::new(role_name);
        let outcome = runner.run(ctx, &mut heap).await.map_err(Error::from_core)?;
        expect_response(outcome)
    }

    pub async fn delete_role(&self, _ctx: &RequestContext, role_name: &str) -> EngineResult<EngineResponse> {
        stages::role::delete_role(self.storage.as_ref(), &self.backend_uuid, role_name)
            .await
            .map_err(Error::from_core)?;
        Ok(EngineResponse::new().with("deleted", serde_json::json!(true)))
    }

    /// `pathRoleList`: every distinct role name with a `Keys` record under this mount.
    pub async fn list_roles(&self) -> EngineResult<EngineResponse> {
        let entries = self.storage.list(&paths::roles_root(&self.backend_uuid)).await.map_err(Error::from_core)?;
        let mut names: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        for entry in entries {
            if let Some((name, _)) = entry.split_once('/') {
                names.insert(name.to_string());
            }
        }
        Ok(EngineResponse::new().with("keys", serde_json::json!(names.into_iter().collect::<Vec<_>>())))
    }

    // ---- Grants (§4.7 Issue grant V2/V3) -----------------------------------

    pub async fn issue_grant_v2(&self, ctx: &RequestContext, role_name: &str, as_lease: bool) -> EngineResult<EngineResponse> {
        let parent = SimpleRunner::<RoleHeap, EngineResponse>::new()
            .append(stages::role::read_role(self.storage.clone(), self.backend_uuid.clone(), true))
            .append(stages::grant::block_if_force_proxy())
            .append(stages::grant::block_if_expired_or_depleted())
            .append(stages::grant::block_if_not_capable(ApiVersion::V2))
            .append(stages::grant::decrement_quota(self.storage.clone(), self.backend_uuid.clone()));
        let mapping = MappingRunner::<RoleHeap, V2SignatureHeap, EngineResponse>::new(parent, heap::export_v2_signature_heap, heap::import_v2_signature_heap)
            .append(stages::grant::retrieve_v2_signature())
            .append(if as_lease { stages::grant::render_v2_lease() } else { stages::grant::render_v2_plain() });
        let mut signature_heap = V2SignatureHeap {
            role_name: role_name.to_string(),
            role: None,
            signature: None,
        };
        let outcome = mapping.run(ctx, &mut signature_heap).await.map_err(Error::from_core)?;
        expect_response(outcome)
    }

    pub async fn issue_grant_v3(&self, ctx: &RequestContext, role_name: &str, as_lease: bool) -> EngineResult<EngineResponse> {
        let cfg = self.load_config(ctx).await?;
        let oauth = self.pool.oauth_helper(&cfg);
        let parent = SimpleRunner::<RoleHeap, EngineResponse>::new()
            .append(stages::role::read_role(self.storage.clone(), self.backend_uuid.clone(), true))
            .append(stages::grant::block_if_force_proxy())
            .append(stages::grant::block_if_expired_or_depleted())
            .append(stages::grant::block_if_not_capable(ApiVersion::V3))
            .append(stages::grant::decrement_quota(self.storage.clone(), self.backend_uuid.clone()));
        let mapping = MappingRunner::<RoleHeap, V3TokenHeap, EngineResponse>::new(parent, heap::export_v3_token_heap, heap::import_v3_token_heap)
            .append(stages::grant::retrieve_v3_access_token(oauth, self.storage.clone(), self.backend_uuid.clone()))
            .append(if as_lease { stages::grant::render_v3_lease() } else { stages::grant::render_v3_plain() });
        let mut token_heap = V3TokenHeap {
            role_name: role_name.to_string(),
            role: None,
            token: None,
        };
        let outcome = mapping.run(ctx, &mut token_heap).await.map_err(Error::from_core)?;
        expect_response(outcome)
    }

    // ---- Cached V3 token (§4.7 Fetch cached token, Forget cached token) ----

    /// Runs the same blocking/quota chain as a grant, then serves the cached
    /// token if it is fresh; falls through to a normal `retrieve_v3_access_token`
    /// refresh when it is not (§4.7's supplemental note: the quota stages run
    /// ahead of the cache read regardless of whether the cache is hit).
    pub async fn fetch_cached_token(&self, ctx: &RequestContext, role_name: &str) -> EngineResult<EngineResponse> {
        let cfg = self.load_config(ctx).await?;
        let oauth = self.pool.oauth_helper(&cfg);
        let parent = SimpleRunner::<RoleHeap, EngineResponse>::new()
            .append(stages::role::read_role(self.storage.clone(), self.backend_uuid.clone(), true))
            .append(stages::grant::block_if_expired_or_depleted())
            .append(stages::grant::block_if_not_capable(ApiVersion::V3))
            .append(stages::grant::decrement_quota(self.storage.clone(), self.backend_uuid.clone()));
        let mapping = MappingRunner::<RoleHeap, V3TokenHeap, EngineResponse>::new(parent, heap::export_v3_token_heap, heap::import_v3_token_heap)
            .append(stages::token::render_cached_token_if_fresh());
        let mut token_heap = V3TokenHeap {
            role_name: role_name.to_string(),
            role: None,
            token: None,
        };
        match mapping.run(ctx, &mut token_heap).await.map_err(Error::from_core)? {
            StageOutcome::Respond(r) => Ok(r),
            StageOutcome::Continue => {
                stages::grant::retrieve_v3_access_token(oauth, self.storage.clone(), self.backend_uuid.clone())
                    .run(ctx, &mut token_heap)
                    .await
                    .map_err(Error::from_core)?;
                let outcome = stages::grant::render_v3_plain().run(ctx, &mut token_heap).await.map_err(Error::from_core)?;
                expect_response(outcome)
            }
        }
    }

    pub async fn forget_cached_token(&self, ctx: &RequestContext, role_name: &str) -> EngineResult<EngineResponse> {
        let parent = SimpleRunner::<RoleHeap, EngineResponse>::new().append(stages::role::read_role(self.storage.clone(), self.backend_uuid.clone(), true));
        let mapping = MappingRunner::<RoleHeap, V3TokenHeap, EngineResponse>::new(parent, heap::export_v3_token_heap, heap::import_v3_token_heap)
            .append(stages::token::reset_token(self.storage.clone(), self.backend_uuid.clone()));
        let mut token_heap = V3TokenHeap {
            role_name: role_name.to_string(),
            role: None,
            token: None,
        };
        let outcome = mapping.run(ctx, &mut token_heap).await.map_err(Error::from_core)?;
        expect_response(outcome)
    }

    // ---- Proxy (§4.7 Proxy V2/V3 request; §4.8 rendering) ------------------

    /// `readRole → blockIfExpiredOrDepleted → blockIfNotCapable → decrementQuota
    /// → upstreamCall → renderProxied`. Upstream failure status codes pass through
    /// unmodified — proxy mode never translates them into host errors.
    pub async fn proxy_v2(&self, ctx: &RequestContext, role_name: &str, method: &str, params: Value) -> EngineResult<EngineResponse> {
        let cfg = self.load_config(ctx).await?;
        let role = self.authorize_for_call(ctx, role_name, ApiVersion::V2).await?;

        let client = self
            .pool
            .v2_client(&self.backend_uuid, role_name, &role.keys, &cfg)
            .map_err(|e| Error::Internal(e.to_string()))?;
        let raw = client
            .invoke_raw(&mashery_client::v2::V2Request {
                method: method.to_string(),
                params,
                ..Default::default()
            })
            .await
            .map_err(Error::from)?;

        let mut api_heap = ApiResponseHeap {
            role_name: role_name.to_string(),
            role: Some(role),
            method: method.to_string(),
            upstream_path: "v2".to_string(),
            body: None,
            response: Some(WrappedResponse {
                status: raw.status,
                headers: raw.headers,
                body: raw.body,
            }),
        };
        let outcome = stages::proxy::render_proxy_response().run(ctx, &mut api_heap).await.map_err(Error::from_core)?;
        expect_response(outcome)
    }

    pub async fn proxy_v3(&self, ctx: &RequestContext, role_name: &str, method: &str, path: &str, body: Option<Value>) -> EngineResult<EngineResponse> {
        let response = self.call_v3(ctx, role_name, method, path, body.as_ref()).await?;
        let mut api_heap = ApiResponseHeap {
            role_name: role_name.to_string(),
            role: None,
            method: method.to_string(),
            upstream_path: path.to_string(),
            body,
            response: Some(response),
        };
        let outcome = stages::proxy::render_proxy_response().run(ctx, &mut api_heap).await.map_err(Error::from_core)?;
        expect_response(outcome)
    }

    // ---- CLI V2/V3 (§4.7 CLI V3 CRUD, CLI V2 request) ----------------------

    /// Same blocking/quota/call chain as `proxy_v3`, plus the write-gate and
    /// `bounceErrorCodes` translation, plus the caller-selected render mode
    /// (chosen by the path adapter from the requested resource shape).
    pub async fn cli_v3(
        &self,
        ctx: &RequestContext,
        role_name: &str,
        method: &str,
        path: &str,
        body: Option<Value>,
        mode: CliRenderMode,
    ) -> EngineResult<EngineResponse> {
        let cfg = self.load_config(ctx).await?;
        let mut api_heap = ApiResponseHeap {
            role_name: role_name.to_string(),
            role: None,
            method: method.to_string(),
            upstream_path: path.to_string(),
            body: body.clone(),
            response: None,
        };
        stages::proxy::block_unless_cli_write_enabled(cfg.cli_write_enabled, method)
            .run(ctx, &mut api_heap)
            .await
            .map_err(Error::from_core)?;

        let response = self.call_v3(ctx, role_name, method, path, body.as_ref()).await?;
        api_heap.response = Some(response);
        stages::proxy::bounce_error_codes().run(ctx, &mut api_heap).await.map_err(Error::from_core)?;
        let outcome = stages::proxy::render_cli(mode).run(ctx, &mut api_heap).await.map_err(Error::from_core)?;
        expect_response(outcome)
    }

    /// `readRole → blockIfExpiredOrDepleted → blockIfNotCapable(v2) →
    /// decrementQuota → computeV2Signature → upstreamJsonRpcCall →
    /// render(singleObject)`. V2 calls are never resource-addressed, so the
    /// existence check the host would run ahead of a write always reports
    /// "does not exist" (§4.7).
    pub async fn cli_v2(&self, ctx: &RequestContext, role_name: &str, method: &str, params: Value) -> EngineResult<EngineResponse> {
        let cfg = self.load_config(ctx).await?;
        let role = self.authorize_for_call(ctx, role_name, ApiVersion::V2).await?;

        let client = self
            .pool
            .v2_client(&self.backend_uuid, role_name, &role.keys, &cfg)
            .map_err(|e| Error::Internal(e.to_string()))?;
        let raw = client
            .invoke_raw(&mashery_client::v2::V2Request {
                method: method.to_string(),
                params,
                ..Default::default()
            })
            .await
            .map_err(Error::from)?;

        let mut api_heap = ApiResponseHeap {
            role_name: role_name.to_string(),
            role: Some(role),
            method: method.to_string(),
            upstream_path: "v2".to_string(),
            body: None,
            response: Some(WrappedResponse {
                status: raw.status,
                headers: raw.headers,
                body: raw.body,
            }),
        };
        let outcome = stages::proxy::render_cli(CliRenderMode::SingleObject).run(ctx, &mut api_heap).await.map_err(Error::from_core)?;
        expect_response(outcome)
    }

    async fn authorize_for_call(&self, ctx: &RequestContext, role_name: &str, version: ApiVersion) -> EngineResult<mashery_core::StoredRole> {
        let parent = SimpleRunner::<RoleHeap, EngineResponse>::new()
            .append(stages::role::read_role(self.storage.clone(), self.backend_uuid.clone(), true))
            .append(stages::grant::block_if_expired_or_depleted())
            .append(stages::grant::block_if_not_capable(version))
            .append(stages::grant::decrement_quota(self.storage.clone(), self.backend_uuid.clone()));
        let mut heap = RoleHeap::new(role_name);
        match parent.run(ctx, &mut heap).await.map_err(Error::from_core)? {
            StageOutcome::Respond(_) => Err(Error::Internal("blocking chain unexpectedly responded".to_string())),
            StageOutcome::Continue => Ok(heap.role.expect("read_role(required=true) ran first")),
        }
    }

    async fn call_v3(&self, ctx: &RequestContext, role_name: &str, method: &str, path: &str, body: Option<&Value>) -> EngineResult<WrappedResponse> {
        let cfg = self.load_config(ctx).await?;
        let oauth = self.pool.oauth_helper(&cfg);
        let role = self.authorize_for_call(ctx, role_name, ApiVersion::V3).await?;

        let now = mashery_core::now_unix();
        let mut usage = role.usage.clone();
        if usage.v3_token_needs_renew(now) {
            let creds = mashery_client::oauth::V3Credentials {
                api_key: role.keys.api_key.clone(),
                key_secret: role.keys.key_secret.clone(),
                username: role.keys.username.clone(),
                password: role.keys.password.clone(),
            };
            let token = oauth.retrieve_access_token_for(&creds).await.map_err(Error::from)?;
            usage.replace_access_token(token.access_token, token.obtained_unix, token.expiry_unix);
            self.storage
                .write_json(&paths::role_usage(&self.backend_uuid, role_name), &usage)
                .await
                .map_err(Error::from_core)?;
        }

        let client = self
            .pool
            .v3_client(&self.backend_uuid, role_name, &usage.v3_token, &cfg)
            .map_err(|e| Error::Internal(e.to_string()))?;
        let refresher = StorageBackedRefresher {
            oauth,
            storage: self.storage.clone(),
            backend_uuid: self.backend_uuid.clone(),
            role_name: role_name.to_string(),
            credentials: mashery_client::oauth::V3Credentials {
                api_key: role.keys.api_key.clone(),
                key_secret: role.keys.key_secret.clone(),
                username: role.keys.username.clone(),
                password: role.keys.password.clone(),
            },
        };
        client.fetch_with_retry(method, path, body, &refresher).await.map_err(Error::from)
    }

    // ---- Encrypted role exchange (§4.7 Export, Import, Get export PEM) ----

    pub async fn get_export_pem(&self, role_name: &str, common_name: Option<&str>) -> EngineResult<String> {
        let block = stages::exchange::get_export_pem(self.storage.as_ref(), &self.backend_uuid, role_name, common_name).await?;
        Ok(block.encode())
    }

    pub async fn export_role(&self, ctx: &RequestContext, role_name: &str, params: ExportParams) -> EngineResult<(String, Vec<String>)> {
        let cfg = self.load_config(ctx).await?;
        let (block, warnings) = stages::exchange::export_role(self.storage.as_ref(), &self.backend_uuid, &cfg, role_name, &params).await?;
        Ok((block.encode(), warnings))
    }

    pub async fn import_role(&self, ctx: &RequestContext, role_name: &str, envelope_pem: &str) -> EngineResult<EngineResponse> {
        // The path layer's existence probe (§4.7: "role must already exist" for import)
        // runs ahead of this call; import itself only writes keys/usage.
        let cfg = self.load_config(ctx).await?;
        stages::exchange::import_role(self.storage.as_ref(), &self.backend_uuid, &cfg, role_name, envelope_pem).await?;
        Ok(EngineResponse::new().with("imported", serde_json::json!(true)))
    }

    // ---- Backend configuration (§4.7 Read/write config, Set/clear TLS pin) --

    pub async fn read_backend_config(&self, ctx: &RequestContext) -> EngineResult<EngineResponse> {
        let runner = SimpleRunner::<ConfigHeap, EngineResponse>::new()
            .append(stages::config::load_or_default_config(self.storage.clone(), self.backend_uuid.clone()))
            .append(stages::config::render_config());
        let mut heap = ConfigHeap::default();
        let outcome = runner.run(ctx, &mut heap).await.map_err(Error::from_core)?;
        expect_response(outcome)
    }

    pub async fn write_backend_config(&self, ctx: &RequestContext, fields: ConfigFields) -> EngineResult<EngineResponse> {
        let runner = SimpleRunner::<ConfigHeap, EngineResponse>::new()
            .append(stages::config::load_or_default_config(self.storage.clone(), self.backend_uuid.clone()))
            .append(stages::config::apply_field_overrides(fields))
            .append(stages::config::persist_config(self.storage.clone(), self.backend_uuid.clone()))
            .append(stages::config::invalidate_client_pool(self.pool.clone()));
        let mut heap = ConfigHeap::default();
        let outcome = runner.run(ctx, &mut heap).await.map_err(Error::from_core)?;
        expect_response(outcome)
    }

    async fn set_or_clear_pin(&self, ctx: &RequestContext, level: PinLevel, descriptor: Option<PinDescriptor>) -> EngineResult<EngineResponse> {
        let parent = SimpleRunner::<ConfigHeap, EngineResponse>::new().append(stages::config::load_or_default_config(self.storage.clone(), self.backend_uuid.clone()));
        let mut pin_heap = PinningHeap::new(level);
        let mapping = MappingRunner::<ConfigHeap, PinningHeap, EngineResponse>::new(parent, heap::export_pinning_heap, heap::import_pinning_heap);
        let mapping = match descriptor {
            Some(d) => mapping.append(stages::config::parse_pin_descriptor(d)),
            None => mapping.append(stages::config::reset_pin_descriptor()),
        };
        let mapping = mapping.append(stages::config::merge_pin_into_config());
        match mapping.run(ctx, &mut pin_heap).await.map_err(Error::from_core)? {
            StageOutcome::Respond(_) => return Err(Error::Internal("pin merge unexpectedly responded".to_string())),
            StageOutcome::Continue => {}
        }
        let cfg = pin_heap.config.as_ref().expect("load_or_default_config ran first");
        self.storage
            .write_json(&paths::config(&self.backend_uuid), cfg)
            .await
            .map_err(Error::from_core)?;
        let outcome = stages::config::render_pin_saved(level).run(ctx, &mut pin_heap).await.map_err(Error::from_core)?;
        expect_response(outcome)
    }

    pub async fn set_pin(&self, ctx: &RequestContext, level: PinLevel, descriptor: PinDescriptor) -> EngineResult<EngineResponse> {
        self.set_or_clear_pin(ctx, level, Some(descriptor)).await
    }

    pub async fn clear_pin(&self, ctx: &RequestContext, level: PinLevel) -> EngineResult<EngineResponse> {
        self.set_or_clear_pin(ctx, level, None).await
    }
}
