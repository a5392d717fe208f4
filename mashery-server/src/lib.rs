//! Host-facing path surface (C9) for the Mashery credential-custody engine:
//! the request/response contract §6 describes, and the binding of path
//! patterns to `mashery_engine::Engine` operations.
//!
//! This crate deliberately does not embed an HTTP server, a storage backend,
//! or a lease manager — those are the host's own collaborators (§1 Out of
//! scope, §6 External interfaces). What it provides is everything a thin
//! host adapter needs to turn an incoming `{operation, path, fields}` tuple
//! into an `Engine` call and a `Response` shape the host already understands.

pub mod contract;
pub mod error;
pub mod paths;

pub use contract::{FieldData, Logger, Operation, Request, SecretDescriptor, V2_ACCESS_SECRET, V3_ACCESS_SECRET};
pub use error::{DispatchError, DispatchResult, ServerError};
pub use paths::dispatch;

pub use mashery_engine::{EngineResponse, SecretLease};

#[cfg(test)]
mod tests {
    use super::*;
    use mashery_client::pool::ClientPool;
    use mashery_core::{InMemoryStorage, Storage, StorageJsonExt, paths};
    use mashery_engine::Engine;
    use std::sync::Arc;

    fn test_engine(storage: Arc<dyn Storage>) -> Engine {
        Engine::new(storage, "b1", Arc::new(ClientPool::new()))
    }

    /// Scenario 3 (§8): a force-proxy role refuses a grant through the path layer.
    /// `force_proxy_mode` is only ever set by an import (§4.7), so the role is
    /// seeded directly in storage the way `import_role` would leave it.
    #[tokio::test]
    async fn scenario3_force_proxy_role_blocks_grant() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        storage
            .write_json(
                &paths::role_keys("b1", "r2"),
                &mashery_core::RoleKeys {
                    area_nid: 1,
                    api_key: "k".into(),
                    key_secret: "s".into(),
                    force_proxy_mode: true,
                    imported: true,
                    ..mashery_core::RoleKeys::new()
                },
            )
            .await
            .unwrap();
        let engine = test_engine(storage);

        let err = dispatch(&engine, &Request::new(Operation::Read, "roles/r2/grant")).await.unwrap_err();
        match err {
            DispatchError::Engine(mashery_engine::Error::Response(mashery_engine::error::ResponseError::StateInvariant(msg))) => {
                assert!(msg.contains("proxy mode"));
            }
            other => panic!("expected a force-proxy state-invariant error, got {other:?}"),
        }
    }

    /// Scenario 4 (§8): a role with a 2-use quota (as an import would leave
    /// it) serves two reads, then refuses the third as depleted.
    #[tokio::test]
    async fn scenario4_quota_depletion_through_the_path_layer() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        storage
            .write_json(
                &paths::role_keys("b1", "r3"),
                &mashery_core::RoleKeys {
                    area_id: "a1".into(),
                    api_key: "k".into(),
                    key_secret: "s".into(),
                    username: "u".into(),
                    password: "p".into(),
                    imported: true,
                    ..mashery_core::RoleKeys::new()
                },
            )
            .await
            .unwrap();
        // A fresh cached token is seeded so `roles/r3/token` is served straight
        // out of `Usage` (§4.7: "no refresh") instead of reaching for the
        // real upstream, which this test has no network access to.
        let now = mashery_core::now_unix();
        storage
            .write_json(
                &paths::role_usage("b1", "r3"),
                &mashery_core::RoleUsage {
                    v3_token: "cached-token".into(),
                    v3_token_obtained: now,
                    v3_token_expiry: now + 10_000,
                    explicit_num_uses: 2,
                    remaining_num_uses: 2,
                    ..mashery_core::RoleUsage::unbounded()
                },
            )
            .await
            .unwrap();
        let engine = test_engine(storage);

        dispatch(&engine, &Request::new(Operation::Read, "roles/r3/token")).await.unwrap();
        dispatch(&engine, &Request::new(Operation::Read, "roles/r3/token")).await.unwrap();
        let err = dispatch(&engine, &Request::new(Operation::Read, "roles/r3/token")).await.unwrap_err();
        match err {
            DispatchError::Engine(mashery_engine::Error::Response(mashery_engine::error::ResponseError::StateInvariant(msg))) => {
                assert!(msg.contains("depleted"));
            }
            other => panic!("expected a depleted state-invariant error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_route_for_a_path_outside_the_table() {
        let engine = test_engine(Arc::new(InMemoryStorage::new()));
        let err = dispatch(&engine, &Request::new(Operation::Read, "nowhere")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Route(ServerError::NoRoute(_))));
    }

    #[tokio::test]
    async fn unbounded_role_list_is_not_a_dispatch_error() {
        let engine = test_engine(Arc::new(InMemoryStorage::new()));
        let resp = dispatch(&engine, &Request::new(Operation::List, "roles")).await.unwrap();
        assert_eq!(resp.data["keys"], serde_json::json!([]));
    }
}
