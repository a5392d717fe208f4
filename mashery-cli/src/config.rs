//! Process bootstrap configuration (§10.3): the handful of settings that
//! have to exist before a `BackendConfiguration` can even be read from
//! storage — where the data directory lives, which backend UUID this
//! process mounts, and how verbose `tracing` should be. Everything past
//! this point is the persisted, runtime-mutable `BackendConfiguration`
//! the engine itself owns.

use std::path::PathBuf;

/// Read once at process start; no live-reload, no config file format beyond
/// what the environment and `clap` flags already provide (§10.3).
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub data_dir: PathBuf,
    pub backend_uuid: String,
    pub log_filter: String,
}

impl CliConfig {
    /// Environment variables, each with a standalone-friendly default:
    /// - `MASHERY_DATA_DIR` (default `./mashery-data`)
    /// - `MASHERY_BACKEND_UUID` (default a fresh v4 UUID, so repeat runs
    ///   against the same data dir need to pin this explicitly to share state)
    /// - `MASHERY_LOG` (default `info`, same precedence `EnvFilter` gives
    ///   `RUST_LOG` if that's set instead)
    pub fn from_env() -> Self {
        let data_dir = std::env::var("MASHERY_DATA_DIR").unwrap_or_else(|_| "./mashery-data".to_string()).into();
        let backend_uuid = std::env::var("MASHERY_BACKEND_UUID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());
        let log_filter = std::env::var("MASHERY_LOG").unwrap_or_else(|_| "info".to_string());
        Self {
            data_dir,
            backend_uuid,
            log_filter,
        }
    }
}

/// `adk-telemetry::init::init_with_config`, trimmed to the one layer this
/// standalone driver actually needs: an `EnvFilter`-driven `fmt` subscriber.
/// `RUST_LOG`, if set, still takes precedence over `filter` (§10.1: no OTLP
/// exporter, no span-export pipeline — just console logging).
pub fn init_tracing(filter: &str) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
}
