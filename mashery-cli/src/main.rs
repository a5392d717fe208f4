//! Standalone launcher: `mashery-cli smoke-test` exercises the engine
//! end-to-end against the scenarios of §8; `mashery-cli serve` stands the
//! engine up with file-backed storage and runs the housekeeping scheduler
//! (§10.5) until interrupted. Modeled on the donor workspace's clap-driven
//! CLI launcher shape.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use mashery_cli::{CliConfig, FileStorage, init_tracing, housekeeping, smoke};
use mashery_client::pool::ClientPool;
use mashery_core::Storage;
use mashery_engine::Engine;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "mashery-cli", about = "Standalone driver for the Mashery credential-custody engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the §8 end-to-end scenarios against a fresh in-process mount.
    SmokeTest,
    /// Mount the engine over file-backed storage and run housekeeping until interrupted.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::from_env();
    init_tracing(&config.log_filter);

    match Cli::parse().command {
        Command::SmokeTest => run_smoke_test(&config).await,
        Command::Serve => run_serve(&config).await,
    }
}

async fn run_smoke_test(config: &CliConfig) -> anyhow::Result<()> {
    let storage: Arc<dyn Storage> = Arc::new(mashery_core::InMemoryStorage::new());
    let engine = Engine::new(storage, config.backend_uuid.clone(), Arc::new(ClientPool::new()));
    smoke::run_all(&engine).await
}

async fn run_serve(config: &CliConfig) -> anyhow::Result<()> {
    tracing::info!(data_dir = %config.data_dir.display(), backend_uuid = %config.backend_uuid, "mounting engine");
    let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(&config.data_dir));
    let pool = Arc::new(ClientPool::new());
    let _engine = Engine::new(storage, config.backend_uuid.clone(), pool.clone());

    let cancel = CancellationToken::new();
    let housekeeping_task = housekeeping::spawn(pool, cancel.clone());

    tracing::info!("engine mounted; awaiting interrupt");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    cancel.cancel();
    housekeeping_task.await?;
    Ok(())
}
