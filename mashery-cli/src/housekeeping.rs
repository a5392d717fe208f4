//! §10.5: an internal `tokio::time::interval` task standing in for the
//! host-invoked housekeeping pass §4.6 otherwise assumes. Only this binary
//! runs it — the library crates never schedule their own eviction.

use std::sync::Arc;
use std::time::Duration;

use mashery_client::pool::ClientPool;
use tokio_util::sync::CancellationToken;

/// How often the interval fires. Deliberately shorter than
/// `IDLE_EVICTION_SECS` (15m) so a long-running process evicts promptly
/// after a role falls idle rather than waiting up to another full period.
const HOUSEKEEPING_INTERVAL_SECS: u64 = 5 * 60;

/// Spawns the periodic eviction task; the returned handle exits once
/// `cancel` is triggered.
pub fn spawn(pool: Arc<ClientPool>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(HOUSEKEEPING_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tracing::info!("running housekeeping pass");
                    pool.evict_idle();
                }
                _ = cancel.cancelled() => {
                    tracing::info!("housekeeping task shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn task_exits_on_cancel() {
        let pool = Arc::new(ClientPool::new());
        let cancel = CancellationToken::new();
        let handle = spawn(pool, cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
