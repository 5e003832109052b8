//! Periodic reclamation of idle sessions.
//!
//! The reaper is the only component that tears sessions down without an
//! external trigger; it bounds live sessions (and their displays, ports, and
//! processes) to those active within the idle window.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::manager::SessionManager;

/// Spawn the reaper loop. Each tick snapshots the registry and runs every
/// over-threshold session through the same teardown path as an explicit
/// delete. Per-session failures never abort the rest of the scan: the
/// idempotent delete absorbs races with concurrent explicit deletes.
pub fn spawn(
    manager: SessionManager,
    interval: Duration,
    idle_timeout: Duration,
    cancelled: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so a freshly started
        // server does not scan before anything can exist.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep(&manager, idle_timeout).await;
                }
                _ = cancelled.cancelled() => {
                    tracing::debug!("idle reaper stopping");
                    break;
                }
            }
        }
    })
}

async fn sweep(manager: &SessionManager, idle_timeout: Duration) {
    for record in manager.registry().snapshot() {
        let idle = record.activity.idle_for();
        if idle <= idle_timeout {
            continue;
        }
        tracing::info!(
            session = %record.session_id,
            idle_secs = idle.as_secs(),
            "reclaiming idle session"
        );
        if !manager.delete_session(&record.session_id).await {
            // Already gone or claimed by a concurrent delete.
            tracing::debug!(session = %record.session_id, "idle session already removed");
        }
    }
}
