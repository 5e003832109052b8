use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;

/// Tracks the timestamp of a session's last activity.
///
/// Activity is recorded by explicit touch calls from the control API and
/// implicitly whenever the gateway splices a streaming connection through to
/// the session. The idle reaper compares `idle_for()` against the configured
/// threshold to decide when a session is reclaimable.
///
/// Uses `SystemTime` rather than `Instant` because the HTTP API reports the
/// timestamp to callers as epoch milliseconds.
#[derive(Clone)]
pub struct ActivityTracker {
    tx: std::sync::Arc<watch::Sender<SystemTime>>,
}

impl ActivityTracker {
    /// Create a tracker seeded with the given instant (the session's
    /// creation time, so last-activity never predates creation).
    pub fn starting_at(created_at: SystemTime) -> Self {
        let (tx, _) = watch::channel(created_at);
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    /// Record activity now.
    ///
    /// The stored timestamp never moves backwards: if the wall clock has
    /// stepped behind the previously recorded instant, the previous value is
    /// kept.
    pub fn touch(&self) {
        let now = SystemTime::now();
        self.tx.send_modify(|last| {
            if now > *last {
                *last = now;
            }
        });
    }

    /// The last recorded activity instant.
    pub fn last_activity(&self) -> SystemTime {
        *self.tx.borrow()
    }

    /// How long the session has been idle. Zero if the clock stepped
    /// backwards past the last activity.
    pub fn idle_for(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.last_activity())
            .unwrap_or_default()
    }

    /// Last activity as epoch milliseconds, for API responses.
    pub fn last_activity_epoch_ms(&self) -> u64 {
        epoch_ms(self.last_activity())
    }
}

/// Convert a `SystemTime` to epoch milliseconds, clamping pre-epoch values
/// to zero.
pub fn epoch_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_with_creation_time() {
        let created = SystemTime::now();
        let tracker = ActivityTracker::starting_at(created);
        assert_eq!(tracker.last_activity(), created);
    }

    #[tokio::test]
    async fn touch_advances_last_activity() {
        let created = SystemTime::now();
        let tracker = ActivityTracker::starting_at(created);
        tokio::time::sleep(Duration::from_millis(10)).await;
        tracker.touch();
        assert!(tracker.last_activity() > created);
    }

    #[test]
    fn touch_never_moves_backwards() {
        let future = SystemTime::now() + Duration::from_secs(3600);
        let tracker = ActivityTracker::starting_at(future);
        tracker.touch();
        // The seed is ahead of the wall clock; touch must not regress it.
        assert_eq!(tracker.last_activity(), future);
    }

    #[tokio::test]
    async fn idle_for_grows_without_touch() {
        let tracker = ActivityTracker::starting_at(SystemTime::now());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(tracker.idle_for() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn touch_resets_idle() {
        let tracker = ActivityTracker::starting_at(SystemTime::now());
        tokio::time::sleep(Duration::from_millis(60)).await;
        tracker.touch();
        assert!(tracker.idle_for() < Duration::from_millis(50));
    }

    #[test]
    fn epoch_ms_clamps_pre_epoch() {
        assert_eq!(epoch_ms(UNIX_EPOCH - Duration::from_secs(1)), 0);
    }
}
