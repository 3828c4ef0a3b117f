//! Liveness heartbeats.
//!
//! Long-running services emit [`HealthUpdate`]s on a bounded channel that an
//! external health endpoint drains. Emission never blocks the service: if
//! the consumer lags, updates are dropped rather than queued.

use std::{
    sync::{Arc, Mutex},
    time::SystemTime,
};

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthUpdate {
    pub component: &'static str,
    pub timestamp: SystemTime,
}

/// Creates a liveness channel with the given capacity. Capacity should cover
/// the expected number of emissions per service tick.
pub fn liveness_channel(capacity: usize) -> (LivenessSender, mpsc::Receiver<HealthUpdate>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        LivenessSender {
            tx,
            last_timestamp: Arc::new(Mutex::new(SystemTime::UNIX_EPOCH)),
        },
        rx,
    )
}

/// Non-blocking heartbeat emitter. Timestamps produced through one channel
/// are monotonically non-decreasing even if the system clock steps back.
#[derive(Debug, Clone)]
pub struct LivenessSender {
    tx: mpsc::Sender<HealthUpdate>,
    last_timestamp: Arc<Mutex<SystemTime>>,
}

impl LivenessSender {
    /// Emits a heartbeat for `component`. Returns whether the update was
    /// accepted; a full channel drops the update.
    pub fn notify(&self, component: &'static str) -> bool {
        let timestamp = {
            let mut last = self.last_timestamp.lock().unwrap();
            let now = SystemTime::now().max(*last);
            *last = now;
            now
        };
        self.tx
            .try_send(HealthUpdate {
                component,
                timestamp,
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn heartbeats_are_monotone() {
        let (sender, mut rx) = liveness_channel(16);
        for _ in 0..5 {
            assert!(sender.notify("dispatcher"));
        }

        let mut previous = SystemTime::UNIX_EPOCH;
        while let Ok(update) = rx.try_recv() {
            assert_eq!(update.component, "dispatcher");
            assert!(update.timestamp >= previous);
            previous = update.timestamp;
        }
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (sender, mut rx) = liveness_channel(1);
        assert!(sender.notify("dispatcher"));
        assert!(!sender.notify("dispatcher"));

        rx.recv().await.unwrap();
        assert!(sender.notify("dispatcher"));
    }
}
