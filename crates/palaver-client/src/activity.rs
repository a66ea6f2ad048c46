//! Cross-tab activity channel.
//!
//! Every open tab (one [`InactivityGuard`](crate::inactivity::InactivityGuard)
//! each) publishes its latest interaction here so that sibling tabs of the
//! same login do not log the user out while another tab is in use.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::time::Instant;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 64;

/// One tab's most recent interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityRecord {
    pub tab_id: Uuid,
    pub at: Instant,
}

pub trait ActivityChannel: Send + Sync {
    fn publish(&self, record: ActivityRecord);

    /// The newest record published by any tab.
    fn latest(&self) -> Option<ActivityRecord>;

    fn subscribe(&self) -> broadcast::Receiver<ActivityRecord>;
}

/// In-process channel shared by all tabs of one client.
#[derive(Clone)]
pub struct SharedActivityBoard {
    latest: Arc<Mutex<Option<ActivityRecord>>>,
    tx: broadcast::Sender<ActivityRecord>,
}

impl SharedActivityBoard {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            latest: Arc::new(Mutex::new(None)),
            tx,
        }
    }
}

impl Default for SharedActivityBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityChannel for SharedActivityBoard {
    fn publish(&self, record: ActivityRecord) {
        {
            let mut latest = self.latest.lock().unwrap_or_else(|p| p.into_inner());
            // An older record never overwrites a newer one.
            if latest.map_or(true, |current| record.at >= current.at) {
                *latest = Some(record);
            }
        }
        // No subscribers is fine.
        let _ = self.tx.send(record);
    }

    fn latest(&self) -> Option<ActivityRecord> {
        *self.latest.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn subscribe(&self) -> broadcast::Receiver<ActivityRecord> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_latest_keeps_newest() {
        let board = SharedActivityBoard::new();
        assert!(board.latest().is_none());

        let t0 = Instant::now();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        board.publish(ActivityRecord { tab_id: a, at: t0 + Duration::from_secs(10) });
        board.publish(ActivityRecord { tab_id: b, at: t0 });

        let latest = board.latest().unwrap();
        assert_eq!(latest.tab_id, a);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_every_publish() {
        let board = SharedActivityBoard::new();
        let mut rx = board.subscribe();
        let record = ActivityRecord { tab_id: Uuid::new_v4(), at: Instant::now() };
        board.publish(record);
        assert_eq!(rx.recv().await.unwrap(), record);
    }
}
