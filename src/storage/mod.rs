// Hybrid Store Facade (C3, spec.md §4.3). Routes entity reads/writes to the
// Durable Store and presence/lock/session/history bookkeeping to the
// Transient Store, the way the teacher's `Database` wrapped a single
// `SqlitePool`, but split across the two backends spec.md requires.

pub mod durable;
pub mod object_store;
pub mod transient;

use std::sync::Arc;

use crate::error::StorageError;
use crate::model::ActionRecord;

pub use durable::DurableStore;
pub use object_store::ObjectStore;
pub use transient::TransientStore;

/// Action history is kept transient (spec.md §4.3, §6): a capped list at
/// `actions:player:{id}`, trimmed to the most recent `MAX_ACTION_HISTORY`
/// entries.
pub const MAX_ACTION_HISTORY: isize = 500;

#[derive(Clone)]
pub struct HybridStore {
    pub durable: Arc<dyn DurableStore>,
    pub transient: Arc<dyn TransientStore>,
}

impl HybridStore {
    pub fn new(durable: Arc<dyn DurableStore>, transient: Arc<dyn TransientStore>) -> Self {
        HybridStore { durable, transient }
    }

    /// Appends an action record to the player's transient history list and
    /// trims it to `MAX_ACTION_HISTORY` (spec.md §4.3, §6).
    pub async fn record_action(&self, record: &ActionRecord) -> Result<(), StorageError> {
        let key = transient::actions_player_key(&record.player_id);
        let payload = serde_json::to_string(record)?;
        self.transient.list_push_front(&key, &payload).await?;
        self.transient.list_trim(&key, MAX_ACTION_HISTORY).await?;
        Ok(())
    }

    /// Returns the player's most recent action records, newest first.
    pub async fn recent_actions(
        &self,
        player_id: &str,
        limit: isize,
    ) -> Result<Vec<ActionRecord>, StorageError> {
        let key = transient::actions_player_key(player_id);
        let raw = self.transient.list_range(&key, 0, limit.max(1) - 1).await?;
        raw.iter()
            .map(|s| serde_json::from_str(s).map_err(StorageError::from))
            .collect()
    }

    /// Counts action records within the last `window_secs` seconds, used by
    /// the sliding-window rate limiter (spec.md §4.7).
    pub async fn count_actions_since(
        &self,
        player_id: &str,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<u32, StorageError> {
        let key = transient::actions_player_key(player_id);
        // Action history is already capped at MAX_ACTION_HISTORY and
        // ordered newest-first, so scanning it fully is bounded work.
        let raw = self.transient.list_range(&key, 0, MAX_ACTION_HISTORY - 1).await?;
        let mut count = 0u32;
        for entry in raw {
            let record: ActionRecord = serde_json::from_str(&entry)?;
            if record.timestamp >= since {
                count += 1;
            } else {
                break;
            }
        }
        Ok(count)
    }

    /// Clears all durable game tables (preserving `users`) and flushes the
    /// entire transient store (spec.md §4.3's `ResetWorld`).
    pub async fn reset_world(&self) -> Result<(), StorageError> {
        self.durable.reset_world().await?;
        self.transient.flush_all().await?;
        Ok(())
    }
}
