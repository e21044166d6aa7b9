// Rate limiter (C7.1, spec.md §4.7.1). Sliding window over the player's
// persisted ActionRecord history rather than the teacher's in-memory
// `RateLimiter` (src/rate_limit.rs): spec.md requires the count to equal
// `|{a ∈ ActionRecord(player) : a.timestamp >= now - interval}|`, which only
// a store-backed scan can guarantee across restarts and replicas.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::HybridStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub action_count: u32,
    pub limit: u32,
    pub interval_minutes: i64,
    /// Seconds until the sliding window admits another action; floor-clamped
    /// at 0 (spec.md §4.7.1).
    pub time_until_reset_secs: i64,
}

/// Holds its limit/interval in atomics rather than plain fields so
/// `POST /rate-limit/config` (spec.md §6) can reconfigure it at runtime
/// while every in-flight `ActionPipeline` shares the same instance.
pub struct RateLimiter {
    limit: AtomicU32,
    interval_minutes: AtomicI64,
}

impl RateLimiter {
    pub fn new(limit: u32, interval_minutes: i64) -> Self {
        RateLimiter {
            limit: AtomicU32::new(limit),
            interval_minutes: AtomicI64::new(interval_minutes),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit.load(Ordering::Relaxed)
    }

    pub fn interval_minutes(&self) -> i64 {
        self.interval_minutes.load(Ordering::Relaxed)
    }

    pub fn reconfigure(&self, limit: u32, interval_minutes: i64) {
        self.limit.store(limit, Ordering::Relaxed);
        self.interval_minutes.store(interval_minutes, Ordering::Relaxed);
    }

    /// Returns `Some(info)` if the player is over the limit (deny), or
    /// `None` to allow the action. On store errors, fails open: logs a
    /// warning and allows the action (spec.md §4.7.1, §7).
    pub async fn check(&self, store: &HybridStore, player_id: &str) -> Option<RateLimitInfo> {
        let limit = self.limit();
        let interval_minutes = self.interval_minutes();
        let now = Utc::now();
        let since = now - ChronoDuration::minutes(interval_minutes);

        let count = match store.count_actions_since(player_id, since).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(player_id, error = %e, "rate limiter store error, failing open");
                return None;
            }
        };

        if count < limit {
            return None;
        }

        let oldest_in_window = match store.recent_actions(player_id, limit as isize).await {
            Ok(records) => records.last().map(|r| r.timestamp).unwrap_or(now),
            Err(_) => now,
        };
        let reset_at = oldest_in_window + ChronoDuration::minutes(interval_minutes);
        let time_until_reset_secs = (reset_at - now).num_seconds().max(0);

        Some(RateLimitInfo {
            action_count: count,
            limit,
            interval_minutes,
            time_until_reset_secs,
        })
    }

    /// Computes the current status without denying anything, for
    /// `GET /rate-limit/status/{player_id}` (spec.md §6).
    pub async fn status(&self, store: &HybridStore, player_id: &str) -> RateLimitInfo {
        let limit = self.limit();
        let interval_minutes = self.interval_minutes();
        let now = Utc::now();
        let since = now - ChronoDuration::minutes(interval_minutes);

        let count = match store.count_actions_since(player_id, since).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(player_id, error = %e, "rate limit status: store error");
                0
            }
        };

        let time_until_reset_secs = if count < limit {
            0
        } else {
            let oldest_in_window = store
                .recent_actions(player_id, limit as isize)
                .await
                .ok()
                .and_then(|records| records.last().map(|r| r.timestamp))
                .unwrap_or(now);
            (oldest_in_window + ChronoDuration::minutes(interval_minutes) - now)
                .num_seconds()
                .max(0)
        };

        RateLimitInfo {
            action_count: count,
            limit,
            interval_minutes,
            time_until_reset_secs,
        }
    }
}

/// Testable in isolation from the store errors: counts entries whose
/// timestamp falls within `[since, now]` (spec.md §8 rate-limit-correctness
/// invariant).
pub fn count_within_window(timestamps: &[DateTime<Utc>], since: DateTime<Utc>) -> u32 {
    timestamps.iter().filter(|t| **t >= since).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActionRecord;
    use crate::storage::durable::SqlxDurableStore;
    use crate::storage::transient::FakeStore;
    use std::sync::Arc;

    async fn test_store() -> HybridStore {
        let durable: Arc<dyn crate::storage::DurableStore> =
            Arc::new(SqlxDurableStore::new("sqlite::memory:").await.unwrap());
        let transient: Arc<dyn crate::storage::TransientStore> = Arc::new(FakeStore::new());
        HybridStore::new(durable, transient)
    }

    fn sample_record(player_id: &str, timestamp: DateTime<Utc>) -> ActionRecord {
        ActionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            player_id: player_id.to_string(),
            room_id: "room_start".to_string(),
            action: "look".to_string(),
            ai_response: String::new(),
            timestamp,
            session_id: ActionRecord::session_id_for(player_id, timestamp),
            updates: serde_json::json!({}),
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_rate_limiter_denies_at_boundary() {
        let store = test_store().await;
        let limiter = RateLimiter::new(50, 30);
        let now = Utc::now();
        for _ in 0..50 {
            store.record_action(&sample_record("p1", now)).await.unwrap();
        }
        let result = limiter.check(&store, "p1").await;
        assert!(result.is_some());
        let info = result.unwrap();
        assert!(info.time_until_reset_secs > 0);
    }

    #[tokio::test]
    async fn test_rate_limiter_allows_under_limit() {
        let store = test_store().await;
        let limiter = RateLimiter::new(50, 30);
        let now = Utc::now();
        for _ in 0..10 {
            store.record_action(&sample_record("p2", now)).await.unwrap();
        }
        assert!(limiter.check(&store, "p2").await.is_none());
    }

    #[test]
    fn test_count_within_window_excludes_stale_entries() {
        let now = Utc::now();
        let timestamps = vec![now, now - ChronoDuration::minutes(60)];
        let since = now - ChronoDuration::minutes(30);
        assert_eq!(count_within_window(&timestamps, since), 1);
    }
}
