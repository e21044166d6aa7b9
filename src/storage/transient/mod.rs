// Transient Store (C1, spec.md §4.1): presence sets, locks, generation
// status, rate-limit log, chat/action history, session state.

pub mod fake_store;
pub mod redis_store;

use crate::error::StorageError;
use async_trait::async_trait;

pub use fake_store::FakeStore;
pub use redis_store::RedisStore;

/// Minimal key-value + set + list interface with TTL, mirroring spec.md
/// §4.1. All operations are single-shot and non-transactional; higher-level
/// atomicity (advisory locks) is built on `set_if_absent`.
#[async_trait]
pub trait TransientStore: Send + Sync {
    async fn get_string(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set_string(
        &self,
        key: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> Result<(), StorageError>;
    /// Sets `key` to `value` only if absent; used to implement advisory
    /// locks (`coord_lock:{x}:{y}`, `room:{id}:generation_lock`). Returns
    /// `true` if the lock was acquired.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<bool, StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StorageError>;
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StorageError>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StorageError>;

    async fn list_push_front(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn list_range(
        &self,
        key: &str,
        from: isize,
        to: isize,
    ) -> Result<Vec<String>, StorageError>;
    async fn list_trim(&self, key: &str, max_len: isize) -> Result<(), StorageError>;
    /// Set an expiry (in seconds) on a list key, used for e.g. `messages:player:{id}`
    /// (spec.md §6, 30-day TTL).
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StorageError>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StorageError>;
    async fn hash_get_all(
        &self,
        key: &str,
    ) -> Result<std::collections::HashMap<String, String>, StorageError>;

    /// Remove every key this store owns (used by `ResetWorld`, spec.md §4.3).
    async fn flush_all(&self) -> Result<(), StorageError>;
}

// ── Well-known key namespaces (spec.md §6) ───────────────────────────

pub fn room_players_key(room_id: &str) -> String {
    format!("room:{room_id}:players")
}

pub fn room_generation_status_key(room_id: &str) -> String {
    format!("room:{room_id}:generation_status")
}

pub fn room_generation_lock_key(room_id: &str) -> String {
    format!("room:{room_id}:generation_lock")
}

pub fn coord_lock_key(x: i64, y: i64) -> String {
    format!("coord_lock:{x}:{y}")
}

pub fn active_duel_key(duel_id: &str) -> String {
    format!("active_duel:{duel_id}")
}

pub fn actions_player_key(player_id: &str) -> String {
    format!("actions:player:{player_id}")
}

pub fn messages_player_key(player_id: &str) -> String {
    format!("messages:player:{player_id}")
}

pub fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

pub fn chat_history_key(room_id: &str) -> String {
    format!("chat:room:{room_id}")
}

/// Generation status values stored at `room:{id}:generation_status`
/// (spec.md §4.6.4, §4.6.5).
pub mod generation_status {
    pub const GENERATING: &str = "generating";
    pub const CONTENT_READY: &str = "content_ready";
    pub const READY: &str = "ready";
    pub const ERROR: &str = "error";
}
