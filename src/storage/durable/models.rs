// Row types for the Durable Store (C2, spec.md §4.2). Entity tables are
// `(id, data)` blob rows as spec.md describes them "conceptually" — the
// JSON payload is the entity from `crate::model`; only the columns that
// need a uniqueness constraint or an index (coordinates, users) get real
// structured columns.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(FromRow)]
pub struct BlobRow {
    pub id: String,
    pub data: String,
}

#[derive(FromRow)]
pub struct CoordinateRow {
    pub x: i64,
    pub y: i64,
    pub room_id: String,
    pub is_discovered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalGameState {
    pub world_seed: String,
    pub main_quest_summary: String,
    pub starting_state: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quest {
    pub id: String,
    pub title: String,
    pub description: String,
    pub order_index: i64,
    pub gold_reward: i64,
    pub badge_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestProgressRow {
    pub player_id: String,
    pub quest_id: String,
    pub objective_state: serde_json::Value,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadgeAward {
    pub player_id: String,
    pub badge_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldTransaction {
    pub id: String,
    pub player_id: String,
    pub amount: i64,
    pub reason: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
