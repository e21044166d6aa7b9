// Durable Store (C2, spec.md §4.2): rooms, players, items, monsters, npcs,
// biomes, coordinate map, global game state, quests, users.

pub mod models;
pub mod sqlx_store;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::model::{Biome, Item, Monster, Npc, Player, Room};

use models::{GlobalGameState, Quest, UserRow};

pub use sqlx_store::SqlxDurableStore;

/// Reserved id prefix for guest/dummy/system pseudo-players. The durable
/// layer silently no-ops writes for these ids to avoid foreign-key
/// violations (spec.md §4.2).
pub const SYSTEM_PLAYER_PREFIX: &str = "system:";

pub fn is_system_player(player_id: &str) -> bool {
    player_id.starts_with(SYSTEM_PLAYER_PREFIX) || player_id == "guest" || player_id == "dummy"
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    // ── Rooms ──────────────────────────────────────────────────────
    async fn get_room(&self, room_id: &str) -> Result<Option<Room>, StorageError>;
    async fn upsert_room(&self, room: &Room) -> Result<(), StorageError>;
    /// Atomically claims a coordinate and inserts the room row in one
    /// logical transaction (spec.md §4.2). Returns `false` if another
    /// writer already claimed `(x, y)`.
    async fn atomic_create_room_at_coordinates(
        &self,
        room: &Room,
    ) -> Result<bool, StorageError>;

    // ── Coordinates ───────────────────────────────────────────────
    async fn get_coordinate(&self, x: i64, y: i64) -> Result<Option<String>, StorageError>;
    async fn is_discovered(&self, x: i64, y: i64) -> Result<bool, StorageError>;

    // ── Players ────────────────────────────────────────────────────
    async fn get_player(&self, player_id: &str) -> Result<Option<Player>, StorageError>;
    async fn upsert_player(&self, player: &Player) -> Result<(), StorageError>;

    // ── Items ──────────────────────────────────────────────────────
    async fn get_item(&self, item_id: &str) -> Result<Option<Item>, StorageError>;
    async fn upsert_item(&self, item: &Item) -> Result<(), StorageError>;
    /// Newer UUIDv4 values sort later lexicographically-by-id as a
    /// timestamp proxy (spec.md §4.2).
    async fn get_recent_high_rarity_items(
        &self,
        min_rarity: u8,
        limit: i64,
    ) -> Result<Vec<Item>, StorageError>;

    // ── Monsters ───────────────────────────────────────────────────
    async fn get_monster(&self, monster_id: &str) -> Result<Option<Monster>, StorageError>;
    async fn upsert_monster(&self, monster: &Monster) -> Result<(), StorageError>;
    async fn list_monsters_in_room(&self, room_id: &str) -> Result<Vec<Monster>, StorageError>;

    // ── NPCs ───────────────────────────────────────────────────────
    async fn get_npc(&self, npc_id: &str) -> Result<Option<Npc>, StorageError>;
    async fn upsert_npc(&self, npc: &Npc) -> Result<(), StorageError>;
    async fn list_npcs_in_room(&self, room_id: &str) -> Result<Vec<Npc>, StorageError>;

    // ── Biomes ─────────────────────────────────────────────────────
    async fn get_biome(&self, name: &str) -> Result<Option<Biome>, StorageError>;
    async fn upsert_biome(&self, biome: &Biome) -> Result<(), StorageError>;
    async fn list_biomes(&self) -> Result<Vec<Biome>, StorageError>;
    async fn get_chunk_biome(&self, chunk_id: &str) -> Result<Option<String>, StorageError>;
    async fn set_chunk_biome(&self, chunk_id: &str, biome_name: &str) -> Result<(), StorageError>;
    async fn get_biome_three_star_room(
        &self,
        biome_name: &str,
    ) -> Result<Option<String>, StorageError>;
    async fn set_biome_three_star_room(
        &self,
        biome_name: &str,
        room_id: &str,
    ) -> Result<(), StorageError>;

    // ── Global state ───────────────────────────────────────────────
    async fn get_global_state(&self) -> Result<Option<GlobalGameState>, StorageError>;
    async fn set_global_state(&self, state: &GlobalGameState) -> Result<(), StorageError>;

    // ── Quests (C11 boundary) ────────────────────────────────────
    async fn list_quests(&self) -> Result<Vec<Quest>, StorageError>;
    async fn get_quest(&self, quest_id: &str) -> Result<Option<Quest>, StorageError>;
    async fn get_next_quest(&self, after_order_index: i64) -> Result<Option<Quest>, StorageError>;
    async fn get_quest_progress(
        &self,
        player_id: &str,
        quest_id: &str,
    ) -> Result<Option<serde_json::Value>, StorageError>;
    async fn set_quest_progress(
        &self,
        player_id: &str,
        quest_id: &str,
        objective_state: &serde_json::Value,
        completed: bool,
    ) -> Result<(), StorageError>;
    async fn has_badge(&self, player_id: &str, badge_id: &str) -> Result<bool, StorageError>;
    async fn award_badge(&self, player_id: &str, badge_id: &str) -> Result<(), StorageError>;
    async fn record_gold_transaction(
        &self,
        player_id: &str,
        amount: i64,
        reason: &str,
    ) -> Result<(), StorageError>;

    // ── Users (identity boundary, spec.md §6) ───────────────────
    async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<UserRow, StorageError>;
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRow>, StorageError>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>, StorageError>;
    async fn update_username(
        &self,
        user_id: &str,
        new_username: &str,
    ) -> Result<Option<UserRow>, StorageError>;

    /// Clears all game tables, preserving user profiles (spec.md §4.3).
    async fn reset_world(&self) -> Result<(), StorageError>;
}
