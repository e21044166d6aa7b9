// sqlx-backed Durable Store. Supports both `sqlite://` and `postgres://`
// connection strings through the `Any` driver, continuing the intent the
// teacher repo signals in its `main.rs` comment
// ("DATABASE_URL supports both sqlite:// and postgres:// connection
// strings") even though the teacher's own `Database` type only ever
// instantiated the `SqlitePool` half of that promise.

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};

use crate::error::StorageError;
use crate::model::{Biome, Item, Monster, Npc, Player, Room};

use super::models::{GlobalGameState, Quest, UserRow};
use super::DurableStore;

pub struct SqlxDurableStore {
    pool: AnyPool,
}

impl SqlxDurableStore {
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let store = SqlxDurableStore { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS rooms (
                id TEXT PRIMARY KEY,
                x INTEGER NOT NULL,
                y INTEGER NOT NULL,
                data TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS coordinates (
                x INTEGER NOT NULL,
                y INTEGER NOT NULL,
                room_id TEXT NOT NULL,
                is_discovered INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (x, y)
            )",
            "CREATE TABLE IF NOT EXISTS players (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                rarity INTEGER NOT NULL,
                data TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS monsters (
                id TEXT PRIMARY KEY,
                location TEXT NOT NULL,
                data TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS npcs (
                id TEXT PRIMARY KEY,
                location TEXT NOT NULL,
                data TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS biomes (
                name TEXT PRIMARY KEY,
                data TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS chunk_biomes (
                chunk_id TEXT PRIMARY KEY,
                biome_name TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS biome_three_star_rooms (
                biome_name TEXT PRIMARY KEY,
                room_id TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS global_data (
                key TEXT PRIMARY KEY,
                data TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS quests (
                id TEXT PRIMARY KEY,
                order_index INTEGER NOT NULL,
                data TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS quest_progress (
                player_id TEXT NOT NULL,
                quest_id TEXT NOT NULL,
                data TEXT NOT NULL,
                completed INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (player_id, quest_id)
            )",
            "CREATE TABLE IF NOT EXISTS badges (
                player_id TEXT NOT NULL,
                badge_id TEXT NOT NULL,
                PRIMARY KEY (player_id, badge_id)
            )",
            "CREATE TABLE IF NOT EXISTS gold_transactions (
                id TEXT PRIMARY KEY,
                player_id TEXT NOT NULL,
                amount INTEGER NOT NULL,
                reason TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        ];

        for stmt in statements {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn parse_row<T: serde::de::DeserializeOwned>(row: &AnyRow) -> Result<T, StorageError> {
        let raw: String = row.try_get("data")?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[async_trait]
impl DurableStore for SqlxDurableStore {
    async fn get_room(&self, room_id: &str) -> Result<Option<Room>, StorageError> {
        let row = sqlx::query("SELECT data FROM rooms WHERE id = ?")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::parse_row(&r)).transpose()
    }

    async fn upsert_room(&self, room: &Room) -> Result<(), StorageError> {
        let data = serde_json::to_string(room)?;
        sqlx::query(
            "INSERT INTO rooms (id, x, y, data) VALUES (?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET x = excluded.x, y = excluded.y, data = excluded.data",
        )
        .bind(&room.id)
        .bind(room.x)
        .bind(room.y)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn atomic_create_room_at_coordinates(&self, room: &Room) -> Result<bool, StorageError> {
        // spec.md §4.2: verify no existing coordinate row, insert the room
        // row, then insert the coordinate row; roll back on conflict.
        let mut tx = self.pool.begin().await?;

        let existing: Option<AnyRow> =
            sqlx::query("SELECT room_id FROM coordinates WHERE x = ? AND y = ?")
                .bind(room.x)
                .bind(room.y)
                .fetch_optional(&mut *tx)
                .await?;
        if existing.is_some() {
            tx.rollback().await?;
            return Ok(false);
        }

        let data = serde_json::to_string(room)?;
        let room_insert = sqlx::query(
            "INSERT INTO rooms (id, x, y, data) VALUES (?, ?, ?, ?)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&room.id)
        .bind(room.x)
        .bind(room.y)
        .bind(data)
        .execute(&mut *tx)
        .await;

        if room_insert.is_err() {
            tx.rollback().await?;
            return Ok(false);
        }

        let coord_insert = sqlx::query(
            "INSERT INTO coordinates (x, y, room_id, is_discovered) VALUES (?, ?, ?, 1)",
        )
        .bind(room.x)
        .bind(room.y)
        .bind(&room.id)
        .execute(&mut *tx)
        .await;

        match coord_insert {
            Ok(_) => {
                tx.commit().await?;
                Ok(true)
            }
            Err(_) => {
                // Another writer raced us between the check and the insert.
                tx.rollback().await?;
                Ok(false)
            }
        }
    }

    async fn get_coordinate(&self, x: i64, y: i64) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT room_id FROM coordinates WHERE x = ? AND y = ?")
            .bind(x)
            .bind(y)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get::<String, _>("room_id")).transpose()?)
    }

    async fn is_discovered(&self, x: i64, y: i64) -> Result<bool, StorageError> {
        Ok(self.get_coordinate(x, y).await?.is_some())
    }

    async fn get_player(&self, player_id: &str) -> Result<Option<Player>, StorageError> {
        let row = sqlx::query("SELECT data FROM players WHERE id = ?")
            .bind(player_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::parse_row(&r)).transpose()
    }

    async fn upsert_player(&self, player: &Player) -> Result<(), StorageError> {
        if super::is_system_player(&player.id) {
            return Ok(());
        }
        let data = serde_json::to_string(player)?;
        sqlx::query(
            "INSERT INTO players (id, data) VALUES (?, ?)
             ON CONFLICT (id) DO UPDATE SET data = excluded.data",
        )
        .bind(&player.id)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_item(&self, item_id: &str) -> Result<Option<Item>, StorageError> {
        let row = sqlx::query("SELECT data FROM items WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::parse_row(&r)).transpose()
    }

    async fn upsert_item(&self, item: &Item) -> Result<(), StorageError> {
        let data = serde_json::to_string(item)?;
        sqlx::query(
            "INSERT INTO items (id, rarity, data) VALUES (?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET rarity = excluded.rarity, data = excluded.data",
        )
        .bind(&item.id)
        .bind(item.rarity.0 as i64)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_recent_high_rarity_items(
        &self,
        min_rarity: u8,
        limit: i64,
    ) -> Result<Vec<Item>, StorageError> {
        let rows = sqlx::query(
            "SELECT data FROM items WHERE rarity >= ? ORDER BY id DESC LIMIT ?",
        )
        .bind(min_rarity as i64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::parse_row).collect()
    }

    async fn get_monster(&self, monster_id: &str) -> Result<Option<Monster>, StorageError> {
        let row = sqlx::query("SELECT data FROM monsters WHERE id = ?")
            .bind(monster_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::parse_row(&r)).transpose()
    }

    async fn upsert_monster(&self, monster: &Monster) -> Result<(), StorageError> {
        let data = serde_json::to_string(monster)?;
        sqlx::query(
            "INSERT INTO monsters (id, location, data) VALUES (?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET location = excluded.location, data = excluded.data",
        )
        .bind(&monster.id)
        .bind(&monster.location)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_monsters_in_room(&self, room_id: &str) -> Result<Vec<Monster>, StorageError> {
        let rows = sqlx::query("SELECT data FROM monsters WHERE location = ?")
            .bind(room_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::parse_row).collect()
    }

    async fn get_npc(&self, npc_id: &str) -> Result<Option<Npc>, StorageError> {
        let row = sqlx::query("SELECT data FROM npcs WHERE id = ?")
            .bind(npc_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::parse_row(&r)).transpose()
    }

    async fn upsert_npc(&self, npc: &Npc) -> Result<(), StorageError> {
        let data = serde_json::to_string(npc)?;
        sqlx::query(
            "INSERT INTO npcs (id, location, data) VALUES (?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET location = excluded.location, data = excluded.data",
        )
        .bind(&npc.id)
        .bind(&npc.location)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_npcs_in_room(&self, room_id: &str) -> Result<Vec<Npc>, StorageError> {
        let rows = sqlx::query("SELECT data FROM npcs WHERE location = ?")
            .bind(room_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::parse_row).collect()
    }

    async fn get_biome(&self, name: &str) -> Result<Option<Biome>, StorageError> {
        let row = sqlx::query("SELECT data FROM biomes WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::parse_row(&r)).transpose()
    }

    async fn upsert_biome(&self, biome: &Biome) -> Result<(), StorageError> {
        let data = serde_json::to_string(biome)?;
        sqlx::query(
            "INSERT INTO biomes (name, data) VALUES (?, ?)
             ON CONFLICT (name) DO UPDATE SET data = excluded.data",
        )
        .bind(biome.name.to_lowercase())
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_biomes(&self) -> Result<Vec<Biome>, StorageError> {
        let rows = sqlx::query("SELECT data FROM biomes")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::parse_row).collect()
    }

    async fn get_chunk_biome(&self, chunk_id: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT biome_name FROM chunk_biomes WHERE chunk_id = ?")
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|r| r.try_get::<String, _>("biome_name"))
            .transpose()?)
    }

    async fn set_chunk_biome(&self, chunk_id: &str, biome_name: &str) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO chunk_biomes (chunk_id, biome_name) VALUES (?, ?)
             ON CONFLICT (chunk_id) DO UPDATE SET biome_name = excluded.biome_name",
        )
        .bind(chunk_id)
        .bind(biome_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_biome_three_star_room(
        &self,
        biome_name: &str,
    ) -> Result<Option<String>, StorageError> {
        let row =
            sqlx::query("SELECT room_id FROM biome_three_star_rooms WHERE biome_name = ?")
                .bind(biome_name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| r.try_get::<String, _>("room_id")).transpose()?)
    }

    async fn set_biome_three_star_room(
        &self,
        biome_name: &str,
        room_id: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO biome_three_star_rooms (biome_name, room_id) VALUES (?, ?)
             ON CONFLICT (biome_name) DO NOTHING",
        )
        .bind(biome_name)
        .bind(room_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_global_state(&self) -> Result<Option<GlobalGameState>, StorageError> {
        let row = sqlx::query("SELECT data FROM global_data WHERE key = 'game_state'")
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::parse_row(&r)).transpose()
    }

    async fn set_global_state(&self, state: &GlobalGameState) -> Result<(), StorageError> {
        let data = serde_json::to_string(state)?;
        sqlx::query(
            "INSERT INTO global_data (key, data) VALUES ('game_state', ?)
             ON CONFLICT (key) DO UPDATE SET data = excluded.data",
        )
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_quests(&self) -> Result<Vec<Quest>, StorageError> {
        let rows = sqlx::query("SELECT data FROM quests ORDER BY order_index")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::parse_row).collect()
    }

    async fn get_quest(&self, quest_id: &str) -> Result<Option<Quest>, StorageError> {
        let row = sqlx::query("SELECT data FROM quests WHERE id = ?")
            .bind(quest_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::parse_row(&r)).transpose()
    }

    async fn get_next_quest(&self, after_order_index: i64) -> Result<Option<Quest>, StorageError> {
        let row = sqlx::query(
            "SELECT data FROM quests WHERE order_index > ? ORDER BY order_index LIMIT 1",
        )
        .bind(after_order_index)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Self::parse_row(&r)).transpose()
    }

    async fn get_quest_progress(
        &self,
        player_id: &str,
        quest_id: &str,
    ) -> Result<Option<serde_json::Value>, StorageError> {
        let row = sqlx::query(
            "SELECT data FROM quest_progress WHERE player_id = ? AND quest_id = ?",
        )
        .bind(player_id)
        .bind(quest_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Self::parse_row(&r)).transpose()
    }

    async fn set_quest_progress(
        &self,
        player_id: &str,
        quest_id: &str,
        objective_state: &serde_json::Value,
        completed: bool,
    ) -> Result<(), StorageError> {
        let data = serde_json::to_string(objective_state)?;
        sqlx::query(
            "INSERT INTO quest_progress (player_id, quest_id, data, completed) VALUES (?, ?, ?, ?)
             ON CONFLICT (player_id, quest_id) DO UPDATE SET data = excluded.data, completed = excluded.completed",
        )
        .bind(player_id)
        .bind(quest_id)
        .bind(data)
        .bind(completed as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn has_badge(&self, player_id: &str, badge_id: &str) -> Result<bool, StorageError> {
        let row = sqlx::query("SELECT 1 FROM badges WHERE player_id = ? AND badge_id = ?")
            .bind(player_id)
            .bind(badge_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn award_badge(&self, player_id: &str, badge_id: &str) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO badges (player_id, badge_id) VALUES (?, ?)
             ON CONFLICT (player_id, badge_id) DO NOTHING",
        )
        .bind(player_id)
        .bind(badge_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_gold_transaction(
        &self,
        player_id: &str,
        amount: i64,
        reason: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO gold_transactions (id, player_id, amount, reason, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(player_id)
        .bind(amount)
        .bind(reason)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<UserRow, StorageError> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO users (id, username, email, password_hash) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(username)
            .bind(email)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(UserRow {
            id,
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
        })
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRow>, StorageError> {
        let row = sqlx::query(
            "SELECT id, username, email, password_hash FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Self::user_row_from(&r)).transpose()
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>, StorageError> {
        let row = sqlx::query(
            "SELECT id, username, email, password_hash FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Self::user_row_from(&r)).transpose()
    }

    async fn update_username(
        &self,
        user_id: &str,
        new_username: &str,
    ) -> Result<Option<UserRow>, StorageError> {
        let result = sqlx::query("UPDATE users SET username = ? WHERE id = ?")
            .bind(new_username)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_user(user_id).await
    }

    async fn reset_world(&self) -> Result<(), StorageError> {
        let tables = [
            "rooms",
            "coordinates",
            "players",
            "items",
            "monsters",
            "npcs",
            "biomes",
            "chunk_biomes",
            "biome_three_star_rooms",
            "global_data",
            "quest_progress",
            "badges",
            "gold_transactions",
        ];
        for table in tables {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}

impl SqlxDurableStore {
    fn user_row_from(row: &AnyRow) -> Result<UserRow, StorageError> {
        Ok(UserRow {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ImageStatus, Rarity, RoomProperties};
    use std::collections::HashMap;

    fn test_room(id: &str, x: i64, y: i64) -> Room {
        Room {
            id: id.to_string(),
            x,
            y,
            title: "A clearing".to_string(),
            description: "Quiet and still.".to_string(),
            image_url: None,
            image_status: ImageStatus::Pending,
            biome: "forest".to_string(),
            connections: HashMap::new(),
            npcs: Vec::new(),
            items: Vec::new(),
            monsters: Vec::new(),
            players: Vec::new(),
            properties: RoomProperties::default(),
        }
    }

    async fn test_store() -> SqlxDurableStore {
        SqlxDurableStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_atomic_create_room_at_coordinates_claims_once() {
        let store = test_store().await;
        let winner = test_room("room_a", 5, 5);
        let loser = test_room("room_b", 5, 5);

        assert!(store.atomic_create_room_at_coordinates(&winner).await.unwrap());
        assert!(!store.atomic_create_room_at_coordinates(&loser).await.unwrap());

        // Coordinate uniqueness (spec.md §8): exactly one coordinate row,
        // pointing at the winner.
        assert_eq!(store.get_coordinate(5, 5).await.unwrap().as_deref(), Some("room_a"));
        assert!(store.get_room("room_a").await.unwrap().is_some());
        assert!(store.get_room("room_b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_coordinate_is_none_until_claimed() {
        let store = test_store().await;
        assert!(!store.is_discovered(1, 1).await.unwrap());
        let room = test_room("room_x", 1, 1);
        store.atomic_create_room_at_coordinates(&room).await.unwrap();
        assert!(store.is_discovered(1, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_recent_high_rarity_items_filters_by_rarity() {
        let store = test_store().await;
        let low = Item {
            id: uuid::Uuid::new_v4().to_string(),
            name: "Rusty dagger".to_string(),
            description: String::new(),
            rarity: Rarity(1),
            capabilities: Vec::new(),
            special_effects: Vec::new(),
        };
        let high = Item {
            id: uuid::Uuid::new_v4().to_string(),
            name: "Ember crown".to_string(),
            description: String::new(),
            rarity: Rarity(3),
            capabilities: Vec::new(),
            special_effects: vec!["glows faintly".to_string()],
        };
        store.upsert_item(&low).await.unwrap();
        store.upsert_item(&high).await.unwrap();

        let results = store.get_recent_high_rarity_items(3, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, high.id);
    }

    #[tokio::test]
    async fn test_reset_world_preserves_users_but_clears_rooms() {
        let store = test_store().await;
        store.create_user("alice", "alice@example.com", "hash").await.unwrap();
        let room = test_room("room_start", 0, 0);
        store.atomic_create_room_at_coordinates(&room).await.unwrap();

        store.reset_world().await.unwrap();

        assert!(store.get_room("room_start").await.unwrap().is_none());
        assert!(store.get_user_by_username("alice").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_upsert_player_silently_skips_system_players() {
        let store = test_store().await;
        let mut player = Player::new("system:narrator".to_string(), "owner".to_string(), "Narrator".to_string());
        player.gold = 100;
        store.upsert_player(&player).await.unwrap();
        assert!(store.get_player("system:narrator").await.unwrap().is_none());
    }
}
