// Biome Manager (C5, spec.md §4.5).

use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::error::{LlmError, StorageError};
use crate::llm::LlmGateway;
use crate::model::{Biome, Direction};
use crate::storage::DurableStore;

use super::noise::{chunk_center, chunk_id_for, chunk_indices};

#[derive(Debug, thiserror::Error)]
pub enum BiomeError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

pub struct BiomeManager {
    durable: Arc<dyn DurableStore>,
    llm: Arc<dyn LlmGateway>,
}

impl BiomeManager {
    pub fn new(durable: Arc<dyn DurableStore>, llm: Arc<dyn LlmGateway>) -> Self {
        BiomeManager { durable, llm }
    }

    pub fn chunk_id_for_room(&self, x: i64, y: i64) -> String {
        chunk_id_for(x, y)
    }

    /// Resolves the biome name for the chunk containing `(x, y)`, assigning
    /// one on first request per the 6-step policy in spec.md §4.5.
    pub async fn resolve_biome(&self, x: i64, y: i64) -> Result<String, BiomeError> {
        let (cx, cy) = chunk_indices(x, y);
        let chunk_id = format!("chunk_{cx}_{cy}");

        if let Some(name) = self.durable.get_chunk_biome(&chunk_id).await? {
            return Ok(name);
        }

        // Step 2: biomes of the 4 Manhattan-adjacent chunks.
        let mut adjacent = Vec::new();
        for d in Direction::HORIZONTAL {
            let (ox, oy) = d.offset();
            let neighbor_chunk = format!("chunk_{}_{}", cx + ox, cy + oy);
            if let Some(name) = self.durable.get_chunk_biome(&neighbor_chunk).await? {
                adjacent.push(name);
            }
        }

        // Step 3: candidates among saved biomes not already adjacent.
        let saved = self.durable.list_biomes().await?;
        let mut candidates: Vec<String> = saved
            .iter()
            .map(|b| b.name.clone())
            .filter(|name| !adjacent.contains(name))
            .collect();

        // Step 4: choose uniformly from candidates ∪ {__new__}.
        candidates.push("__new__".to_string());
        let choice = candidates
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| "__new__".to_string());

        if choice == "__new__" {
            let generated = self.llm.generate_biome_chunk(&chunk_id, &adjacent).await?;
            let biome = Biome {
                name: generated.name.to_lowercase(),
                description: generated.description,
                color: generated.color,
            };
            self.durable.upsert_biome(&biome).await?;

            let (center_x, center_y) = chunk_center(cx, cy);
            let three_star_room_id = super::coords::room_id_for(center_x, center_y);
            self.durable
                .set_biome_three_star_room(&biome.name, &three_star_room_id)
                .await?;
            self.durable.set_chunk_biome(&chunk_id, &biome.name).await?;
            Ok(biome.name)
        } else {
            self.durable.set_chunk_biome(&chunk_id, &choice).await?;
            Ok(choice)
        }
    }

    /// Whether `room_id` is the preallocated 3-star room for `biome_name`
    /// (spec.md §4.5, §4.6.2). The starting room alias (`room_0_0` /
    /// `room_start`) is treated as the same room either way.
    pub async fn is_three_star_room(
        &self,
        biome_name: &str,
        room_id: &str,
    ) -> Result<bool, BiomeError> {
        let recorded = self.durable.get_biome_three_star_room(biome_name).await?;
        Ok(match recorded {
            Some(r) => {
                r == room_id
                    || (is_start_alias(&r) && is_start_alias(room_id))
            }
            None => false,
        })
    }
}

fn is_start_alias(room_id: &str) -> bool {
    room_id == crate::model::START_ROOM_ID || room_id == crate::model::START_ROOM_ALIAS_ID
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FakeLlmGateway;
    use crate::storage::durable::models::{GlobalGameState, Quest};
    use crate::storage::durable::DurableStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemDurable {
        biomes: Mutex<HashMap<String, Biome>>,
        chunk_biomes: Mutex<HashMap<String, String>>,
        three_star: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl DurableStore for MemDurable {
        async fn get_room(&self, _: &str) -> Result<Option<crate::model::Room>, StorageError> {
            Ok(None)
        }
        async fn upsert_room(&self, _: &crate::model::Room) -> Result<(), StorageError> {
            Ok(())
        }
        async fn atomic_create_room_at_coordinates(
            &self,
            _: &crate::model::Room,
        ) -> Result<bool, StorageError> {
            Ok(true)
        }
        async fn get_coordinate(&self, _: i64, _: i64) -> Result<Option<String>, StorageError> {
            Ok(None)
        }
        async fn is_discovered(&self, _: i64, _: i64) -> Result<bool, StorageError> {
            Ok(false)
        }
        async fn get_player(&self, _: &str) -> Result<Option<crate::model::Player>, StorageError> {
            Ok(None)
        }
        async fn upsert_player(&self, _: &crate::model::Player) -> Result<(), StorageError> {
            Ok(())
        }
        async fn get_item(&self, _: &str) -> Result<Option<crate::model::Item>, StorageError> {
            Ok(None)
        }
        async fn upsert_item(&self, _: &crate::model::Item) -> Result<(), StorageError> {
            Ok(())
        }
        async fn get_recent_high_rarity_items(
            &self,
            _: u8,
            _: i64,
        ) -> Result<Vec<crate::model::Item>, StorageError> {
            Ok(vec![])
        }
        async fn get_monster(&self, _: &str) -> Result<Option<crate::model::Monster>, StorageError> {
            Ok(None)
        }
        async fn upsert_monster(&self, _: &crate::model::Monster) -> Result<(), StorageError> {
            Ok(())
        }
        async fn list_monsters_in_room(
            &self,
            _: &str,
        ) -> Result<Vec<crate::model::Monster>, StorageError> {
            Ok(vec![])
        }
        async fn get_npc(&self, _: &str) -> Result<Option<crate::model::Npc>, StorageError> {
            Ok(None)
        }
        async fn upsert_npc(&self, _: &crate::model::Npc) -> Result<(), StorageError> {
            Ok(())
        }
        async fn list_npcs_in_room(&self, _: &str) -> Result<Vec<crate::model::Npc>, StorageError> {
            Ok(vec![])
        }
        async fn get_biome(&self, name: &str) -> Result<Option<Biome>, StorageError> {
            Ok(self.biomes.lock().unwrap().get(name).cloned())
        }
        async fn upsert_biome(&self, biome: &Biome) -> Result<(), StorageError> {
            self.biomes
                .lock()
                .unwrap()
                .insert(biome.name.clone(), biome.clone());
            Ok(())
        }
        async fn list_biomes(&self) -> Result<Vec<Biome>, StorageError> {
            Ok(self.biomes.lock().unwrap().values().cloned().collect())
        }
        async fn get_chunk_biome(&self, chunk_id: &str) -> Result<Option<String>, StorageError> {
            Ok(self.chunk_biomes.lock().unwrap().get(chunk_id).cloned())
        }
        async fn set_chunk_biome(&self, chunk_id: &str, biome_name: &str) -> Result<(), StorageError> {
            self.chunk_biomes
                .lock()
                .unwrap()
                .insert(chunk_id.to_string(), biome_name.to_string());
            Ok(())
        }
        async fn get_biome_three_star_room(
            &self,
            biome_name: &str,
        ) -> Result<Option<String>, StorageError> {
            Ok(self.three_star.lock().unwrap().get(biome_name).cloned())
        }
        async fn set_biome_three_star_room(
            &self,
            biome_name: &str,
            room_id: &str,
        ) -> Result<(), StorageError> {
            self.three_star
                .lock()
                .unwrap()
                .entry(biome_name.to_string())
                .or_insert_with(|| room_id.to_string());
            Ok(())
        }
        async fn get_global_state(&self) -> Result<Option<GlobalGameState>, StorageError> {
            Ok(None)
        }
        async fn set_global_state(&self, _: &GlobalGameState) -> Result<(), StorageError> {
            Ok(())
        }
        async fn list_quests(&self) -> Result<Vec<Quest>, StorageError> {
            Ok(vec![])
        }
        async fn get_quest(&self, _: &str) -> Result<Option<Quest>, StorageError> {
            Ok(None)
        }
        async fn get_next_quest(&self, _: i64) -> Result<Option<Quest>, StorageError> {
            Ok(None)
        }
        async fn get_quest_progress(
            &self,
            _: &str,
            _: &str,
        ) -> Result<Option<serde_json::Value>, StorageError> {
            Ok(None)
        }
        async fn set_quest_progress(
            &self,
            _: &str,
            _: &str,
            _: &serde_json::Value,
            _: bool,
        ) -> Result<(), StorageError> {
            Ok(())
        }
        async fn has_badge(&self, _: &str, _: &str) -> Result<bool, StorageError> {
            Ok(false)
        }
        async fn award_badge(&self, _: &str, _: &str) -> Result<(), StorageError> {
            Ok(())
        }
        async fn record_gold_transaction(&self, _: &str, _: i64, _: &str) -> Result<(), StorageError> {
            Ok(())
        }
        async fn create_user(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<crate::storage::durable::models::UserRow, StorageError> {
            unreachable!()
        }
        async fn get_user(
            &self,
            _: &str,
        ) -> Result<Option<crate::storage::durable::models::UserRow>, StorageError> {
            Ok(None)
        }
        async fn get_user_by_username(
            &self,
            _: &str,
        ) -> Result<Option<crate::storage::durable::models::UserRow>, StorageError> {
            Ok(None)
        }
        async fn update_username(
            &self,
            _: &str,
            _: &str,
        ) -> Result<Option<crate::storage::durable::models::UserRow>, StorageError> {
            Ok(None)
        }
        async fn reset_world(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_resolve_biome_assigns_and_caches() {
        let durable = Arc::new(MemDurable::default());
        let llm = Arc::new(FakeLlmGateway::new());
        let manager = BiomeManager::new(durable.clone(), llm);

        let first = manager.resolve_biome(10, 10).await.unwrap();
        let second = manager.resolve_biome(10, 10).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_three_star_room_recorded_on_new_biome() {
        let durable = Arc::new(MemDurable::default());
        let llm = Arc::new(FakeLlmGateway::new());
        let manager = BiomeManager::new(durable.clone(), llm);

        let biome_name = manager.resolve_biome(100, 100).await.unwrap();
        let recorded = durable.get_biome_three_star_room(&biome_name).await.unwrap();
        assert!(recorded.is_some());
    }
}
