// Room & World Engine (C6, spec.md §4.6).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use uuid::Uuid;

use crate::error::{LlmError, StorageError};
use crate::hub::ConnectionHub;
use crate::llm::{LlmGateway, ModelGateway, ModelJobStatus, RoomDescriptionContext};
use crate::metrics;
use crate::model::{Direction, Item, Monster, Rarity, Room, RoomProperties, START_ROOM_ALIAS_ID, START_ROOM_ID};
use crate::storage::object_store::{ObjectStore, BUCKET_IMAGES, BUCKET_MODELS};
use crate::storage::{transient, HybridStore};

use super::biome::{BiomeError, BiomeManager};
use super::coords::{room_id_for, step};
use super::generation_pool::GenerationPool;
use super::monster::generate_monsters_for_room;

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Biome(#[from] BiomeError),
}

/// How long movement waits for a neighbor's background generation before
/// falling back to a placeholder (spec.md §4.6.4).
const MOVEMENT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);
const MOVEMENT_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Advisory-lock TTL for coordinate and generation locks (spec.md §5).
const LOCK_TTL_SECS: u64 = 300;

pub struct WorldEngine {
    store: HybridStore,
    biomes: Arc<BiomeManager>,
    llm: Arc<dyn LlmGateway>,
    generation: Arc<GenerationPool>,
    hub: Arc<ConnectionHub>,
    object_store: Arc<dyn ObjectStore>,
    model_gateway: Arc<dyn ModelGateway>,
}

impl WorldEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: HybridStore,
        biomes: Arc<BiomeManager>,
        llm: Arc<dyn LlmGateway>,
        generation: Arc<GenerationPool>,
        hub: Arc<ConnectionHub>,
        object_store: Arc<dyn ObjectStore>,
        model_gateway: Arc<dyn ModelGateway>,
    ) -> Self {
        WorldEngine {
            store,
            biomes,
            llm,
            generation,
            hub,
            object_store,
            model_gateway,
        }
    }

    /// `CreateRoomWithCoordinates` (spec.md §4.6.2).
    #[allow(clippy::too_many_arguments)]
    pub async fn create_room_with_coordinates(
        &self,
        room_id: &str,
        x: i64,
        y: i64,
        title: &str,
        description: &str,
        biome: &str,
        image_url: &str,
        mark_discovered: bool,
    ) -> Result<Room, WorldError> {
        let monsters = generate_monsters_for_room(room_id, x, y, &["Wolf", "Boar", "Spider", "Wisp"]);
        for monster in &monsters {
            self.store.durable.upsert_monster(monster).await?;
        }

        let items = self.generate_room_items(room_id, biome).await?;
        for item in &items {
            self.store.durable.upsert_item(item).await?;
        }

        let mut room = Room {
            id: room_id.to_string(),
            x,
            y,
            title: title.to_string(),
            description: description.to_string(),
            image_url: if image_url.is_empty() { None } else { Some(image_url.to_string()) },
            image_status: crate::model::ImageStatus::Pending,
            biome: biome.to_string(),
            connections: HashMap::new(),
            npcs: Vec::new(),
            items: items.iter().map(|i| i.id.clone()).collect(),
            monsters: monsters.iter().map(|m| m.id.clone()).collect(),
            players: Vec::new(),
            properties: RoomProperties::default(),
        };

        if mark_discovered {
            let created = self.store.durable.atomic_create_room_at_coordinates(&room).await?;
            if !created {
                // Another writer won the race; load and return its room.
                metrics::COORDINATE_CONFLICTS_TOTAL.inc();
                let existing_id = self
                    .store
                    .durable
                    .get_coordinate(x, y)
                    .await?
                    .ok_or_else(|| StorageError::NotFound(format!("coordinate ({x},{y})")))?;
                let existing = self
                    .store
                    .durable
                    .get_room(&existing_id)
                    .await?
                    .ok_or_else(|| StorageError::NotFound(existing_id.clone()))?;
                return Ok(existing);
            }
            metrics::ROOMS_CREATED_TOTAL.with_label_values(&["generated"]).inc();
        } else {
            self.store.durable.upsert_room(&room).await?;
        }

        self.auto_connect_neighbors(&mut room).await?;
        Ok(room)
    }

    async fn auto_connect_neighbors(&self, room: &mut Room) -> Result<(), WorldError> {
        for d in Direction::HORIZONTAL {
            let (nx, ny) = step(room.x, room.y, d);
            if let Some(neighbor_id) = self.store.durable.get_coordinate(nx, ny).await? {
                if let Some(mut neighbor) = self.store.durable.get_room(&neighbor_id).await? {
                    room.connections.insert(d, neighbor_id.clone());
                    neighbor.connections.insert(d.opposite(), room.id.clone());
                    self.store.durable.upsert_room(&neighbor).await?;
                }
            }
        }
        self.store.durable.upsert_room(room).await?;
        Ok(())
    }

    async fn generate_room_items(&self, room_id: &str, biome: &str) -> Result<Vec<Item>, WorldError> {
        let mut rng = rand::thread_rng();
        let mut items = Vec::new();

        let is_three_star_room = self.biomes.is_three_star_room(biome, room_id).await?;
        if is_three_star_room {
            items.push(self.generate_item(3, biome).await?);
        }

        let two_star_count = rng.gen_range(0..=4);
        for _ in 0..two_star_count {
            items.push(self.generate_item(2, biome).await?);
        }

        Ok(items)
    }

    async fn generate_item(&self, rarity: u8, biome: &str) -> Result<Item, WorldError> {
        let prompt = format!(
            "Invent a rarity-{rarity} item found in a {biome} biome. Reply as JSON with keys \
             name, description, capabilities (array of strings), special_effects (array of \
             strings, empty unless rarity >= 3)."
        );
        let raw = self.llm.generate_text(&prompt).await?;

        #[derive(serde::Deserialize, Default)]
        struct Parsed {
            #[serde(default)]
            name: String,
            #[serde(default)]
            description: String,
            #[serde(default)]
            capabilities: Vec<String>,
            #[serde(default)]
            special_effects: Vec<String>,
        }
        let parsed: Parsed = serde_json::from_str(raw.trim()).unwrap_or_default();

        // Enforce the rarity invariant regardless of what the model returned
        // (spec.md §3): <=2 implies no effects, >=3 implies at least one.
        let special_effects = if rarity <= 2 {
            Vec::new()
        } else if parsed.special_effects.is_empty() {
            vec!["a faint residual enchantment".to_string()]
        } else {
            parsed.special_effects
        };

        Ok(Item {
            id: Uuid::new_v4().to_string(),
            name: if parsed.name.is_empty() { format!("{biome} trinket") } else { parsed.name },
            description: parsed.description,
            rarity: Rarity(rarity),
            capabilities: parsed.capabilities,
            special_effects,
        })
    }

    /// Ensures `room_start` exists at (0,0) and kicks off neighbor preload
    /// (spec.md §4.6.3).
    pub async fn bootstrap_starting_room(&self) -> Result<Room, WorldError> {
        if let Some(mut room) = self.store.durable.get_room(START_ROOM_ID).await? {
            self.sanitize_start_room_monsters(&room).await?;
            self.schedule_preload(room.x, room.y);
            return Ok(room);
        }

        if let Some(existing_id) = self.store.durable.get_coordinate(0, 0).await? {
            // A room already exists at (0,0) under a different id; alias it.
            if let Some(existing) = self.store.durable.get_room(&existing_id).await? {
                let mut alias = existing.clone();
                alias.id = START_ROOM_ID.to_string();
                self.store.durable.upsert_room(&alias).await?;
                self.sanitize_start_room_monsters(&alias).await?;
                self.schedule_preload(0, 0);
                return Ok(alias);
            }
        }

        let biome = self.biomes.resolve_biome(0, 0).await?;
        let description = self
            .llm
            .generate_room_description(&RoomDescriptionContext { x: 0, y: 0, biome: biome.clone() })
            .await?;
        let room = self
            .create_room_with_coordinates(
                START_ROOM_ID,
                0,
                0,
                &description.title,
                &description.description,
                &biome,
                "",
                true,
            )
            .await?;
        let _ = START_ROOM_ALIAS_ID; // alias id is only meaningful for pre-existing rooms at (0,0)
        self.schedule_preload(0, 0);
        Ok(room)
    }

    async fn sanitize_start_room_monsters(&self, room: &Room) -> Result<(), WorldError> {
        for monster_id in &room.monsters {
            if let Some(mut monster) = self.store.durable.get_monster(monster_id).await? {
                let before = monster.aggressiveness;
                monster.sanitize_for_start_room();
                if monster.aggressiveness != before {
                    self.store.durable.upsert_monster(&monster).await?;
                }
            }
        }
        Ok(())
    }

    /// Resolves a movement in direction `d` from `(x, y)` (spec.md §4.6.4).
    pub async fn resolve_movement(&self, x: i64, y: i64, d: Direction) -> Result<Room, WorldError> {
        let (tx, ty) = step(x, y, d);

        if let Some(room_id) = self.store.durable.get_coordinate(tx, ty).await? {
            self.schedule_preload(tx, ty);
            return self
                .store
                .durable
                .get_room(&room_id)
                .await?
                .ok_or_else(|| StorageError::NotFound(room_id).into());
        }

        let status_key = transient::room_generation_status_key(&room_id_for(tx, ty));
        let deadline = tokio::time::Instant::now() + MOVEMENT_WAIT_TIMEOUT;
        loop {
            if let Some(status) = self.store.transient.get_string(&status_key).await.ok().flatten() {
                if status == transient::generation_status::CONTENT_READY
                    || status == transient::generation_status::READY
                {
                    if let Some(room_id) = self.store.durable.get_coordinate(tx, ty).await? {
                        if let Some(room) = self.store.durable.get_room(&room_id).await? {
                            self.schedule_preload(tx, ty);
                            return Ok(room);
                        }
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(MOVEMENT_POLL_INTERVAL).await;
        }

        // Timed out: create a placeholder room and claim the coordinate.
        let placeholder_id = room_id_for(tx, ty);
        let biome = self.biomes.resolve_biome(tx, ty).await.unwrap_or_else(|_| "wilderness".to_string());
        let room = self
            .create_room_with_coordinates(
                &placeholder_id,
                tx,
                ty,
                &format!("Unexplored Area ({})", d.as_str()),
                "The way ahead is still shrouded; details have not yet settled into focus.",
                &biome,
                "",
                true,
            )
            .await?;
        self.schedule_preload(tx, ty);
        Ok(room)
    }

    /// Fire-and-forget neighbor preload (spec.md §4.6.5).
    pub fn schedule_preload(&self, x: i64, y: i64) {
        let store = self.store.clone();
        let biomes = self.biomes.clone();
        let llm = self.llm.clone();
        let generation = self.generation.clone();
        let hub = self.hub.clone();
        let object_store = self.object_store.clone();
        let model_gateway = self.model_gateway.clone();
        tokio::spawn(async move {
            for d in Direction::HORIZONTAL {
                let (nx, ny) = step(x, y, d);
                let store = store.clone();
                let biomes = biomes.clone();
                let llm = llm.clone();
                let generation = generation.clone();
                let hub = hub.clone();
                let object_store = object_store.clone();
                let model_gateway = model_gateway.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        preload_neighbor(store, biomes, llm, generation, hub, object_store, model_gateway, nx, ny).await
                    {
                        tracing::warn!(x = nx, y = ny, error = %e, "preload failed");
                    }
                });
            }
        });
    }
}

#[allow(clippy::too_many_arguments)]
async fn preload_neighbor(
    store: HybridStore,
    biomes: Arc<BiomeManager>,
    llm: Arc<dyn LlmGateway>,
    generation: Arc<GenerationPool>,
    hub: Arc<ConnectionHub>,
    object_store: Arc<dyn ObjectStore>,
    model_gateway: Arc<dyn ModelGateway>,
    x: i64,
    y: i64,
) -> Result<(), WorldError> {
    if store.durable.is_discovered(x, y).await? {
        return Ok(());
    }

    let coord_lock = transient::coord_lock_key(x, y);
    if !store
        .transient
        .set_if_absent(&coord_lock, "locked", LOCK_TTL_SECS)
        .await?
    {
        return Ok(());
    }
    let _coord_guard = LockGuard { store: store.clone(), key: coord_lock };

    if store.durable.is_discovered(x, y).await? {
        return Ok(());
    }

    let room_id = room_id_for(x, y);
    let generation_lock = transient::room_generation_lock_key(&room_id);
    if !store
        .transient
        .set_if_absent(&generation_lock, "locked", LOCK_TTL_SECS)
        .await?
    {
        return Ok(());
    }
    let _gen_guard = LockGuard { store: store.clone(), key: generation_lock };

    let permit = generation.acquire().await;
    let status_key = transient::room_generation_status_key(&room_id);
    store
        .transient
        .set_string(&status_key, transient::generation_status::GENERATING, None)
        .await?;
    metrics::ROOMS_GENERATING.inc();

    let biome = biomes.resolve_biome(x, y).await?;
    let description = llm
        .generate_room_description(&RoomDescriptionContext { x, y, biome: biome.clone() })
        .await?;

    let world = WorldEngine {
        store: store.clone(),
        biomes: biomes.clone(),
        llm: llm.clone(),
        generation: generation.clone(),
        hub: hub.clone(),
        object_store: object_store.clone(),
        model_gateway: model_gateway.clone(),
    };
    let room = world
        .create_room_with_coordinates(
            &room_id,
            x,
            y,
            &description.title,
            &description.description,
            &biome,
            "",
            true,
        )
        .await?;

    store
        .transient
        .set_string(&status_key, transient::generation_status::CONTENT_READY, None)
        .await?;
    metrics::ROOMS_GENERATING.dec();
    drop(permit);

    spawn_image_job(store.clone(), llm.clone(), hub.clone(), object_store.clone(), room.id.clone(), description.image_prompt.clone());
    spawn_model_job(store, model_gateway, hub, object_store, room.id, description.image_prompt);
    Ok(())
}

/// Background image job: obtains the image URL from the image provider,
/// re-uploads the bytes to durable object storage (the `room-images`
/// bucket, spec.md §6), and broadcasts a room update (spec.md §4.6.5 step
/// 8). Sets `image_status=error` on failure without aborting the action
/// that launched preload.
fn spawn_image_job(
    store: HybridStore,
    llm: Arc<dyn LlmGateway>,
    hub: Arc<ConnectionHub>,
    object_store: Arc<dyn ObjectStore>,
    room_id: String,
    prompt: String,
) {
    tokio::spawn(async move {
        metrics::GENERATION_JOBS_IN_FLIGHT.inc();
        let outcome = generate_and_store_image(&llm, &object_store, &room_id, &prompt).await;
        let status = match outcome {
            Ok(url) => {
                if let Ok(Some(mut room)) = store.durable.get_room(&room_id).await {
                    room.image_url = Some(url);
                    room.image_status = crate::model::ImageStatus::Ready;
                    let _ = store.durable.upsert_room(&room).await;
                }
                transient::generation_status::READY
            }
            Err(e) => {
                tracing::warn!(room_id = %room_id, error = %e, "room image generation failed");
                if let Ok(Some(mut room)) = store.durable.get_room(&room_id).await {
                    room.image_status = crate::model::ImageStatus::Error;
                    let _ = store.durable.upsert_room(&room).await;
                }
                transient::generation_status::ERROR
            }
        };
        let status_key = transient::room_generation_status_key(&room_id);
        let _ = store.transient.set_string(&status_key, status, None).await;
        if let Ok(Some(room)) = store.durable.get_room(&room_id).await {
            hub.broadcast_to_room(&room_id, serde_json::json!({ "type": "room_update", "room": room }), None).await;
        }
        metrics::GENERATION_JOBS_IN_FLIGHT.dec();
    });
}

async fn generate_and_store_image(
    llm: &Arc<dyn LlmGateway>,
    object_store: &Arc<dyn ObjectStore>,
    room_id: &str,
    prompt: &str,
) -> Result<String, WorldError> {
    let provider_url = llm.generate_room_image(prompt).await?;
    if provider_url.is_empty() {
        return Err(LlmError::Request("image provider returned no url".to_string()).into());
    }
    let bytes = reqwest::get(&provider_url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| LlmError::Request(format!("fetching generated image failed: {e}")))?
        .bytes()
        .await
        .map_err(|e| LlmError::Request(format!("reading generated image failed: {e}")))?;
    let key = format!("rooms/{room_id}.webp");
    let url = object_store
        .put_object(BUCKET_IMAGES, &key, bytes.to_vec(), "image/webp")
        .await?;
    Ok(url)
}

/// Background 3D-model job: submits a generation job, polls until
/// completed (bounded retries, spec.md §4.6.5 step 8 "analogous" to the
/// image job), uploads to the `room-models` bucket, and attaches the URL
/// under `room.properties.extra["model_url"]` — spec.md §3 does not list a
/// dedicated `model_url` field on Room, so this rides the same free-form
/// `properties` map territorial blocks already use.
fn spawn_model_job(
    store: HybridStore,
    model_gateway: Arc<dyn ModelGateway>,
    hub: Arc<ConnectionHub>,
    object_store: Arc<dyn ObjectStore>,
    room_id: String,
    prompt: String,
) {
    const MAX_POLLS: u32 = 60;
    const POLL_INTERVAL: Duration = Duration::from_secs(5);

    tokio::spawn(async move {
        metrics::GENERATION_JOBS_IN_FLIGHT.inc();
        let outcome = generate_and_store_model(&model_gateway, &object_store, &room_id, &prompt, MAX_POLLS, POLL_INTERVAL).await;
        match outcome {
            Ok(Some(url)) => {
                if let Ok(Some(mut room)) = store.durable.get_room(&room_id).await {
                    room.properties.extra.insert("model_url".to_string(), serde_json::Value::String(url));
                    room.properties.extra.insert("model_status".to_string(), serde_json::json!("ready"));
                    let _ = store.durable.upsert_room(&room).await;
                }
            }
            Ok(None) => {
                tracing::warn!(room_id = %room_id, "3D model job timed out waiting for completion");
                mark_model_error(&store, &room_id).await;
            }
            Err(e) => {
                tracing::warn!(room_id = %room_id, error = %e, "3D model generation failed");
                mark_model_error(&store, &room_id).await;
            }
        }
        if let Ok(Some(room)) = store.durable.get_room(&room_id).await {
            hub.broadcast_to_room(&room_id, serde_json::json!({ "type": "room_update", "room": room }), None).await;
        }
        metrics::GENERATION_JOBS_IN_FLIGHT.dec();
    });
}

async fn mark_model_error(store: &HybridStore, room_id: &str) {
    if let Ok(Some(mut room)) = store.durable.get_room(room_id).await {
        room.properties.extra.insert("model_status".to_string(), serde_json::json!("error"));
        let _ = store.durable.upsert_room(&room).await;
    }
}

async fn generate_and_store_model(
    model_gateway: &Arc<dyn ModelGateway>,
    object_store: &Arc<dyn ObjectStore>,
    room_id: &str,
    prompt: &str,
    max_polls: u32,
    poll_interval: Duration,
) -> Result<Option<String>, WorldError> {
    let job_id = model_gateway.submit_room_model_job(prompt).await?;
    for _ in 0..max_polls {
        match model_gateway.poll_room_model_job(&job_id).await? {
            ModelJobStatus::Completed(provider_url) if !provider_url.is_empty() => {
                let bytes = reqwest::get(&provider_url)
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| LlmError::Request(format!("fetching generated model failed: {e}")))?
                    .bytes()
                    .await
                    .map_err(|e| LlmError::Request(format!("reading generated model failed: {e}")))?;
                let key = format!("models/{room_id}.glb");
                let url = object_store
                    .put_object(BUCKET_MODELS, &key, bytes.to_vec(), "model/gltf-binary")
                    .await?;
                return Ok(Some(url));
            }
            ModelJobStatus::Completed(_) | ModelJobStatus::Failed => {
                return Err(LlmError::Request("3D model provider reported failure".to_string()).into());
            }
            ModelJobStatus::Pending => {
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
    Ok(None)
}

/// Releases an advisory lock key on drop, so every exit path (including
/// early returns on error) releases it — the defer-like block spec.md
/// §4.6.5 calls for.
struct LockGuard {
    store: HybridStore,
    key: String,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let store = self.store.clone();
        let key = self.key.clone();
        tokio::spawn(async move {
            let _ = store.transient.delete(&key).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FakeLlmGateway, FakeModelGateway};
    use crate::storage::durable::SqlxDurableStore;
    use crate::storage::object_store::FakeObjectStore;
    use crate::storage::transient::FakeStore;

    async fn test_engine() -> WorldEngine {
        let durable: Arc<dyn crate::storage::DurableStore> =
            Arc::new(SqlxDurableStore::new("sqlite::memory:").await.unwrap());
        let transient: Arc<dyn crate::storage::TransientStore> = Arc::new(FakeStore::new());
        let store = HybridStore::new(durable, transient);
        let llm: Arc<dyn LlmGateway> = Arc::new(FakeLlmGateway::new());
        let biomes = Arc::new(BiomeManager::new(store.durable.clone(), llm.clone()));
        let generation = Arc::new(GenerationPool::new(4));
        let hub = Arc::new(ConnectionHub::new());
        let object_store: Arc<dyn ObjectStore> = Arc::new(FakeObjectStore);
        let model_gateway: Arc<dyn ModelGateway> = Arc::new(FakeModelGateway);
        WorldEngine::new(store, biomes, llm, generation, hub, object_store, model_gateway)
    }

    #[tokio::test]
    async fn test_bootstrap_starting_room_is_idempotent() {
        let engine = test_engine().await;
        let first = engine.bootstrap_starting_room().await.unwrap();
        let second = engine.bootstrap_starting_room().await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.id, START_ROOM_ID);
        assert_eq!((first.x, first.y), (0, 0));
    }

    #[tokio::test]
    async fn test_starting_room_has_no_aggressive_monsters() {
        let engine = test_engine().await;
        let room = engine.bootstrap_starting_room().await.unwrap();
        for monster_id in &room.monsters {
            let monster = engine.store.durable.get_monster(monster_id).await.unwrap().unwrap();
            assert_ne!(monster.aggressiveness, crate::model::Aggressiveness::Aggressive);
        }
    }

    #[tokio::test]
    async fn test_generate_item_enforces_rarity_special_effects_invariant() {
        let engine = test_engine().await;
        let low = engine.generate_item(2, "forest").await.unwrap();
        assert!(low.special_effects.is_empty());

        let high = engine.generate_item(3, "forest").await.unwrap();
        assert!(!high.special_effects.is_empty());
    }
}
