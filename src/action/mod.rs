// Action Pipeline (C7, spec.md §4.7).

pub mod rate_limit;

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use uuid::Uuid;

use crate::engine::combat::CombatEngine;
use crate::engine::monster::{EncounterOutcome, MonsterBehaviorTracker};
use crate::engine::world::WorldEngine;
use crate::error::{ApiError, ApiResult, LlmError};
use crate::llm::{ActionContext, ActionStreamEvent, LlmGateway};
use crate::model::{ActionRecord, Aggressiveness, Direction};
use crate::storage::HybridStore;

use rate_limit::RateLimiter;

pub struct ActionOutcome {
    pub narrative: String,
    pub updates: serde_json::Value,
}

pub struct ActionPipeline {
    store: HybridStore,
    llm: Arc<dyn LlmGateway>,
    world: Arc<WorldEngine>,
    combat: Arc<CombatEngine>,
    monster_behavior: Arc<MonsterBehaviorTracker>,
    rate_limiter: Arc<RateLimiter>,
}

impl ActionPipeline {
    pub fn new(
        store: HybridStore,
        llm: Arc<dyn LlmGateway>,
        world: Arc<WorldEngine>,
        combat: Arc<CombatEngine>,
        monster_behavior: Arc<MonsterBehaviorTracker>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        ActionPipeline { store, llm, world, combat, monster_behavior, rate_limiter }
    }

    /// Processes one player action end to end (spec.md §4.7 steps 1-6).
    /// `on_token` is invoked for each narrative token as it streams in, so
    /// callers (the HTTP SSE handler, the WebSocket session) can relay it as
    /// a typewriter effect.
    pub async fn process_action(
        &self,
        player_id: &str,
        room_id: &str,
        action_text: &str,
        mut on_token: impl FnMut(&str),
    ) -> ApiResult<ActionOutcome> {
        // 1. Rate limiter.
        if let Some(info) = self.rate_limiter.check(&self.store, player_id).await {
            return Err(ApiError::RateLimited(info));
        }

        // 2. Load context.
        let player = self
            .store
            .durable
            .get_player(player_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("player {player_id}")))?;
        let room = self
            .store
            .durable
            .get_room(room_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("room {room_id}")))?;
        let recent_chat = self
            .store
            .transient
            .list_range(&crate::storage::transient::chat_history_key(room_id), 0, 19)
            .await?;

        // 3. Monster behavior guards.
        let attempted_direction = Direction::parse(action_text);
        let encounter =
            self.monster_behavior.check_action(room_id, player_id, attempted_direction, &room.connections);
        if let EncounterOutcome::TerritorialBlock { monster_id } | EncounterOutcome::AggressiveAmbush { monster_id } = encounter {
            if let Some(monster) = self.store.durable.get_monster(&monster_id).await? {
                self.combat.start_monster_duel(&self.store, player_id, &monster, room_id).await?;
                return Ok(ActionOutcome {
                    narrative: format!("{} blocks your way and attacks!", monster.name),
                    updates: serde_json::json!({ "duel_started_with": monster.id }),
                });
            }
        }

        // 4. Stream the action through the LLM gateway.
        let ctx = ActionContext {
            player_id: player_id.to_string(),
            action_text: action_text.to_string(),
            room_id: room_id.to_string(),
            room_description: room.description.clone(),
            recent_chat,
        };
        let mut stream = self.llm.stream_action(&ctx).await?;
        let mut narrative = String::new();
        let mut terminal = None;
        while let Some(event) = stream.next().await {
            match event {
                ActionStreamEvent::Token(t) => {
                    on_token(&t);
                    narrative.push_str(&t);
                }
                ActionStreamEvent::Terminal(envelope) => {
                    terminal = Some(envelope);
                    break;
                }
                ActionStreamEvent::Error(e) => {
                    return Err(ApiError::Llm(LlmError::Schema(e)));
                }
            }
        }
        let envelope = terminal.ok_or(ApiError::Llm(LlmError::StreamClosedEarly))?;

        // 5. Apply updates.
        let mut player = player;
        if let Some(update) = &envelope.updates.player {
            if let Some(delta) = update.health_delta {
                player.health = (player.health + delta).clamp(0, crate::model::Player::MAX_HEALTH);
            }
            if let Some(delta) = update.gold_delta {
                player.gold += delta;
            }
            player.inventory.retain(|i| !update.inventory_remove.contains(i));
            player.inventory.extend(update.inventory_add.iter().cloned());
            if let Some(note) = &update.memory_note {
                player.memory_log.push(note.clone());
            }
        }

        let mut monster_flavor = Vec::new();
        if let Some(update) = &envelope.updates.player {
            if let Some(direction_str) = &update.direction {
                if let Some(direction) = Direction::parse(direction_str) {
                    let mut new_room = self.world.resolve_movement(room.x, room.y, direction).await
                        .map_err(|e| ApiError::Internal(e.to_string()))?;
                    player.rejoin_immunity = false;
                    player.current_room = Some(new_room.id.clone());
                    self.monster_behavior.record_last_room(player_id, room_id);
                    self.world.schedule_preload(new_room.x, new_room.y);

                    // Monster behavior entry hooks (spec.md §4.9): on entry
                    // to the new room, register territorial blocks (one per
                    // territorial monster, excluding the retreat direction)
                    // and aggressive monsters, persist the chosen blocks,
                    // and surface the flavor/warning text.
                    let monsters_here = self.store.durable.list_monsters_in_room(&new_room.id).await?;
                    let exits: Vec<Direction> = new_room.connections.keys().copied().collect();
                    let new_blocks = self.monster_behavior.on_player_entry(&new_room.id, direction, &exits, &monsters_here);
                    if !new_blocks.is_empty() {
                        for (monster_id, blocked) in &new_blocks {
                            new_room.properties.territorial_blocks.insert(monster_id.clone(), *blocked);
                            if let Some(m) = monsters_here.iter().find(|m| &m.id == monster_id) {
                                monster_flavor.push(format!(
                                    "{} plants itself squarely across the {} exit, daring you to pass.",
                                    m.name,
                                    blocked.as_str()
                                ));
                            }
                        }
                        self.store.durable.upsert_room(&new_room).await?;
                    }
                    for m in monsters_here.iter().filter(|m| m.is_alive && m.aggressiveness == Aggressiveness::Aggressive) {
                        monster_flavor.push(format!("{} locks eyes on you, bristling for a fight.", m.name));
                    }
                }
            }
        }

        player.last_action_at = Some(Utc::now());
        player.last_action_text = Some(action_text.to_string());
        self.store.durable.upsert_player(&player).await?;

        let now = Utc::now();
        let record = ActionRecord {
            id: Uuid::new_v4().to_string(),
            player_id: player_id.to_string(),
            room_id: room_id.to_string(),
            action: action_text.to_string(),
            ai_response: envelope.response.clone(),
            timestamp: now,
            session_id: ActionRecord::session_id_for(player_id, now),
            updates: serde_json::to_value(&envelope.updates).unwrap_or_default(),
            metadata: serde_json::json!({}),
        };
        self.store.record_action(&record).await?;

        let mut narrative = envelope.response;
        for line in &monster_flavor {
            narrative.push(' ');
            narrative.push_str(line);
        }

        Ok(ActionOutcome {
            narrative,
            updates: serde_json::to_value(&envelope.updates).unwrap_or_default(),
        })
    }
}

