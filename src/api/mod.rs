// HTTP surface (spec.md §6). Handlers are grouped the way the teacher's
// `api::router` composed one sub-router per concern, merged here under one
// `AppState` that carries every engine component the handlers need.

pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::action::rate_limit::RateLimiter;
use crate::action::ActionPipeline;
use crate::auth::AuthUser;
use crate::config::Config;
use crate::engine::combat::CombatEngine;
use crate::engine::monster::MonsterBehaviorTracker;
use crate::engine::quest::QuestManager;
use crate::engine::world::WorldEngine;
use crate::error::{ApiError, ApiResult};
use crate::hub::ConnectionHub;
use crate::llm::LlmGateway;
use crate::model::Player;
use crate::storage::durable::models::GlobalGameState;
use crate::storage::HybridStore;

#[derive(Clone)]
pub struct AppState {
    pub store: HybridStore,
    pub llm: Arc<dyn LlmGateway>,
    pub world: Arc<WorldEngine>,
    pub combat: Arc<CombatEngine>,
    pub monster_behavior: Arc<MonsterBehaviorTracker>,
    pub quests: Arc<QuestManager>,
    pub pipeline: Arc<ActionPipeline>,
    pub rate_limiter: Arc<RateLimiter>,
    pub hub: Arc<ConnectionHub>,
    pub config: Arc<Config>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/start", post(start_world))
        .route("/api/player", post(create_player))
        .route("/api/action/stream", post(stream_action))
        .route("/api/room/:id", get(get_room))
        .route("/api/world/structure", get(world_structure))
        .route("/api/rate-limit/status/:player_id", get(rate_limit_status))
        .route("/api/rate-limit/config", post(rate_limit_config))
        .route("/api/actions/history/:player_id", get(actions_history))
        .route("/api/chat/history/:room_id", get(chat_history))
        .route("/api/analytics/player/:player_id", get(player_analytics))
        .route("/ws", get(ws::ws_session))
        .with_state(state)
}

/// `POST /start` — initializes the world seed and `room_start` on first
/// call, or reuses them on subsequent calls (spec.md §4.6.3, §6).
async fn start_world(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    if state.store.durable.get_global_state().await?.is_none() {
        let seed = state.llm.generate_world_seed().await?;
        state
            .store
            .durable
            .set_global_state(&GlobalGameState {
                world_seed: seed.world_seed,
                main_quest_summary: seed.main_quest_summary,
                starting_state: seed.starting_state,
            })
            .await?;
    }

    let room = state
        .world
        .bootstrap_starting_room()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let global_state = state.store.durable.get_global_state().await?;

    Ok(Json(json!({ "room": room, "global_state": global_state })))
}

#[derive(Deserialize)]
struct CreatePlayerRequest {
    name: String,
}

/// `POST /player {name}` — creates a player owned by the authenticated user
/// and places it in `room_start` (spec.md §6, §3 `current_room` invariant).
async fn create_player(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(req): Json<CreatePlayerRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.name.trim().is_empty() {
        return Err(ApiError::InvalidInput("player name must not be empty".to_string()));
    }

    let mut room = state
        .world
        .bootstrap_starting_room()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let mut player = Player::new(uuid::Uuid::new_v4().to_string(), claims.sub.clone(), req.name);
    player.current_room = Some(room.id.clone());
    state.store.durable.upsert_player(&player).await?;

    if !room.players.contains(&player.id) {
        room.players.push(player.id.clone());
        state.store.durable.upsert_room(&room).await?;
    }

    Ok(Json(player))
}

#[derive(Deserialize)]
struct StreamActionRequest {
    player_id: String,
    action: String,
    room_id: String,
}

/// `POST /action/stream {player_id, action, room_id}` — server-sent event
/// stream of narrative tokens followed by a terminal object (spec.md §4.4,
/// §4.7, §6).
async fn stream_action(
    State(state): State<AppState>,
    Json(req): Json<StreamActionRequest>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    tokio::spawn(async move {
        let tx_tokens = tx.clone();
        let result = state
            .pipeline
            .process_action(&req.player_id, &req.room_id, &req.action, |token| {
                let _ = tx_tokens.send(json!({ "token": token }));
            })
            .await;

        match result {
            Ok(outcome) => {
                if let Ok(Some(player)) = state.store.durable.get_player(&req.player_id).await {
                    // spec.md §4.11: the active quest's objective is satisfied
                    // exactly when the LLM's terminal envelope says so via
                    // `updates.quest_objective_complete` (llm::ActionUpdates).
                    let completed_now = outcome
                        .updates
                        .get("quest_objective_complete")
                        .and_then(serde_json::Value::as_bool)
                        .unwrap_or(false);
                    if let Ok(Some(quest_outcome)) = state
                        .quests
                        .on_action(&req.player_id, player.active_quest_id.as_deref(), &outcome.updates, completed_now)
                        .await
                    {
                        let _ = tx.send(json!({ "quest": quest_outcome }));
                    }
                    if let Some(room_id) = &player.current_room {
                        if let Ok(Some(room)) = state.store.durable.get_room(room_id).await {
                            state
                                .hub
                                .broadcast_to_room(room_id, json!({ "type": "room_update", "room": room }), None)
                                .await;
                        }
                    }
                }
                let _ = tx.send(json!({
                    "response": outcome.narrative,
                    "updates": outcome.updates,
                }));
            }
            Err(ApiError::RateLimited(info)) => {
                let _ = tx.send(json!({
                    "error": "rate_limit_exceeded",
                    "rate_limit_info": info,
                    "message": "You have exceeded the action rate limit. Please wait before acting again.",
                }));
            }
            Err(e) => {
                let _ = tx.send(json!({ "error": e.to_string() }));
            }
        }
    });

    let stream = UnboundedReceiverStream::new(rx).map(|value| Ok(Event::default().data(value.to_string())));
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

async fn get_room(State(state): State<AppState>, Path(room_id): Path<String>) -> ApiResult<impl IntoResponse> {
    let room = state
        .store
        .durable
        .get_room(&room_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("room {room_id}")))?;
    Ok(Json(room))
}

/// `GET /world/structure` — a non-exhaustive world summary: the global
/// seed/quest state, the known biome palette, and the starting room. The
/// Durable Store has no full coordinate-map query (an infinite grid has no
/// finite listing), so this is a structural snapshot rather than an atlas.
async fn world_structure(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let global_state = state.store.durable.get_global_state().await?;
    let biomes = state.store.durable.list_biomes().await?;
    let start_room = state.store.durable.get_room(crate::model::START_ROOM_ID).await?;
    Ok(Json(json!({
        "global_state": global_state,
        "biomes": biomes,
        "start_room": start_room,
    })))
}

async fn rate_limit_status(State(state): State<AppState>, Path(player_id): Path<String>) -> impl IntoResponse {
    Json(state.rate_limiter.status(&state.store, &player_id).await)
}

#[derive(Deserialize)]
struct RateLimitConfigRequest {
    limit: u32,
    interval_minutes: i64,
}

/// `POST /rate-limit/config` — reconfigures the shared rate limiter at
/// runtime (spec.md §4.7.1: "configurable").
async fn rate_limit_config(State(state): State<AppState>, Json(req): Json<RateLimitConfigRequest>) -> impl IntoResponse {
    state.rate_limiter.reconfigure(req.limit, req.interval_minutes);
    Json(json!({ "limit": req.limit, "interval_minutes": req.interval_minutes }))
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<isize>,
}

async fn actions_history(
    State(state): State<AppState>,
    Path(player_id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> ApiResult<impl IntoResponse> {
    let records = state.store.recent_actions(&player_id, q.limit.unwrap_or(50)).await?;
    Ok(Json(records))
}

async fn chat_history(State(state): State<AppState>, Path(room_id): Path<String>) -> ApiResult<impl IntoResponse> {
    let key = crate::storage::transient::chat_history_key(&room_id);
    let messages = state.store.transient.list_range(&key, 0, 19).await?;
    Ok(Json(messages))
}

async fn player_analytics(State(state): State<AppState>, Path(player_id): Path<String>) -> ApiResult<impl IntoResponse> {
    let player = state
        .store
        .durable
        .get_player(&player_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("player {player_id}")))?;
    let action_count = state
        .store
        .count_actions_since(&player_id, chrono::Utc::now() - chrono::Duration::days(30))
        .await?;
    Ok(Json(json!({
        "player_id": player.id,
        "current_room": player.current_room,
        "gold": player.gold,
        "health": player.health,
        "inventory_size": player.inventory.len(),
        "actions_last_30_days": action_count,
    })))
}
