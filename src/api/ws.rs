// Per-(room, player) WebSocket session (C10, spec.md §4.10). Messages are
// single JSON objects with a `type` discriminator in both directions.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::engine::combat::RoundOutcome;

use super::AppState;

#[derive(Deserialize)]
pub struct WsParams {
    room_id: String,
    player_id: String,
}

pub async fn ws_session(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.room_id, params.player_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, room_id: String, player_id: String) {
    let room_snapshot = match state.store.durable.get_room(&room_id).await {
        Ok(Some(room)) => serde_json::to_value(room).unwrap_or_default(),
        _ => json!({}),
    };

    let pending_storyline = pending_quest_storyline(&state, &player_id).await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Value>();
    state
        .hub
        .connect(&state.store, &room_id, &player_id, tx, room_snapshot, pending_storyline)
        .await;

    let (mut sender, mut receiver) = socket.split();

    let mut forward_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sender.send(Message::Text(message.to_string())).await.is_err() {
                break;
            }
        }
    });

    let state_for_recv = state.clone();
    let room_id_for_recv = room_id.clone();
    let player_id_for_recv = player_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            let Message::Text(text) = message else { continue };
            let Ok(value) = serde_json::from_str::<Value>(&text) else { continue };
            handle_client_message(&state_for_recv, &room_id_for_recv, &player_id_for_recv, value).await;
        }
    });

    tokio::select! {
        _ = &mut forward_task => recv_task.abort(),
        _ = &mut recv_task => forward_task.abort(),
    }

    state.hub.disconnect(&state.store, &state.combat, &room_id, &player_id).await;
}

/// Shows the main quest summary once per player, typewritten in
/// `ConnectionHub::connect` (spec.md §4.10, §4.11). Marked shown via a
/// private key in `quest_progress` rather than a dedicated column, since the
/// quest-completion model has no other per-player "seen" flags.
async fn pending_quest_storyline(state: &AppState, player_id: &str) -> Option<String> {
    const SHOWN_KEY: &str = "_storyline_shown";

    let mut player = state.store.durable.get_player(player_id).await.ok()??;
    if player.quest_progress.contains_key(SHOWN_KEY) {
        return None;
    }
    let global_state = state.store.durable.get_global_state().await.ok()??;
    if global_state.main_quest_summary.is_empty() {
        return None;
    }

    player.quest_progress.insert(SHOWN_KEY.to_string(), json!(true));
    let _ = state.store.durable.upsert_player(&player).await;
    Some(global_state.main_quest_summary)
}

async fn handle_client_message(state: &AppState, room_id: &str, player_id: &str, value: Value) {
    let Some(msg_type) = value.get("type").and_then(Value::as_str) else {
        return;
    };

    match msg_type {
        "action" => {
            state.hub.send_to_player(room_id, player_id, json!({ "type": "action_ack" })).await;
        }
        "chat" => {
            let Some(text) = value.get("text").and_then(Value::as_str) else { return };
            let entry = json!({ "player_id": player_id, "text": text });
            let key = crate::storage::transient::chat_history_key(room_id);
            if let Ok(payload) = serde_json::to_string(&entry) {
                let _ = state.store.transient.list_push_front(&key, &payload).await;
                let _ = state.store.transient.list_trim(&key, 200).await;
            }
            state
                .hub
                .broadcast_to_room(room_id, json!({ "type": "chat", "player_id": player_id, "text": text }), None)
                .await;
        }
        "duel_challenge" => {
            let Some(target_player_id) = value.get("target_player_id").and_then(Value::as_str) else { return };
            match state.combat.challenge(&state.store, player_id, target_player_id, room_id).await {
                Ok(duel) => {
                    let payload = json!({ "type": "duel_challenge", "duel": duel });
                    state.hub.send_to_player(room_id, player_id, payload.clone()).await;
                    state.hub.send_to_player(room_id, target_player_id, payload).await;
                }
                Err(e) => {
                    state
                        .hub
                        .send_to_player(room_id, player_id, json!({ "type": "error", "message": e.to_string() }))
                        .await;
                }
            }
        }
        "duel_response" => {
            let Some(duel_id) = value.get("duel_id").and_then(Value::as_str) else { return };
            let accept = value.get("accept").and_then(Value::as_bool).unwrap_or(false);
            if !accept {
                state.combat.decline(&state.store, duel_id);
            }
            state
                .hub
                .broadcast_to_room(
                    room_id,
                    json!({ "type": "duel_response", "duel_id": duel_id, "accept": accept, "player_id": player_id }),
                    None,
                )
                .await;
        }
        "duel_move" => {
            let Some(duel_id) = value.get("duel_id").and_then(Value::as_str) else { return };
            let Some(move_text) = value.get("move").and_then(Value::as_str) else { return };
            match state.combat.submit_move(&state.store, state.llm.as_ref(), duel_id, player_id, move_text).await {
                Ok(Some(RoundOutcome::Continues(duel))) => {
                    state
                        .hub
                        .broadcast_to_room(room_id, json!({ "type": "duel_round_result", "duel": duel }), None)
                        .await;
                }
                Ok(Some(RoundOutcome::Ended { winner, final_state })) => {
                    state
                        .hub
                        .broadcast_to_room(
                            room_id,
                            json!({ "type": "duel_outcome", "winner": winner, "duel": final_state }),
                            None,
                        )
                        .await;
                }
                Ok(None) => {}
                Err(e) => {
                    state
                        .hub
                        .send_to_player(room_id, player_id, json!({ "type": "error", "message": e.to_string() }))
                        .await;
                }
            }
        }
        _ => {}
    }
}
