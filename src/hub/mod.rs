// Connection Hub (C10, spec.md §4.10).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use crate::engine::combat::CombatEngine;
use crate::metrics;
use crate::storage::{transient, HybridStore};

pub type Session = mpsc::UnboundedSender<Value>;

/// `active_connections[room_id][player_id] = session` (spec.md §4.10).
#[derive(Default)]
pub struct ConnectionHub {
    rooms: Mutex<HashMap<String, HashMap<String, Session>>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the session, sends the full room snapshot, and streams any
    /// pending quest storyline in ~80-char chunks with ~300ms inter-chunk
    /// delay (spec.md §4.10).
    pub async fn connect(
        &self,
        store: &HybridStore,
        room_id: &str,
        player_id: &str,
        session: Session,
        room_snapshot: Value,
        pending_storyline: Option<String>,
    ) {
        {
            let mut rooms = self.rooms.lock().await;
            rooms.entry(room_id.to_string()).or_default().insert(player_id.to_string(), session.clone());
        }
        metrics::CONNECTED_SESSIONS.inc();

        let _ = store.transient.set_add(&transient::room_players_key(room_id), player_id).await;

        let _ = session.send(serde_json::json!({ "type": "room_update", "room": room_snapshot }));

        if let Some(storyline) = pending_storyline {
            let session = session.clone();
            tokio::spawn(async move {
                for chunk in chunk_storyline(&storyline, 80) {
                    if session
                        .send(serde_json::json!({ "type": "quest_storyline", "chunk": chunk }))
                        .is_err()
                    {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(300)).await;
                }
            });
        }

        self.broadcast_to_room(
            room_id,
            serde_json::json!({ "type": "presence", "player_id": player_id, "status": "joined" }),
            None,
        )
        .await;
    }

    /// Removes the player, invokes the combat disconnect policy, and
    /// broadcasts a presence update (spec.md §4.10, §4.8.5).
    pub async fn disconnect(
        &self,
        store: &HybridStore,
        combat: &CombatEngine,
        room_id: &str,
        player_id: &str,
    ) {
        {
            let mut rooms = self.rooms.lock().await;
            if let Some(players) = rooms.get_mut(room_id) {
                players.remove(player_id);
                if players.is_empty() {
                    rooms.remove(room_id);
                }
            }
        }
        metrics::CONNECTED_SESSIONS.dec();

        let _ = store.transient.set_remove(&transient::room_players_key(room_id), player_id).await;

        if let Ok(outcomes) = combat.handle_disconnect(store, player_id).await {
            for (duel_id, winner) in outcomes {
                self.broadcast_to_room(
                    room_id,
                    serde_json::json!({ "type": "duel_outcome", "duel_id": duel_id, "winner": winner }),
                    None,
                )
                .await;
            }
        }

        self.broadcast_to_room(
            room_id,
            serde_json::json!({ "type": "presence", "player_id": player_id, "status": "left" }),
            None,
        )
        .await;
    }

    pub async fn broadcast_to_room(&self, room_id: &str, message: Value, exclude: Option<&str>) {
        let rooms = self.rooms.lock().await;
        if let Some(players) = rooms.get(room_id) {
            for (player_id, session) in players {
                if Some(player_id.as_str()) == exclude {
                    continue;
                }
                let _ = session.send(message.clone());
            }
        }
    }

    pub async fn send_to_player(&self, room_id: &str, player_id: &str, message: Value) {
        let rooms = self.rooms.lock().await;
        if let Some(session) = rooms.get(room_id).and_then(|players| players.get(player_id)) {
            let _ = session.send(message);
        }
    }

    /// Sends directly to a player without knowing their current room;
    /// scans all rooms (spec.md §4.10 `SendPersonal`). Connection counts
    /// are small enough per room cap that this is adequate.
    pub async fn send_personal(&self, player_id: &str, message: Value) {
        let rooms = self.rooms.lock().await;
        for players in rooms.values() {
            if let Some(session) = players.get(player_id) {
                let _ = session.send(message);
                return;
            }
        }
    }
}

fn chunk_storyline(text: &str, chunk_size: usize) -> Vec<String> {
    text.as_bytes()
        .chunks(chunk_size)
        .map(|c| String::from_utf8_lossy(c).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_storyline_splits_into_bounded_pieces() {
        let text = "a".repeat(200);
        let chunks = chunk_storyline(&text, 80);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 80);
        assert_eq!(chunks[2].len(), 40);
    }

    #[tokio::test]
    async fn test_connect_then_disconnect_clears_presence() {
        let hub = ConnectionHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let durable: Arc<dyn crate::storage::DurableStore> =
            Arc::new(crate::storage::durable::SqlxDurableStore::new("sqlite::memory:").await.unwrap());
        let transient: Arc<dyn crate::storage::TransientStore> =
            Arc::new(crate::storage::transient::FakeStore::new());
        let store = HybridStore::new(durable, transient);
        let combat = CombatEngine::new(false);

        hub.connect(&store, "room_start", "p1", tx, serde_json::json!({}), None).await;
        assert!(rx.recv().await.is_some());

        hub.disconnect(&store, &combat, "room_start", "p1").await;
        let members = store.transient.set_members(&transient::room_players_key("room_start")).await.unwrap();
        assert!(members.is_empty());
    }
}
