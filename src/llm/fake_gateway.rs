// Deterministic stand-in for `LlmGateway`, used by the engine test suite in
// place of real model calls.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::error::LlmError;

use super::{
    ActionContext, ActionEnvelope, ActionStreamEvent, ActionUpdates, GeneratedBiome,
    GeneratedRoomDescription, GeneratedWorldSeed, LlmGateway, RoomDescriptionContext,
};

/// Always succeeds with small, predictable output. `counter` lets tests
/// assert on call order / count without needing a mock framework.
pub struct FakeLlmGateway {
    counter: AtomicU64,
}

impl FakeLlmGateway {
    pub fn new() -> Self {
        FakeLlmGateway {
            counter: AtomicU64::new(0),
        }
    }

    pub fn call_count(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    fn tick(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for FakeLlmGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmGateway for FakeLlmGateway {
    async fn generate_room_description(
        &self,
        ctx: &RoomDescriptionContext,
    ) -> Result<GeneratedRoomDescription, LlmError> {
        self.tick();
        Ok(GeneratedRoomDescription {
            title: format!("A {} clearing", ctx.biome),
            description: format!(
                "A quiet patch of {} stretches out at ({}, {}).",
                ctx.biome, ctx.x, ctx.y
            ),
            image_prompt: format!("{} landscape, wide shot", ctx.biome),
        })
    }

    async fn generate_biome_chunk(
        &self,
        chunk_id: &str,
        _excluded_biome_names: &[String],
    ) -> Result<GeneratedBiome, LlmError> {
        let n = self.tick();
        Ok(GeneratedBiome {
            name: format!("biome_{chunk_id}_{n}"),
            description: "A freshly imagined stretch of terrain.".to_string(),
            color: "#4a7856".to_string(),
        })
    }

    async fn generate_world_seed(&self) -> Result<GeneratedWorldSeed, LlmError> {
        self.tick();
        Ok(GeneratedWorldSeed {
            world_seed: "fake-seed".to_string(),
            main_quest_summary: "Find the source of the silence.".to_string(),
            starting_state: serde_json::json!({}),
        })
    }

    async fn stream_action(
        &self,
        ctx: &ActionContext,
    ) -> Result<Pin<Box<dyn Stream<Item = ActionStreamEvent> + Send>>, LlmError> {
        self.tick();
        let narrative = format!("You {}.", ctx.action_text);
        let envelope = ActionEnvelope {
            response: narrative.clone(),
            updates: ActionUpdates::default(),
        };
        let tokens: Vec<ActionStreamEvent> = narrative
            .split_whitespace()
            .map(|w| ActionStreamEvent::Token(format!("{w} ")))
            .chain(std::iter::once(ActionStreamEvent::Terminal(envelope)))
            .collect();
        Ok(Box::pin(futures::stream::iter(tokens)))
    }

    async fn process_npc_interaction(
        &self,
        _npc_id: &str,
        player_utterance: &str,
        _npc_memory: &[String],
    ) -> Result<(String, String), LlmError> {
        self.tick();
        Ok((
            format!("The NPC considers: \"{player_utterance}\""),
            format!("Player once said: {player_utterance}"),
        ))
    }

    async fn generate_text(&self, prompt: &str) -> Result<String, LlmError> {
        self.tick();
        Ok(format!("ack: {prompt}"))
    }

    async fn generate_room_image(&self, _prompt: &str) -> Result<String, LlmError> {
        self.tick();
        Ok("https://example.test/fake-room-image.png".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_action_ends_with_terminal_envelope() {
        let gateway = FakeLlmGateway::new();
        let ctx = ActionContext {
            player_id: "p1".to_string(),
            action_text: "look around".to_string(),
            room_id: "room_start".to_string(),
            room_description: "A quiet clearing.".to_string(),
            recent_chat: vec![],
        };
        let mut stream = gateway.stream_action(&ctx).await.unwrap();
        let mut saw_terminal = false;
        while let Some(event) = stream.next().await {
            if let ActionStreamEvent::Terminal(envelope) = event {
                saw_terminal = true;
                assert!(envelope.response.contains("look around"));
            }
        }
        assert!(saw_terminal);
    }

    #[tokio::test]
    async fn test_call_count_increments() {
        let gateway = FakeLlmGateway::new();
        gateway.generate_text("hi").await.unwrap();
        gateway.generate_text("hi again").await.unwrap();
        assert_eq!(gateway.call_count(), 2);
    }
}
