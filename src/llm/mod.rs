// LLM Gateway (C4, spec.md §4.4): stateless adapter around the narrative and
// classification model calls the rest of the engine depends on.

pub mod fake_gateway;
pub mod http_gateway;
pub mod model_gateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

pub use fake_gateway::FakeLlmGateway;
pub use http_gateway::HttpLlmGateway;
pub use model_gateway::{FakeModelGateway, HttpModelGateway, ModelGateway, ModelJobStatus};

/// One token of a streamed action narrative, or the single terminal
/// structured envelope that always follows it (spec.md §4.4).
#[derive(Debug, Clone)]
pub enum ActionStreamEvent {
    Token(String),
    Terminal(ActionEnvelope),
    Error(String),
}

/// Closed, versioned schema for the streamed action's tail object
/// (spec.md §9: "define a closed, versioned schema ... reject unknown
/// fields"). `#[serde(deny_unknown_fields)]` on the nested update structs
/// enforces that rejection at parse time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEnvelope {
    pub response: String,
    #[serde(default)]
    pub updates: ActionUpdates,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionUpdates {
    #[serde(default)]
    pub player: Option<PlayerUpdate>,
    #[serde(default)]
    pub room: Option<RoomUpdate>,
    #[serde(default)]
    pub npcs: Vec<NpcUpdate>,
    #[serde(default)]
    pub room_generation: Option<RoomGenerationUpdate>,
    /// Whether this action satisfied the player's active quest objective
    /// (spec.md §4.11, kept intentionally shallow per its "boundary only"
    /// scope). `ActionPipeline` does not interpret this itself; it is
    /// forwarded to `QuestManager::on_action` as `completed_now` by the
    /// caller.
    #[serde(default)]
    pub quest_objective_complete: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlayerUpdate {
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub health_delta: Option<i64>,
    #[serde(default)]
    pub gold_delta: Option<i64>,
    #[serde(default)]
    pub inventory_add: Vec<String>,
    #[serde(default)]
    pub inventory_remove: Vec<String>,
    #[serde(default)]
    pub memory_note: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoomUpdate {
    #[serde(default)]
    pub description_append: Option<String>,
    #[serde(default)]
    pub items_remove: Vec<String>,
    #[serde(default)]
    pub monsters_remove: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NpcUpdate {
    pub npc_id: String,
    #[serde(default)]
    pub dialogue_line: Option<String>,
    #[serde(default)]
    pub memory_note: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoomGenerationUpdate {
    #[serde(default)]
    pub hint_biome: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RoomDescriptionContext {
    pub x: i64,
    pub y: i64,
    pub biome: String,
}

#[derive(Debug, Clone)]
pub struct GeneratedRoomDescription {
    pub title: String,
    pub description: String,
    pub image_prompt: String,
}

#[derive(Debug, Clone)]
pub struct GeneratedBiome {
    pub name: String,
    pub description: String,
    pub color: String,
}

#[derive(Debug, Clone)]
pub struct GeneratedWorldSeed {
    pub world_seed: String,
    pub main_quest_summary: String,
    pub starting_state: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ActionContext {
    pub player_id: String,
    pub action_text: String,
    pub room_id: String,
    pub room_description: String,
    pub recent_chat: Vec<String>,
}

/// Stateless adapter for every model call the engine makes (spec.md §4.4).
/// Every operation is cancel-safe: dropping the returned future (or, for
/// `stream_action`, the event stream) must not leave partial state mutated.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn generate_room_description(
        &self,
        ctx: &RoomDescriptionContext,
    ) -> Result<GeneratedRoomDescription, LlmError>;

    async fn generate_biome_chunk(
        &self,
        chunk_id: &str,
        excluded_biome_names: &[String],
    ) -> Result<GeneratedBiome, LlmError>;

    async fn generate_world_seed(&self) -> Result<GeneratedWorldSeed, LlmError>;

    /// Narrative token stream followed exactly once by a terminal envelope
    /// (spec.md §4.4, §4.7 step 4).
    async fn stream_action(
        &self,
        ctx: &ActionContext,
    ) -> Result<
        std::pin::Pin<Box<dyn futures::Stream<Item = ActionStreamEvent> + Send>>,
        LlmError,
    >;

    async fn process_npc_interaction(
        &self,
        npc_id: &str,
        player_utterance: &str,
        npc_memory: &[String],
    ) -> Result<(String, String), LlmError>;

    async fn generate_text(&self, prompt: &str) -> Result<String, LlmError>;

    /// Retried up to 3x by the caller; may return an empty string on
    /// repeated failure (spec.md §4.4).
    async fn generate_room_image(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Splits a streamed action response into its prose prefix and trailing
/// JSON envelope, per the "prose, then two newlines, then JSON" contract
/// (spec.md §4.4).
pub fn split_action_tail(full_text: &str) -> Option<(&str, &str)> {
    let idx = full_text.rfind("\n\n")?;
    let (prose, rest) = full_text.split_at(idx);
    let json_part = rest.trim_start_matches('\n').trim();
    if json_part.starts_with('{') {
        Some((prose.trim_end(), json_part))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_action_tail_finds_json() {
        let text = "You step into the clearing.\n\n{\"response\":\"ok\"}";
        let (prose, json) = split_action_tail(text).unwrap();
        assert_eq!(prose, "You step into the clearing.");
        assert_eq!(json, "{\"response\":\"ok\"}");
    }

    #[test]
    fn test_split_action_tail_rejects_non_json_tail() {
        let text = "Some prose\n\nmore prose, no json here";
        assert!(split_action_tail(text).is_none());
    }

    #[test]
    fn test_action_envelope_rejects_unknown_update_fields() {
        let raw = r#"{"response":"ok","updates":{"player":{"unknown_field":1}}}"#;
        let parsed: Result<ActionEnvelope, _> = serde_json::from_str(raw);
        assert!(parsed.is_err());
    }
}
