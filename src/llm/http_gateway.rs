// HTTP-backed LLM Gateway. Speaks a simple completions-style JSON protocol
// to whichever text-model provider `MODEL_PROVIDER_KEY`/`MODEL_ID` name,
// reusing the `reqwest` client the way the rest of the pack's LLM-adjacent
// code does (e.g. the director module this gateway borrows its streaming
// shape from).

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::LlmError;

use super::{
    split_action_tail, ActionContext, ActionEnvelope, ActionStreamEvent, GeneratedBiome,
    GeneratedRoomDescription, GeneratedWorldSeed, LlmGateway, RoomDescriptionContext,
};

pub struct HttpLlmGateway {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model_id: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    text: String,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    text: String,
}

impl HttpLlmGateway {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, model_id: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .expect("failed to build reqwest client");
        HttpLlmGateway {
            client,
            api_base: api_base.into(),
            api_key: api_key.into(),
            model_id: model_id.into(),
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let resp = self
            .client
            .post(format!("{}/v1/complete", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&CompletionRequest {
                model: &self.model_id,
                prompt,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(LlmError::Request(format!(
                "model provider returned {}",
                resp.status()
            )));
        }

        let parsed: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;
        Ok(parsed.text)
    }
}

#[async_trait]
impl LlmGateway for HttpLlmGateway {
    async fn generate_room_description(
        &self,
        ctx: &RoomDescriptionContext,
    ) -> Result<GeneratedRoomDescription, LlmError> {
        let prompt = format!(
            "Generate a short title, a 2-3 sentence description, and an image prompt \
             for a room at ({}, {}) in a {} biome. Reply as JSON with keys title, \
             description, image_prompt.",
            ctx.x, ctx.y, ctx.biome
        );
        let raw = self.complete(&prompt).await?;

        #[derive(Deserialize)]
        struct Parsed {
            title: String,
            description: String,
            image_prompt: String,
        }
        let parsed: Parsed =
            serde_json::from_str(raw.trim()).map_err(|e| LlmError::Schema(e.to_string()))?;
        Ok(GeneratedRoomDescription {
            title: parsed.title,
            description: parsed.description,
            image_prompt: parsed.image_prompt,
        })
    }

    async fn generate_biome_chunk(
        &self,
        chunk_id: &str,
        excluded_biome_names: &[String],
    ) -> Result<GeneratedBiome, LlmError> {
        let prompt = format!(
            "Invent a new world biome for chunk {chunk_id}, distinct from: {}. \
             Reply as JSON with keys name, description, color.",
            excluded_biome_names.join(", ")
        );
        let raw = self.complete(&prompt).await?;

        #[derive(Deserialize)]
        struct Parsed {
            name: String,
            description: String,
            color: String,
        }
        let parsed: Parsed =
            serde_json::from_str(raw.trim()).map_err(|e| LlmError::Schema(e.to_string()))?;
        Ok(GeneratedBiome {
            name: parsed.name,
            description: parsed.description,
            color: parsed.color,
        })
    }

    async fn generate_world_seed(&self) -> Result<GeneratedWorldSeed, LlmError> {
        let prompt = "Invent a world seed phrase and a one-paragraph main quest summary \
             for a freshly generated procedural world. Reply as JSON with keys \
             world_seed, main_quest_summary, starting_state (an object).";
        let raw = self.complete(prompt).await?;

        #[derive(Deserialize)]
        struct Parsed {
            world_seed: String,
            main_quest_summary: String,
            starting_state: serde_json::Value,
        }
        let parsed: Parsed =
            serde_json::from_str(raw.trim()).map_err(|e| LlmError::Schema(e.to_string()))?;
        Ok(GeneratedWorldSeed {
            world_seed: parsed.world_seed,
            main_quest_summary: parsed.main_quest_summary,
            starting_state: parsed.starting_state,
        })
    }

    async fn stream_action(
        &self,
        ctx: &ActionContext,
    ) -> Result<Pin<Box<dyn Stream<Item = ActionStreamEvent> + Send>>, LlmError> {
        let prompt = format!(
            "Room {}: {}\nRecent chat:\n{}\nPlayer action: {}\n\nNarrate the outcome, then \
             on a new paragraph emit a single JSON object with keys response and updates \
             (updates.quest_objective_complete is true only if this action satisfies the \
             player's current quest objective).",
            ctx.room_id,
            ctx.room_description,
            ctx.recent_chat.join("\n"),
            ctx.action_text
        );

        let resp = self
            .client
            .post(format!("{}/v1/complete", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&CompletionRequest {
                model: &self.model_id,
                prompt: &prompt,
                stream: true,
            })
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(LlmError::Request(format!(
                "model provider returned {}",
                resp.status()
            )));
        }

        let byte_stream = resp.bytes_stream();
        let stream = byte_stream.scan(String::new(), |accum, chunk| {
            let chunk = match chunk {
                Ok(bytes) => bytes,
                Err(e) => return futures::future::ready(Some(vec![ActionStreamEvent::Error(e.to_string())])),
            };
            let mut events = Vec::new();
            for line in String::from_utf8_lossy(&chunk).lines() {
                let Ok(parsed) = serde_json::from_str::<CompletionChunk>(line) else {
                    continue;
                };
                accum.push_str(&parsed.text);
                if !parsed.done {
                    events.push(ActionStreamEvent::Token(parsed.text));
                } else {
                    events.push(terminal_event_from(accum));
                }
            }
            futures::future::ready(Some(events))
        });

        let flattened = stream.flat_map(futures::stream::iter);
        Ok(Box::pin(flattened))
    }

    async fn process_npc_interaction(
        &self,
        npc_id: &str,
        player_utterance: &str,
        npc_memory: &[String],
    ) -> Result<(String, String), LlmError> {
        let prompt = format!(
            "NPC {npc_id} remembers: {}\nPlayer says: {player_utterance}\n\
             Reply as JSON with keys response and new_memory.",
            npc_memory.join("; ")
        );
        let raw = self.complete(&prompt).await?;

        #[derive(Deserialize)]
        struct Parsed {
            response: String,
            new_memory: String,
        }
        let parsed: Parsed =
            serde_json::from_str(raw.trim()).map_err(|e| LlmError::Schema(e.to_string()))?;
        Ok((parsed.response, parsed.new_memory))
    }

    async fn generate_text(&self, prompt: &str) -> Result<String, LlmError> {
        self.complete(prompt).await
    }

    async fn generate_room_image(&self, prompt: &str) -> Result<String, LlmError> {
        for attempt in 1..=3u8 {
            let result = self
                .client
                .post(format!("{}/v1/images", self.api_base))
                .bearer_auth(&self.api_key)
                .json(&json!({ "prompt": prompt }))
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    #[derive(Deserialize)]
                    struct ImageResponse {
                        url: String,
                    }
                    if let Ok(parsed) = resp.json::<ImageResponse>().await {
                        return Ok(parsed.url);
                    }
                }
                _ => {
                    tracing::warn!(attempt, "room image generation attempt failed");
                }
            }
            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
        }
        Ok(String::new())
    }
}

fn terminal_event_from(accum: &str) -> ActionStreamEvent {
    match split_action_tail(accum) {
        Some((_, json_part)) => match serde_json::from_str::<ActionEnvelope>(json_part) {
            Ok(envelope) => ActionStreamEvent::Terminal(envelope),
            Err(e) => ActionStreamEvent::Error(e.to_string()),
        },
        None => ActionStreamEvent::Error("stream closed without a terminal envelope".to_string()),
    }
}
