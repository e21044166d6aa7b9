// Quest Manager (C11, boundary only — spec.md §4.11).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::DurableStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestOutcome {
    QuestProgress {
        quest_id: String,
        objective_state: serde_json::Value,
    },
    QuestCompleted {
        quest_id: String,
        gold_reward: i64,
        badge_id: Option<String>,
        next_quest_id: Option<String>,
    },
}

pub struct QuestManager {
    durable: Arc<dyn DurableStore>,
}

impl QuestManager {
    pub fn new(durable: Arc<dyn DurableStore>) -> Self {
        QuestManager { durable }
    }

    /// Called from the Action Pipeline after each action (spec.md §4.11).
    /// `context` is an opaque blob the caller assembles from the action's
    /// narrative/updates, persisted as-is as `objective_state`.
    /// `completed_now` is the caller-resolved completion predicate (the
    /// action handler reads `updates.quest_objective_complete` off the
    /// LLM's terminal envelope); this boundary does not evaluate the
    /// objective itself, only what happens once it's satisfied.
    pub async fn on_action(
        &self,
        player_id: &str,
        active_quest_id: Option<&str>,
        context: &serde_json::Value,
        completed_now: bool,
    ) -> Result<Option<QuestOutcome>, StorageError> {
        let Some(quest_id) = active_quest_id else {
            return Ok(None);
        };
        let quest = self.durable.get_quest(quest_id).await?;
        let Some(quest) = quest else {
            return Ok(None);
        };

        if !completed_now {
            self.durable
                .set_quest_progress(player_id, quest_id, context, false)
                .await?;
            return Ok(Some(QuestOutcome::QuestProgress {
                quest_id: quest_id.to_string(),
                objective_state: context.clone(),
            }));
        }

        self.durable
            .set_quest_progress(player_id, quest_id, context, true)
            .await?;
        self.durable
            .record_gold_transaction(player_id, quest.gold_reward, &format!("quest:{quest_id}"))
            .await?;

        if let Some(badge_id) = &quest.badge_id {
            if !self.durable.has_badge(player_id, badge_id).await? {
                self.durable.award_badge(player_id, badge_id).await?;
            }
        }

        let next = self.durable.get_next_quest(quest.order_index).await?;
        Ok(Some(QuestOutcome::QuestCompleted {
            quest_id: quest_id.to_string(),
            gold_reward: quest.gold_reward,
            badge_id: quest.badge_id.clone(),
            next_quest_id: next.map(|q| q.id),
        }))
    }
}
