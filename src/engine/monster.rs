// Monster generation (C6.2) and Monster Behavior (C9, spec.md §4.9).

use std::collections::HashMap;
use std::sync::Mutex;

use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

use crate::model::{Aggressiveness, Direction, Intelligence, Monster, Size};

/// Monster-count distribution for a newly created room (spec.md §4.6.2):
/// weights for counts 0..=5 are `[0,0,1,1,2,3]`.
const COUNT_WEIGHTS: [(u32, u32); 6] = [(0, 0), (1, 0), (2, 1), (3, 1), (4, 2), (5, 3)];

fn weighted_choice<T: Copy>(rng: &mut impl Rng, items: &[(T, u32)]) -> T {
    let total: u32 = items.iter().map(|(_, w)| *w).sum();
    if total == 0 {
        return items[0].0;
    }
    let mut roll = rng.gen_range(0..total);
    for (item, weight) in items {
        if roll < *weight {
            return *item;
        }
        roll -= weight;
    }
    items.last().unwrap().0
}

/// Shifts a base weight table's mass from "easy" entries toward "hard"
/// entries as `ring` grows (spec.md §4.6.2). `hard_bias` is added to every
/// entry after `easy_count`, scaled by `ring`.
fn ring_biased<T: Copy>(ring: f64, easy: &[(T, u32)], hard: &[(T, u32)]) -> Vec<(T, u32)> {
    let t = (ring / 8.0).clamp(0.0, 1.0);
    easy.iter()
        .zip(hard.iter())
        .map(|((item, easy_w), (_, hard_w))| {
            let blended = *easy_w as f64 * (1.0 - t) + *hard_w as f64 * t;
            (*item, blended.round().max(0.0) as u32)
        })
        .collect()
}

fn sample_monster_count(ring: f64, rng: &mut impl Rng) -> u32 {
    // Higher ring skews toward more monsters by doubling the weight of the
    // upper half of the distribution.
    let t = (ring / 8.0).clamp(0.0, 1.0);
    let weighted: Vec<(u32, u32)> = COUNT_WEIGHTS
        .iter()
        .enumerate()
        .map(|(i, (count, w))| {
            let boost = if i >= COUNT_WEIGHTS.len() / 2 { 1.0 + t } else { 1.0 };
            (*count, ((*w as f64) * boost).round() as u32)
        })
        .collect();
    weighted_choice(rng, &weighted)
}

fn sample_aggressiveness(ring: f64, rng: &mut impl Rng) -> Aggressiveness {
    use Aggressiveness::*;
    let easy = [(Passive, 5), (Neutral, 4), (Territorial, 1), (Aggressive, 0)];
    let hard = [(Passive, 1), (Neutral, 2), (Territorial, 2), (Aggressive, 5)];
    weighted_choice(rng, &ring_biased(ring, &easy, &hard))
}

fn sample_intelligence(ring: f64, rng: &mut impl Rng) -> Intelligence {
    use Intelligence::*;
    let easy = [(Animal, 6), (Subhuman, 3), (Human, 1), (Omnipotent, 0)];
    let hard = [(Animal, 1), (Subhuman, 3), (Human, 3), (Omnipotent, 3)];
    weighted_choice(rng, &ring_biased(ring, &easy, &hard))
}

fn sample_size(ring: f64, rng: &mut impl Rng) -> Size {
    use Size::*;
    let easy = [(Insect, 4), (Chicken, 4), (Human, 2), (Horse, 0), (Dinosaur, 0), (Colossal, 0)];
    let hard = [(Insect, 0), (Chicken, 1), (Human, 2), (Horse, 3), (Dinosaur, 3), (Colossal, 1)];
    weighted_choice(rng, &ring_biased(ring, &easy, &hard))
}

/// Special-effects count: near center mostly 0; far ring allows 1, and some
/// 2 (spec.md §4.6.2).
fn sample_special_effects_count(ring: f64, rng: &mut impl Rng) -> u32 {
    let t = (ring / 8.0).clamp(0.0, 1.0);
    let weighted = [(0u32, (10.0 * (1.0 - t)).round() as u32 + 1), (1, (6.0 * t).round() as u32), (2, (2.0 * t).round() as u32)];
    weighted_choice(rng, &weighted)
}

const EFFECT_POOL: &[&str] = &["venomous bite", "regenerating hide", "blinding spores", "stunning roar", "camouflage"];

/// Generates 0-5 monsters for a freshly created room, applying ring-based
/// difficulty bias and the `room_start` safety sanitization (spec.md
/// §4.6.2).
pub fn generate_monsters_for_room(room_id: &str, x: i64, y: i64, names: &[&str]) -> Vec<Monster> {
    let ring = super::coords::ring(x, y);
    let mut rng = rand::thread_rng();
    let count = sample_monster_count(ring, &mut rng);

    (0..count)
        .map(|i| {
            let size = sample_size(ring, &mut rng);
            let effects_count = sample_special_effects_count(ring, &mut rng) as usize;
            let special_effects = EFFECT_POOL
                .choose_multiple(&mut rng, effects_count)
                .map(|s| s.to_string())
                .collect();
            let name = names.get(i as usize % names.len().max(1)).copied().unwrap_or("Creature");

            let mut monster = Monster {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                description: format!("A {name} lurking nearby."),
                aggressiveness: sample_aggressiveness(ring, &mut rng),
                intelligence: sample_intelligence(ring, &mut rng),
                size,
                health: size.derived_health(),
                is_alive: true,
                special_effects,
                location: room_id.to_string(),
            };
            if room_id == crate::model::START_ROOM_ID {
                monster.sanitize_for_start_room();
            }
            monster
        })
        .collect()
}

/// In-memory Monster Behavior bookkeeping (C9, spec.md §4.9), rehydrated
/// per-room from `room.properties.territorial_blocks` on first access.
#[derive(Default)]
pub struct MonsterBehaviorTracker {
    inner: Mutex<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    territorial_blocks: HashMap<String, HashMap<String, Direction>>,
    aggressive_monsters: HashMap<String, HashMap<String, String>>,
    player_last_room: HashMap<String, String>,
}

/// What an encounter check found for a given player action.
pub enum EncounterOutcome {
    None,
    TerritorialBlock { monster_id: String },
    AggressiveAmbush { monster_id: String },
}

impl MonsterBehaviorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rehydrate_room(&self, room_id: &str, persisted: &HashMap<String, Direction>) {
        let mut state = self.inner.lock().unwrap();
        state
            .territorial_blocks
            .entry(room_id.to_string())
            .or_insert_with(|| persisted.clone());
    }

    /// Called on player entry to a room; returns the territorial block
    /// freshly chosen for each territorial monster (so callers can persist
    /// it to `room.properties.territorial_blocks`) and registers aggressive
    /// monsters (spec.md §4.9).
    pub fn on_player_entry(
        &self,
        room_id: &str,
        entry_direction: Direction,
        exits: &[Direction],
        monsters: &[Monster],
    ) -> Vec<(String, Direction)> {
        let mut new_blocks = Vec::new();
        let mut rng = rand::thread_rng();
        let mut state = self.inner.lock().unwrap();

        for monster in monsters.iter().filter(|m| m.is_alive) {
            match monster.aggressiveness {
                Aggressiveness::Territorial => {
                    let room_blocks = state.territorial_blocks.entry(room_id.to_string()).or_default();
                    if !room_blocks.contains_key(&monster.id) {
                        let retreat = entry_direction.opposite();
                        let choices: Vec<Direction> =
                            exits.iter().copied().filter(|d| *d != retreat).collect();
                        if let Some(&chosen) = choices.choose(&mut rng) {
                            room_blocks.insert(monster.id.clone(), chosen);
                            new_blocks.push((monster.id.clone(), chosen));
                        }
                    }
                }
                Aggressiveness::Aggressive => {
                    state
                        .aggressive_monsters
                        .entry(room_id.to_string())
                        .or_default()
                        .insert(monster.id.clone(), monster.name.clone());
                }
                _ => {}
            }
        }
        new_blocks
    }

    pub fn record_last_room(&self, player_id: &str, room_id: &str) {
        self.inner
            .lock()
            .unwrap()
            .player_last_room
            .insert(player_id.to_string(), room_id.to_string());
    }

    pub fn last_room(&self, player_id: &str) -> Option<String> {
        self.inner.lock().unwrap().player_last_room.get(player_id).cloned()
    }

    /// Sentinel used for non-movement actions (spec.md §4.9).
    pub const ANY_ACTION: &'static str = "any_action";

    /// Checks whether the attempted action should force combat with a
    /// monster (spec.md §4.9). `attempted_direction` is `Some(d)` for a
    /// movement, or `None` to signal `any_action`. `connections` is the
    /// current room's `direction -> room_id` map, used to resolve a
    /// movement's *destination* room before comparing it against the
    /// player's last-occupied room (examples/original_source/server/app/
    /// monster_behavior.py:369-373 resolves `target_room` the same way
    /// before allowing a retreat).
    pub fn check_action(
        &self,
        room_id: &str,
        player_id: &str,
        attempted_direction: Option<Direction>,
        connections: &HashMap<Direction, String>,
    ) -> EncounterOutcome {
        let state = self.inner.lock().unwrap();

        if let Some(d) = attempted_direction {
            if let Some(blocks) = state.territorial_blocks.get(room_id) {
                if let Some((monster_id, _)) = blocks.iter().find(|(_, blocked)| **blocked == d) {
                    return EncounterOutcome::TerritorialBlock {
                        monster_id: monster_id.clone(),
                    };
                }
            }
        }

        let last_room = state.player_last_room.get(player_id);
        let is_retreat_move = match attempted_direction {
            Some(d) => connections.get(&d).is_some() && connections.get(&d) == last_room,
            None => false,
        };

        if !is_retreat_move {
            if let Some(aggressive) = state.aggressive_monsters.get(room_id) {
                if let Some((monster_id, _)) = aggressive.iter().next() {
                    return EncounterOutcome::AggressiveAmbush {
                        monster_id: monster_id.clone(),
                    };
                }
            }
        }

        EncounterOutcome::None
    }

    /// Clears territorial state for a monster (death or departure) and
    /// drops empty room entries (spec.md §4.9).
    pub fn clear_monster(&self, room_id: &str, monster_id: &str) {
        let mut state = self.inner.lock().unwrap();
        if let Some(blocks) = state.territorial_blocks.get_mut(room_id) {
            blocks.remove(monster_id);
            if blocks.is_empty() {
                state.territorial_blocks.remove(room_id);
            }
        }
        if let Some(aggressive) = state.aggressive_monsters.get_mut(room_id) {
            aggressive.remove(monster_id);
            if aggressive.is_empty() {
                state.aggressive_monsters.remove(room_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_monsters_for_start_room_never_aggressive() {
        for _ in 0..50 {
            let monsters = generate_monsters_for_room(crate::model::START_ROOM_ID, 0, 0, &["Wolf"]);
            for m in monsters {
                assert_ne!(m.aggressiveness, Aggressiveness::Aggressive);
            }
        }
    }

    #[test]
    fn test_territorial_block_never_blocks_retreat_direction() {
        let tracker = MonsterBehaviorTracker::new();
        let monster = Monster {
            id: "m1".to_string(),
            name: "Boar".to_string(),
            description: String::new(),
            aggressiveness: Aggressiveness::Territorial,
            intelligence: Intelligence::Animal,
            size: Size::Human,
            health: 10,
            is_alive: true,
            special_effects: vec![],
            location: "room_a".to_string(),
        };
        for _ in 0..50 {
            let blocks = tracker.on_player_entry(
                "room_a",
                Direction::South,
                &[Direction::North, Direction::East, Direction::South],
                &[monster.clone()],
            );
            if let Some((_, blocked)) = blocks.first() {
                assert_ne!(*blocked, Direction::North, "must never block the retreat direction");
            }
            tracker.clear_monster("room_a", "m1");
        }
    }

    #[test]
    fn test_aggressive_ambush_triggers_on_non_retreat_action() {
        let tracker = MonsterBehaviorTracker::new();
        let monster = Monster {
            id: "m2".to_string(),
            name: "Wolf".to_string(),
            description: String::new(),
            aggressiveness: Aggressiveness::Aggressive,
            intelligence: Intelligence::Animal,
            size: Size::Human,
            health: 10,
            is_alive: true,
            special_effects: vec![],
            location: "room_a".to_string(),
        };
        tracker.on_player_entry("room_a", Direction::South, &[Direction::North], &[monster]);
        tracker.record_last_room("p1", "room_b");

        let connections = HashMap::new();
        match tracker.check_action("room_a", "p1", None, &connections) {
            EncounterOutcome::AggressiveAmbush { monster_id } => assert_eq!(monster_id, "m2"),
            _ => panic!("expected an aggressive ambush"),
        }
    }

    #[test]
    fn test_aggressive_ambush_allows_retreat_to_last_room() {
        // spec.md §4.9: a movement whose destination resolves to the
        // player's last-occupied room is a retreat and must not trigger an
        // ambush, even though an aggressive monster is registered.
        let tracker = MonsterBehaviorTracker::new();
        let monster = Monster {
            id: "m3".to_string(),
            name: "Wolf".to_string(),
            description: String::new(),
            aggressiveness: Aggressiveness::Aggressive,
            intelligence: Intelligence::Animal,
            size: Size::Human,
            health: 10,
            is_alive: true,
            special_effects: vec![],
            location: "room_a".to_string(),
        };
        tracker.on_player_entry("room_a", Direction::South, &[Direction::North], &[monster]);
        tracker.record_last_room("p1", "room_b");

        let mut connections = HashMap::new();
        connections.insert(Direction::South, "room_b".to_string());

        match tracker.check_action("room_a", "p1", Some(Direction::South), &connections) {
            EncounterOutcome::None => {}
            _ => panic!("a retreat move back to the last room must not trigger an ambush"),
        }

        // The same direction leading somewhere else must still ambush.
        connections.insert(Direction::South, "room_c".to_string());
        match tracker.check_action("room_a", "p1", Some(Direction::South), &connections) {
            EncounterOutcome::AggressiveAmbush { monster_id } => assert_eq!(monster_id, "m3"),
            _ => panic!("expected an aggressive ambush when the move does not lead to the last room"),
        }
    }
}
