// Core domain entities shared across storage, engine, and API layers
// (spec.md §3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cardinal/vertical movement direction between rooms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    South,
    East,
    West,
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
        Direction::Up,
        Direction::Down,
    ];

    /// The four horizontal directions used for world-grid adjacency and
    /// neighbor preload (spec.md §4.6.1, §4.6.5).
    pub const HORIZONTAL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    /// The (dx, dy) offset for this direction (spec.md §4.6.1). Up/Down do
    /// not move the 2D grid position.
    pub fn offset(self) -> (i64, i64) {
        match self {
            Direction::North => (0, 1),
            Direction::South => (0, -1),
            Direction::East => (1, 0),
            Direction::West => (-1, 0),
            Direction::Up | Direction::Down => (0, 0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::South => "south",
            Direction::East => "east",
            Direction::West => "west",
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Option<Direction> {
        match s.to_ascii_lowercase().as_str() {
            "north" | "n" => Some(Direction::North),
            "south" | "s" => Some(Direction::South),
            "east" | "e" => Some(Direction::East),
            "west" | "w" => Some(Direction::West),
            "up" | "u" => Some(Direction::Up),
            "down" | "d" => Some(Direction::Down),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    Pending,
    Generating,
    ContentReady,
    Ready,
    Error,
}

pub const START_ROOM_ID: &str = "room_start";
/// Alias id used interchangeably with `room_start` for 3-star bookkeeping
/// (spec.md §4.6.2 step 2).
pub const START_ROOM_ALIAS_ID: &str = "room_0_0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub x: i64,
    pub y: i64,
    pub title: String,
    pub description: String,
    pub image_url: Option<String>,
    pub image_status: ImageStatus,
    pub biome: String,
    pub connections: HashMap<Direction, String>,
    pub npcs: Vec<String>,
    pub items: Vec<String>,
    pub monsters: Vec<String>,
    pub players: Vec<String>,
    pub properties: RoomProperties,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomProperties {
    /// monster_id -> blocked direction, persisted for territorial monsters
    /// (spec.md §4.9).
    #[serde(default)]
    pub territorial_blocks: HashMap<String, Direction>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub current_room: Option<String>,
    pub inventory: Vec<String>,
    pub quest_progress: HashMap<String, serde_json::Value>,
    pub memory_log: Vec<String>,
    pub last_action_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_action_text: Option<String>,
    pub active_quest_id: Option<String>,
    pub gold: i64,
    pub health: i64,
    pub rejoin_immunity: bool,
}

impl Player {
    pub const MAX_HEALTH: i64 = 100;

    pub fn new(id: String, user_id: String, name: String) -> Self {
        Player {
            id,
            user_id,
            name,
            current_room: None,
            inventory: Vec::new(),
            quest_progress: HashMap::new(),
            memory_log: Vec::new(),
            last_action_at: None,
            last_action_text: None,
            active_quest_id: None,
            gold: 0,
            health: Self::MAX_HEALTH,
            rejoin_immunity: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rarity(pub u8);

impl Rarity {
    pub fn is_valid(self) -> bool {
        (1..=4).contains(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub description: String,
    pub rarity: Rarity,
    pub capabilities: Vec<String>,
    pub special_effects: Vec<String>,
}

impl Item {
    /// spec.md §3 item rarity invariant: rarity <= 2 implies no special
    /// effects, rarity >= 3 implies at least one.
    pub fn satisfies_rarity_invariant(&self) -> bool {
        if self.rarity.0 <= 2 {
            self.special_effects.is_empty()
        } else {
            !self.special_effects.is_empty()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggressiveness {
    Passive,
    Aggressive,
    Neutral,
    Territorial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intelligence {
    Human,
    Subhuman,
    Animal,
    Omnipotent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Size {
    Colossal,
    Dinosaur,
    Horse,
    Human,
    Chicken,
    Insect,
}

impl Size {
    /// Size-to-health multiplier table shared by monster health derivation
    /// and duel max-vital scaling (spec.md §3, §4.6.2, §4.8.2).
    pub fn multiplier(self) -> f64 {
        match self {
            Size::Insect => 0.4,
            Size::Chicken => 0.6,
            Size::Human => 1.0,
            Size::Horse => 1.4,
            Size::Dinosaur => 1.8,
            Size::Colossal => 2.4,
        }
    }

    pub fn derived_health(self) -> i64 {
        (5.0 * self.multiplier()).round() as i64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monster {
    pub id: String,
    pub name: String,
    pub description: String,
    pub aggressiveness: Aggressiveness,
    pub intelligence: Intelligence,
    pub size: Size,
    pub health: i64,
    pub is_alive: bool,
    pub special_effects: Vec<String>,
    pub location: String,
}

impl Monster {
    /// spec.md §3 starting-room safety invariant.
    pub fn sanitize_for_start_room(&mut self) {
        if self.aggressiveness == Aggressiveness::Aggressive {
            self.aggressiveness = Aggressiveness::Neutral;
        }
    }

    pub fn max_vital(&self) -> i64 {
        std::cmp::max(1, (6.0 * self.size.multiplier()).round() as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Npc {
    pub id: String,
    pub name: String,
    pub description: String,
    pub location: String,
    pub dialogue_history: Vec<String>,
    pub memory_log: Vec<String>,
    pub personality: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Biome {
    pub name: String,
    pub description: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinateRecord {
    pub x: i64,
    pub y: i64,
    pub room_id: String,
    pub is_discovered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: String,
    pub player_id: String,
    pub room_id: String,
    pub action: String,
    pub ai_response: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub session_id: String,
    pub updates: serde_json::Value,
    pub metadata: serde_json::Value,
}

impl ActionRecord {
    /// `session_{player_id}_{YYYYMMDD}` per spec.md §4.7 step 5.
    pub fn session_id_for(player_id: &str, at: chrono::DateTime<chrono::Utc>) -> String {
        format!("session_{player_id}_{}", at.format("%Y%m%d"))
    }
}
