pub mod biome;
pub mod combat;
pub mod coords;
pub mod generation_pool;
pub mod monster;
pub mod noise;
pub mod quest;
pub mod world;
