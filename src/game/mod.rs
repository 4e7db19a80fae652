//! Game simulation modules

pub mod engine;
pub mod launch;
pub mod physics;
pub mod server;
pub mod snapshot;

pub use engine::{GameEngine, Phase};
pub use launch::{LaunchError, MatchLauncher};
pub use physics::BoardSettings;
pub use server::{GameServer, GameServerError, MatchOutcome};

use serde::{Deserialize, Serialize};

/// Paddle movement requested by a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// Side of the board a player defends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }
}
