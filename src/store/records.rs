//! Persisted rows: matches, tournaments, bracket nodes and lobbies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::Phase;

/// Match lifecycle as stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    InProgress,
    Finished,
}

impl From<Phase> for MatchStatus {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::NotStarted => MatchStatus::Pending,
            Phase::Active | Phase::Resetting => MatchStatus::InProgress,
            Phase::Finished => MatchStatus::Finished,
        }
    }
}

/// Match record; outlives the live game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: Uuid,
    pub player1_id: Uuid,
    pub player2_id: Uuid,
    pub player1_score: u32,
    pub player2_score: u32,
    pub rounds_completed: u32,
    pub status: MatchStatus,
    pub winner_id: Option<Uuid>,
    pub loser_id: Option<Uuid>,
    pub tournament_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl MatchRecord {
    pub fn new(id: Uuid, player1_id: Uuid, player2_id: Uuid, tournament_id: Option<Uuid>) -> Self {
        Self {
            id,
            player1_id,
            player2_id,
            player1_score: 0,
            player2_score: 0,
            rounds_completed: 0,
            status: MatchStatus::Pending,
            winner_id: None,
            loser_id: None,
            tournament_id,
            created_at: Utc::now(),
        }
    }
}

/// Periodic score/phase snapshot of a live match
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchProgress {
    #[serde(skip_serializing)]
    pub match_id: Uuid,
    pub player1_score: u32,
    pub player2_score: u32,
    pub rounds_completed: u32,
    pub status: MatchStatus,
}

/// Terminal result of a match
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    #[serde(skip_serializing)]
    pub match_id: Uuid,
    pub player1_score: u32,
    pub player2_score: u32,
    pub rounds_completed: u32,
    pub status: MatchStatus,
    /// None on a tie
    pub winner_id: Option<Uuid>,
    pub loser_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    Open,
    Started,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tournament {
    pub id: Uuid,
    pub name: String,
    pub participants: Vec<Uuid>,
    pub status: TournamentStatus,
    pub champion_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Tournament {
    pub fn new(name: String, participants: Vec<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            participants,
            status: TournamentStatus::Open,
            champion_id: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    NotScheduled,
    Scheduled,
    Finished,
}

/// One of the two contender slots of a bracket node; stored as 1 or 2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Slot {
    One,
    Two,
}

impl TryFrom<u8> for Slot {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Slot::One),
            2 => Ok(Slot::Two),
            other => Err(format!("slot must be 1 or 2, got {}", other)),
        }
    }
}

impl From<Slot> for u8 {
    fn from(slot: Slot) -> Self {
        match slot {
            Slot::One => 1,
            Slot::Two => 2,
        }
    }
}

/// Node of a single-elimination bracket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketNode {
    pub id: Uuid,
    pub tournament_id: Uuid,
    /// 1 for the opening round
    pub round: u32,
    /// Index within the round
    pub position: u32,
    pub player1_id: Option<Uuid>,
    pub player2_id: Option<Uuid>,
    pub status: NodeStatus,
    pub winner_slot: Option<Slot>,
    /// Node the winner advances to; None for the final
    pub next_match_id: Option<Uuid>,
    /// Match backing this node once scheduled
    pub match_id: Option<Uuid>,
}

impl BracketNode {
    pub fn placeholder(tournament_id: Uuid, round: u32, position: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            tournament_id,
            round,
            position,
            player1_id: None,
            player2_id: None,
            status: NodeStatus::NotScheduled,
            winner_slot: None,
            next_match_id: None,
            match_id: None,
        }
    }

    pub fn occupant(&self, slot: Slot) -> Option<Uuid> {
        match slot {
            Slot::One => self.player1_id,
            Slot::Two => self.player2_id,
        }
    }

    pub fn slot_of(&self, player_id: Uuid) -> Option<Slot> {
        if self.player1_id == Some(player_id) {
            Some(Slot::One)
        } else if self.player2_id == Some(player_id) {
            Some(Slot::Two)
        } else {
            None
        }
    }

    pub fn is_filled(&self) -> bool {
        self.player1_id.is_some() && self.player2_id.is_some()
    }

    pub fn winner_id(&self) -> Option<Uuid> {
        self.winner_slot.and_then(|slot| self.occupant(slot))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyStatus {
    Open,
    Full,
}

/// Two-seat holding area for ad-hoc pairing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lobby {
    pub id: Uuid,
    pub status: LobbyStatus,
    pub player1_id: Uuid,
    pub player2_id: Option<Uuid>,
    pub match_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Lobby {
    pub fn open(player_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: LobbyStatus::Open,
            player1_id: player_id,
            player2_id: None,
            match_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn contains(&self, player_id: Uuid) -> bool {
        self.player1_id == player_id || self.player2_id == Some(player_id)
    }
}
