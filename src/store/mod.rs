//! Persistence: the operations the server performs against storage

pub mod memory;
pub mod records;
pub mod supabase;
pub mod supabase_store;
pub mod writer;

use std::future::Future;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use records::{
    BracketNode, Lobby, LobbyStatus, MatchProgress, MatchRecord, MatchResult, MatchStatus,
    NodeStatus, Slot, Tournament, TournamentStatus,
};
pub use supabase::{SupabaseClient, SupabaseError};
pub use writer::{StoreWriter, WriteJob};

/// Storage operations. Methods named `try_*` are conditional writes that
/// return `false` when the guarded precondition no longer holds, which is
/// how racing callers learn that a peer already won.
pub trait Store: Send + Sync + 'static {
    // Matches
    fn insert_match(&self, record: &MatchRecord)
        -> impl Future<Output = Result<(), StoreError>> + Send;
    fn update_match_progress(&self, progress: &MatchProgress)
        -> impl Future<Output = Result<(), StoreError>> + Send;
    fn record_match_result(&self, result: &MatchResult)
        -> impl Future<Output = Result<(), StoreError>> + Send;
    fn get_match(&self, id: Uuid)
        -> impl Future<Output = Result<Option<MatchRecord>, StoreError>> + Send;

    // Tournaments
    fn insert_tournament(&self, tournament: &Tournament)
        -> impl Future<Output = Result<(), StoreError>> + Send;
    fn get_tournament(&self, id: Uuid)
        -> impl Future<Output = Result<Option<Tournament>, StoreError>> + Send;
    fn list_tournaments(&self) -> impl Future<Output = Result<Vec<Tournament>, StoreError>> + Send;
    /// open -> started
    fn try_begin_tournament(&self, id: Uuid)
        -> impl Future<Output = Result<bool, StoreError>> + Send;
    /// started -> open, undoing a start whose bracket was never written
    fn try_reopen_tournament(&self, id: Uuid)
        -> impl Future<Output = Result<bool, StoreError>> + Send;
    /// started -> completed
    fn complete_tournament(&self, id: Uuid, champion_id: Uuid)
        -> impl Future<Output = Result<(), StoreError>> + Send;

    // Bracket nodes
    fn upsert_bracket_nodes(&self, nodes: &[BracketNode])
        -> impl Future<Output = Result<(), StoreError>> + Send;
    /// Ordered by round, then position
    fn list_bracket_nodes(&self, tournament_id: Uuid)
        -> impl Future<Output = Result<Vec<BracketNode>, StoreError>> + Send;
    fn get_bracket_node(&self, id: Uuid)
        -> impl Future<Output = Result<Option<BracketNode>, StoreError>> + Send;
    fn find_bracket_node_by_match(&self, match_id: Uuid)
        -> impl Future<Output = Result<Option<BracketNode>, StoreError>> + Send;
    /// scheduled -> finished, recording the winning slot
    fn try_finish_bracket_node(&self, id: Uuid, winner: Slot)
        -> impl Future<Output = Result<bool, StoreError>> + Send;
    /// Fill `slot` if it is still empty
    fn try_fill_bracket_slot(&self, id: Uuid, slot: Slot, participant: Uuid)
        -> impl Future<Output = Result<bool, StoreError>> + Send;
    /// not_scheduled -> scheduled, only when both slots are filled
    fn try_schedule_bracket_node(&self, id: Uuid, match_id: Uuid)
        -> impl Future<Output = Result<bool, StoreError>> + Send;
    /// scheduled under `match_id` -> not_scheduled
    fn release_bracket_node(&self, id: Uuid, match_id: Uuid)
        -> impl Future<Output = Result<(), StoreError>> + Send;

    // Lobbies
    /// Oldest open lobby whose occupant is not `player_id`
    fn find_open_lobby(&self, player_id: Uuid)
        -> impl Future<Output = Result<Option<Lobby>, StoreError>> + Send;
    /// Open lobby already occupied by `player_id`
    fn find_waiting_lobby(&self, player_id: Uuid)
        -> impl Future<Output = Result<Option<Lobby>, StoreError>> + Send;
    /// Full lobby seating `player_id`
    fn find_paired_lobby(&self, player_id: Uuid)
        -> impl Future<Output = Result<Option<Lobby>, StoreError>> + Send;
    /// Conflict if the player already waits in an open lobby
    fn insert_lobby(&self, lobby: &Lobby) -> impl Future<Output = Result<(), StoreError>> + Send;
    fn get_lobby(&self, id: Uuid) -> impl Future<Output = Result<Option<Lobby>, StoreError>> + Send;
    /// open with one occupant other than `player_id` -> full
    fn try_fill_lobby(&self, id: Uuid, player_id: Uuid, match_id: Uuid)
        -> impl Future<Output = Result<bool, StoreError>> + Send;
    /// full under `match_id` -> open, freeing the second seat
    fn release_lobby(&self, id: Uuid, match_id: Uuid)
        -> impl Future<Output = Result<(), StoreError>> + Send;
    fn delete_lobby_for_match(&self, match_id: Uuid)
        -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Supabase error: {0}")]
    Supabase(#[from] SupabaseError),
}

/// Storage selected at startup
pub enum Backend {
    Supabase(SupabaseClient),
    Memory(MemoryStore),
}

macro_rules! delegate {
    ($self:ident, $method:ident($($arg:expr),*)) => {
        match $self {
            Backend::Supabase(s) => s.$method($($arg),*).await,
            Backend::Memory(s) => s.$method($($arg),*).await,
        }
    };
}

impl Store for Backend {
    async fn insert_match(&self, record: &MatchRecord) -> Result<(), StoreError> {
        delegate!(self, insert_match(record))
    }

    async fn update_match_progress(&self, progress: &MatchProgress) -> Result<(), StoreError> {
        delegate!(self, update_match_progress(progress))
    }

    async fn record_match_result(&self, result: &MatchResult) -> Result<(), StoreError> {
        delegate!(self, record_match_result(result))
    }

    async fn get_match(&self, id: Uuid) -> Result<Option<MatchRecord>, StoreError> {
        delegate!(self, get_match(id))
    }

    async fn insert_tournament(&self, tournament: &Tournament) -> Result<(), StoreError> {
        delegate!(self, insert_tournament(tournament))
    }

    async fn get_tournament(&self, id: Uuid) -> Result<Option<Tournament>, StoreError> {
        delegate!(self, get_tournament(id))
    }

    async fn list_tournaments(&self) -> Result<Vec<Tournament>, StoreError> {
        delegate!(self, list_tournaments())
    }

    async fn try_begin_tournament(&self, id: Uuid) -> Result<bool, StoreError> {
        delegate!(self, try_begin_tournament(id))
    }

    async fn try_reopen_tournament(&self, id: Uuid) -> Result<bool, StoreError> {
        delegate!(self, try_reopen_tournament(id))
    }

    async fn complete_tournament(&self, id: Uuid, champion_id: Uuid) -> Result<(), StoreError> {
        delegate!(self, complete_tournament(id, champion_id))
    }

    async fn upsert_bracket_nodes(&self, nodes: &[BracketNode]) -> Result<(), StoreError> {
        delegate!(self, upsert_bracket_nodes(nodes))
    }

    async fn list_bracket_nodes(&self, tournament_id: Uuid) -> Result<Vec<BracketNode>, StoreError> {
        delegate!(self, list_bracket_nodes(tournament_id))
    }

    async fn get_bracket_node(&self, id: Uuid) -> Result<Option<BracketNode>, StoreError> {
        delegate!(self, get_bracket_node(id))
    }

    async fn find_bracket_node_by_match(
        &self,
        match_id: Uuid,
    ) -> Result<Option<BracketNode>, StoreError> {
        delegate!(self, find_bracket_node_by_match(match_id))
    }

    async fn try_finish_bracket_node(&self, id: Uuid, winner: Slot) -> Result<bool, StoreError> {
        delegate!(self, try_finish_bracket_node(id, winner))
    }

    async fn try_fill_bracket_slot(
        &self,
        id: Uuid,
        slot: Slot,
        participant: Uuid,
    ) -> Result<bool, StoreError> {
        delegate!(self, try_fill_bracket_slot(id, slot, participant))
    }

    async fn try_schedule_bracket_node(&self, id: Uuid, match_id: Uuid) -> Result<bool, StoreError> {
        delegate!(self, try_schedule_bracket_node(id, match_id))
    }

    async fn release_bracket_node(&self, id: Uuid, match_id: Uuid) -> Result<(), StoreError> {
        delegate!(self, release_bracket_node(id, match_id))
    }

    async fn find_open_lobby(&self, player_id: Uuid) -> Result<Option<Lobby>, StoreError> {
        delegate!(self, find_open_lobby(player_id))
    }

    async fn find_waiting_lobby(&self, player_id: Uuid) -> Result<Option<Lobby>, StoreError> {
        delegate!(self, find_waiting_lobby(player_id))
    }

    async fn find_paired_lobby(&self, player_id: Uuid) -> Result<Option<Lobby>, StoreError> {
        delegate!(self, find_paired_lobby(player_id))
    }

    async fn insert_lobby(&self, lobby: &Lobby) -> Result<(), StoreError> {
        delegate!(self, insert_lobby(lobby))
    }

    async fn get_lobby(&self, id: Uuid) -> Result<Option<Lobby>, StoreError> {
        delegate!(self, get_lobby(id))
    }

    async fn try_fill_lobby(&self, id: Uuid, player_id: Uuid, match_id: Uuid) -> Result<bool, StoreError> {
        delegate!(self, try_fill_lobby(id, player_id, match_id))
    }

    async fn release_lobby(&self, id: Uuid, match_id: Uuid) -> Result<(), StoreError> {
        delegate!(self, release_lobby(id, match_id))
    }

    async fn delete_lobby_for_match(&self, match_id: Uuid) -> Result<(), StoreError> {
        delegate!(self, delete_lobby_for_match(match_id))
    }
}
