//! In-process store, used when no Supabase project is configured

use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use super::records::{
    BracketNode, Lobby, LobbyStatus, MatchProgress, MatchRecord, MatchResult, MatchStatus,
    NodeStatus, Slot, Tournament, TournamentStatus,
};
use super::{Store, StoreError};

#[derive(Default)]
struct Tables {
    matches: HashMap<Uuid, MatchRecord>,
    tournaments: HashMap<Uuid, Tournament>,
    nodes: HashMap<Uuid, BracketNode>,
    lobbies: HashMap<Uuid, Lobby>,
}

/// Every conditional write runs under one lock, which gives the same
/// compare-and-set semantics as the filtered updates of the remote store.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    /// Operations that fail once on their next call
    #[cfg(test)]
    failing: Mutex<Vec<&'static str>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lobby_count(&self) -> usize {
        self.tables.lock().lobbies.len()
    }

    pub fn open_lobbies(&self) -> Vec<Lobby> {
        self.tables
            .lock()
            .lobbies
            .values()
            .filter(|l| l.status == LobbyStatus::Open)
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn fail_next(&self, operation: &'static str) {
        self.failing.lock().push(operation);
    }

    #[cfg(test)]
    fn check_failure(&self, operation: &'static str) -> Result<(), StoreError> {
        let mut failing = self.failing.lock();
        match failing.iter().position(|op| *op == operation) {
            Some(i) => {
                failing.swap_remove(i);
                Err(StoreError::Supabase(super::SupabaseError::Api {
                    status: 503,
                    body: format!("{} unavailable", operation),
                }))
            }
            None => Ok(()),
        }
    }

    #[cfg(not(test))]
    fn check_failure(&self, _operation: &'static str) -> Result<(), StoreError> {
        Ok(())
    }
}

impl Store for MemoryStore {
    async fn insert_match(&self, record: &MatchRecord) -> Result<(), StoreError> {
        self.check_failure("insert_match")?;
        let mut tables = self.tables.lock();
        if tables.matches.contains_key(&record.id) {
            return Err(StoreError::Conflict(format!("match {} exists", record.id)));
        }
        tables.matches.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_match_progress(&self, progress: &MatchProgress) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let Some(record) = tables.matches.get_mut(&progress.match_id) else {
            return Ok(());
        };
        // a late snapshot never reopens a settled match
        if record.status != MatchStatus::Finished {
            record.player1_score = progress.player1_score;
            record.player2_score = progress.player2_score;
            record.rounds_completed = progress.rounds_completed;
            record.status = progress.status;
        }
        Ok(())
    }

    async fn record_match_result(&self, result: &MatchResult) -> Result<(), StoreError> {
        if let Some(record) = self.tables.lock().matches.get_mut(&result.match_id) {
            record.player1_score = result.player1_score;
            record.player2_score = result.player2_score;
            record.rounds_completed = result.rounds_completed;
            record.status = result.status;
            record.winner_id = result.winner_id;
            record.loser_id = result.loser_id;
        }
        Ok(())
    }

    async fn get_match(&self, id: Uuid) -> Result<Option<MatchRecord>, StoreError> {
        Ok(self.tables.lock().matches.get(&id).cloned())
    }

    async fn insert_tournament(&self, tournament: &Tournament) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        if tables.tournaments.contains_key(&tournament.id) {
            return Err(StoreError::Conflict(format!("tournament {} exists", tournament.id)));
        }
        tables.tournaments.insert(tournament.id, tournament.clone());
        Ok(())
    }

    async fn get_tournament(&self, id: Uuid) -> Result<Option<Tournament>, StoreError> {
        Ok(self.tables.lock().tournaments.get(&id).cloned())
    }

    async fn list_tournaments(&self) -> Result<Vec<Tournament>, StoreError> {
        let mut all: Vec<Tournament> = self.tables.lock().tournaments.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn try_begin_tournament(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        match tables.tournaments.get_mut(&id) {
            Some(t) if t.status == TournamentStatus::Open => {
                t.status = TournamentStatus::Started;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn try_reopen_tournament(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        match tables.tournaments.get_mut(&id) {
            Some(t) if t.status == TournamentStatus::Started => {
                t.status = TournamentStatus::Open;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_tournament(&self, id: Uuid, champion_id: Uuid) -> Result<(), StoreError> {
        if let Some(t) = self.tables.lock().tournaments.get_mut(&id) {
            if t.status == TournamentStatus::Started {
                t.status = TournamentStatus::Completed;
                t.champion_id = Some(champion_id);
            }
        }
        Ok(())
    }

    async fn upsert_bracket_nodes(&self, nodes: &[BracketNode]) -> Result<(), StoreError> {
        self.check_failure("upsert_bracket_nodes")?;
        let mut tables = self.tables.lock();
        for node in nodes {
            tables.nodes.insert(node.id, node.clone());
        }
        Ok(())
    }

    async fn list_bracket_nodes(&self, tournament_id: Uuid) -> Result<Vec<BracketNode>, StoreError> {
        let mut nodes: Vec<BracketNode> = self
            .tables
            .lock()
            .nodes
            .values()
            .filter(|n| n.tournament_id == tournament_id)
            .cloned()
            .collect();
        nodes.sort_by_key(|n| (n.round, n.position));
        Ok(nodes)
    }

    async fn get_bracket_node(&self, id: Uuid) -> Result<Option<BracketNode>, StoreError> {
        Ok(self.tables.lock().nodes.get(&id).cloned())
    }

    async fn find_bracket_node_by_match(
        &self,
        match_id: Uuid,
    ) -> Result<Option<BracketNode>, StoreError> {
        Ok(self
            .tables
            .lock()
            .nodes
            .values()
            .find(|n| n.match_id == Some(match_id))
            .cloned())
    }

    async fn try_finish_bracket_node(&self, id: Uuid, winner: Slot) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        match tables.nodes.get_mut(&id) {
            Some(node) if node.status == NodeStatus::Scheduled => {
                node.status = NodeStatus::Finished;
                node.winner_slot = Some(winner);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn try_fill_bracket_slot(
        &self,
        id: Uuid,
        slot: Slot,
        participant: Uuid,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        let Some(node) = tables.nodes.get_mut(&id) else {
            return Ok(false);
        };
        if node.status != NodeStatus::NotScheduled {
            return Ok(false);
        }
        let target = match slot {
            Slot::One => &mut node.player1_id,
            Slot::Two => &mut node.player2_id,
        };
        if target.is_some() {
            return Ok(false);
        }
        *target = Some(participant);
        Ok(true)
    }

    async fn try_schedule_bracket_node(&self, id: Uuid, match_id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        match tables.nodes.get_mut(&id) {
            Some(node) if node.status == NodeStatus::NotScheduled && node.is_filled() => {
                node.status = NodeStatus::Scheduled;
                node.match_id = Some(match_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_bracket_node(&self, id: Uuid, match_id: Uuid) -> Result<(), StoreError> {
        if let Some(node) = self.tables.lock().nodes.get_mut(&id) {
            if node.status == NodeStatus::Scheduled && node.match_id == Some(match_id) {
                node.status = NodeStatus::NotScheduled;
                node.match_id = None;
            }
        }
        Ok(())
    }

    async fn find_open_lobby(&self, player_id: Uuid) -> Result<Option<Lobby>, StoreError> {
        Ok(self
            .tables
            .lock()
            .lobbies
            .values()
            .filter(|l| {
                l.status == LobbyStatus::Open && l.player2_id.is_none() && l.player1_id != player_id
            })
            .min_by_key(|l| l.created_at)
            .cloned())
    }

    async fn find_waiting_lobby(&self, player_id: Uuid) -> Result<Option<Lobby>, StoreError> {
        Ok(self
            .tables
            .lock()
            .lobbies
            .values()
            .find(|l| l.status == LobbyStatus::Open && l.player1_id == player_id)
            .cloned())
    }

    async fn find_paired_lobby(&self, player_id: Uuid) -> Result<Option<Lobby>, StoreError> {
        Ok(self
            .tables
            .lock()
            .lobbies
            .values()
            .find(|l| l.status == LobbyStatus::Full && l.contains(player_id))
            .cloned())
    }

    async fn insert_lobby(&self, lobby: &Lobby) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let already_waiting = tables
            .lobbies
            .values()
            .any(|l| l.status == LobbyStatus::Open && l.player1_id == lobby.player1_id);
        if already_waiting || tables.lobbies.contains_key(&lobby.id) {
            return Err(StoreError::Conflict(format!(
                "player {} already waits in a lobby",
                lobby.player1_id
            )));
        }
        tables.lobbies.insert(lobby.id, lobby.clone());
        Ok(())
    }

    async fn get_lobby(&self, id: Uuid) -> Result<Option<Lobby>, StoreError> {
        Ok(self.tables.lock().lobbies.get(&id).cloned())
    }

    async fn try_fill_lobby(&self, id: Uuid, player_id: Uuid, match_id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        match tables.lobbies.get_mut(&id) {
            Some(lobby)
                if lobby.status == LobbyStatus::Open
                    && lobby.player2_id.is_none()
                    && lobby.player1_id != player_id =>
            {
                lobby.player2_id = Some(player_id);
                lobby.status = LobbyStatus::Full;
                lobby.match_id = Some(match_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lobby(&self, id: Uuid, match_id: Uuid) -> Result<(), StoreError> {
        if let Some(lobby) = self.tables.lock().lobbies.get_mut(&id) {
            if lobby.status == LobbyStatus::Full && lobby.match_id == Some(match_id) {
                lobby.status = LobbyStatus::Open;
                lobby.player2_id = None;
                lobby.match_id = None;
            }
        }
        Ok(())
    }

    async fn delete_lobby_for_match(&self, match_id: Uuid) -> Result<(), StoreError> {
        self.tables
            .lock()
            .lobbies
            .retain(|_, l| l.match_id != Some(match_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn begin_tournament_flips_once() {
        let store = MemoryStore::new();
        let tournament = Tournament::new("cup".into(), vec![Uuid::new_v4(), Uuid::new_v4()]);
        assert_ok!(store.insert_tournament(&tournament).await);

        assert!(store.try_begin_tournament(tournament.id).await.unwrap());
        assert!(!store.try_begin_tournament(tournament.id).await.unwrap());
    }

    #[tokio::test]
    async fn slot_fill_refuses_occupied_slot() {
        let store = MemoryStore::new();
        let node = BracketNode::placeholder(Uuid::new_v4(), 2, 0);
        assert_ok!(store.upsert_bracket_nodes(&[node.clone()]).await);

        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(store.try_fill_bracket_slot(node.id, Slot::One, a).await.unwrap());
        assert!(!store.try_fill_bracket_slot(node.id, Slot::One, b).await.unwrap());

        let stored = store.get_bracket_node(node.id).await.unwrap().unwrap();
        assert_eq!(stored.player1_id, Some(a));
    }

    #[tokio::test]
    async fn late_progress_does_not_reopen_a_finished_match() {
        let store = MemoryStore::new();
        let record = MatchRecord::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), None);
        assert_ok!(store.insert_match(&record).await);

        let result = MatchResult {
            match_id: record.id,
            player1_score: 3,
            player2_score: 2,
            rounds_completed: 5,
            status: MatchStatus::Finished,
            winner_id: Some(record.player1_id),
            loser_id: Some(record.player2_id),
        };
        assert_ok!(store.record_match_result(&result).await);

        let stale = MatchProgress {
            match_id: record.id,
            player1_score: 2,
            player2_score: 2,
            rounds_completed: 4,
            status: MatchStatus::InProgress,
        };
        assert_ok!(store.update_match_progress(&stale).await);

        let stored = store.get_match(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MatchStatus::Finished);
        assert_eq!((stored.player1_score, stored.player2_score), (3, 2));
        assert_eq!(stored.winner_id, Some(record.player1_id));
    }

    #[tokio::test]
    async fn released_lobby_reopens_only_for_its_match() {
        let store = MemoryStore::new();
        let lobby = Lobby::open(Uuid::new_v4());
        assert_ok!(store.insert_lobby(&lobby).await);

        let (joiner, match_id) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(store.try_fill_lobby(lobby.id, joiner, match_id).await.unwrap());
        assert_eq!(store.find_paired_lobby(joiner).await.unwrap().map(|l| l.id), Some(lobby.id));

        assert_ok!(store.release_lobby(lobby.id, Uuid::new_v4()).await);
        assert_eq!(store.get_lobby(lobby.id).await.unwrap().unwrap().status, LobbyStatus::Full);

        assert_ok!(store.release_lobby(lobby.id, match_id).await);
        let stored = store.get_lobby(lobby.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LobbyStatus::Open);
        assert!(stored.player2_id.is_none());
        assert!(stored.match_id.is_none());
    }

    #[tokio::test]
    async fn second_open_lobby_for_same_player_conflicts() {
        let store = MemoryStore::new();
        let player = Uuid::new_v4();
        assert_ok!(store.insert_lobby(&Lobby::open(player)).await);
        assert_err!(store.insert_lobby(&Lobby::open(player)).await);
        assert_eq!(store.lobby_count(), 1);
    }
}
