//! Bracket construction and advancement
//!
//! Every state change goes through a conditional write in storage, so two
//! reporters racing on the same node settle on one outcome. Advancement is
//! additionally serialized per tournament inside the process.

use dashmap::DashMap;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::game::{LaunchError, MatchLauncher};
use crate::store::{BracketNode, NodeStatus, Slot, Store, StoreError, Tournament, TournamentStatus};

/// Bracket errors
#[derive(Debug, thiserror::Error)]
pub enum BracketError {
    #[error("Tournament {0} not found")]
    TournamentNotFound(Uuid),

    #[error("Bracket node {0} not found")]
    NodeNotFound(Uuid),

    #[error("Tournament name must not be empty")]
    EmptyName,

    #[error("Participant {0} is listed more than once")]
    DuplicateParticipant(Uuid),

    #[error("Field of {0} participants is not a power of two of at least 2")]
    InvalidFieldSize(usize),

    #[error("Node {0} is not scheduled")]
    NodeNotScheduled(Uuid),

    #[error("Node {node_id} has no contender in slot {slot:?}")]
    EmptySlot { node_id: Uuid, slot: Slot },

    #[error("Player {player_id} does not play in node {node_id}")]
    NotInNode { node_id: Uuid, player_id: Uuid },

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A tournament and its nodes, ordered by round then position
#[derive(Debug, Clone, Serialize)]
pub struct Bracket {
    pub tournament: Tournament,
    pub nodes: Vec<BracketNode>,
}

/// Lay out a full bracket for `participants`, shuffled with `rng`.
///
/// Round 1 nodes carry their pair; later rounds are empty placeholders. Node
/// `p` of round `r` feeds node `p / 2` of round `r + 1`, so each target has
/// two distinct feeders.
pub fn build_bracket<R: Rng>(
    tournament_id: Uuid,
    participants: &[Uuid],
    rng: &mut R,
) -> Result<Vec<BracketNode>, BracketError> {
    let size = participants.len();
    if size < 2 || !size.is_power_of_two() {
        return Err(BracketError::InvalidFieldSize(size));
    }

    let mut field = participants.to_vec();
    field.shuffle(rng);

    let rounds = size.trailing_zeros();
    let mut by_round: Vec<Vec<BracketNode>> = (1..=rounds)
        .map(|round| {
            let count = (size >> round) as u32;
            (0..count)
                .map(|position| BracketNode::placeholder(tournament_id, round, position))
                .collect()
        })
        .collect();

    for r in 0..by_round.len().saturating_sub(1) {
        let next_ids: Vec<Uuid> = by_round[r + 1].iter().map(|n| n.id).collect();
        for node in by_round[r].iter_mut() {
            node.next_match_id = Some(next_ids[node.position as usize / 2]);
        }
    }

    for (node, pair) in by_round[0].iter_mut().zip(field.chunks_exact(2)) {
        node.player1_id = Some(pair[0]);
        node.player2_id = Some(pair[1]);
    }

    Ok(by_round.into_iter().flatten().collect())
}

/// Runs tournaments against storage and the game server
pub struct BracketEngine<S> {
    launcher: MatchLauncher<S>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl<S: Store> BracketEngine<S> {
    pub fn new(launcher: MatchLauncher<S>) -> Self {
        Self {
            launcher,
            locks: DashMap::new(),
        }
    }

    fn store(&self) -> &S {
        self.launcher.store().as_ref()
    }

    fn lock_for(&self, tournament_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(tournament_id).or_default().clone()
    }

    pub async fn create_tournament(
        &self,
        name: String,
        participants: Vec<Uuid>,
    ) -> Result<Tournament, BracketError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(BracketError::EmptyName);
        }

        let mut seen = HashSet::new();
        if let Some(dup) = participants.iter().find(|p| !seen.insert(**p)) {
            return Err(BracketError::DuplicateParticipant(*dup));
        }

        let tournament = Tournament::new(name, participants);
        self.store().insert_tournament(&tournament).await?;
        info!(
            tournament_id = %tournament.id,
            participants = tournament.participants.len(),
            "Tournament created"
        );
        Ok(tournament)
    }

    pub async fn list_tournaments(&self) -> Result<Vec<Tournament>, BracketError> {
        Ok(self.store().list_tournaments().await?)
    }

    pub async fn bracket(&self, tournament_id: Uuid) -> Result<Bracket, BracketError> {
        let tournament = self
            .store()
            .get_tournament(tournament_id)
            .await?
            .ok_or(BracketError::TournamentNotFound(tournament_id))?;
        let nodes = self.store().list_bracket_nodes(tournament_id).await?;
        Ok(Bracket { tournament, nodes })
    }

    /// Build the bracket and launch round 1. Starting a tournament that has
    /// already started returns the existing bracket, after launching any
    /// filled node whose game never got going.
    pub async fn start(&self, tournament_id: Uuid) -> Result<Bracket, BracketError> {
        let lock = self.lock_for(tournament_id);
        let _guard = lock.lock().await;

        let tournament = self
            .store()
            .get_tournament(tournament_id)
            .await?
            .ok_or(BracketError::TournamentNotFound(tournament_id))?;

        match tournament.status {
            TournamentStatus::Open => {}
            TournamentStatus::Started => {
                debug!(tournament_id = %tournament_id, "Tournament already started");
                self.schedule_pending(tournament_id).await?;
                return self.bracket(tournament_id).await;
            }
            TournamentStatus::Completed => return self.bracket(tournament_id).await,
        }

        let seed = rand::random::<u64>();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let nodes = build_bracket(tournament_id, &tournament.participants, &mut rng)?;

        if !self.store().try_begin_tournament(tournament_id).await? {
            debug!(tournament_id = %tournament_id, "Lost start race to a peer");
            return self.bracket(tournament_id).await;
        }

        if let Err(e) = self.store().upsert_bracket_nodes(&nodes).await {
            error!(tournament_id = %tournament_id, error = %e, "Bracket write failed, reopening tournament");
            if let Err(undo) = self.store().try_reopen_tournament(tournament_id).await {
                error!(tournament_id = %tournament_id, error = %undo, "Failed to reopen tournament");
            }
            return Err(e.into());
        }
        info!(
            tournament_id = %tournament_id,
            nodes = nodes.len(),
            seed,
            "Bracket built"
        );

        for node in nodes.iter().filter(|n| n.round == 1) {
            self.schedule_if_ready(tournament_id, node.id).await?;
        }

        self.bracket(tournament_id).await
    }

    /// Settle a node in favour of `winner`. Reporting on a finished node
    /// returns it unchanged.
    pub async fn report_result(&self, node_id: Uuid, winner: Slot) -> Result<BracketNode, BracketError> {
        let node = self.fetch_node(node_id).await?;
        let lock = self.lock_for(node.tournament_id);
        let _guard = lock.lock().await;

        // re-read under the lock
        let node = self.fetch_node(node_id).await?;
        match node.status {
            NodeStatus::Finished => return Ok(node),
            NodeStatus::NotScheduled => return Err(BracketError::NodeNotScheduled(node_id)),
            NodeStatus::Scheduled => {}
        }

        let winner_id = node
            .occupant(winner)
            .ok_or(BracketError::EmptySlot { node_id, slot: winner })?;

        if !self.store().try_finish_bracket_node(node_id, winner).await? {
            debug!(node_id = %node_id, "Node settled by a peer");
            return self.fetch_node(node_id).await;
        }

        info!(
            tournament_id = %node.tournament_id,
            node_id = %node_id,
            round = node.round,
            winner = %winner_id,
            "Bracket node finished"
        );

        match node.next_match_id {
            Some(next_id) => self.advance(node.tournament_id, next_id, winner_id).await?,
            None => {
                self.store()
                    .complete_tournament(node.tournament_id, winner_id)
                    .await?;
                info!(tournament_id = %node.tournament_id, champion = %winner_id, "Tournament completed");
                self.locks.remove(&node.tournament_id);
            }
        }

        self.fetch_node(node_id).await
    }

    /// React to a finished game. Returns the settled node for tournament
    /// matches, None for everything else.
    pub async fn on_match_finished(
        &self,
        match_id: Uuid,
        winner_id: Option<Uuid>,
    ) -> Result<Option<BracketNode>, BracketError> {
        let Some(node) = self.store().find_bracket_node_by_match(match_id).await? else {
            return Ok(None);
        };

        let Some(winner_id) = winner_id else {
            warn!(
                node_id = %node.id,
                match_id = %match_id,
                "Tournament match ended level, node needs a manual result"
            );
            return Ok(None);
        };

        let slot = node.slot_of(winner_id).ok_or(BracketError::NotInNode {
            node_id: node.id,
            player_id: winner_id,
        })?;

        self.report_result(node.id, slot).await.map(Some)
    }

    async fn fetch_node(&self, node_id: Uuid) -> Result<BracketNode, BracketError> {
        self.store()
            .get_bracket_node(node_id)
            .await?
            .ok_or(BracketError::NodeNotFound(node_id))
    }

    /// Seat `winner_id` in the next node, player 1 first
    async fn advance(&self, tournament_id: Uuid, next_id: Uuid, winner_id: Uuid) -> Result<(), BracketError> {
        let next = self.fetch_node(next_id).await?;

        if next.slot_of(winner_id).is_none() {
            let mut seated = false;
            for slot in [Slot::One, Slot::Two] {
                if self.store().try_fill_bracket_slot(next_id, slot, winner_id).await? {
                    seated = true;
                    debug!(node_id = %next_id, slot = ?slot, player = %winner_id, "Winner advanced");
                    break;
                }
            }
            if !seated {
                warn!(node_id = %next_id, player = %winner_id, "No free slot to advance into");
                return Ok(());
            }
        }

        self.schedule_if_ready(tournament_id, next_id).await
    }

    /// Launch every filled node still waiting for its game
    async fn schedule_pending(&self, tournament_id: Uuid) -> Result<(), BracketError> {
        let pending: Vec<Uuid> = self
            .store()
            .list_bracket_nodes(tournament_id)
            .await?
            .into_iter()
            .filter(|n| n.status == NodeStatus::NotScheduled && n.is_filled())
            .map(|n| n.id)
            .collect();
        for node_id in pending {
            self.schedule_if_ready(tournament_id, node_id).await?;
        }
        Ok(())
    }

    /// Claim a match id on a filled node, then launch its game
    async fn schedule_if_ready(&self, tournament_id: Uuid, node_id: Uuid) -> Result<(), BracketError> {
        let node = self.fetch_node(node_id).await?;
        let (Some(player1), Some(player2)) = (node.player1_id, node.player2_id) else {
            return Ok(());
        };
        if node.status != NodeStatus::NotScheduled {
            return Ok(());
        }

        let match_id = Uuid::new_v4();
        if !self.store().try_schedule_bracket_node(node_id, match_id).await? {
            debug!(node_id = %node_id, "Node scheduled by a peer");
            return Ok(());
        }

        if let Err(e) = self
            .launcher
            .launch(match_id, player1, player2, Some(tournament_id))
            .await
        {
            error!(node_id = %node_id, match_id = %match_id, error = %e, "Bracket match launch failed, releasing node");
            if let Err(release) = self.store().release_bracket_node(node_id, match_id).await {
                error!(node_id = %node_id, error = %release, "Failed to release bracket node");
            }
            return Err(e.into());
        }
        info!(node_id = %node_id, match_id = %match_id, round = node.round, "Bracket match scheduled");
        Ok(())
    }
}
