//! Settling finished games: persist the result, then advance the bracket or
//! clear the lobby

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::game::MatchOutcome;
use crate::matchmaking::MatchmakingLobby;
use crate::store::Store;
use crate::tournament::BracketEngine;

pub struct OutcomeSettler<S> {
    store: Arc<S>,
    brackets: Arc<BracketEngine<S>>,
    lobby: Arc<MatchmakingLobby<S>>,
    outcomes: mpsc::UnboundedReceiver<MatchOutcome>,
}

impl<S: Store> OutcomeSettler<S> {
    pub fn new(
        store: Arc<S>,
        brackets: Arc<BracketEngine<S>>,
        lobby: Arc<MatchmakingLobby<S>>,
        outcomes: mpsc::UnboundedReceiver<MatchOutcome>,
    ) -> Self {
        Self {
            store,
            brackets,
            lobby,
            outcomes,
        }
    }

    /// Consume outcomes until the game server goes away
    pub async fn run(mut self) {
        info!("Outcome settler started");
        while let Some(outcome) = self.outcomes.recv().await {
            self.settle(outcome).await;
        }
        debug!("Outcome settler stopped");
    }

    async fn settle(&self, outcome: MatchOutcome) {
        let match_id = outcome.result.match_id;

        if let Err(e) = self.store.record_match_result(&outcome.result).await {
            error!(match_id = %match_id, error = %e, "Failed to persist match result");
        }

        match self
            .brackets
            .on_match_finished(match_id, outcome.result.winner_id)
            .await
        {
            Ok(Some(node)) => {
                debug!(match_id = %match_id, node_id = %node.id, "Bracket advanced");
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(match_id = %match_id, error = %e, "Failed to advance bracket");
                return;
            }
        }

        if let Err(e) = self.lobby.on_match_finished(match_id).await {
            warn!(match_id = %match_id, error = %e, "Failed to clear lobby");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::launch::memory_launcher;
    use crate::matchmaking::MatchmakeOutcome;
    use crate::store::{MatchResult, MatchStatus, MemoryStore, TournamentStatus};
    use uuid::Uuid;

    struct Fixture {
        store: Arc<MemoryStore>,
        brackets: Arc<BracketEngine<MemoryStore>>,
        lobby: Arc<MatchmakingLobby<MemoryStore>>,
        settler: OutcomeSettler<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let launcher = memory_launcher();
        let store = launcher.store().clone();
        let brackets = Arc::new(BracketEngine::new(launcher.clone()));
        let lobby = Arc::new(MatchmakingLobby::new(launcher));
        let (_, rx) = mpsc::unbounded_channel();
        let settler = OutcomeSettler::new(store.clone(), brackets.clone(), lobby.clone(), rx);
        Fixture {
            store,
            brackets,
            lobby,
            settler,
        }
    }

    fn win(match_id: Uuid, player1_id: Uuid, player2_id: Uuid) -> MatchOutcome {
        MatchOutcome {
            player1_id,
            player2_id,
            result: MatchResult {
                match_id,
                player1_score: 3,
                player2_score: 2,
                rounds_completed: 5,
                status: MatchStatus::Finished,
                winner_id: Some(player1_id),
                loser_id: Some(player2_id),
            },
        }
    }

    #[tokio::test]
    async fn lobby_game_is_recorded_and_its_lobby_cleared() {
        let f = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        f.lobby.matchmake(a).await.unwrap();
        let MatchmakeOutcome::Paired { match_id, .. } = f.lobby.matchmake(b).await.unwrap() else {
            panic!("expected a pairing");
        };

        f.settler.settle(win(match_id, a, b)).await;

        let record = f.store.get_match(match_id).await.unwrap().unwrap();
        assert_eq!(record.status, MatchStatus::Finished);
        assert_eq!(record.winner_id, Some(a));
        assert_eq!(record.loser_id, Some(b));
        assert_eq!(f.store.lobby_count(), 0);
    }

    #[tokio::test]
    async fn tournament_final_crowns_the_winner() {
        let f = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let t = f
            .brackets
            .create_tournament("final only".into(), vec![a, b])
            .await
            .unwrap();
        let bracket = f.brackets.start(t.id).await.unwrap();
        let node = &bracket.nodes[0];
        let (p1, p2) = (node.player1_id.unwrap(), node.player2_id.unwrap());

        f.settler.settle(win(node.match_id.unwrap(), p1, p2)).await;

        let tournament = f.brackets.bracket(t.id).await.unwrap().tournament;
        assert_eq!(tournament.status, TournamentStatus::Completed);
        assert_eq!(tournament.champion_id, Some(p1));
    }
}
