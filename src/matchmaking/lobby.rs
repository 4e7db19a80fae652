//! Ad-hoc two-player pairing through lobby records

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::game::{LaunchError, MatchLauncher};
use crate::store::{Lobby, LobbyStatus, Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("Lobby {0} not found")]
    NotFound(Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a matchmaking request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchmakeOutcome {
    /// A game was created; connect and join it
    Paired { lobby_id: Uuid, match_id: Uuid },
    /// No opponent yet; poll the lobby
    Waiting { lobby_id: Uuid },
}

pub struct MatchmakingLobby<S> {
    launcher: MatchLauncher<S>,
    /// One matchmaking decision at a time in this process
    gate: Mutex<()>,
}

impl<S: Store> MatchmakingLobby<S> {
    pub fn new(launcher: MatchLauncher<S>) -> Self {
        Self {
            launcher,
            gate: Mutex::new(()),
        }
    }

    fn store(&self) -> &S {
        self.launcher.store().as_ref()
    }

    /// Pair `player_id` with a waiting player, or leave them waiting
    pub async fn matchmake(&self, player_id: Uuid) -> Result<MatchmakeOutcome, LobbyError> {
        let _guard = self.gate.lock().await;

        if let Some((lobby_id, match_id)) = self.live_pairing(player_id).await? {
            debug!(player_id = %player_id, match_id = %match_id, "Player already paired");
            return Ok(MatchmakeOutcome::Paired { lobby_id, match_id });
        }

        if let Some(waiting) = self.store().find_waiting_lobby(player_id).await? {
            debug!(player_id = %player_id, lobby_id = %waiting.id, "Player already waiting");
            return Ok(MatchmakeOutcome::Waiting { lobby_id: waiting.id });
        }

        if let Some(open) = self.store().find_open_lobby(player_id).await? {
            if let Some(match_id) = self.fill(&open, player_id).await? {
                return Ok(MatchmakeOutcome::Paired {
                    lobby_id: open.id,
                    match_id,
                });
            }
            debug!(lobby_id = %open.id, "Open lobby filled by a peer, opening a new one");
        }

        let lobby = Lobby::open(player_id);
        match self.store().insert_lobby(&lobby).await {
            Ok(()) => {
                info!(player_id = %player_id, lobby_id = %lobby.id, "Lobby opened");
                Ok(MatchmakeOutcome::Waiting { lobby_id: lobby.id })
            }
            // another instance opened one for this player first
            Err(StoreError::Conflict(reason)) => {
                match self.store().find_waiting_lobby(player_id).await? {
                    Some(existing) => Ok(MatchmakeOutcome::Waiting {
                        lobby_id: existing.id,
                    }),
                    None => Err(LobbyError::Conflict(reason)),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Take the free seat of a specific lobby
    pub async fn join(&self, lobby_id: Uuid, player_id: Uuid) -> Result<MatchmakeOutcome, LobbyError> {
        let _guard = self.gate.lock().await;

        let lobby = self.lobby(lobby_id).await?;
        if let Some((_, match_id)) = self.live_pairing(player_id).await? {
            return Err(LobbyError::Conflict(format!(
                "player {} is already playing match {}",
                player_id, match_id
            )));
        }
        if lobby.contains(player_id) {
            return Err(LobbyError::Conflict(format!(
                "player {} already in lobby {}",
                player_id, lobby_id
            )));
        }
        if lobby.status == LobbyStatus::Full {
            return Err(LobbyError::Conflict(format!("lobby {} is full", lobby_id)));
        }

        match self.fill(&lobby, player_id).await? {
            Some(match_id) => Ok(MatchmakeOutcome::Paired { lobby_id, match_id }),
            None => Err(LobbyError::Conflict(format!("lobby {} is full", lobby_id))),
        }
    }

    pub async fn lobby(&self, lobby_id: Uuid) -> Result<Lobby, LobbyError> {
        self.store()
            .get_lobby(lobby_id)
            .await?
            .ok_or(LobbyError::NotFound(lobby_id))
    }

    /// Drop the lobby behind a finished game
    pub async fn on_match_finished(&self, match_id: Uuid) -> Result<(), LobbyError> {
        self.store().delete_lobby_for_match(match_id).await?;
        debug!(match_id = %match_id, "Lobby cleared");
        Ok(())
    }

    /// Lobby and match of a game `player_id` is still playing
    async fn live_pairing(&self, player_id: Uuid) -> Result<Option<(Uuid, Uuid)>, LobbyError> {
        let Some(paired) = self.store().find_paired_lobby(player_id).await? else {
            return Ok(None);
        };
        Ok(paired
            .match_id
            .filter(|m| self.launcher.server().is_live(*m))
            .map(|m| (paired.id, m)))
    }

    /// Seat `player_id` and launch the game. None when the seat was taken.
    async fn fill(&self, lobby: &Lobby, player_id: Uuid) -> Result<Option<Uuid>, LobbyError> {
        let match_id = Uuid::new_v4();
        if !self
            .store()
            .try_fill_lobby(lobby.id, player_id, match_id)
            .await?
        {
            return Ok(None);
        }

        if let Err(e) = self
            .launcher
            .launch(match_id, lobby.player1_id, player_id, None)
            .await
        {
            error!(lobby_id = %lobby.id, match_id = %match_id, error = %e, "Lobby match launch failed, reopening lobby");
            if let Err(release) = self.store().release_lobby(lobby.id, match_id).await {
                error!(lobby_id = %lobby.id, error = %release, "Failed to reopen lobby");
            }
            return Err(e.into());
        }
        info!(
            lobby_id = %lobby.id,
            match_id = %match_id,
            player1 = %lobby.player1_id,
            player2 = %player_id,
            "Players paired"
        );
        Ok(Some(match_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::launch::memory_launcher;
    use crate::store::MemoryStore;
    use tokio_test::assert_err;

    fn lobby() -> MatchmakingLobby<MemoryStore> {
        MatchmakingLobby::new(memory_launcher())
    }

    fn match_of(outcome: &MatchmakeOutcome) -> Option<Uuid> {
        match outcome {
            MatchmakeOutcome::Paired { match_id, .. } => Some(*match_id),
            MatchmakeOutcome::Waiting { .. } => None,
        }
    }

    #[tokio::test]
    async fn second_player_is_paired_with_the_first() {
        let mm = lobby();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let MatchmakeOutcome::Waiting { lobby_id } = mm.matchmake(a).await.unwrap() else {
            panic!("expected the first player to wait");
        };

        let second = mm.matchmake(b).await.unwrap();
        let match_id = match_of(&second).unwrap();
        assert_eq!(second, MatchmakeOutcome::Paired { lobby_id, match_id });

        let stored = mm.lobby(lobby_id).await.unwrap();
        assert_eq!(stored.status, LobbyStatus::Full);
        assert_eq!(stored.player2_id, Some(b));

        let state = mm.launcher.server().game_state(match_id).unwrap();
        assert_eq!(state.players[0].id, a);
        assert_eq!(state.players[1].id, b);
    }

    #[tokio::test]
    async fn repeat_request_returns_the_same_lobby() {
        let mm = lobby();
        let a = Uuid::new_v4();

        let first = mm.matchmake(a).await.unwrap();
        let second = mm.matchmake(a).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(mm.store().lobby_count(), 1);
        assert_eq!(mm.launcher.server().active_games(), 0);
    }

    #[tokio::test]
    async fn concurrent_requests_pair_exactly_once() {
        let mm = lobby();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let (ra, rb) = tokio::join!(mm.matchmake(a), mm.matchmake(b));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        let paired: Vec<_> = [&ra, &rb].into_iter().filter_map(match_of).collect();
        assert_eq!(paired.len(), 1);
        assert_eq!(mm.launcher.server().active_games(), 1);
        assert!(mm.store().open_lobbies().is_empty());
    }

    #[tokio::test]
    async fn crowd_never_pairs_a_player_with_themselves() {
        let mm = lobby();
        let crowd: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();

        let results = futures::future::join_all(crowd.iter().map(|p| mm.matchmake(*p))).await;
        let matches: Vec<Uuid> = results
            .iter()
            .map(|r| r.as_ref().unwrap())
            .filter_map(match_of)
            .collect();
        assert_eq!(matches.len(), 3);

        for match_id in matches {
            let state = mm.launcher.server().game_state(match_id).unwrap();
            assert_ne!(state.players[0].id, state.players[1].id);
        }
    }

    #[tokio::test]
    async fn joining_own_or_full_lobby_conflicts() {
        let mm = lobby();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let MatchmakeOutcome::Waiting { lobby_id } = mm.matchmake(a).await.unwrap() else {
            panic!("expected to wait");
        };

        let own = assert_err!(mm.join(lobby_id, a).await);
        assert!(matches!(own, LobbyError::Conflict(_)));

        assert!(match_of(&mm.join(lobby_id, b).await.unwrap()).is_some());

        let again = assert_err!(mm.join(lobby_id, b).await);
        assert!(matches!(again, LobbyError::Conflict(_)));
        let full = assert_err!(mm.join(lobby_id, c).await);
        assert!(matches!(full, LobbyError::Conflict(_)));

        let missing = assert_err!(mm.join(Uuid::new_v4(), c).await);
        assert!(matches!(missing, LobbyError::NotFound(_)));
    }

    #[tokio::test]
    async fn paired_player_cannot_start_a_second_game() {
        let mm = lobby();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        mm.matchmake(a).await.unwrap();
        let paired = mm.matchmake(b).await.unwrap();
        let MatchmakeOutcome::Waiting { lobby_id: c_lobby } = mm.matchmake(c).await.unwrap() else {
            panic!("expected c to wait");
        };

        let err = assert_err!(mm.join(c_lobby, a).await);
        assert!(matches!(err, LobbyError::Conflict(_)));
        assert_eq!(mm.matchmake(a).await.unwrap(), paired);
        assert_eq!(mm.launcher.server().active_games(), 1);
        assert_eq!(mm.lobby(c_lobby).await.unwrap().status, LobbyStatus::Open);
    }

    #[tokio::test]
    async fn failed_launch_reopens_the_lobby() {
        let mm = lobby();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let MatchmakeOutcome::Waiting { lobby_id } = mm.matchmake(a).await.unwrap() else {
            panic!("expected to wait");
        };

        mm.store().fail_next("insert_match");
        assert_err!(mm.join(lobby_id, b).await);

        let stored = mm.lobby(lobby_id).await.unwrap();
        assert_eq!(stored.status, LobbyStatus::Open);
        assert!(stored.player2_id.is_none());
        assert_eq!(mm.launcher.server().active_games(), 0);

        assert!(match_of(&mm.join(lobby_id, b).await.unwrap()).is_some());
    }

    #[tokio::test]
    async fn finished_match_clears_its_lobby() {
        let mm = lobby();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        mm.matchmake(a).await.unwrap();
        let paired = mm.matchmake(b).await.unwrap();

        mm.on_match_finished(match_of(&paired).unwrap()).await.unwrap();
        assert_eq!(mm.store().lobby_count(), 0);
    }
}
