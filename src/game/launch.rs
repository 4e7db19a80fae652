//! Creating a match: persisted record first, then the live engine

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::store::{MatchRecord, Store, StoreError};

use super::server::{GameServer, GameServerError};

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(transparent)]
    Game(#[from] GameServerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Shared by the bracket engine, the lobby and the HTTP surface
pub struct MatchLauncher<S> {
    store: Arc<S>,
    server: Arc<GameServer>,
}

impl<S> Clone for MatchLauncher<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            server: self.server.clone(),
        }
    }
}

impl<S: Store> MatchLauncher<S> {
    pub fn new(store: Arc<S>, server: Arc<GameServer>) -> Self {
        Self { store, server }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn server(&self) -> &Arc<GameServer> {
        &self.server
    }

    /// Insert a pending match record under `match_id` and register its engine
    pub async fn launch(
        &self,
        match_id: Uuid,
        player1: Uuid,
        player2: Uuid,
        tournament_id: Option<Uuid>,
    ) -> Result<Uuid, LaunchError> {
        if player1 == player2 {
            return Err(GameServerError::SelfPlay.into());
        }

        let record = MatchRecord::new(match_id, player1, player2, tournament_id);
        self.store.insert_match(&record).await?;
        self.server.create_game(record.id, player1, player2)?;

        info!(
            match_id = %record.id,
            player1 = %player1,
            player2 = %player2,
            tournament_id = ?tournament_id,
            "Match launched"
        );
        Ok(record.id)
    }
}

/// Launcher over an in-memory store and a fresh game server
#[cfg(test)]
pub(crate) fn memory_launcher() -> MatchLauncher<crate::store::MemoryStore> {
    use crate::store::{MemoryStore, StoreWriter};
    use crate::util::time::ManualClock;

    let (writer, _) = StoreWriter::channel();
    let (outcomes, _) = tokio::sync::mpsc::unbounded_channel();
    let server = GameServer::new(
        super::BoardSettings::default(),
        Arc::new(ManualClock::new(0)),
        writer,
        outcomes,
    );
    MatchLauncher::new(Arc::new(MemoryStore::new()), Arc::new(server))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MatchStatus;
    use tokio_test::assert_err;

    #[tokio::test]
    async fn launch_persists_record_and_registers_engine() {
        let launcher = memory_launcher();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let match_id = launcher.launch(Uuid::new_v4(), a, b, None).await.unwrap();

        let record = launcher.store().get_match(match_id).await.unwrap().unwrap();
        assert_eq!(record.player1_id, a);
        assert_eq!(record.status, MatchStatus::Pending);
        assert!(launcher.server().game_state(match_id).is_some());
    }

    #[tokio::test]
    async fn self_play_creates_nothing() {
        let launcher = memory_launcher();
        let a = Uuid::new_v4();

        let err = assert_err!(launcher.launch(Uuid::new_v4(), a, a, None).await);
        assert!(matches!(err, LaunchError::Game(GameServerError::SelfPlay)));
        assert_eq!(launcher.server().active_games(), 0);
    }
}
