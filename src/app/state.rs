//! Application state shared across routes

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::Config;
use crate::game::{BoardSettings, GameServer, MatchLauncher};
use crate::matchmaking::MatchmakingLobby;
use crate::store::{Backend, MemoryStore, StoreWriter, SupabaseClient};
use crate::tournament::BracketEngine;
use crate::util::time::SystemClock;

use super::outcomes::OutcomeSettler;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Backend>,
    pub game_server: Arc<GameServer>,
    pub launcher: MatchLauncher<Backend>,
    pub brackets: Arc<BracketEngine<Backend>>,
    pub lobby: Arc<MatchmakingLobby<Backend>>,
}

impl AppState {
    /// Wire every service. The returned settler consumes finished games and
    /// must be run alongside the game scheduler.
    pub fn new(config: Config) -> (Self, OutcomeSettler<Backend>) {
        let config = Arc::new(config);

        let store = Arc::new(match &config.supabase {
            Some(supabase) => Backend::Supabase(SupabaseClient::new(supabase)),
            None => {
                warn!("Supabase is not configured, records live in memory only");
                Backend::Memory(MemoryStore::new())
            }
        });

        let settings = BoardSettings {
            total_rounds: config.total_rounds,
            reset_delay_ms: config.reset_delay_ms,
            ..BoardSettings::default()
        };

        let writer = StoreWriter::spawn(store.clone());
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let game_server = Arc::new(GameServer::new(
            settings,
            Arc::new(SystemClock),
            writer,
            outcome_tx,
        ));

        let launcher = MatchLauncher::new(store.clone(), game_server.clone());
        let brackets = Arc::new(BracketEngine::new(launcher.clone()));
        let lobby = Arc::new(MatchmakingLobby::new(launcher.clone()));

        let settler = OutcomeSettler::new(store.clone(), brackets.clone(), lobby.clone(), outcome_rx);

        let state = Self {
            config,
            store,
            game_server,
            launcher,
            brackets,
            lobby,
        };
        (state, settler)
    }
}
