//! Registry of live games and the scheduler that drives them

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::{MatchResult, StoreWriter, WriteJob};
use crate::util::time::{broadcast_period, persist_period, simulation_period, Clock};
use crate::ws::protocol::{GameStateView, ServerMsg, SettingsPayload};

use super::engine::{GameEngine, InputSink, Phase};
use super::physics::BoardSettings;
use super::{Direction, Side};

/// Terminal result of a game, handed to whoever settles brackets and lobbies
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub player1_id: Uuid,
    pub player2_id: Uuid,
    pub result: MatchResult,
}

/// A registered game
struct LiveGame {
    engine: Mutex<GameEngine>,
    inputs: InputSink,
    players: [Uuid; 2],
    state_tx: broadcast::Sender<ServerMsg>,
}

/// Connection -> game binding
struct Binding {
    game_id: Uuid,
    player_id: Uuid,
    inputs: InputSink,
}

/// What a connection receives on a successful bind
pub struct Subscription {
    pub settings: SettingsPayload,
    pub states: broadcast::Receiver<ServerMsg>,
}

/// Listing entry for a live game
#[derive(Debug, Clone, Serialize)]
pub struct GameSummary {
    pub game_id: Uuid,
    pub player1_id: Uuid,
    pub player2_id: Uuid,
    pub phase: Phase,
    pub player1_score: u32,
    pub player2_score: u32,
    pub rounds_completed: u32,
}

/// GameServer errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameServerError {
    #[error("A player cannot play against themselves")]
    SelfPlay,

    #[error("Game {0} already exists")]
    AlreadyExists(Uuid),

    #[error("Game {0} not found")]
    UnknownGame(Uuid),

    #[error("Player {player_id} is not in game {game_id}")]
    NotAParticipant { game_id: Uuid, player_id: Uuid },

    #[error("Connection is not bound to a game")]
    NotBound,
}

impl GameServerError {
    /// Stable code for the wire
    pub fn code(&self) -> &'static str {
        match self {
            GameServerError::SelfPlay => "self_play",
            GameServerError::AlreadyExists(_) => "game_exists",
            GameServerError::UnknownGame(_) => "unknown_game",
            GameServerError::NotAParticipant { .. } => "not_a_participant",
            GameServerError::NotBound => "not_bound",
        }
    }
}

/// Owns every live engine and the connection bindings
pub struct GameServer {
    settings: BoardSettings,
    clock: Arc<dyn Clock>,
    games: DashMap<Uuid, Arc<LiveGame>>,
    bindings: DashMap<Uuid, Binding>,
    writer: StoreWriter,
    outcomes: mpsc::UnboundedSender<MatchOutcome>,
}

impl GameServer {
    pub fn new(
        settings: BoardSettings,
        clock: Arc<dyn Clock>,
        writer: StoreWriter,
        outcomes: mpsc::UnboundedSender<MatchOutcome>,
    ) -> Self {
        Self {
            settings,
            clock,
            games: DashMap::new(),
            bindings: DashMap::new(),
            writer,
            outcomes,
        }
    }

    pub fn settings(&self) -> &BoardSettings {
        &self.settings
    }

    /// Register a new game. `player1` defends the left side.
    pub fn create_game(&self, id: Uuid, player1: Uuid, player2: Uuid) -> Result<(), GameServerError> {
        if player1 == player2 {
            return Err(GameServerError::SelfPlay);
        }

        match self.games.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(GameServerError::AlreadyExists(id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let engine = GameEngine::new(id, player1, player2, self.settings, self.clock.clone());
                let (state_tx, _) = broadcast::channel(16);
                slot.insert(Arc::new(LiveGame {
                    inputs: engine.input_sink(),
                    engine: Mutex::new(engine),
                    players: [player1, player2],
                    state_tx,
                }));
                info!(game_id = %id, player1 = %player1, player2 = %player2, "Game created");
                Ok(())
            }
        }
    }

    /// Bind a connection to a game on behalf of an authenticated player
    pub fn bind_connection(
        &self,
        connection_id: Uuid,
        player_id: Uuid,
        game_id: Uuid,
    ) -> Result<Subscription, GameServerError> {
        let game = self
            .games
            .get(&game_id)
            .map(|g| g.value().clone())
            .ok_or(GameServerError::UnknownGame(game_id))?;

        if !game.players.contains(&player_id) {
            return Err(GameServerError::NotAParticipant { game_id, player_id });
        }

        self.bindings.insert(
            connection_id,
            Binding {
                game_id,
                player_id,
                inputs: game.inputs.clone(),
            },
        );
        debug!(connection_id = %connection_id, game_id = %game_id, player_id = %player_id, "Connection bound");

        Ok(Subscription {
            settings: self.settings.client_settings(),
            states: game.state_tx.subscribe(),
        })
    }

    pub fn unbind_connection(&self, connection_id: Uuid) {
        self.bindings.remove(&connection_id);
    }

    /// Queue input for the player bound to `connection_id`
    pub fn route_input(&self, connection_id: Uuid, direction: Direction) -> Result<(), GameServerError> {
        let binding = self
            .bindings
            .get(&connection_id)
            .ok_or(GameServerError::NotBound)?;
        binding.inputs.accept_input(binding.player_id, direction);
        Ok(())
    }

    /// Advance every engine one tick, retiring those that finish
    pub fn tick_all(&self) {
        let mut finished = Vec::new();
        for entry in self.games.iter() {
            if entry.value().engine.lock().tick() == Phase::Finished {
                finished.push(*entry.key());
            }
        }

        for game_id in finished {
            self.retire(game_id);
        }
    }

    /// Push the public state of every watched game
    pub fn broadcast_all(&self) {
        for entry in self.games.iter() {
            let game = entry.value();
            if game.state_tx.receiver_count() == 0 {
                continue;
            }
            let view = game.engine.lock().public_state();
            // a send only fails when every receiver has gone away
            let _ = game.state_tx.send(ServerMsg::State(view));
        }
    }

    /// Queue a progress snapshot of every game
    pub fn persist_all(&self) {
        for entry in self.games.iter() {
            let progress = entry.value().engine.lock().progress();
            self.writer.submit(WriteJob::Progress(progress));
        }
    }

    fn retire(&self, game_id: Uuid) {
        let Some((_, game)) = self.games.remove(&game_id) else {
            return;
        };

        let engine = game.engine.lock();
        let _ = game.state_tx.send(ServerMsg::State(engine.public_state()));

        if let Some(result) = engine.result() {
            let outcome = MatchOutcome {
                player1_id: engine.player(Side::Left).id,
                player2_id: engine.player(Side::Right).id,
                result,
            };
            if self.outcomes.send(outcome).is_err() {
                warn!(game_id = %game_id, "Outcome receiver is gone, result not settled");
            }
        }
        drop(engine);

        self.bindings.retain(|_, b| b.game_id != game_id);
        info!(game_id = %game_id, "Game removed from registry");
    }

    /// Run the three scheduler timers until the task is dropped
    pub async fn run(self: Arc<Self>) {
        let mut simulation = interval(simulation_period());
        let mut broadcast = interval(broadcast_period());
        let mut persist = interval(persist_period());
        for timer in [&mut simulation, &mut broadcast, &mut persist] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }

        info!("Game scheduler started");

        loop {
            tokio::select! {
                _ = simulation.tick() => self.tick_all(),
                _ = broadcast.tick() => self.broadcast_all(),
                _ = persist.tick() => self.persist_all(),
            }
        }
    }

    pub fn game_state(&self, game_id: Uuid) -> Option<GameStateView> {
        self.games
            .get(&game_id)
            .map(|g| g.value().engine.lock().public_state())
    }

    pub fn list_games(&self) -> Vec<GameSummary> {
        self.games
            .iter()
            .map(|entry| {
                let engine = entry.value().engine.lock();
                GameSummary {
                    game_id: engine.id(),
                    player1_id: engine.player(Side::Left).id,
                    player2_id: engine.player(Side::Right).id,
                    phase: engine.phase(),
                    player1_score: engine.player(Side::Left).score,
                    player2_score: engine.player(Side::Right).score,
                    rounds_completed: engine.rounds_completed(),
                }
            })
            .collect()
    }

    pub fn is_live(&self, game_id: Uuid) -> bool {
        self.games.contains_key(&game_id)
    }

    pub fn active_games(&self) -> usize {
        self.games.len()
    }

    pub fn bound_connections(&self) -> usize {
        self.bindings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MatchStatus;
    use crate::util::time::ManualClock;

    struct Harness {
        server: GameServer,
        writes: mpsc::UnboundedReceiver<WriteJob>,
        outcomes: mpsc::UnboundedReceiver<MatchOutcome>,
    }

    fn harness(settings: BoardSettings) -> Harness {
        let (writer, writes) = StoreWriter::channel();
        let (outcome_tx, outcomes) = mpsc::unbounded_channel();
        let server = GameServer::new(settings, Arc::new(ManualClock::new(0)), writer, outcome_tx);
        Harness {
            server,
            writes,
            outcomes,
        }
    }

    fn press_both(server: &GameServer, conn: Uuid) {
        server.route_input(conn, Direction::Up).unwrap();
        server.route_input(conn, Direction::Down).unwrap();
    }

    #[test]
    fn create_game_rejects_self_play_and_duplicates() {
        let h = harness(BoardSettings::default());
        let (id, a, b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(h.server.create_game(id, a, a), Err(GameServerError::SelfPlay));
        assert_eq!(h.server.create_game(id, a, b), Ok(()));
        assert_eq!(
            h.server.create_game(id, b, a),
            Err(GameServerError::AlreadyExists(id))
        );
        assert_eq!(h.server.active_games(), 1);
    }

    #[test]
    fn bind_requires_known_game_and_participant() {
        let h = harness(BoardSettings::default());
        let (id, a, b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        h.server.create_game(id, a, b).unwrap();

        let stranger = Uuid::new_v4();
        assert!(matches!(
            h.server.bind_connection(Uuid::new_v4(), a, Uuid::new_v4()),
            Err(GameServerError::UnknownGame(_))
        ));
        assert!(matches!(
            h.server.bind_connection(Uuid::new_v4(), stranger, id),
            Err(GameServerError::NotAParticipant { .. })
        ));

        let sub = h.server.bind_connection(Uuid::new_v4(), a, id).unwrap();
        assert_eq!(sub.settings, BoardSettings::default().client_settings());
        assert_eq!(h.server.bound_connections(), 1);
    }

    #[test]
    fn input_on_unbound_connection_is_rejected_without_side_effects() {
        let h = harness(BoardSettings::default());
        let (id, a, b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        h.server.create_game(id, a, b).unwrap();

        assert_eq!(
            h.server.route_input(Uuid::new_v4(), Direction::Up),
            Err(GameServerError::NotBound)
        );
        h.server.tick_all();
        let state = h.server.game_state(id).unwrap();
        assert_eq!(state.phase, Phase::NotStarted);
        assert!(state.players.iter().all(|p| !p.ready));
    }

    #[test]
    fn routed_input_starts_the_game() {
        let h = harness(BoardSettings::default());
        let (id, a, b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        h.server.create_game(id, a, b).unwrap();
        let (conn_a, conn_b) = (Uuid::new_v4(), Uuid::new_v4());
        let _sub_a = h.server.bind_connection(conn_a, a, id).unwrap();
        let _sub_b = h.server.bind_connection(conn_b, b, id).unwrap();

        press_both(&h.server, conn_a);
        press_both(&h.server, conn_b);
        h.server.tick_all();

        assert_eq!(h.server.game_state(id).unwrap().phase, Phase::Active);
    }

    #[test]
    fn finished_game_is_reported_and_deregistered() {
        let mut h = harness(BoardSettings {
            total_rounds: 1,
            ..BoardSettings::default()
        });
        let (id, a, b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        h.server.create_game(id, a, b).unwrap();
        let (conn_a, conn_b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut watcher = h.server.bind_connection(conn_a, a, id).unwrap();
        h.server.bind_connection(conn_b, b, id).unwrap();

        press_both(&h.server, conn_a);
        press_both(&h.server, conn_b);
        h.server.tick_all();

        // right paddle steps out of the serve's path
        for _ in 0..20 {
            h.server.route_input(conn_b, Direction::Up).unwrap();
        }
        for _ in 0..1_000 {
            h.server.tick_all();
            if h.server.active_games() == 0 {
                break;
            }
        }

        assert_eq!(h.server.active_games(), 0);
        assert_eq!(h.server.bound_connections(), 0);
        assert_eq!(
            h.server.route_input(conn_a, Direction::Up),
            Err(GameServerError::NotBound)
        );

        let outcome = h.outcomes.try_recv().unwrap();
        assert_eq!(outcome.player1_id, a);
        assert_eq!(outcome.result.winner_id, Some(a));
        assert_eq!(outcome.result.loser_id, Some(b));
        assert_eq!(outcome.result.status, MatchStatus::Finished);

        match watcher.states.try_recv().unwrap() {
            ServerMsg::State(view) => assert_eq!(view.phase, Phase::Finished),
            other => panic!("Expected final state, got {:?}", other),
        }
    }

    #[test]
    fn broadcast_and_persist_cover_every_game() {
        let mut h = harness(BoardSettings::default());
        let (id, a, b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        h.server.create_game(id, a, b).unwrap();
        h.server.create_game(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()).unwrap();
        let mut sub = h.server.bind_connection(Uuid::new_v4(), b, id).unwrap();

        h.server.broadcast_all();
        assert!(matches!(sub.states.try_recv(), Ok(ServerMsg::State(view)) if view.game_id == id));

        h.server.persist_all();
        let mut persisted = 0;
        while let Ok(WriteJob::Progress(progress)) = h.writes.try_recv() {
            assert_eq!(progress.status, MatchStatus::Pending);
            persisted += 1;
        }
        assert_eq!(persisted, 2);
    }
}
