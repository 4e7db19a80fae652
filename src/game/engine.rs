//! Per-match simulation state and the authoritative tick

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::util::time::Clock;

use super::physics::{Ball, BoardSettings, Paddle};
use super::{Direction, Side};

/// Game phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting for both players to press up and down once
    NotStarted,
    /// Ball in play
    Active,
    /// Pause between rounds
    Resetting,
    /// Terminal
    Finished,
}

/// Player state in a game (authoritative)
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub id: Uuid,
    pub side: Side,
    pub score: u32,
    pub ready: bool,
    seen_up: bool,
    seen_down: bool,
}

impl PlayerState {
    fn new(id: Uuid, side: Side) -> Self {
        Self {
            id,
            side,
            score: 0,
            ready: false,
            seen_up: false,
            seen_down: false,
        }
    }

    fn observe(&mut self, direction: Direction) {
        match direction {
            Direction::Up => self.seen_up = true,
            Direction::Down => self.seen_down = true,
        }
        self.ready = self.seen_up && self.seen_down;
    }
}

/// FIFO of pending directions for one player
#[derive(Debug)]
struct InputQueue {
    player_id: Uuid,
    pending: Mutex<VecDeque<Direction>>,
}

impl InputQueue {
    fn new(player_id: Uuid) -> Self {
        Self {
            player_id,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Swap out everything queued so far. Inputs pushed after the swap wait
    /// for the next tick.
    fn take(&self) -> VecDeque<Direction> {
        std::mem::take(&mut *self.pending.lock())
    }

    fn clear(&self) {
        self.pending.lock().clear();
    }
}

/// Cloneable handle that queues input for a game without touching the
/// engine itself, so it never waits on a running tick.
#[derive(Debug, Clone)]
pub struct InputSink {
    game_id: Uuid,
    queues: Arc<[InputQueue; 2]>,
}

impl InputSink {
    fn new(game_id: Uuid, left: Uuid, right: Uuid) -> Self {
        Self {
            game_id,
            queues: Arc::new([InputQueue::new(left), InputQueue::new(right)]),
        }
    }

    /// Queue a direction for `player_id`. Input for a player outside this
    /// game is logged and dropped.
    pub fn accept_input(&self, player_id: Uuid, direction: Direction) -> bool {
        match self.queues.iter().find(|q| q.player_id == player_id) {
            Some(queue) => {
                queue.pending.lock().push_back(direction);
                true
            }
            None => {
                warn!(game_id = %self.game_id, player_id = %player_id, "Input from player outside game dropped");
                false
            }
        }
    }

    fn take(&self, side: Side) -> VecDeque<Direction> {
        self.queues[side.index()].take()
    }

    fn clear(&self) {
        for queue in self.queues.iter() {
            queue.clear();
        }
    }
}

/// One match's simulation
pub struct GameEngine {
    id: Uuid,
    settings: BoardSettings,
    clock: Arc<dyn Clock>,
    phase: Phase,
    players: [PlayerState; 2],
    paddles: [Paddle; 2],
    ball: Ball,
    rounds_completed: u32,
    winner: Option<Side>,
    reset_deadline: Option<u64>,
    inputs: InputSink,
}

impl GameEngine {
    /// Create a game between `left` and `right`. The first serve heads right.
    pub fn new(
        id: Uuid,
        left: Uuid,
        right: Uuid,
        settings: BoardSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id,
            settings,
            clock,
            phase: Phase::NotStarted,
            players: [
                PlayerState::new(left, Side::Left),
                PlayerState::new(right, Side::Right),
            ],
            paddles: [
                Paddle::centered(Side::Left, &settings),
                Paddle::centered(Side::Right, &settings),
            ],
            ball: Ball::serve(1, &settings),
            rounds_completed: 0,
            winner: None,
            reset_deadline: None,
            inputs: InputSink::new(id, left, right),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn settings(&self) -> &BoardSettings {
        &self.settings
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn players(&self) -> &[PlayerState; 2] {
        &self.players
    }

    pub fn player(&self, side: Side) -> &PlayerState {
        &self.players[side.index()]
    }

    pub fn has_player(&self, player_id: Uuid) -> bool {
        self.players.iter().any(|p| p.id == player_id)
    }

    pub fn paddle(&self, side: Side) -> &Paddle {
        &self.paddles[side.index()]
    }

    pub fn ball(&self) -> &Ball {
        &self.ball
    }

    pub fn rounds_completed(&self) -> u32 {
        self.rounds_completed
    }

    pub fn winner(&self) -> Option<&PlayerState> {
        self.winner.map(|side| self.player(side))
    }

    /// Milliseconds until play resumes, while resetting
    pub fn reset_remaining_millis(&self) -> Option<u64> {
        match (self.phase, self.reset_deadline) {
            (Phase::Resetting, Some(deadline)) => {
                Some(deadline.saturating_sub(self.clock.now_millis()))
            }
            _ => None,
        }
    }

    pub fn input_sink(&self) -> InputSink {
        self.inputs.clone()
    }

    pub fn accept_input(&self, player_id: Uuid, direction: Direction) -> bool {
        self.inputs.accept_input(player_id, direction)
    }

    /// Advance the game by one tick. Returns the phase after the tick.
    pub fn tick(&mut self) -> Phase {
        match self.phase {
            Phase::NotStarted => self.tick_not_started(),
            Phase::Active => self.tick_active(),
            Phase::Resetting => self.tick_resetting(),
            Phase::Finished => {}
        }
        self.phase
    }

    fn tick_not_started(&mut self) {
        for side in [Side::Left, Side::Right] {
            let queued = self.inputs.take(side);
            let player = &mut self.players[side.index()];
            for direction in queued {
                player.observe(direction);
            }
        }

        if self.players.iter().all(|p| p.ready) {
            self.inputs.clear();
            self.phase = Phase::Active;
            info!(game_id = %self.id, "Both players ready, game started");
        }
    }

    fn tick_active(&mut self) {
        for side in [Side::Left, Side::Right] {
            let paddle = &mut self.paddles[side.index()];
            for direction in self.inputs.take(side) {
                paddle.try_move(direction, &self.settings);
            }
        }

        if let Some(side) = self.ball.heading() {
            let paddle = self.paddles[side.index()];
            if self.ball.touches_paddle(&paddle, side, &self.settings) {
                self.ball.bounce_off_paddle(&paddle, side, &self.settings);
            }
        }
        self.ball.bounce_off_walls(&self.settings);

        match self.ball.scoring_side(&self.settings) {
            Some(scorer) => self.end_round(scorer),
            None => self.ball.integrate(),
        }
    }

    fn tick_resetting(&mut self) {
        self.inputs.clear();
        let deadline = self.reset_deadline.unwrap_or(0);
        if self.clock.now_millis() >= deadline {
            self.reset_deadline = None;
            self.phase = Phase::Active;
            debug!(game_id = %self.id, round = self.rounds_completed + 1, "Round resumed");
        }
    }

    fn end_round(&mut self, scorer: Side) {
        self.players[scorer.index()].score += 1;
        self.rounds_completed += 1;

        info!(
            game_id = %self.id,
            scorer = ?scorer,
            round = self.rounds_completed,
            left = self.players[0].score,
            right = self.players[1].score,
            "Round ended"
        );

        if self.rounds_completed >= self.settings.total_rounds {
            let (left, right) = (self.players[0].score, self.players[1].score);
            self.winner = match left.cmp(&right) {
                std::cmp::Ordering::Greater => Some(Side::Left),
                std::cmp::Ordering::Less => Some(Side::Right),
                std::cmp::Ordering::Equal => None,
            };
            self.phase = Phase::Finished;
            info!(game_id = %self.id, winner = ?self.winner().map(|p| p.id), "Game finished");
            return;
        }

        self.paddles = [
            Paddle::centered(Side::Left, &self.settings),
            Paddle::centered(Side::Right, &self.settings),
        ];
        let next_direction = if self.ball.start_direction >= 0 { -1 } else { 1 };
        self.ball = Ball::serve(next_direction, &self.settings);
        self.reset_deadline = Some(
            self.clock
                .now_millis()
                .saturating_add(self.settings.reset_delay_ms),
        );
        self.phase = Phase::Resetting;
    }
}
