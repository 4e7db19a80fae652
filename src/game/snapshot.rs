//! Public projections of engine state: client snapshots, settings and
//! persisted progress

use crate::store::{MatchProgress, MatchResult, MatchStatus};
use crate::ws::protocol::{BallView, GameStateView, PaddleView, PlayerView, SettingsPayload};

use super::engine::GameEngine;
use super::physics::BoardSettings;
use super::Side;

impl BoardSettings {
    /// Subset of the metrics clients draw with
    pub fn client_settings(&self) -> SettingsPayload {
        SettingsPayload {
            board_width: self.board_width,
            board_height: self.board_height,
            paddle_height: self.paddle_height,
            paddle_width: self.paddle_width,
            paddle_to_wall_dist: self.paddle_to_wall_dist,
            ball_radius: self.ball_radius,
        }
    }
}

/// Countdown value shown between rounds; never 0 while the pause lasts
pub fn reset_countdown_seconds(remaining_millis: u64) -> u64 {
    remaining_millis.div_ceil(1000) + 1
}

impl GameEngine {
    /// Read-only projection sent to clients
    pub fn public_state(&self) -> GameStateView {
        let settings = self.settings();
        let ball = self.ball();

        GameStateView {
            game_id: self.id(),
            phase: self.phase(),
            ball: BallView {
                x: ball.x,
                y: ball.y,
                vx: ball.vx,
                vy: ball.vy,
                speed: ball.speed,
            },
            left_paddle: self.paddle_view(Side::Left),
            right_paddle: self.paddle_view(Side::Right),
            players: self
                .players()
                .iter()
                .map(|p| PlayerView {
                    id: p.id,
                    side: p.side,
                    score: p.score,
                    ready: p.ready,
                })
                .collect(),
            winner_id: self.winner().map(|p| p.id),
            rounds_completed: self.rounds_completed(),
            total_rounds: settings.total_rounds,
            reset_seconds: self.reset_remaining_millis().map(reset_countdown_seconds),
        }
    }

    fn paddle_view(&self, side: Side) -> PaddleView {
        let settings = self.settings();
        let paddle = self.paddle(side);
        PaddleView {
            x: paddle.anchor_x,
            y: paddle.offset,
            width: settings.paddle_width,
            height: settings.paddle_height,
        }
    }

    /// Score/phase snapshot for periodic persistence. Player 1 is LEFT.
    pub fn progress(&self) -> MatchProgress {
        MatchProgress {
            match_id: self.id(),
            player1_score: self.player(Side::Left).score,
            player2_score: self.player(Side::Right).score,
            rounds_completed: self.rounds_completed(),
            status: self.phase().into(),
        }
    }

    /// Terminal result, once finished
    pub fn result(&self) -> Option<MatchResult> {
        if self.phase() != super::Phase::Finished {
            return None;
        }
        let winner_id = self.winner().map(|p| p.id);
        let loser_id = winner_id.and_then(|w| self.players().iter().find(|p| p.id != w).map(|p| p.id));

        Some(MatchResult {
            match_id: self.id(),
            player1_score: self.player(Side::Left).score,
            player2_score: self.player(Side::Right).score,
            rounds_completed: self.rounds_completed(),
            status: MatchStatus::Finished,
            winner_id,
            loser_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Direction, Phase};
    use crate::util::time::ManualClock;
    use std::sync::Arc;
    use uuid::Uuid;

    #[test]
    fn countdown_never_reads_zero_while_resetting() {
        assert_eq!(reset_countdown_seconds(0), 1);
        assert_eq!(reset_countdown_seconds(1), 2);
        assert_eq!(reset_countdown_seconds(1_000), 2);
        assert_eq!(reset_countdown_seconds(2_500), 4);
    }

    #[test]
    fn fresh_game_projects_centred_board() {
        let settings = BoardSettings::default();
        let (left, right) = (Uuid::new_v4(), Uuid::new_v4());
        let engine = GameEngine::new(
            Uuid::new_v4(),
            left,
            right,
            settings,
            Arc::new(ManualClock::new(0)),
        );

        let view = engine.public_state();
        assert_eq!(view.phase, Phase::NotStarted);
        assert_eq!(view.ball.x, settings.board_width / 2.0);
        assert_eq!(view.left_paddle.x, settings.paddle_to_wall_dist);
        assert_eq!(view.players[0].id, left);
        assert_eq!(view.players[1].id, right);
        assert!(view.winner_id.is_none());
        assert!(view.reset_seconds.is_none());
        assert!(engine.result().is_none());
        assert_eq!(engine.progress().status, MatchStatus::Pending);
    }

    #[test]
    fn progress_tracks_phase() {
        let (left, right) = (Uuid::new_v4(), Uuid::new_v4());
        let mut engine = GameEngine::new(
            Uuid::new_v4(),
            left,
            right,
            BoardSettings::default(),
            Arc::new(ManualClock::new(0)),
        );
        for id in [left, right] {
            engine.accept_input(id, Direction::Up);
            engine.accept_input(id, Direction::Down);
        }
        engine.tick();
        assert_eq!(engine.progress().status, MatchStatus::InProgress);

        let json = serde_json::to_value(engine.public_state()).unwrap();
        assert_eq!(json["phase"], "active");
    }
}
