//! Board metrics, paddle and ball physics

use serde::{Deserialize, Serialize};

use super::{Direction, Side};

/// Board metrics fixed at engine construction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoardSettings {
    pub board_width: f32,
    pub board_height: f32,
    pub paddle_width: f32,
    pub paddle_height: f32,
    /// Gap between a wall and the outer edge of its paddle
    pub paddle_to_wall_dist: f32,
    pub ball_radius: f32,
    /// Ball speed in pixels per tick at every serve
    pub default_ball_speed: f32,
    /// Paddle movement per queued input, in pixels
    pub paddle_step: f32,
    /// Bounce angle at the very tip of a paddle, in radians
    pub max_bounce_angle: f32,
    pub total_rounds: u32,
    /// Pause between rounds
    pub reset_delay_ms: u64,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            board_width: 800.0,
            board_height: 600.0,
            paddle_width: 10.0,
            paddle_height: 100.0,
            paddle_to_wall_dist: 20.0,
            ball_radius: 10.0,
            default_ball_speed: 5.0,
            paddle_step: 5.0,
            max_bounce_angle: std::f32::consts::FRAC_PI_4,
            total_rounds: 5,
            reset_delay_ms: 3_000,
        }
    }
}

impl BoardSettings {
    /// Anchor (left edge x) of the paddle guarding `side`
    pub fn paddle_anchor(&self, side: Side) -> f32 {
        match side {
            Side::Left => self.paddle_to_wall_dist,
            Side::Right => self.board_width - self.paddle_to_wall_dist - self.paddle_width,
        }
    }
}

/// A paddle; only its vertical offset moves
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Paddle {
    /// Top edge y
    pub offset: f32,
    /// Left edge x
    pub anchor_x: f32,
}

impl Paddle {
    /// Paddle vertically centred on its side of the board
    pub fn centered(side: Side, settings: &BoardSettings) -> Self {
        Self {
            offset: (settings.board_height - settings.paddle_height) / 2.0,
            anchor_x: settings.paddle_anchor(side),
        }
    }

    pub fn top(&self) -> f32 {
        self.offset
    }

    pub fn bottom(&self, settings: &BoardSettings) -> f32 {
        self.offset + settings.paddle_height
    }

    pub fn center_y(&self, settings: &BoardSettings) -> f32 {
        self.offset + settings.paddle_height / 2.0
    }

    /// x of the face the ball strikes
    pub fn face_x(&self, side: Side, settings: &BoardSettings) -> f32 {
        match side {
            Side::Left => self.anchor_x + settings.paddle_width,
            Side::Right => self.anchor_x,
        }
    }

    /// Move one step. A step that would leave the board is rejected, not
    /// clamped. Returns whether the paddle moved.
    pub fn try_move(&mut self, direction: Direction, settings: &BoardSettings) -> bool {
        let delta = match direction {
            Direction::Up => -settings.paddle_step,
            Direction::Down => settings.paddle_step,
        };
        let next = self.offset + delta;
        if next < 0.0 || next + settings.paddle_height > settings.board_height {
            return false;
        }
        self.offset = next;
        true
    }
}

/// The ball
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ball {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    /// Velocity magnitude; bounces change direction only
    pub speed: f32,
    /// Horizontal serve direction: -1 toward LEFT, +1 toward RIGHT, 0 at rest
    pub start_direction: i8,
}

impl Ball {
    /// Ball at board centre, moving horizontally toward `direction`
    pub fn serve(direction: i8, settings: &BoardSettings) -> Self {
        let speed = settings.default_ball_speed;
        Self {
            x: settings.board_width / 2.0,
            y: settings.board_height / 2.0,
            vx: speed * f32::from(direction.signum()),
            vy: 0.0,
            speed,
            start_direction: direction.signum(),
        }
    }

    /// The paddle side the ball is travelling toward, if any
    pub fn heading(&self) -> Option<Side> {
        if self.vx < 0.0 {
            Some(Side::Left)
        } else if self.vx > 0.0 {
            Some(Side::Right)
        } else {
            None
        }
    }

    pub fn velocity_magnitude(&self) -> f32 {
        (self.vx * self.vx + self.vy * self.vy).sqrt()
    }

    /// Leading edge within one radius of the paddle face, and centre strictly
    /// inside the paddle span.
    pub fn touches_paddle(&self, paddle: &Paddle, side: Side, settings: &BoardSettings) -> bool {
        let r = settings.ball_radius;
        let leading_edge = match side {
            Side::Left => self.x - r,
            Side::Right => self.x + r,
        };
        let face = paddle.face_x(side, settings);

        (leading_edge - face).abs() <= r
            && self.y > paddle.top()
            && self.y < paddle.bottom(settings)
    }

    /// Reflect off a paddle. The outgoing angle is proportional to the hit
    /// offset from paddle centre, capped at `max_bounce_angle`.
    pub fn bounce_off_paddle(&mut self, paddle: &Paddle, side: Side, settings: &BoardSettings) {
        let angle = bounce_angle(self.y, paddle, settings);
        let outward = match side {
            Side::Left => 1.0,
            Side::Right => -1.0,
        };
        self.vx = self.speed * angle.cos() * outward;
        self.vy = self.speed * angle.sin();
    }

    /// Invert vy on contact with the top or bottom wall.
    pub fn bounce_off_walls(&mut self, settings: &BoardSettings) {
        let r = settings.ball_radius;
        let hits_top = self.y - r <= 0.0 && self.vy < 0.0;
        let hits_bottom = self.y + r >= settings.board_height && self.vy > 0.0;
        if hits_top || hits_bottom {
            self.vy = -self.vy;
        }
    }

    /// Side that wins the round if the ball has left the board
    pub fn scoring_side(&self, settings: &BoardSettings) -> Option<Side> {
        if self.x >= settings.board_width {
            Some(Side::Left)
        } else if self.x <= 0.0 {
            Some(Side::Right)
        } else {
            None
        }
    }

    pub fn integrate(&mut self) {
        self.x += self.vx;
        self.y += self.vy;
    }
}

/// Bounce angle for a ball centred at `hit_y`
pub fn bounce_angle(hit_y: f32, paddle: &Paddle, settings: &BoardSettings) -> f32 {
    let half = settings.paddle_height / 2.0;
    let relative = ((hit_y - paddle.center_y(settings)) / half).clamp(-1.0, 1.0);
    (relative * settings.max_bounce_angle)
        .clamp(-settings.max_bounce_angle, settings.max_bounce_angle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paddle_step_past_edge_is_rejected() {
        let settings = BoardSettings::default();
        let mut paddle = Paddle {
            offset: 3.0,
            anchor_x: settings.paddle_anchor(Side::Left),
        };

        assert!(!paddle.try_move(Direction::Up, &settings));
        assert_eq!(paddle.offset, 3.0);

        paddle.offset = settings.board_height - settings.paddle_height;
        assert!(!paddle.try_move(Direction::Down, &settings));
        assert!(paddle.try_move(Direction::Up, &settings));
        assert_eq!(paddle.offset, settings.board_height - settings.paddle_height - 5.0);
    }

    #[test]
    fn centre_hit_returns_straight_and_tip_hit_is_capped() {
        let settings = BoardSettings::default();
        let paddle = Paddle::centered(Side::Right, &settings);

        assert_eq!(bounce_angle(paddle.center_y(&settings), &paddle, &settings), 0.0);

        let tip = bounce_angle(paddle.bottom(&settings) + 50.0, &paddle, &settings);
        assert!((tip - settings.max_bounce_angle).abs() < 1e-6);
    }

    #[test]
    fn paddle_bounce_preserves_speed_and_reverses_heading() {
        let settings = BoardSettings::default();
        let paddle = Paddle::centered(Side::Right, &settings);
        let face = paddle.face_x(Side::Right, &settings);

        for offset in [-45.0_f32, -20.0, 0.0, 13.0, 49.0] {
            let mut ball = Ball::serve(1, &settings);
            ball.vy = 2.0;
            ball.speed = ball.velocity_magnitude();
            ball.x = face - settings.ball_radius;
            ball.y = paddle.center_y(&settings) + offset;

            assert!(ball.touches_paddle(&paddle, Side::Right, &settings));
            ball.bounce_off_paddle(&paddle, Side::Right, &settings);

            assert!((ball.velocity_magnitude() - ball.speed).abs() < 1e-4);
            assert_eq!(ball.heading(), Some(Side::Left));
        }
    }

    #[test]
    fn ball_on_paddle_edge_row_misses() {
        let settings = BoardSettings::default();
        let paddle = Paddle::centered(Side::Left, &settings);
        let mut ball = Ball::serve(-1, &settings);
        ball.x = paddle.face_x(Side::Left, &settings) + settings.ball_radius;
        ball.y = paddle.top();

        assert!(!ball.touches_paddle(&paddle, Side::Left, &settings));
    }

    #[test]
    fn wall_contact_inverts_vertical_velocity_only() {
        let settings = BoardSettings::default();
        let mut ball = Ball::serve(1, &settings);
        ball.y = settings.ball_radius;
        ball.vy = -3.0;

        ball.bounce_off_walls(&settings);
        assert_eq!(ball.vy, 3.0);
        assert_eq!(ball.vx, settings.default_ball_speed);
    }

    #[test]
    fn crossing_an_edge_scores_for_the_opposite_side() {
        let settings = BoardSettings::default();
        let mut ball = Ball::serve(1, &settings);
        ball.x = settings.board_width;
        assert_eq!(ball.scoring_side(&settings), Some(Side::Left));

        ball.x = 0.0;
        assert_eq!(ball.scoring_side(&settings), Some(Side::Right));

        ball.x = 1.0;
        assert_eq!(ball.scoring_side(&settings), None);
    }
}
