//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::{Direction, Phase, Side};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Bind this connection to a game
    Join {
        /// Player token issued by the identity provider
        token: String,
        game_id: Uuid,
    },

    /// Queue a paddle move for the bound player
    Input { input: Direction },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Board metrics, once per successful join
    Settings(SettingsPayload),

    /// Authoritative game state, at the broadcast rate
    State(GameStateView),

    /// Rejected join or input; the connection stays open
    Error { code: String, message: String },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Board metrics clients need for drawing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsPayload {
    pub board_width: f32,
    pub board_height: f32,
    pub paddle_height: f32,
    pub paddle_width: f32,
    pub paddle_to_wall_dist: f32,
    pub ball_radius: f32,
}

/// Public projection of a game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStateView {
    pub game_id: Uuid,
    pub phase: Phase,
    pub ball: BallView,
    pub left_paddle: PaddleView,
    pub right_paddle: PaddleView,
    pub players: Vec<PlayerView>,
    pub winner_id: Option<Uuid>,
    pub rounds_completed: u32,
    pub total_rounds: u32,
    /// Countdown shown between rounds
    pub reset_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallView {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub speed: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaddleView {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: Uuid,
    pub side: Side,
    pub score: u32,
    pub ready: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_message_parses_from_tagged_payload() {
        let game_id = Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"join","payload":{{"token":"abc","game_id":"{}"}}}}"#,
            game_id
        );
        match serde_json::from_str::<ClientMsg>(&raw).unwrap() {
            ClientMsg::Join { token, game_id: id } => {
                assert_eq!(token, "abc");
                assert_eq!(id, game_id);
            }
            other => panic!("Expected Join message, got {:?}", other),
        }
    }

    #[test]
    fn input_direction_is_lowercase() {
        let msg: ClientMsg =
            serde_json::from_str(r#"{"type":"input","payload":{"input":"down"}}"#).unwrap();
        assert!(matches!(msg, ClientMsg::Input { input: Direction::Down }));

        let bad = serde_json::from_str::<ClientMsg>(r#"{"type":"input","payload":{"input":"left"}}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn settings_message_shape() {
        let msg = ServerMsg::Settings(SettingsPayload {
            board_width: 800.0,
            board_height: 600.0,
            paddle_height: 100.0,
            paddle_width: 10.0,
            paddle_to_wall_dist: 20.0,
            ball_radius: 10.0,
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "settings");
        assert_eq!(json["payload"]["paddle_to_wall_dist"], 20.0);
    }

    #[test]
    fn error_message_carries_code() {
        let json = serde_json::to_string(&ServerMsg::error("not_bound", "join a game first")).unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("not_bound"));
    }
}
