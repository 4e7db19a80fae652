//! WebSocket upgrade handler and per-connection session

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::server::Subscription;
use crate::game::GameServer;
use crate::http::middleware::verify_token;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// WebSocket upgrade handler. Authentication happens per `join`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Outcome of one inbound message
enum Reply {
    Joined(Subscription),
    Accepted,
    Rejected(ServerMsg),
}

/// Apply a client message on behalf of `connection_id`
fn dispatch(server: &GameServer, jwt_secret: &str, connection_id: Uuid, msg: ClientMsg) -> Reply {
    match msg {
        ClientMsg::Join { token, game_id } => {
            let claims = match verify_token(&token, jwt_secret) {
                Ok(claims) => claims,
                Err(e) => return Reply::Rejected(ServerMsg::error(e.code(), e.to_string())),
            };
            match server.bind_connection(connection_id, claims.sub, game_id) {
                Ok(subscription) => {
                    info!(connection_id = %connection_id, player_id = %claims.sub, game_id = %game_id, "Player joined game");
                    Reply::Joined(subscription)
                }
                Err(e) => Reply::Rejected(ServerMsg::error(e.code(), e.to_string())),
            }
        }
        ClientMsg::Input { input } => match server.route_input(connection_id, input) {
            Ok(()) => Reply::Accepted,
            Err(e) => Reply::Rejected(ServerMsg::error(e.code(), e.to_string())),
        },
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    info!(connection_id = %connection_id, "New WebSocket connection");

    let (ws_sink, mut ws_stream) = socket.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<ServerMsg>();
    let writer = tokio::spawn(write_loop(connection_id, ws_sink, out_rx));

    let rate_limiter = ConnectionRateLimiter::new();
    let mut forwarder: Option<JoinHandle<()>> = None;

    while let Some(result) = ws_stream.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(_)) => {
                warn!(connection_id = %connection_id, "Received binary message, ignoring");
                continue;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                info!(connection_id = %connection_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        };

        if !rate_limiter.check_frame() {
            warn!(connection_id = %connection_id, "Rate limited inbound frame");
            continue;
        }

        let msg = match serde_json::from_str::<ClientMsg>(&text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "Dropping malformed client message");
                continue;
            }
        };

        match dispatch(&state.game_server, &state.config.jwt_secret, connection_id, msg) {
            Reply::Accepted => {}
            Reply::Rejected(reply) => {
                let _ = out_tx.send(reply);
            }
            Reply::Joined(subscription) => {
                if let Some(previous) = forwarder.take() {
                    previous.abort();
                }
                let _ = out_tx.send(ServerMsg::Settings(subscription.settings));
                forwarder = Some(tokio::spawn(forward_states(
                    connection_id,
                    subscription.states,
                    out_tx.clone(),
                )));
            }
        }
    }

    state.game_server.unbind_connection(connection_id);
    if let Some(forwarder) = forwarder {
        forwarder.abort();
    }
    drop(out_tx);
    writer.abort();

    info!(connection_id = %connection_id, "WebSocket connection closed");
}

/// Game state stream -> connection outbox
async fn forward_states(
    connection_id: Uuid,
    mut states: broadcast::Receiver<ServerMsg>,
    out_tx: mpsc::UnboundedSender<ServerMsg>,
) {
    loop {
        match states.recv().await {
            Ok(msg) => {
                if out_tx.send(msg).is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(connection_id = %connection_id, skipped = n, "Client lagged, skipping states");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(connection_id = %connection_id, "Game state stream closed");
                break;
            }
        }
    }
}

/// Connection outbox -> socket
async fn write_loop(
    connection_id: Uuid,
    mut sink: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::UnboundedReceiver<ServerMsg>,
) {
    while let Some(msg) = out_rx.recv().await {
        if let Err(e) = send_msg(&mut sink, &msg).await {
            debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}

async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}
