//! HTTP route definitions

use axum::{
    extract::{Extension, Path, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::error;
use uuid::Uuid;

use crate::app::AppState;
use crate::game::server::GameSummary;
use crate::game::{BoardSettings, GameServerError, LaunchError};
use crate::http::middleware::{require_auth, require_operator, AuthenticatedPlayer};
use crate::matchmaking::{LobbyError, MatchmakeOutcome};
use crate::store::{BracketNode, Lobby, MatchRecord, Slot, Store, StoreError, Tournament};
use crate::tournament::{Bracket, BracketError};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::GameStateView;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CLIENT_ORIGIN may list several origins, comma-separated
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/settings", get(settings_handler))
        .route("/ws", get(ws_handler))
        .route("/games", get(list_games_handler))
        .route("/games/:id", get(game_handler))
        .route("/tournaments", get(list_tournaments_handler))
        .route("/tournaments/:id", get(bracket_handler))
        .route("/matchmaking/lobbies/:id", get(lobby_handler));

    let protected_routes = Router::new()
        .route("/matchmaking", post(matchmake_handler))
        .route("/matchmaking/lobbies/:id/join", post(join_lobby_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // require_auth is the outer layer, so claims are attached first
    let operator_routes = Router::new()
        .route("/games", post(create_game_handler))
        .route("/tournaments", post(create_tournament_handler))
        .route("/tournaments/:id/start", post(start_tournament_handler))
        .route(
            "/tournaments/:id/nodes/:node_id/result",
            post(report_result_handler),
        )
        .route_layer(middleware::from_fn(require_operator))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(operator_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health and settings
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    live_games: usize,
    bound_connections: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        live_games: state.game_server.active_games(),
        bound_connections: state.game_server.bound_connections(),
    })
}

async fn settings_handler(State(state): State<AppState>) -> Json<BoardSettings> {
    Json(*state.game_server.settings())
}

// ============================================================================
// Games
// ============================================================================

async fn list_games_handler(State(state): State<AppState>) -> Json<Vec<GameSummary>> {
    Json(state.game_server.list_games())
}

#[derive(Deserialize)]
struct CreateGameRequest {
    player1_id: Uuid,
    player2_id: Uuid,
}

#[derive(Serialize)]
struct CreateGameResponse {
    match_id: Uuid,
}

async fn create_game_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateGameRequest>,
) -> Result<(StatusCode, Json<CreateGameResponse>), AppError> {
    let match_id = state
        .launcher
        .launch(Uuid::new_v4(), req.player1_id, req.player2_id, None)
        .await?;

    Ok((StatusCode::CREATED, Json(CreateGameResponse { match_id })))
}

#[derive(Serialize)]
struct GameResponse {
    record: Option<MatchRecord>,
    /// Present while the game is live
    state: Option<GameStateView>,
}

async fn game_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GameResponse>, AppError> {
    let record = state.store.get_match(id).await?;
    let live = state.game_server.game_state(id);

    if record.is_none() && live.is_none() {
        return Err(AppError::NotFound(format!("game {}", id)));
    }

    Ok(Json(GameResponse {
        record,
        state: live,
    }))
}

// ============================================================================
// Tournaments
// ============================================================================

#[derive(Deserialize)]
struct CreateTournamentRequest {
    name: String,
    participants: Vec<Uuid>,
}

async fn create_tournament_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateTournamentRequest>,
) -> Result<(StatusCode, Json<Tournament>), AppError> {
    let tournament = state
        .brackets
        .create_tournament(req.name, req.participants)
        .await?;
    Ok((StatusCode::CREATED, Json(tournament)))
}

async fn list_tournaments_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<Tournament>>, AppError> {
    Ok(Json(state.brackets.list_tournaments().await?))
}

async fn bracket_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Bracket>, AppError> {
    Ok(Json(state.brackets.bracket(id).await?))
}

async fn start_tournament_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Bracket>, AppError> {
    Ok(Json(state.brackets.start(id).await?))
}

#[derive(Deserialize)]
struct ReportResultRequest {
    winner_slot: Slot,
}

async fn report_result_handler(
    State(state): State<AppState>,
    Path((tournament_id, node_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ReportResultRequest>,
) -> Result<Json<BracketNode>, AppError> {
    let belongs = state
        .store
        .get_bracket_node(node_id)
        .await?
        .is_some_and(|node| node.tournament_id == tournament_id);
    if !belongs {
        return Err(AppError::NotFound(format!(
            "node {} in tournament {}",
            node_id, tournament_id
        )));
    }

    Ok(Json(state.brackets.report_result(node_id, req.winner_slot).await?))
}

// ============================================================================
// Matchmaking
// ============================================================================

async fn matchmake_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedPlayer>,
) -> Result<Json<MatchmakeOutcome>, AppError> {
    Ok(Json(state.lobby.matchmake(auth.player_id).await?))
}

async fn join_lobby_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedPlayer>,
    Path(id): Path<Uuid>,
) -> Result<Json<MatchmakeOutcome>, AppError> {
    Ok(Json(state.lobby.join(id, auth.player_id).await?))
}

async fn lobby_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Lobby>, AppError> {
    Ok(Json(state.lobby.lobby(id).await?))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<GameServerError> for AppError {
    fn from(e: GameServerError) -> Self {
        match e {
            GameServerError::AlreadyExists(_) => AppError::Conflict(e.to_string()),
            GameServerError::UnknownGame(_) => AppError::NotFound(e.to_string()),
            _ => AppError::BadRequest(e.to_string()),
        }
    }
}

impl From<LaunchError> for AppError {
    fn from(e: LaunchError) -> Self {
        match e {
            LaunchError::Game(e) => e.into(),
            LaunchError::Store(e) => e.into(),
        }
    }
}

impl From<BracketError> for AppError {
    fn from(e: BracketError) -> Self {
        match e {
            BracketError::TournamentNotFound(_) | BracketError::NodeNotFound(_) => {
                AppError::NotFound(e.to_string())
            }
            BracketError::NodeNotScheduled(_) => AppError::Conflict(e.to_string()),
            BracketError::Launch(e) => e.into(),
            BracketError::Store(e) => e.into(),
            _ => AppError::BadRequest(e.to_string()),
        }
    }
}

impl From<LobbyError> for AppError {
    fn from(e: LobbyError) -> Self {
        match e {
            LobbyError::NotFound(_) => AppError::NotFound(e.to_string()),
            LobbyError::Conflict(msg) => AppError::Conflict(msg),
            LobbyError::Launch(e) => e.into(),
            LobbyError::Store(e) => e.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Internal(msg) => {
                error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
