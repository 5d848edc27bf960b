use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use santa_core::{Assignment, Participant, SolveError};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    games: Arc<RwLock<HashMap<String, GameRecord>>>,
    persist_path: Option<PathBuf>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            games: Arc::new(RwLock::new(HashMap::new())),
            persist_path: None,
        }
    }
}

impl AppState {
    pub async fn with_persistence(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut state = Self::default();
        state.persist_path = Some(path.clone());
        if let Ok(bytes) = tokio::fs::read(&path).await {
            if let Ok(saved) = serde_json::from_slice::<HashMap<String, GameRecord>>(&bytes) {
                let mut games = state.games.write().await;
                *games = saved;
            }
        }
        state
    }

    async fn persist(&self) {
        if let Some(path) = &self.persist_path {
            let snapshot = {
                let games = self.games.read().await;
                games.clone()
            };
            if let Ok(json) = serde_json::to_vec_pretty(&snapshot) {
                if let Err(err) = tokio::fs::write(path, json).await {
                    eprintln!("persist error: {err}");
                }
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Setup,
    Drawn,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameRecord {
    pub id: String,
    pub host_token: String,
    pub status: GameStatus,
    pub participants: Vec<ParticipantRecord>,
    pub assignments: Vec<Assignment>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub id: String,
    pub name: String,
    pub exclusion: Option<String>,
    pub joined_at: u64,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/game", post(create_game))
        .route("/game/:id/join", post(join_game))
        .route(
            "/game/:id/participant/:pid/exclusion",
            put(set_exclusion),
        )
        .route("/game/:id/draw", post(draw_game))
        .route("/game/:id/participant/:pid/receiver", get(get_receiver))
        .route("/game/:id", get(get_game))
        .with_state(state)
}

#[derive(Serialize)]
struct CreateGameResponse {
    game_id: String,
    host_token: String,
}

fn admin_password() -> String {
    env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "changeme".to_string())
}

fn host_authorized(headers: &HeaderMap, game: &GameRecord) -> bool {
    headers
        .get("x-host-token")
        .and_then(|v| v.to_str().ok())
        .map(|token| token == game.host_token)
        .unwrap_or(false)
}

async fn create_game(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let expected = admin_password();
    let provided = headers
        .get("x-admin-password")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided != expected {
        return (StatusCode::UNAUTHORIZED, "invalid admin password").into_response();
    }

    let game_id = Uuid::new_v4().to_string();
    let host_token = Uuid::new_v4().to_string();
    let record = GameRecord {
        id: game_id.clone(),
        host_token: host_token.clone(),
        status: GameStatus::Setup,
        participants: Vec::new(),
        assignments: Vec::new(),
    };

    state.games.write().await.insert(game_id.clone(), record);
    state.persist().await;

    (
        StatusCode::CREATED,
        Json(CreateGameResponse {
            game_id,
            host_token,
        }),
    )
        .into_response()
}

#[derive(Deserialize)]
struct JoinRequest {
    name: String,
}

#[derive(Serialize)]
struct JoinResponse {
    participant_id: String,
}

async fn join_game(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    Json(payload): Json<JoinRequest>,
) -> impl IntoResponse {
    let name = payload.name.trim();
    if name.is_empty() {
        return (StatusCode::BAD_REQUEST, "name required").into_response();
    }

    let mut games = state.games.write().await;
    let game = match games.get_mut(&game_id) {
        Some(game) => game,
        None => return (StatusCode::NOT_FOUND, "game not found").into_response(),
    };

    if !matches!(game.status, GameStatus::Setup) {
        return (StatusCode::CONFLICT, "names already drawn").into_response();
    }

    if game.participants.iter().any(|p| p.name == name) {
        return (StatusCode::CONFLICT, "name taken").into_response();
    }

    let participant_id = Uuid::new_v4().to_string();
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    game.participants.push(ParticipantRecord {
        id: participant_id.clone(),
        name: name.to_string(),
        exclusion: None,
        joined_at: now,
    });

    drop(games);
    state.persist().await;

    (StatusCode::OK, Json(JoinResponse { participant_id })).into_response()
}

#[derive(Deserialize)]
struct ExclusionRequest {
    exclusion: Option<String>,
}

async fn set_exclusion(
    State(state): State<AppState>,
    Path((game_id, participant_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(payload): Json<ExclusionRequest>,
) -> impl IntoResponse {
    let mut games = state.games.write().await;
    let game = match games.get_mut(&game_id) {
        Some(g) => g,
        None => return (StatusCode::NOT_FOUND, "game not found").into_response(),
    };

    if !host_authorized(&headers, game) {
        return (StatusCode::UNAUTHORIZED, "host token required").into_response();
    }

    if !matches!(game.status, GameStatus::Setup) {
        return (StatusCode::CONFLICT, "cannot modify exclusions after draw").into_response();
    }

    if let Some(excluded) = &payload.exclusion {
        if *excluded == participant_id {
            return (StatusCode::BAD_REQUEST, "cannot exclude self").into_response();
        }
        if !game.participants.iter().any(|p| p.id == *excluded) {
            return (StatusCode::NOT_FOUND, "excluded participant not found").into_response();
        }
    }

    let Some(participant) = game
        .participants
        .iter_mut()
        .find(|p| p.id == participant_id)
    else {
        return (StatusCode::NOT_FOUND, "participant not found").into_response();
    };

    participant.exclusion = payload.exclusion;

    drop(games);
    state.persist().await;

    StatusCode::NO_CONTENT.into_response()
}

#[derive(Deserialize)]
struct DrawParams {
    seed: Option<u64>,
}

#[derive(Serialize)]
struct DrawResponse {
    status: GameStatus,
    assignments_count: usize,
}

#[derive(Debug, Error)]
enum DrawError {
    #[error("game not found")]
    GameNotFound,
    #[error("host token required")]
    Unauthorized,
    #[error("names already drawn")]
    AlreadyDrawn,
    #[error("need at least 2 participants to draw")]
    TooFewParticipants,
    #[error("no valid assignment exists; add more participants or relax exclusions")]
    NoSolution,
    #[error("core error: {0}")]
    Core(#[from] SolveError),
}

impl DrawError {
    fn status(&self) -> StatusCode {
        match self {
            DrawError::GameNotFound => StatusCode::NOT_FOUND,
            DrawError::Unauthorized => StatusCode::UNAUTHORIZED,
            DrawError::AlreadyDrawn | DrawError::NoSolution => StatusCode::CONFLICT,
            DrawError::TooFewParticipants | DrawError::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

async fn draw_game(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    headers: HeaderMap,
    Query(params): Query<DrawParams>,
) -> impl IntoResponse {
    let token = headers.get("x-host-token").and_then(|v| v.to_str().ok());
    match run_draw(&state, &game_id, token, params.seed).await {
        Ok(drawn) => (StatusCode::OK, Json(drawn)).into_response(),
        Err(err) => (err.status(), err.to_string()).into_response(),
    }
}

async fn run_draw(
    state: &AppState,
    game_id: &str,
    host_token: Option<&str>,
    seed: Option<u64>,
) -> Result<DrawResponse, DrawError> {
    let mut games = state.games.write().await;
    let game = games.get_mut(game_id).ok_or(DrawError::GameNotFound)?;

    if host_token != Some(game.host_token.as_str()) {
        return Err(DrawError::Unauthorized);
    }

    if !matches!(game.status, GameStatus::Setup) {
        return Err(DrawError::AlreadyDrawn);
    }

    if game.participants.len() < 2 {
        return Err(DrawError::TooFewParticipants);
    }

    let roster: Vec<Participant> = game
        .participants
        .iter()
        .map(|p| Participant {
            id: p.id.clone(),
            exclusion: p.exclusion.clone(),
        })
        .collect();

    let mut rng = seed
        .map(ChaCha8Rng::seed_from_u64)
        .unwrap_or_else(ChaCha8Rng::from_entropy);

    // Roster integrity is enforced at join time, so any core error other
    // than NoSolution is a defect.
    let assignments = santa_core::solve_with_rng(&roster, &mut rng).map_err(|err| match err {
        SolveError::NoSolution => DrawError::NoSolution,
        other => DrawError::from(other),
    })?;

    game.status = GameStatus::Drawn;
    game.assignments = assignments;

    let drawn = DrawResponse {
        status: game.status.clone(),
        assignments_count: game.assignments.len(),
    };

    drop(games);
    state.persist().await;

    Ok(drawn)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ParticipantView {
    id: String,
    name: String,
    exclusion: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct GameView {
    id: String,
    status: GameStatus,
    participants: Vec<ParticipantView>,
    // Only present for the host, and only after the draw.
    #[serde(skip_serializing_if = "Option::is_none")]
    assignments: Option<Vec<Assignment>>,
}

async fn get_game(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let games = state.games.read().await;
    let Some(game) = games.get(&game_id) else {
        return (StatusCode::NOT_FOUND, "game not found").into_response();
    };

    let assignments = if matches!(game.status, GameStatus::Drawn) && host_authorized(&headers, game)
    {
        Some(game.assignments.clone())
    } else {
        None
    };

    (
        StatusCode::OK,
        Json(GameView {
            id: game.id.clone(),
            status: game.status.clone(),
            participants: game
                .participants
                .iter()
                .map(|p| ParticipantView {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    exclusion: p.exclusion.clone(),
                })
                .collect(),
            assignments,
        }),
    )
        .into_response()
}

#[derive(Serialize)]
struct ReceiverResponse {
    receiver_id: String,
    receiver_name: String,
}

async fn get_receiver(
    State(state): State<AppState>,
    Path((game_id, participant_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let games = state.games.read().await;
    let Some(game) = games.get(&game_id) else {
        return (StatusCode::NOT_FOUND, "game not found").into_response();
    };

    if !game.participants.iter().any(|p| p.id == participant_id) {
        return (StatusCode::NOT_FOUND, "participant not found").into_response();
    }

    if !matches!(game.status, GameStatus::Drawn) {
        return (StatusCode::CONFLICT, "names not drawn yet").into_response();
    }

    let Some(assignment) = game
        .assignments
        .iter()
        .find(|a| a.giver == participant_id)
    else {
        return (StatusCode::NOT_FOUND, "assignment not found").into_response();
    };

    let Some(receiver) = game
        .participants
        .iter()
        .find(|p| p.id == assignment.receiver)
    else {
        return (StatusCode::NOT_FOUND, "receiver not found").into_response();
    };

    (
        StatusCode::OK,
        Json(ReceiverResponse {
            receiver_id: receiver.id.clone(),
            receiver_name: receiver.name.clone(),
        }),
    )
        .into_response()
}
