//! API route handlers.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use shared::{
    AddProjectRequest, AddProjectResponse, CardUpdatePayload, EndVotingResponse, GalleryResponse,
    GameRankingResponse, GameScoreRequest, GameScoreResponse, KanbanResponse, LikeRequest,
    LikeResponse, LiveStatusResponse, LogRequest, StartVotingRequest, StartVotingResponse,
    VoteRequest, VoteResponse, VotingStateResponse, WorkStatus, DEFAULT_GAME_TYPE,
    LEADERBOARD_SIZE,
};

use crate::api::{ws, AppState};
use crate::auth::require_admin;
use crate::config::Config;
use crate::db;
use crate::voting::VotingError;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;
const MAX_PLAYER_NAME_CHARS: usize = 50;

/// Per-IP rate limit for anonymous write endpoints: bursts of 10, one
/// request replenished every second.
fn spectator_rate_limit_layer() -> GovernorLayer<
    tower_governor::key_extractor::PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware,
    axum::body::Body,
> {
    let config = GovernorConfigBuilder::default()
        .per_second(1)
        .burst_size(10)
        .finish()
        .expect("invalid governor config");
    GovernorLayer::new(config)
}

pub fn api_routes(config: &Config) -> Router<AppState> {
    let mut spectator_writes = Router::new()
        .route("/live/vote", post(cast_vote))
        .route("/live/projects/{id}/like", post(like_project))
        .route("/live/game/score", post(submit_game_score));
    if config.rate_limit_enabled {
        spectator_writes = spectator_writes.layer(spectator_rate_limit_layer());
    }

    Router::new()
        .merge(spectator_writes)
        .route("/live/status", get(live_status))
        .route("/live/kanban", get(live_kanban))
        .route("/live/voting", get(voting_state))
        .route("/live/projects", get(projects_list))
        .route("/live/game/ranking", get(game_ranking))
        .route("/live/ws", get(ws::live_ws_handler))
        .route("/live/admin/start-voting", post(admin_start_voting))
        .route("/live/admin/end-voting", post(admin_end_voting))
        .route("/live/admin/work-completed", post(admin_work_completed))
        .route("/live/admin/add-project", post(admin_add_project))
        .route("/live/admin/status", post(admin_status))
        .route("/live/admin/cards", post(admin_card))
        .route("/live/admin/logs", post(admin_log))
}

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

// --- Spectator ---

async fn live_status(
    State(state): State<AppState>,
) -> Result<Json<LiveStatusResponse>, (StatusCode, String)> {
    let snapshot = state.live.snapshot().await.map_err(internal_error)?;
    Ok(Json(snapshot.status))
}

async fn live_kanban(
    State(state): State<AppState>,
) -> Result<Json<KanbanResponse>, (StatusCode, String)> {
    let snapshot = state.live.snapshot().await.map_err(internal_error)?;
    Ok(Json(snapshot.kanban))
}

async fn voting_state(
    State(state): State<AppState>,
) -> Result<Json<VotingStateResponse>, (StatusCode, String)> {
    let snapshot = state.live.snapshot().await.map_err(internal_error)?;
    Ok(Json(snapshot.voting))
}

/// Rejected ballots are answered with `success: false`, not an error status.
async fn cast_vote(
    State(state): State<AppState>,
    Json(req): Json<VoteRequest>,
) -> Result<Json<VoteResponse>, (StatusCode, String)> {
    let response = state.live.cast_vote(req).await.map_err(internal_error)?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct GalleryQuery {
    limit: Option<u32>,
    offset: Option<u32>,
}

async fn projects_list(
    State(state): State<AppState>,
    Query(query): Query<GalleryQuery>,
) -> Result<Json<GalleryResponse>, (StatusCode, String)> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);
    let conn = state.db.conn().map_err(internal_error)?;
    let (projects, total) = db::list_projects(&conn, limit, offset).map_err(internal_error)?;
    Ok(Json(GalleryResponse { projects, total }))
}

async fn like_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<LikeRequest>,
) -> Result<Json<LikeResponse>, (StatusCode, String)> {
    if req.session_id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "session id required".to_string()));
    }
    match state
        .live
        .like(&id, &req.session_id)
        .await
        .map_err(internal_error)?
    {
        Some(response) => Ok(Json(response)),
        None => Err((StatusCode::NOT_FOUND, "project not found".to_string())),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RankingQuery {
    #[serde(alias = "game_type")]
    game_type: Option<String>,
    limit: Option<u32>,
}

async fn game_ranking(
    State(state): State<AppState>,
    Query(query): Query<RankingQuery>,
) -> Result<Json<GameRankingResponse>, (StatusCode, String)> {
    let game_type = query.game_type.as_deref().unwrap_or(DEFAULT_GAME_TYPE);
    let limit = query.limit.unwrap_or(LEADERBOARD_SIZE).clamp(1, MAX_PAGE_SIZE);
    let conn = state.db.conn().map_err(internal_error)?;
    let ranking = db::top_scores(&conn, game_type, limit).map_err(internal_error)?;
    Ok(Json(GameRankingResponse {
        total: ranking.len() as u64,
        ranking,
    }))
}

async fn submit_game_score(
    State(state): State<AppState>,
    Json(mut req): Json<GameScoreRequest>,
) -> Result<Json<GameScoreResponse>, (StatusCode, String)> {
    req.player_name = req
        .player_name
        .trim()
        .chars()
        .take(MAX_PLAYER_NAME_CHARS)
        .collect();
    if req.player_name.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "player name required".to_string()));
    }
    if req.score <= 0 {
        return Err((StatusCode::BAD_REQUEST, "score must be positive".to_string()));
    }
    let response = state.live.submit_score(req).await.map_err(internal_error)?;
    Ok(Json(response))
}

// --- Admin / collaborators ---

async fn admin_start_voting(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StartVotingRequest>,
) -> Result<Json<StartVotingResponse>, (StatusCode, String)> {
    require_admin(&headers, &state.config.admin_api_key)?;
    start_round(&state, req).await
}

/// A finished work item opens a round with the default options.
async fn admin_work_completed(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StartVotingResponse>, (StatusCode, String)> {
    require_admin(&headers, &state.config.admin_api_key)?;
    start_round(&state, StartVotingRequest::default()).await
}

async fn start_round(
    state: &AppState,
    req: StartVotingRequest,
) -> Result<Json<StartVotingResponse>, (StatusCode, String)> {
    state
        .live
        .start_voting(req)
        .await
        .map_err(internal_error)?
        .map(Json)
        .map_err(|e| {
            let status = match e {
                VotingError::AlreadyOpen => StatusCode::CONFLICT,
                _ => StatusCode::BAD_REQUEST,
            };
            (status, e.to_string())
        })
}

async fn admin_end_voting(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<EndVotingResponse>, (StatusCode, String)> {
    require_admin(&headers, &state.config.admin_api_key)?;
    state
        .live
        .end_voting()
        .await
        .map_err(internal_error)?
        .map(Json)
        .ok_or((StatusCode::CONFLICT, "voting is not active".to_string()))
}

async fn admin_add_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AddProjectRequest>,
) -> Result<Json<AddProjectResponse>, (StatusCode, String)> {
    require_admin(&headers, &state.config.admin_api_key)?;
    if req.title.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "title required".to_string()));
    }
    let conn = state.db.conn().map_err(internal_error)?;
    let project_id = db::insert_project(&conn, &req).map_err(internal_error)?;
    tracing::info!(project_id = %project_id, title = %req.title, "project added to gallery");
    Ok(Json(AddProjectResponse { project_id }))
}

async fn admin_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(status): Json<WorkStatus>,
) -> Result<StatusCode, (StatusCode, String)> {
    require_admin(&headers, &state.config.admin_api_key)?;
    state.live.set_status(status).await.map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn admin_card(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<CardUpdatePayload>,
) -> Result<StatusCode, (StatusCode, String)> {
    require_admin(&headers, &state.config.admin_api_key)?;
    state.live.card(update).await.map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn admin_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(entry): Json<LogRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    require_admin(&headers, &state.config.admin_api_key)?;
    if entry.content.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "content required".to_string()));
    }
    state.live.log(entry).await.map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}
