//! HTTP surface. Handlers stay thin: validate, call into the engine,
//! serialize. All coordination lives behind the atomic game-row update,
//! so these can run on any number of workers.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::{ApiError, ApiResult};
use crate::phase;
use crate::snapshot;
use crate::state::AppState;
use crate::sweeper;
use crate::types::*;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/games/create", post(create_game))
        .route("/games/{code}/join", post(join_game))
        .route("/games/{code}/rejoin", post(rejoin_game))
        .route("/games/{code}/start", post(start_game))
        .route("/games/{code}/respond", post(respond))
        .route("/games/{code}/vote", post(vote))
        .route("/games/{code}/react", post(react))
        .route("/games/{code}/next", post(next_phase))
        .route("/games/{code}/end", post(end_game))
        .route("/games/{code}", get(poll_game))
        .route("/leaderboard", get(leaderboard))
        .route("/cron/cleanup-games", get(cleanup_games))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGameBody {
    host_secret: String,
    host_name: String,
    #[serde(default = "default_rounds")]
    total_rounds: u32,
    #[serde(default)]
    timers_disabled: bool,
    /// Room code of a previous game to link as a rematch.
    rematch_of: Option<String>,
}

fn default_rounds() -> u32 {
    3
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateGameReply {
    game_id: GameId,
    room_code: String,
    host_player_id: PlayerId,
    rejoin_token: String,
}

async fn create_game(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateGameBody>,
) -> ApiResult<Json<CreateGameReply>> {
    if !state.config.host_secret.matches(&body.host_secret) {
        return Err(ApiError::Unauthorized);
    }

    let (game, host) = state
        .create_game(body.host_name, body.total_rounds, body.timers_disabled)
        .await?;

    if let Some(rematch_of) = body.rematch_of {
        // A dead rematch pointer is not worth failing game creation for.
        if let Err(e) = state.link_rematch(&rematch_of, &game.room_code).await {
            tracing::warn!("rematch link to {} failed: {}", rematch_of, e);
        }
    }

    Ok(Json(CreateGameReply {
        game_id: game.id,
        room_code: game.room_code,
        host_player_id: host.id,
        rejoin_token: host.rejoin_token,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinBody {
    name: String,
    #[serde(default = "default_kind")]
    kind: PlayerKind,
    model_id: Option<ModelId>,
}

fn default_kind() -> PlayerKind {
    PlayerKind::Human
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinReply {
    game_id: GameId,
    room_code: String,
    player_id: PlayerId,
    rejoin_token: String,
}

async fn join_game(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(body): Json<JoinBody>,
) -> ApiResult<Json<JoinReply>> {
    let game = state.require_game_by_code(&code).await?;
    let player = state
        .join_game(&game.id, body.name, body.kind, body.model_id)
        .await?;
    Ok(Json(JoinReply {
        game_id: game.id,
        room_code: game.room_code,
        player_id: player.id,
        rejoin_token: player.rejoin_token,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejoinBody {
    rejoin_token: String,
}

async fn rejoin_game(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(body): Json<RejoinBody>,
) -> ApiResult<Json<JoinReply>> {
    let game = state.require_game_by_code(&code).await?;
    let player = state.rejoin_game(&game.id, &body.rejoin_token).await?;
    Ok(Json(JoinReply {
        game_id: game.id,
        room_code: game.room_code,
        player_id: player.id,
        rejoin_token: player.rejoin_token,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HostActionBody {
    player_id: PlayerId,
}

async fn start_game(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(body): Json<HostActionBody>,
) -> ApiResult<StatusCode> {
    let game = state.require_game_by_code(&code).await?;
    phase::start_game(&state, &game, &body.player_id).await?;
    Ok(StatusCode::OK)
}

async fn next_phase(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(body): Json<HostActionBody>,
) -> ApiResult<StatusCode> {
    let game = state.require_game_by_code(&code).await?;
    phase::host_next(&state, &game, &body.player_id).await?;
    Ok(StatusCode::OK)
}

async fn end_game(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(body): Json<HostActionBody>,
) -> ApiResult<StatusCode> {
    let game = state.require_game_by_code(&code).await?;
    phase::host_end(&state, &game, &body.player_id).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RespondBody {
    player_id: PlayerId,
    prompt_id: PromptId,
    text: String,
}

async fn respond(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(body): Json<RespondBody>,
) -> ApiResult<StatusCode> {
    let game = state.require_game_by_code(&code).await?;
    state
        .submit_response(&game, &body.player_id, &body.prompt_id, &body.text)
        .await?;
    // This answer may have been the last one the quorum was waiting on.
    phase::recheck_quorum(&state, &game.id).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoteBody {
    player_id: PlayerId,
    prompt_id: PromptId,
    /// Absent or null to abstain.
    response_id: Option<ResponseId>,
}

async fn vote(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(body): Json<VoteBody>,
) -> ApiResult<StatusCode> {
    let game = state.require_game_by_code(&code).await?;
    state
        .submit_vote(&game, &body.player_id, &body.prompt_id, body.response_id)
        .await?;
    phase::recheck_quorum(&state, &game.id).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReactBody {
    player_id: PlayerId,
    response_id: ResponseId,
    emoji: String,
}

async fn react(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(body): Json<ReactBody>,
) -> ApiResult<StatusCode> {
    let game = state.require_game_by_code(&code).await?;
    state
        .toggle_reaction(&game, &body.player_id, &body.response_id, &body.emoji)
        .await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollQuery {
    player_id: Option<PlayerId>,
    /// Last version this client has seen.
    v: Option<u64>,
    #[serde(default)]
    touch: u8,
}

async fn poll_game(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(query): Query<PollQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let game = state.require_game_by_code(&code).await?;

    // The sweep may advance the game; snapshot what's true afterwards.
    sweeper::sweep(&state, &game, query.player_id.as_ref(), query.touch == 1).await?;
    let game = state
        .get_game(&game.id)
        .await
        .ok_or_else(|| ApiError::NotFound("game".to_string()))?;

    let etag = format!("\"{}\"", game.version);
    let version_match = query.v == Some(game.version);
    let etag_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == etag)
        .unwrap_or(false);
    if version_match || etag_match {
        return Ok((
            StatusCode::NOT_MODIFIED,
            [(header::ETAG, etag)],
        )
            .into_response());
    }

    let snapshot = snapshot::build(&state, &game, query.player_id.as_ref()).await;
    Ok(([(header::ETAG, etag)], Json(snapshot)).into_response())
}

async fn leaderboard(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let board = state.leaderboard().await;
    Json(json!({ "entries": board }))
}

#[derive(Debug, Deserialize)]
struct CronQuery {
    secret: Option<String>,
}

async fn cleanup_games(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CronQuery>,
) -> ApiResult<impl IntoResponse> {
    let expected = state
        .config
        .cron_secret
        .as_ref()
        .ok_or_else(|| ApiError::Forbidden("cleanup is not configured".to_string()))?;
    let given = query.secret.unwrap_or_default();
    if !expected.matches(&given) {
        return Err(ApiError::Unauthorized);
    }
    let report = state.cleanup_games().await;
    Ok(Json(report))
}
