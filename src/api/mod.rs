// HTTP API routes (spell evaluation, catalog, player sessions, etc.)

use std::time::Instant;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Json, Path, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::catalog::CATALOG;
use crate::error::GameError;
use crate::judge::{validate_spell_text, SpellRequest};
use crate::metrics;
use crate::moderation::ModerationVerdict;
use crate::session::SessionManager;

const DEFAULT_CREATURE_TYPE: &str = "Fire Dragon";
const DEFAULT_CREATURE_WEAKNESS: &str = "ice and water magic";

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
    pub spell: Option<String>,
    pub creature_type: Option<String>,
    pub creature_weakness: Option<String>,
    #[serde(default)]
    pub is_boss: bool,
    pub boss_phase: Option<u8>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectCreatureRequest {
    pub creature_id: String,
}

#[derive(Deserialize)]
pub struct CastRequest {
    pub spell: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(sessions: SessionManager) -> Router {
    let state = AppState { sessions };

    Router::new()
        .route("/health", get(health_check))
        // Stateless evaluation
        .route("/evaluate", post(evaluate_spell))
        .route("/api/spells/evaluate", post(evaluate_spell))
        // Catalog
        .route("/api/worlds", get(list_worlds))
        .route("/api/creatures", get(list_creatures))
        .route("/api/creatures/{id}", get(get_creature))
        // Players
        .route("/api/players", post(create_player))
        .route("/api/players/{id}/progress", get(get_progress))
        .route("/api/players/{id}/map", get(get_world_map))
        .route(
            "/api/players/{id}/battle",
            get(get_battle).post(select_creature).delete(leave_battle),
        )
        .route("/api/players/{id}/battle/cast", post(cast_spell))
        .route("/api/players/{id}/battle/reset", post(reset_battle))
        .route("/api/players/{id}/debug/unlock-all", post(unlock_all))
        // Docs and metrics
        .route("/llms.txt", get(get_llms_txt))
        .route("/metrics", get(get_metrics))
        .layer(middleware::from_fn(track_metrics))
        .with_state(state)
}

async fn track_metrics(req: Request<Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let endpoint = metrics::normalize_path(req.uri().path());
    let started = Instant::now();

    let response = next.run(req).await;

    metrics::API_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), endpoint.as_str(), response.status().as_str()])
        .inc();
    metrics::API_REQUEST_DURATION_SECONDS
        .with_label_values(&[endpoint.as_str()])
        .observe(started.elapsed().as_secs_f64());
    response
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "prompt-wizard-backend" }))
}

// ── Evaluation ────────────────────────────────────────────────────────

async fn evaluate_spell(
    State(state): State<AppState>,
    payload: Result<Json<EvaluateRequest>, JsonRejection>,
) -> Result<Json<Value>, GameError> {
    let Json(req) = payload?;
    let spell = req.spell.unwrap_or_default();
    validate_spell_text(&spell)?;

    let request = SpellRequest {
        text: spell.clone(),
        target_creature: req
            .creature_type
            .unwrap_or_else(|| DEFAULT_CREATURE_TYPE.to_string()),
        target_weakness: req
            .creature_weakness
            .unwrap_or_else(|| DEFAULT_CREATURE_WEAKNESS.to_string()),
        is_boss_battle: req.is_boss,
        boss_phase: req.boss_phase,
    };
    request.validate()?;

    let services = state.sessions.services();
    if let ModerationVerdict::Blocked {
        message,
        categories,
    } = services.moderation.screen(&spell).await
    {
        return Err(GameError::ModerationBlocked {
            message,
            categories,
        });
    }

    tracing::info!(creature = %request.target_creature, "Evaluating spell");
    let evaluation = services.judge.evaluate(&request).await;

    Ok(Json(json!({
        "spell": spell,
        "creatureType": request.target_creature,
        "evaluation": evaluation,
        "isBoss": request.is_boss_battle,
        "bossPhase": request.boss_phase,
    })))
}

// ── Catalog handlers ──────────────────────────────────────────────────

async fn list_worlds() -> impl IntoResponse {
    (StatusCode::OK, Json(json!(CATALOG.worlds())))
}

async fn list_creatures() -> impl IntoResponse {
    (StatusCode::OK, Json(json!(CATALOG.creatures_in_order())))
}

async fn get_creature(Path(id): Path<String>) -> Result<Json<Value>, GameError> {
    let creature = CATALOG
        .creature(&id)
        .ok_or_else(|| GameError::NotFound("Creature not found".into()))?;
    Ok(Json(json!(creature)))
}

// ── Player handlers ───────────────────────────────────────────────────

async fn create_player(State(state): State<AppState>) -> Result<impl IntoResponse, GameError> {
    let player_id = state.sessions.create_player().await?;
    Ok((StatusCode::CREATED, Json(json!({ "playerId": player_id }))))
}

async fn get_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, GameError> {
    let progress = state.sessions.progress(&id).await?;
    Ok(Json(json!(progress)))
}

async fn get_world_map(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, GameError> {
    let map = state.sessions.world_map(&id).await?;
    Ok(Json(json!(map)))
}

async fn get_battle(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, GameError> {
    let view = state.sessions.battle(&id).await?;
    Ok(Json(json!(view)))
}

async fn select_creature(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<SelectCreatureRequest>, JsonRejection>,
) -> Result<Json<Value>, GameError> {
    let Json(req) = payload?;
    let view = state.sessions.select_creature(&id, &req.creature_id).await?;
    Ok(Json(json!(view)))
}

async fn leave_battle(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, GameError> {
    let view = state.sessions.leave_battle(&id).await?;
    Ok(Json(json!(view)))
}

async fn reset_battle(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, GameError> {
    let view = state.sessions.reset_battle(&id).await?;
    Ok(Json(json!(view)))
}

async fn cast_spell(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<CastRequest>, JsonRejection>,
) -> Result<Json<Value>, GameError> {
    let Json(req) = payload?;
    let spell = req.spell.unwrap_or_default();
    let report = state.sessions.cast(&id, &spell).await?;
    Ok(Json(json!(report)))
}

async fn unlock_all(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, GameError> {
    let completed = state.sessions.unlock_all(&id).await?;
    Ok(Json(json!({ "completedStages": completed })))
}

// ── Documentation and metrics handlers ────────────────────────────────

async fn get_llms_txt() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        crate::llms_txt::LLMS_TXT,
    )
        .into_response()
}

async fn get_metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        metrics::gather_metrics(),
    )
        .into_response()
}
