use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use serde::Deserialize;
use tracing::error;

use super::db::DbHandle;
#[cfg(test)]
use super::db::BoardDb;
use super::models::{NewItem, StagePosition};
use crate::errors::{ErrorCategory, TrackerError};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreatePipelineRequest {
    pub name: String,
    pub stages: Vec<String>,
}

#[derive(Deserialize)]
pub struct AddStageRequest {
    pub name: String,
    #[serde(default = "default_position")]
    pub position: StagePosition,
}

fn default_position() -> StagePosition {
    StagePosition::END
}

#[derive(Deserialize)]
pub struct RenameStageRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct PutRuleRequest {
    pub template_title: String,
    pub offset_days: i64,
}

#[derive(Deserialize)]
pub struct MoveItemRequest {
    pub stage_id: i64,
    /// Stage the client last saw the item in. When set, the move only
    /// succeeds if the item is still there.
    pub expected_stage_id: Option<i64>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict { message: String, retryable: bool },
    Internal(String),
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => ErrorCategory::Validation.as_str(),
            ApiError::NotFound(_) => ErrorCategory::NotFound.as_str(),
            ApiError::Conflict { .. } => ErrorCategory::Conflict.as_str(),
            ApiError::Internal(_) => ErrorCategory::Persistence.as_str(),
        }
    }
}

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        let message = err.to_string();
        match err.category() {
            ErrorCategory::Validation => ApiError::BadRequest(message),
            ErrorCategory::NotFound => ApiError::NotFound(message),
            ErrorCategory::Conflict => ApiError::Conflict {
                retryable: err.is_retryable(),
                message,
            },
            ErrorCategory::Persistence => ApiError::Internal(message),
        }
    }
}

/// `DbHandle::call` wraps domain errors in `anyhow`; recover the category.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<TrackerError>() {
            Ok(tracker) => tracker.into(),
            Err(other) => ApiError::Internal(other.to_string()),
        }
    }
}

/// Malformed or incomplete request bodies are validation failures.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let (status, message, retryable) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, false),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, false),
            ApiError::Conflict { message, retryable } => (StatusCode::CONFLICT, message, retryable),
            ApiError::Internal(msg) => {
                error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg, false)
            }
        };
        (
            status,
            Json(serde_json::json!({"error": message, "kind": kind, "retryable": retryable})),
        )
            .into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/pipelines", get(list_pipelines).post(create_pipeline))
        .route("/api/pipelines/{id}", get(get_pipeline))
        .route("/api/pipelines/{id}/stages", post(add_stage))
        .route("/api/pipelines/{id}/report", get(pipeline_report))
        .route(
            "/api/stages/{id}",
            patch(rename_stage).delete(delete_stage),
        )
        .route("/api/stages/{id}/rule", put(put_rule).delete(delete_rule))
        .route("/api/items", post(create_item))
        .route("/api/items/{id}", get(get_item).delete(delete_item))
        .route("/api/items/{id}/move", post(move_item))
        .route("/api/reports/velocity", get(velocity_report))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_pipelines(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let pipelines = state.db.call(|db| db.list_pipelines()).await?;
    Ok(Json(pipelines))
}

async fn create_pipeline(
    State(state): State<SharedState>,
    payload: Result<Json<CreatePipelineRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let created = state
        .db
        .call(move |db| db.create_pipeline(&req.name, &req.stages))
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_pipeline(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let pipeline = state
        .db
        .call(move |db| db.get_pipeline_with_stages(id))
        .await?;
    Ok(Json(pipeline))
}

async fn add_stage(
    State(state): State<SharedState>,
    Path(pipeline_id): Path<i64>,
    payload: Result<Json<AddStageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let stage = state
        .db
        .call(move |db| db.add_stage(pipeline_id, &req.name, req.position))
        .await?;
    Ok((StatusCode::CREATED, Json(stage)))
}

async fn rename_stage(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    payload: Result<Json<RenameStageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let stage = state
        .db
        .call(move |db| db.rename_stage(id, &req.name))
        .await?;
    Ok(Json(stage))
}

async fn delete_stage(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.call(move |db| db.delete_stage(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn put_rule(
    State(state): State<SharedState>,
    Path(stage_id): Path<i64>,
    payload: Result<Json<PutRuleRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let (rule, created) = state
        .db
        .call(move |db| db.put_rule(stage_id, &req.template_title, req.offset_days))
        .await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(rule)))
}

async fn delete_rule(
    State(state): State<SharedState>,
    Path(stage_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.call(move |db| db.delete_rule(stage_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_item(
    State(state): State<SharedState>,
    payload: Result<Json<NewItem>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let item = state.db.call(move |db| db.create_item(req)).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn get_item(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state.db.call(move |db| db.item_detail(id)).await?;
    Ok(Json(detail))
}

async fn move_item(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    payload: Result<Json<MoveItemRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let item = state
        .db
        .call(move |db| {
            let snapshot = db.require_item(id)?;
            if req
                .expected_stage_id
                .is_some_and(|expected| expected != snapshot.stage_id)
            {
                return Err(TrackerError::TransitionConflict { item_id: id });
            }
            db.move_item_from(&snapshot, req.stage_id)
        })
        .await?;
    Ok(Json(item))
}

async fn delete_item(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.call(move |db| db.delete_item(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn pipeline_report(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.db.call(move |db| db.get_pipeline_report(id)).await?;
    Ok(Json(report))
}

async fn velocity_report(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let report = state
        .db
        .call(|db| db.get_pipeline_velocity_report())
        .await?;
    Ok(Json(report))
}

// ── Tests ─────────────────────────────────────────────────────────────
