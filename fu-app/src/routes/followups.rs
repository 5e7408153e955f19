use crate::intake::{AutoReplyEvent, IntakeError};
use crate::server::AppState;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json};
use chrono::Utc;
use fu_store::{CancelOutcome, FollowUpId, FollowUpStatus, FollowUpStore};
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/followups", get(list).post(register))
        .route("/api/v1/followups/stats", get(stats))
        .route("/api/v1/followups/{follow_up_id}", get(get_one))
        .route("/api/v1/followups/{follow_up_id}/cancel", post(cancel))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

fn error_body(status: &str, error: impl Into<String>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": status,
        "error": error.into(),
    }))
}

fn store_error(e: impl std::fmt::Display) -> (StatusCode, Json<serde_json::Value>) {
    tracing::error!(error = %e, "follow-up store request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        error_body("error", e.to_string()),
    )
}

#[tracing::instrument(level = "info", skip_all)]
async fn register(
    Extension(state): Extension<Arc<AppState>>,
    Json(event): Json<AutoReplyEvent>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.intake.register(event, Utc::now()).await {
        Ok(record) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "status": "created",
                "follow_up": record,
            })),
        ),
        Err(e @ (IntakeError::EmptyMessage | IntakeError::MissingField(_))) => {
            (StatusCode::BAD_REQUEST, error_body("error", e.to_string()))
        }
        Err(IntakeError::Store(e)) => store_error(e),
    }
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> (StatusCode, Json<serde_json::Value>) {
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match raw.parse::<FollowUpStatus>() {
            Ok(s) => Some(s),
            Err(e) => return (StatusCode::BAD_REQUEST, error_body("error", e.to_string())),
        },
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    match state.store.list(status, limit).await {
        Ok(records) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "count": records.len(),
                "follow_ups": records,
            })),
        ),
        Err(e) => store_error(e),
    }
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_one(
    Path(follow_up_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.store.get(&FollowUpId::new(follow_up_id.clone())).await {
        Ok(Some(record)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "follow_up": record,
            })),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            error_body("not_found", format!("follow-up not found: {follow_up_id}")),
        ),
        Err(e) => store_error(e),
    }
}

#[tracing::instrument(level = "info", skip_all)]
async fn cancel(
    Path(follow_up_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let id = FollowUpId::new(follow_up_id);
    match state.intake.cancel(&id, Utc::now()).await {
        Ok(CancelOutcome::Cancelled) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "cancelled",
                "follow_up_id": id,
            })),
        ),
        Ok(CancelOutcome::AlreadyTerminal { status }) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "status": "already_terminal",
                "follow_up_id": id,
                "follow_up_status": status,
            })),
        ),
        Ok(CancelOutcome::NotFound) => (
            StatusCode::NOT_FOUND,
            error_body("not_found", format!("follow-up not found: {id}")),
        ),
        Err(e) => store_error(e),
    }
}

#[tracing::instrument(level = "debug", skip_all)]
async fn stats(Extension(state): Extension<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    match state.store.stats(Utc::now()).await {
        Ok(stats) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "stats": stats,
            })),
        ),
        Err(e) => store_error(e),
    }
}
