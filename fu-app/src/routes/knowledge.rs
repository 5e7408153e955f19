use crate::server::AppState;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Extension, Json};
use fu_store::KnowledgeSnippet;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/knowledge", post(upsert_snippet))
}

fn validate_snippet(snippet: &KnowledgeSnippet) -> Result<(), &'static str> {
    if snippet.id.trim().is_empty() {
        return Err("id must not be empty");
    }
    if snippet.title.trim().is_empty() {
        return Err("title must not be empty");
    }
    if snippet.summary.trim().is_empty() && snippet.content.trim().is_empty() {
        return Err("summary or content is required");
    }
    if !snippet.context_priority.is_finite() {
        return Err("context_priority must be a finite number");
    }
    Ok(())
}

#[tracing::instrument(level = "info", skip_all)]
async fn upsert_snippet(
    Extension(state): Extension<Arc<AppState>>,
    Json(snippet): Json<KnowledgeSnippet>,
) -> (StatusCode, Json<serde_json::Value>) {
    if let Err(error) = validate_snippet(&snippet) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "status": "error",
                "error": error,
            })),
        );
    }
    let id = snippet.id.clone();
    let retrievable = snippet.is_retrievable();
    match state.store.upsert_snippet(snippet).await {
        Ok(()) => {
            tracing::info!(snippet_id = %id, retrievable, "knowledge snippet upserted");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "status": "upserted",
                    "id": id,
                    "retrievable": retrievable,
                })),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "knowledge snippet upsert failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "status": "error",
                    "error": e.to_string(),
                })),
            )
        }
    }
}
