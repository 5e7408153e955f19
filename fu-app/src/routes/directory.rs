use crate::server::AppState;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json};
use fu_store::{ConversationId, Profile, UserId};
use serde::Deserialize;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/profiles", post(upsert_profile))
        .route(
            "/api/v1/conversations/{conversation_id}/messages",
            get(conversation_messages),
        )
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpsertProfileRequest {
    user_id: UserId,
    first_name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    conversation_ids: Vec<ConversationId>,
}

fn error_response(code: StatusCode, error: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (
        code,
        Json(serde_json::json!({
            "status": "error",
            "error": error.into(),
        })),
    )
}

#[tracing::instrument(level = "info", skip_all)]
async fn upsert_profile(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<UpsertProfileRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    if request.user_id.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "user_id must not be empty");
    }
    if request
        .conversation_ids
        .iter()
        .any(|id| id.trim().is_empty())
    {
        return error_response(StatusCode::BAD_REQUEST, "conversation ids must not be empty");
    }

    let profile = Profile {
        user_id: request.user_id.clone(),
        first_name: request.first_name.trim().to_string(),
        display_name: request.display_name,
    };
    if let Err(e) = state.store.upsert_profile(profile).await {
        tracing::error!(error = %e, "profile upsert failed");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    for conversation_id in &request.conversation_ids {
        if let Err(e) = state
            .store
            .add_participant(conversation_id, &request.user_id)
            .await
        {
            tracing::error!(error = %e, %conversation_id, "participant insert failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    }

    tracing::info!(
        user_id = %request.user_id,
        conversations = request.conversation_ids.len(),
        "profile upserted"
    );
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "upserted",
            "user_id": request.user_id,
            "conversation_ids": request.conversation_ids,
        })),
    )
}

#[tracing::instrument(level = "debug", skip_all)]
async fn conversation_messages(
    Path(conversation_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let conversation_id = ConversationId::new(conversation_id);
    match state.store.conversation_messages(&conversation_id).await {
        Ok(messages) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "conversation_id": conversation_id,
                "messages": messages,
            })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "conversation log read failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
