use crate::server::AppState;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use fu_store::FollowUpStore;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/health", get(get_health))
        .route("/api/v1/availability", get(get_availability))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(
    Extension(state): Extension<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let now = Utc::now();
    let scheduler = state.scheduler.status().await;
    let (store_ok, store_error) = match state.store.stats(now).await {
        Ok(_) => (true, None),
        Err(e) => {
            tracing::error!(error = %e, "health store probe failed");
            (false, Some(e.to_string()))
        }
    };

    let code = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(serde_json::json!({
            "status": if store_ok { "ok" } else { "degraded" },
            "ready": store_ok,
            "checked_at": now,
            "checks": {
                "store": {
                    "ok": store_ok,
                    "error": store_error,
                },
                "scheduler": {
                    "enabled": state.scheduler_enabled,
                    "is_running": scheduler.is_running,
                    "last_run_finished_at": scheduler.last_run_finished_at,
                },
                "llm": {
                    "configured": state.llm_configured,
                }
            }
        })),
    )
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_availability(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let now = Utc::now();
    let availability = state.hours.is_available(now);
    let next_return_time = state.hours.next_return_time(now, availability.status);
    Json(serde_json::json!({
        "status": "ok",
        "available": availability.available,
        "operator_status": availability.status,
        "next_return_time": next_return_time,
        "timezone": state.hours.timezone.name(),
        "checked_at": now,
    }))
}
