use crate::server::AppState;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/scheduler/status", get(status))
        .route("/api/v1/scheduler/start", post(start))
        .route("/api/v1/scheduler/stop", post(stop))
        .route("/api/v1/scheduler/trigger", post(trigger))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StartSchedulerRequest {
    #[serde(default)]
    interval_seconds: Option<u64>,
}

fn parse_start_request(body: &[u8]) -> Result<StartSchedulerRequest, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(StartSchedulerRequest::default());
    }
    let request: StartSchedulerRequest =
        serde_json::from_slice(body).map_err(|e| format!("invalid start request: {e}"))?;
    if request.interval_seconds == Some(0) {
        return Err("interval_seconds must be > 0".to_string());
    }
    Ok(request)
}

#[tracing::instrument(level = "debug", skip_all)]
async fn status(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let snapshot = state.scheduler.status().await;
    Json(serde_json::json!({
        "status": "ok",
        "enabled": state.scheduler_enabled,
        "scheduler": snapshot,
    }))
}

#[tracing::instrument(level = "info", skip_all)]
async fn start(
    Extension(state): Extension<Arc<AppState>>,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    if !state.scheduler_enabled {
        return (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "status": "disabled",
                "error": "scheduler is disabled in configuration",
            })),
        );
    }
    let request = match parse_start_request(&body) {
        Ok(r) => r,
        Err(error) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "status": "error",
                    "error": error,
                })),
            );
        }
    };

    let started = state
        .scheduler
        .start(request.interval_seconds.map(Duration::from_secs))
        .await;
    let snapshot = state.scheduler.status().await;
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": if started { "started" } else { "already_running" },
            "scheduler": snapshot,
        })),
    )
}

#[tracing::instrument(level = "info", skip_all)]
async fn stop(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let stopped = state.scheduler.stop().await;
    let snapshot = state.scheduler.status().await;
    Json(serde_json::json!({
        "status": if stopped { "stopped" } else { "not_running" },
        "scheduler": snapshot,
    }))
}

#[tracing::instrument(level = "info", skip_all)]
async fn trigger(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let report = state.scheduler.trigger_once().await;
    tracing::info!(
        processed = report.processed,
        sent = report.sent,
        failed = report.failed,
        skipped = report.skipped,
        "manual dispatch pass completed"
    );
    Json(serde_json::json!({
        "status": "ok",
        "report": report,
    }))
}

#[cfg(test)]
mod tests {
    use super::parse_start_request;

    #[test]
    fn empty_body_starts_with_configured_interval() {
        let request = parse_start_request(b"").expect("empty body");
        assert_eq!(request.interval_seconds, None);
        let request = parse_start_request(b"  \n").expect("whitespace body");
        assert_eq!(request.interval_seconds, None);
    }

    #[test]
    fn explicit_interval_is_parsed_and_zero_rejected() {
        let request = parse_start_request(br#"{"interval_seconds": 15}"#).expect("interval");
        assert_eq!(request.interval_seconds, Some(15));
        assert!(parse_start_request(br#"{"interval_seconds": 0}"#).is_err());
        assert!(parse_start_request(br#"{"every": 5}"#).is_err());
    }
}
