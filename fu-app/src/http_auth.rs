use crate::config::ServerConfig;
use axum::Json;
use axum::body::Body;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, Clone, Default)]
pub struct AdminAuthPolicy {
    /// When unset, mutating requests are accepted without a token.
    pub admin_token: Option<String>,
}

impl AdminAuthPolicy {
    pub fn from_config(cfg: &ServerConfig) -> Self {
        let admin_token = cfg
            .admin_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string);
        Self { admin_token }
    }
}

#[derive(Debug, Clone)]
pub struct AdminAuthPolicyExt(pub AdminAuthPolicy);

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn parse_bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let mut parts = raw.trim().splitn(2, char::is_whitespace);
    let scheme = parts.next()?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = parts.next()?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

fn unauthorized(code: &str, message: &str) -> Response {
    tracing::warn!(error_code = code, error = %message, "admin auth rejected");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "status": "error",
            "error": message,
            "error_code": code,
        })),
    )
        .into_response()
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn require_admin_auth(req: Request<Body>, next: Next) -> Response {
    if !is_mutating(req.method()) {
        return next.run(req).await;
    }

    let policy = req
        .extensions()
        .get::<AdminAuthPolicyExt>()
        .map(|v| v.0.clone())
        .unwrap_or_default();
    let Some(expected) = policy.admin_token else {
        return next.run(req).await;
    };

    let Some(provided) = parse_bearer_token(req.headers()) else {
        return unauthorized("missing_bearer_token", "missing bearer token");
    };
    if provided != expected {
        return unauthorized("invalid_bearer_token", "invalid bearer token");
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::to_bytes;
    use axum::routing::post;
    use axum::{Extension, middleware};
    use tower::util::ServiceExt;

    fn build_router(policy: AdminAuthPolicy) -> Router {
        Router::new()
            .route(
                "/api/v1/scheduler/trigger",
                post(|| async { Json(json!({ "status": "ok" })) })
                    .get(|| async { Json(json!({ "status": "ok" })) }),
            )
            .layer(middleware::from_fn(require_admin_auth))
            .layer(Extension(AdminAuthPolicyExt(policy)))
    }

    fn secured() -> AdminAuthPolicy {
        AdminAuthPolicy {
            admin_token: Some("s3cret".into()),
        }
    }

    async fn send(router: Router, method: &str, auth: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method(method)
            .uri("/api/v1/scheduler/trigger");
        if let Some(auth) = auth {
            builder = builder.header(AUTHORIZATION, auth);
        }
        router
            .oneshot(builder.body(Body::empty()).expect("request"))
            .await
            .expect("response")
    }

    async fn error_code(response: Response) -> Option<String> {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        let value: serde_json::Value = serde_json::from_slice(&body).expect("response json");
        value
            .get("error_code")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    #[test]
    fn blank_configured_token_disables_auth() {
        let cfg = ServerConfig {
            admin_token: Some("   ".into()),
            ..ServerConfig::default()
        };
        assert!(AdminAuthPolicy::from_config(&cfg).admin_token.is_none());
    }

    #[test]
    fn parse_bearer_token_accepts_case_insensitive_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            "bEaReR   token-value".parse().expect("header value"),
        );
        assert_eq!(parse_bearer_token(&headers).as_deref(), Some("token-value"));
        headers.insert(AUTHORIZATION, "Basic abc".parse().expect("header value"));
        assert!(parse_bearer_token(&headers).is_none());
    }

    #[tokio::test]
    async fn mutating_request_without_token_is_rejected() {
        let response = send(build_router(secured()), "POST", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(response).await.as_deref(), Some("missing_bearer_token"));
    }

    #[tokio::test]
    async fn mutating_request_with_wrong_token_is_rejected() {
        let response = send(build_router(secured()), "POST", Some("Bearer nope")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(response).await.as_deref(), Some("invalid_bearer_token"));
    }

    #[tokio::test]
    async fn matching_token_and_reads_pass() {
        let ok = send(build_router(secured()), "POST", Some("Bearer s3cret")).await;
        assert_eq!(ok.status(), StatusCode::OK);
        let read = send(build_router(secured()), "GET", None).await;
        assert_eq!(read.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn open_policy_allows_mutations() {
        let response = send(build_router(AdminAuthPolicy::default()), "POST", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
