//! Follow-up daemon server.
//!
//! Wires the store, classifier, answer generator, dispatcher and scheduler
//! together and mounts the admin routes.

use crate::answer::{AnswerGenerator, AnswerSource, LlmAnswerSource};
use crate::availability::BusinessHours;
use crate::classifier::{Classifier, FallbackClassifier, LlmClassifier};
use crate::composer::Composer;
use crate::config::FollowUpConfig;
use crate::dispatcher::{DispatchSettings, Dispatcher};
use crate::http_auth::{self, AdminAuthPolicy, AdminAuthPolicyExt};
use crate::intake::FollowUpIntake;
use crate::routes;
use crate::scheduler::FollowUpScheduler;
use anyhow::Result;
use axum::Extension;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use chrono::Utc;
use fu_llm::{ChatCompletion, CompletionOptions, LlmClient};
use fu_store::{FollowUpStore, SqliteStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub store: SqliteStore,
    pub hours: BusinessHours,
    pub intake: FollowUpIntake,
    pub scheduler: Arc<FollowUpScheduler>,
    pub scheduler_enabled: bool,
    pub llm_configured: bool,
}

fn build_llm_client(cfg: &FollowUpConfig) -> Option<Arc<dyn ChatCompletion>> {
    let Some(api_key) = cfg.api_key_for_model() else {
        tracing::warn!(
            llm_enabled = cfg.llm.enabled,
            model = %cfg.llm.model,
            "no llm key configured; using rule-based classification and fixed answers"
        );
        return None;
    };
    let mut client = LlmClient::new(&api_key, &cfg.llm.model).with_timeout(cfg.llm_timeout());
    if let Some(base_url) = cfg
        .llm
        .base_url
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        client = client.with_base_url(base_url);
    }
    tracing::info!(
        provider = ?client.provider(),
        model = %client.model(),
        "llm client configured"
    );
    Some(Arc::new(client))
}

/// Assemble the runtime around an already opened store.
pub fn build_state(cfg: &FollowUpConfig, store: SqliteStore) -> Result<AppState> {
    let hours = cfg.business_hours()?;
    let llm = build_llm_client(cfg);
    let llm_configured = llm.is_some();

    let classifier_llm = llm.clone().map(|llm| {
        Arc::new(LlmClassifier::new(
            llm,
            CompletionOptions {
                temperature: cfg.llm.classifier_temperature,
                max_tokens: cfg.llm.classifier_max_tokens,
            },
        )) as Arc<dyn Classifier>
    });
    let classifier = Arc::new(
        FallbackClassifier::new(classifier_llm)
            .map_err(|e| anyhow::anyhow!("compile classifier rules: {e}"))?,
    );

    let answer_llm = llm.map(|llm| {
        Arc::new(LlmAnswerSource::new(
            llm,
            Arc::new(store.clone()),
            CompletionOptions {
                temperature: cfg.llm.answer_temperature,
                max_tokens: cfg.llm.answer_max_tokens,
            },
        )) as Arc<dyn AnswerSource>
    });
    let answers = Arc::new(AnswerGenerator::new(answer_llm));

    let shared: Arc<SqliteStore> = Arc::new(store.clone());
    let dispatcher = Arc::new(Dispatcher::new(
        shared.clone(),
        shared.clone(),
        shared.clone(),
        answers,
        Composer::new(hours),
        DispatchSettings::from_config(&cfg.dispatch),
    ));
    let scheduler = Arc::new(FollowUpScheduler::new(
        dispatcher,
        Duration::from_secs(cfg.scheduler.interval_seconds),
    ));
    let intake = FollowUpIntake::new(shared, classifier, hours);

    Ok(AppState {
        store,
        hours,
        intake,
        scheduler,
        scheduler_enabled: cfg.scheduler.enabled,
        llm_configured,
    })
}

/// Admin routes with auth and shared state attached.
pub fn api_router(state: Arc<AppState>, policy: AdminAuthPolicy) -> axum::Router {
    routes::router()
        .layer(axum::middleware::from_fn(http_auth::require_admin_auth))
        .layer(Extension(AdminAuthPolicyExt(policy)))
        .layer(Extension(state))
}

async fn open_store(cfg: &FollowUpConfig) -> Result<SqliteStore> {
    let path = cfg.database_path();
    let open_path = path.clone();
    let store = tokio::task::spawn_blocking(move || SqliteStore::open(&open_path))
        .await
        .map_err(|e| anyhow::anyhow!("open store task failed: {e}"))?
        .map_err(|e| anyhow::anyhow!("open store {}: {e}", path.display()))?;
    tracing::info!(database_path = %path.display(), "store opened");
    Ok(store)
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = FollowUpConfig::load(config_path).await?;
    let hours = cfg.business_hours()?;
    let store = open_store(&cfg).await?;
    let now = Utc::now();
    let stats = store.stats(now).await?;
    let availability = hours.is_available(now);
    tracing::info!(
        model = %cfg.llm.model,
        llm_key_present = cfg.api_key_for_model().is_some(),
        timezone = hours.timezone.name(),
        operator_status = ?availability.status,
        pending = stats.pending,
        due = stats.due,
        failed = stats.failed,
        "config ok"
    );
    Ok(())
}

/// One dispatch pass outside the server; prints the report as JSON.
pub async fn dispatch_once(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = FollowUpConfig::load(config_path).await?;
    let store = open_store(&cfg).await?;
    let state = build_state(&cfg, store)?;
    let report = state.scheduler.trigger_once().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = FollowUpConfig::load(config_path).await?;
    let addr: SocketAddr = cfg
        .server
        .bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid server.bind_addr {:?}: {e}", cfg.server.bind_addr))?;
    let listener = preflight_bind_listener(addr).await?;

    let store = open_store(&cfg).await?;
    let state = Arc::new(build_state(&cfg, store)?);
    let shutdown = CancellationToken::new();

    if cfg.scheduler.enabled && cfg.scheduler.autostart {
        state.scheduler.start(None).await;
    } else {
        tracing::info!(
            enabled = cfg.scheduler.enabled,
            autostart = cfg.scheduler.autostart,
            "follow-up scheduler not started automatically"
        );
    }

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers()),
                "http request started"
            );
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = api_router(state.clone(), AdminAuthPolicy::from_config(&cfg.server))
        .layer(GlobalConcurrencyLimitLayer::new(cfg.server.http_max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.server.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    tracing::info!(%addr, "followupd serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");

    shutdown.cancel();
    state.scheduler.stop().await;
    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tracing::info!(%addr, "preflight bind check starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
    shutdown.cancel();
}
