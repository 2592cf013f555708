//! HTTP routes for the compilation service.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use texforge_core::metrics::MetricsSnapshot;
use texforge_core::{BuildOutcome, BuildRequest, BuildResponse, Compiler, ProbeReport, StatusProbe, METRICS};

use crate::error::ApiError;

/// Application state shared across handlers.
pub struct AppState {
    pub compiler: Compiler,
    /// Kept for the process lifetime so the image-presence cache survives requests.
    pub probe: StatusProbe,
}

impl AppState {
    pub fn new(compiler: Compiler) -> Self {
        let probe = compiler.status_probe();
        Self { compiler, probe }
    }
}

/// Create the router with all routes.
pub fn create_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .route("/compile", post(compile_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: texforge_core::VERSION,
    })
}

#[derive(Debug, Default, Deserialize)]
struct StatusQuery {
    /// Drop cached image answers before probing.
    #[serde(default)]
    refresh: bool,
}

async fn status_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Json<ProbeReport> {
    if query.refresh {
        state.probe.cache().invalidate();
    }
    Json(state.probe.probe().await)
}

async fn metrics_handler() -> Json<MetricsSnapshot> {
    Json(METRICS.snapshot())
}

async fn compile_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BuildRequest>,
) -> Result<Json<BuildResponse>, ApiError> {
    match state.compiler.build(request).await? {
        BuildOutcome::Finished(response) => Ok(Json(response)),
        BuildOutcome::TimedOut {
            timeout_ms,
            response,
        } => Err(ApiError::TimedOut {
            timeout_ms,
            response: Box::new(response),
        }),
        BuildOutcome::RuntimeUnavailable { message } => Err(ApiError::RuntimeUnavailable(message)),
    }
}
