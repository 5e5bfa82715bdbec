pub mod error;
pub mod health;
pub mod jobs;
pub mod response;

use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::Config;
use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            started_at: Utc::now(),
        }
    }
}

fn v1(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/jobs", post(jobs::submit_job).get(jobs::list_jobs))
        .route("/jobs/:id", get(jobs::get_job))
        .route("/jobs/:id/result", get(jobs::get_job_result))
        .route("/jobs/:id/cancel", post(jobs::cancel_job))
        .with_state(state)
}

pub fn router(state: AppState, cfg: &Config) -> Router {
    Router::new()
        .nest("/api/v1", v1(state))
        .layer(
            ServiceBuilder::new()
                .layer(axum::extract::DefaultBodyLimit::max(1024 * 1024))
                .layer(TimeoutLayer::new(Duration::from_secs(cfg.server.request_timeout_secs))),
        )
        .layer(TraceLayer::new_for_http())
}
