use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{response::ApiResponse, AppState};
use crate::optimizer::SolverKind;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub started_at: DateTime<Utc>,
    pub backends: Vec<SolverKind>,
    pub active_jobs: usize,
}

/// GET /api/v1/healthz
pub async fn healthz(State(state): State<AppState>) -> ApiResponse<HealthResponse> {
    let active_jobs = state
        .orchestrator
        .list_jobs()
        .iter()
        .filter(|j| !j.state.is_final())
        .count();
    ApiResponse::success(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at,
        backends: state.orchestrator.backends(),
        active_jobs,
    })
}
