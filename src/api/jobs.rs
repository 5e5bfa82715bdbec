use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{error::ApiError, response::ApiResponse, AppState};
use crate::domain::{AssetId, ConstraintOverrides, JobId, JobRequest, JobState, ObjectiveType};
use crate::optimizer::SolverKind;
use crate::orchestrator::{JobResult, JobStatus};

/// Body of `POST /api/v1/jobs`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitJobRequest {
    #[serde(default)]
    pub objective: ObjectiveType,
    #[validate(range(min = 1, max = 10080))]
    pub horizon_minutes: i64,
    #[validate(range(min = 1, max = 1440))]
    pub timestep_minutes: i64,
    #[validate(length(min = 1, max = 256))]
    pub asset_ids: Vec<AssetId>,
    #[serde(default)]
    pub overrides: ConstraintOverrides,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[validate(range(min = 1, max = 3600))]
    #[serde(default)]
    pub time_limit_secs: Option<u64>,
    #[serde(default)]
    pub solver: Option<SolverKind>,
}

impl From<SubmitJobRequest> for JobRequest {
    fn from(body: SubmitJobRequest) -> Self {
        JobRequest {
            objective: body.objective,
            horizon_secs: body.horizon_minutes * 60,
            timestep_secs: body.timestep_minutes * 60,
            asset_ids: body.asset_ids,
            overrides: body.overrides,
            start: body.start,
            time_limit_secs: body.time_limit_secs,
            solver_preference: body.solver,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubmittedJob {
    pub job_id: JobId,
    pub state: JobState,
}

#[derive(Debug, Serialize)]
pub struct CancelledJob {
    pub job_id: JobId,
    /// State observed when the request arrived
    pub state: JobState,
    pub cancellation_requested: bool,
}

/// POST /api/v1/jobs
pub async fn submit_job(
    State(state): State<AppState>,
    Json(body): Json<SubmitJobRequest>,
) -> Result<ApiResponse<SubmittedJob>, ApiError> {
    body.validate()?;
    let job_id = state.orchestrator.submit(body.into())?;
    tracing::info!(job_id = %job_id, "job accepted over HTTP");
    Ok(ApiResponse::accepted(SubmittedJob {
        job_id,
        state: JobState::Pending,
    }))
}

/// GET /api/v1/jobs
pub async fn list_jobs(State(state): State<AppState>) -> ApiResponse<Vec<JobStatus>> {
    let jobs = state.orchestrator.list_jobs();
    let count = jobs.len();
    ApiResponse::success(jobs).with_count(count)
}

/// GET /api/v1/jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> Result<ApiResponse<JobStatus>, ApiError> {
    Ok(ApiResponse::success(state.orchestrator.get_status(job_id)?))
}

/// GET /api/v1/jobs/:id/result
///
/// 409 while the job is still running.
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> Result<ApiResponse<JobResult>, ApiError> {
    match state.orchestrator.get_result(job_id)? {
        JobResult::Pending { state } => Err(ApiError::Conflict(format!("job {job_id} is still {state}"))),
        result => Ok(ApiResponse::success(result)),
    }
}

/// POST /api/v1/jobs/:id/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> Result<ApiResponse<CancelledJob>, ApiError> {
    let observed = state.orchestrator.cancel(job_id)?;
    Ok(ApiResponse::success(CancelledJob {
        job_id,
        state: observed,
        cancellation_requested: !observed.is_final(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_body_converts_minutes() {
        let body: SubmitJobRequest = serde_json::from_value(serde_json::json!({
            "objective": "peak_shaving",
            "horizon_minutes": 1440,
            "timestep_minutes": 15,
            "asset_ids": ["bat-1", "grid"],
            "solver": "minilp"
        }))
        .unwrap();
        assert!(body.validate().is_ok());

        let request = JobRequest::from(body);
        assert_eq!(request.horizon_secs, 86_400);
        assert_eq!(request.timestep_secs, 900);
        assert_eq!(request.objective, ObjectiveType::PeakShaving);
        assert_eq!(request.solver_preference, Some(SolverKind::Minilp));
    }

    #[test]
    fn test_submit_body_validation() {
        let body: SubmitJobRequest = serde_json::from_value(serde_json::json!({
            "horizon_minutes": 0,
            "timestep_minutes": 60,
            "asset_ids": []
        }))
        .unwrap();
        let errors = body.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("horizon_minutes"));
        assert!(fields.contains_key("asset_ids"));
    }
}
