//! Job lifecycle management.
//!
//! The [`Orchestrator`] accepts submissions, runs each job through
//! `PENDING -> BUILDING -> SOLVING -> terminal -> PERSISTED` on its own tokio
//! task, and answers status and result queries. Jobs share nothing mutable: each
//! runner owns the write side of its [`JobHandle`].

mod job_runner;
pub(crate) mod persistence;

use chrono::{DateTime, TimeZone, Utc};
use itertools::Itertools;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::{
    Diagnostic, JobId, JobRequest, JobState, ModelSettings, ObjectiveType, OptimizationJob, ProgressHint, SolveAttempt,
    Solution,
};
use crate::error::{EngineError, SpecificationError};
use crate::optimizer::{AbortHandle, ResultExtractor, SolverAdapter};
use crate::repo::{AssetRegistry, ForecastService, JobStore};

/// Point-in-time view of a job, as returned by [`Orchestrator::get_status`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persisted_from: Option<JobState>,
    pub objective: ObjectiveType,
    pub progress: ProgressHint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<Diagnostic>,
    /// Solver calls made so far, including a fallback retry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<SolveAttempt>,
    pub persist_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatus {
    fn of(job: &OptimizationJob) -> Self {
        Self {
            job_id: job.id,
            state: job.state,
            persisted_from: job.persisted_from,
            objective: job.request.objective,
            progress: job.progress(),
            diagnostic: job.diagnostic.clone(),
            attempts: job.attempts.clone(),
            persist_attempts: job.persist_attempts,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// What `get_result` hands back: a Solution only for solved jobs, a diagnostic
/// for every other terminal outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobResult {
    Solved { solution: Arc<Solution> },
    Unsuccessful { state: JobState, diagnostic: Diagnostic },
    Pending { state: JobState },
}

pub(crate) struct JobHandle {
    pub(crate) job: RwLock<OptimizationJob>,
    pub(crate) cancel: CancellationToken,
    pub(crate) abort: AbortHandle,
    state_tx: watch::Sender<JobState>,
}

impl JobHandle {
    fn new(job: OptimizationJob) -> Self {
        let (state_tx, _) = watch::channel(job.state);
        Self {
            job: RwLock::new(job),
            cancel: CancellationToken::new(),
            abort: AbortHandle::new(),
            state_tx,
        }
    }

    pub(crate) fn id(&self) -> JobId {
        self.job.read().id
    }

    pub(crate) fn state(&self) -> JobState {
        self.job.read().state
    }

    /// Move the job to `next`, logging the change; illegal transitions are refused
    pub(crate) fn transition(&self, next: JobState) -> bool {
        let mut job = self.job.write();
        let from = job.state;
        if !job.transition(next) {
            warn!(job_id = %job.id, from = %from, to = %next, "illegal job transition refused");
            return false;
        }
        info!(job_id = %job.id, from = %from, to = %next, "job state changed");
        drop(job);
        self.state_tx.send_replace(next);
        true
    }

    /// Record the outcome and enter the terminal state in one step
    pub(crate) fn finish(&self, state: JobState, solution: Option<Solution>, diagnostic: Option<Diagnostic>) {
        {
            let mut job = self.job.write();
            job.solution = solution.map(Arc::new);
            job.diagnostic = diagnostic;
        }
        self.transition(state);
    }
}

pub(crate) struct Inner {
    pub(crate) config: Config,
    pub(crate) adapter: SolverAdapter,
    pub(crate) registry: Arc<dyn AssetRegistry>,
    pub(crate) forecasts: Arc<dyn ForecastService>,
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) extractor: ResultExtractor,
    pub(crate) pool: Arc<Semaphore>,
    jobs: RwLock<HashMap<JobId, Arc<JobHandle>>>,
    shutdown: CancellationToken,
}

impl Inner {
    pub(crate) fn model_settings(&self) -> ModelSettings {
        let engine = &self.config.engine;
        ModelSettings {
            peak_tariff_per_kw: engine.default_peak_tariff_per_kw,
            exclusivity_penalty_per_kwh: engine.exclusivity_penalty_per_kwh,
            quadratic_segments: engine.quadratic_segments.max(1),
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        adapter: SolverAdapter,
        registry: Arc<dyn AssetRegistry>,
        forecasts: Arc<dyn ForecastService>,
        store: Arc<dyn JobStore>,
    ) -> Self {
        let permits = config.engine.max_concurrent_jobs.max(1);
        info!(
            max_concurrent_jobs = permits,
            backends = ?adapter.kinds(),
            "orchestrator ready"
        );
        Self {
            inner: Arc::new(Inner {
                extractor: ResultExtractor::new(config.engine.validation_tolerance),
                pool: Arc::new(Semaphore::new(permits)),
                config,
                adapter,
                registry,
                forecasts,
                store,
                jobs: RwLock::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Validate a request against the forecast service and queue it.
    ///
    /// Rejected requests never create a job.
    pub fn submit(&self, request: JobRequest) -> Result<JobId, EngineError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }
        self.check_request(&request)?;

        let start = request.start.unwrap_or_else(|| floor_to_step(Utc::now(), request.timestep_secs));
        let time_limit = request
            .time_limit_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.inner.config.engine.default_time_limit());
        let job = OptimizationJob::new(request, start, time_limit);
        let id = job.id;
        info!(
            job_id = %id,
            objective = %job.request.objective,
            steps = job.request.horizon_secs / job.request.timestep_secs,
            assets = job.request.asset_ids.len(),
            "job submitted"
        );

        let handle = Arc::new(JobHandle::new(job));
        self.inner.jobs.write().insert(id, handle.clone());
        tokio::spawn(job_runner::run(self.inner.clone(), handle));
        Ok(id)
    }

    fn check_request(&self, request: &JobRequest) -> Result<(), SpecificationError> {
        let timestep = request.timestep_secs;
        let horizon = request.horizon_secs;
        if timestep <= 0 {
            return Err(SpecificationError::InvalidTimestep { seconds: timestep });
        }
        if horizon <= 0 {
            return Err(SpecificationError::EmptyHorizon);
        }
        if horizon % timestep != 0 {
            return Err(SpecificationError::HorizonNotMultiple {
                horizon_secs: horizon as u64,
                timestep_secs: timestep as u64,
            });
        }

        let granularity = self.inner.forecasts.granularity().num_seconds();
        if granularity > 0 && timestep % granularity != 0 {
            return Err(SpecificationError::GranularityMismatch {
                timestep_secs: timestep as u64,
                granularity_secs: granularity as u64,
            });
        }
        let available = self.inner.forecasts.max_horizon().num_seconds();
        if horizon > available {
            return Err(SpecificationError::HorizonBeyondForecast {
                requested_secs: horizon as u64,
                available_secs: available.max(0) as u64,
            });
        }

        if request.asset_ids.is_empty() {
            return Err(SpecificationError::NoAssets);
        }
        if let Some(dup) = request.asset_ids.iter().duplicates().next() {
            return Err(SpecificationError::DuplicateAsset {
                asset: dup.to_string(),
            });
        }
        if request.time_limit_secs == Some(0) {
            return Err(SpecificationError::InvalidTimeLimit);
        }
        Ok(())
    }

    fn handle(&self, id: JobId) -> Result<Arc<JobHandle>, EngineError> {
        self.inner.jobs.read().get(&id).cloned().ok_or(EngineError::JobNotFound(id))
    }

    pub fn get_status(&self, id: JobId) -> Result<JobStatus, EngineError> {
        let handle = self.handle(id)?;
        let job = handle.job.read();
        Ok(JobStatus::of(&job))
    }

    pub fn get_result(&self, id: JobId) -> Result<JobResult, EngineError> {
        let handle = self.handle(id)?;
        let job = handle.job.read();
        let outcome = job.outcome();
        let result = match (outcome, &job.solution, &job.diagnostic) {
            (JobState::Solved, Some(solution), _) => JobResult::Solved {
                solution: solution.clone(),
            },
            (state, _, Some(diagnostic)) if state.is_terminal() => JobResult::Unsuccessful {
                state,
                diagnostic: diagnostic.clone(),
            },
            (state, ..) => JobResult::Pending { state },
        };
        Ok(result)
    }

    /// Request cancellation; a no-op for jobs that already finished.
    ///
    /// Returns the state observed at the time of the call.
    pub fn cancel(&self, id: JobId) -> Result<JobState, EngineError> {
        let handle = self.handle(id)?;
        let state = handle.state();
        if !state.is_final() {
            info!(job_id = %id, state = %state, "cancellation requested");
            handle.cancel.cancel();
            handle.abort.abort();
        }
        Ok(state)
    }

    /// All known jobs, oldest first
    pub fn list_jobs(&self) -> Vec<JobStatus> {
        let mut jobs: Vec<JobStatus> = self
            .inner
            .jobs
            .read()
            .values()
            .map(|h| JobStatus::of(&h.job.read()))
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// Resolve once the job's state satisfies `ready`
    pub async fn wait_until(&self, id: JobId, ready: impl Fn(JobState) -> bool) -> Result<JobState, EngineError> {
        let handle = self.handle(id)?;
        let mut rx = handle.state_tx.subscribe();
        let state = *rx
            .wait_for(|s| ready(*s))
            .await
            .map_err(|_| EngineError::JobNotFound(id))?;
        Ok(state)
    }

    /// Resolve once the job reached its computed outcome (persisted or not)
    pub async fn wait_for_outcome(&self, id: JobId) -> Result<JobState, EngineError> {
        self.wait_until(id, |s| s.is_final()).await?;
        Ok(self.handle(id)?.job.read().outcome())
    }

    /// Resolve once the job was written to the store
    pub async fn wait_for_persisted(&self, id: JobId) -> Result<JobState, EngineError> {
        self.wait_until(id, |s| s == JobState::Persisted).await
    }

    /// Stop accepting submissions and cancel everything still running
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let jobs = self.inner.jobs.read();
        let running: Vec<_> = jobs.values().filter(|h| !h.state().is_final()).collect();
        info!(running = running.len(), "orchestrator shutting down");
        for handle in running {
            handle.cancel.cancel();
            handle.abort.abort();
        }
    }

    pub fn backends(&self) -> Vec<crate::optimizer::SolverKind> {
        self.inner.adapter.kinds()
    }
}

fn floor_to_step(now: DateTime<Utc>, step_secs: i64) -> DateTime<Utc> {
    let secs = now.timestamp();
    let floored = secs - secs.rem_euclid(step_secs.max(1));
    Utc.timestamp_opt(floored, 0).single().unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_to_step() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 47, 13).unwrap();
        assert_eq!(floor_to_step(now, 900), Utc.with_ymd_and_hms(2026, 3, 1, 10, 45, 0).unwrap());
        assert_eq!(floor_to_step(now, 3600), Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap());
    }
}
