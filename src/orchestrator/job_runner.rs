use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, error, info, warn};

use super::{persistence, Inner, JobHandle};
use crate::domain::{
    Diagnostic, DiagnosticKind, JobState, OptimizationProblem, SolveAttempt, SolveStatus,
};
use crate::optimizer::{BuiltProgram, Extraction, ProblemBuilder, RawResult, SolverConfig};
use crate::repo::{ForecastError, RegistryError};

enum SolveRun {
    Finished(Box<RawResult>, OwnedSemaphorePermit),
    /// Supervisor deadline hit; the blocking task was detached and keeps its permit
    Deadline,
    Cancelled,
    Crashed(String),
}

enum Wake<T> {
    Joined(Result<T, tokio::task::JoinError>),
    Deadline,
    Cancelled,
}

pub(super) async fn run(inner: Arc<Inner>, handle: Arc<JobHandle>) {
    let queued = tokio::select! {
        biased;
        _ = handle.cancel.cancelled() => None,
        permit = inner.pool.clone().acquire_owned() => Some(permit),
    };
    let permit = match queued {
        None => {
            cancelled(&handle, "cancelled while queued");
            return persist(inner, handle).await;
        }
        Some(Err(_)) => {
            handle.finish(
                JobState::Failed,
                None,
                Some(Diagnostic::new(DiagnosticKind::SolverError, "worker pool closed")),
            );
            return persist(inner, handle).await;
        }
        Some(Ok(permit)) => permit,
    };

    handle.transition(JobState::Building);
    let prepared = tokio::select! {
        biased;
        _ = handle.cancel.cancelled() => None,
        prepared = prepare(&inner, &handle) => Some(prepared),
    };
    let (problem, built) = match prepared {
        None => {
            cancelled(&handle, "cancelled while building");
            drop(permit);
            return persist(inner, handle).await;
        }
        Some(Err(diagnostic)) => {
            warn!(job_id = %handle.id(), diagnostic = %diagnostic, "job rejected while building");
            handle.finish(JobState::Failed, None, Some(diagnostic));
            drop(permit);
            return persist(inner, handle).await;
        }
        Some(Ok(pair)) => pair,
    };

    handle.transition(JobState::Solving);
    solve(&inner, &handle, problem, built, permit).await;
    persist(inner, handle).await;
}

/// Snapshot the collaborators, apply overrides and build the program
async fn prepare(
    inner: &Inner,
    handle: &JobHandle,
) -> Result<(Arc<OptimizationProblem>, Arc<BuiltProgram>), Diagnostic> {
    let (request, start) = {
        let job = handle.job.read();
        (job.request.clone(), job.start)
    };
    let steps = (request.horizon_secs / request.timestep_secs) as usize;
    let timestep = chrono::Duration::seconds(request.timestep_secs);

    let mut assets = inner.registry.snapshot(&request.asset_ids).await.map_err(|err| match err {
        RegistryError::UnknownAssets(_) => Diagnostic::new(DiagnosticKind::Specification, err.to_string()),
        RegistryError::Unavailable(_) => Diagnostic::new(DiagnosticKind::Collaborator, err.to_string()),
    })?;
    let forecasts = inner.forecasts.fetch(start, timestep, steps).await.map_err(|err| match err {
        ForecastError::Unavailable(_) => Diagnostic::new(DiagnosticKind::Collaborator, err.to_string()),
        ForecastError::Invalid(_) => Diagnostic::new(DiagnosticKind::Specification, err.to_string()),
    })?;

    let mut settings = inner.model_settings();
    request
        .overrides
        .apply(&mut assets, &mut settings)
        .map_err(|err| Diagnostic::new(DiagnosticKind::Specification, err.to_string()))?;

    let problem = OptimizationProblem {
        start,
        timestep_secs: request.timestep_secs,
        horizon_steps: steps,
        objective: request.objective,
        assets: assets.into(),
        forecasts: Arc::new(forecasts),
        settings,
    };
    let built = ProblemBuilder::new()
        .build(&problem)
        .map_err(|err| Diagnostic::new(DiagnosticKind::Specification, err.to_string()))?;
    debug!(
        job_id = %handle.id(),
        variables = built.spec.num_variables(),
        constraints = built.spec.constraints.len(),
        mip = built.spec.is_mip(),
        "program built"
    );

    let problem = Arc::new(problem);
    handle.job.write().problem = Some(problem.clone());
    Ok((problem, Arc::new(built)))
}

async fn solve(
    inner: &Arc<Inner>,
    handle: &JobHandle,
    problem: Arc<OptimizationProblem>,
    built: Arc<BuiltProgram>,
    permit: OwnedSemaphorePermit,
) {
    let job_id = handle.id();
    let (time_limit, preference) = {
        let job = handle.job.read();
        (job.time_limit, job.request.solver_preference)
    };
    let mut config = SolverConfig {
        time_limit,
        threads: inner.config.engine.solver_threads.max(1),
        preference,
        excluded: Vec::new(),
        mip_gap: inner.config.solver.mip_gap,
        max_branch_nodes: inner.config.solver.max_branch_nodes,
        abort: handle.abort.clone(),
    };

    let mut permit = permit;
    let mut retried = false;
    let raw = loop {
        let run = supervised_solve(inner, handle, built.clone(), config.clone(), permit).await;
        let (raw, returned) = match run {
            SolveRun::Finished(raw, returned) => (raw, returned),
            SolveRun::Deadline => {
                let diagnostic = Diagnostic::new(
                    DiagnosticKind::Timeout,
                    format!(
                        "solver exceeded the {}s supervisory deadline and was force-cancelled; resubmit with a larger time limit",
                        (time_limit + inner.config.engine.supervisor_grace()).as_secs()
                    ),
                );
                handle.finish(JobState::Timeout, None, Some(diagnostic));
                return;
            }
            SolveRun::Cancelled => {
                cancelled(handle, "cancelled while solving");
                return;
            }
            SolveRun::Crashed(reason) => {
                error!(job_id = %job_id, error = %reason, "solve task crashed");
                handle.finish(
                    JobState::Failed,
                    None,
                    Some(Diagnostic::new(DiagnosticKind::SolverError, reason)),
                );
                return;
            }
        };
        permit = returned;

        handle.job.write().attempts.push(SolveAttempt {
            backend: raw.backend,
            status: raw.status,
            native_status: raw.native_status.clone(),
            elapsed_ms: raw.elapsed.as_millis() as u64,
            substitutions: raw.substitutions.clone(),
        });
        info!(
            job_id = %job_id,
            backend = ?raw.backend,
            status = %raw.status,
            elapsed_ms = raw.elapsed.as_millis() as u64,
            "solve finished"
        );

        match (raw.status, raw.backend) {
            (SolveStatus::SolverError, Some(failed)) if !retried && !handle.cancel.is_cancelled() => {
                warn!(
                    job_id = %job_id,
                    backend = %failed,
                    error = raw.error.as_deref().unwrap_or("unknown"),
                    "solver error, retrying once with the next backend"
                );
                config.excluded.push(failed);
                retried = true;
            }
            _ => break raw,
        }
    };
    drop(permit);

    match inner.extractor.extract(&problem, &built, &raw) {
        Ok(Extraction::Schedule(solution)) => {
            for warning in &solution.warnings {
                warn!(job_id = %job_id, warning = %warning, "schedule warning");
            }
            handle.finish(JobState::Solved, Some(solution), None);
        }
        Ok(Extraction::NoSchedule(diagnostic)) => {
            let state = match diagnostic.kind {
                DiagnosticKind::Infeasible | DiagnosticKind::Unbounded => JobState::Infeasible,
                DiagnosticKind::Timeout => JobState::Timeout,
                _ => JobState::Failed,
            };
            info!(job_id = %job_id, state = %state, diagnostic = %diagnostic, "no schedule produced");
            handle.finish(state, None, Some(diagnostic));
        }
        Err(mismatch) => {
            error!(
                job_id = %job_id,
                backend = ?raw.backend,
                check = %mismatch.check,
                label = %mismatch.label,
                timestep = ?mismatch.timestep,
                expected = mismatch.expected,
                actual = mismatch.actual,
                "solver output failed validation"
            );
            let mut diagnostic = Diagnostic::new(DiagnosticKind::ValidationMismatch, mismatch.to_string());
            if let Some(kind) = raw.backend {
                diagnostic = diagnostic.with_backend(kind.to_string());
            }
            handle.finish(JobState::Failed, None, Some(diagnostic));
        }
    }
}

/// Run one adapter call on the blocking pool under the supervisory deadline
async fn supervised_solve(
    inner: &Arc<Inner>,
    handle: &JobHandle,
    built: Arc<BuiltProgram>,
    config: SolverConfig,
    permit: OwnedSemaphorePermit,
) -> SolveRun {
    let grace = inner.config.engine.supervisor_grace();
    let deadline = config.time_limit + grace;
    let abort = config.abort.clone();
    let adapter = inner.adapter.clone();
    let started = Instant::now();

    let mut task = tokio::task::spawn_blocking(move || {
        let raw = adapter.solve(&built.spec, &config);
        (raw, permit)
    });

    let woke = tokio::select! {
        biased;
        _ = handle.cancel.cancelled() => Wake::Cancelled,
        joined = &mut task => Wake::Joined(joined),
        _ = tokio::time::sleep(deadline) => Wake::Deadline,
    };
    match woke {
        // an aborted solve hands back its partial incumbent, which is not a result
        Wake::Joined(Ok(_)) if handle.cancel.is_cancelled() => SolveRun::Cancelled,
        Wake::Joined(Ok((raw, permit))) => SolveRun::Finished(Box::new(raw), permit),
        Wake::Joined(Err(err)) => SolveRun::Crashed(format!("solve task failed: {err}")),
        Wake::Deadline => {
            abort.abort();
            warn!(
                job_id = %handle.id(),
                deadline_ms = deadline.as_millis() as u64,
                "supervisory deadline exceeded, force-cancelling solver"
            );
            SolveRun::Deadline
        }
        Wake::Cancelled => {
            abort.abort();
            if tokio::time::timeout(grace, task).await.is_err() {
                warn!(
                    job_id = %handle.id(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "solver ignored abort, detaching it"
                );
            }
            SolveRun::Cancelled
        }
    }
}

fn cancelled(handle: &JobHandle, message: &str) {
    handle.finish(
        JobState::Failed,
        None,
        Some(Diagnostic::new(DiagnosticKind::Cancelled, message)),
    );
}

async fn persist(inner: Arc<Inner>, handle: Arc<JobHandle>) {
    let record = {
        let job = handle.job.read();
        if !job.state.is_terminal() {
            return;
        }
        crate::repo::JobRecord::from_job(&job)
    };
    let job_id = handle.id();
    tokio::spawn(async move {
        let result = persistence::persist_with_retry(inner.store.as_ref(), &record, &inner.config.persistence, |n| {
            handle.job.write().persist_attempts = n;
        })
        .await;
        match result {
            Ok(attempts) => {
                handle.transition(JobState::Persisted);
                debug!(job_id = %job_id, attempts, "job persisted");
            }
            Err(err) => {
                error!(
                    job_id = %job_id,
                    state = %handle.state(),
                    error = %err,
                    "giving up on job persistence, job keeps its computed state"
                );
            }
        }
    });
}
