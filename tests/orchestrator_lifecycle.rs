mod common;

use async_trait::async_trait;
use common::*;
use energy_dispatch::domain::{
    Asset, AssetDispatch, AssetId, Battery, DiagnosticKind, JobRequest, JobState, ObjectiveType, Responsibility,
    SolveStatus,
};
use energy_dispatch::error::{EngineError, SpecificationError};
use energy_dispatch::optimizer::{SolverBackend, SolverKind};
use energy_dispatch::repo::{JobRecord, JobStore, PersistenceError};
use energy_dispatch::JobResult;
use rstest::rstest;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(30);

async fn outcome(h: &Harness, id: energy_dispatch::domain::JobId) -> JobState {
    tokio::time::timeout(WAIT, h.orchestrator.wait_for_outcome(id))
        .await
        .expect("job did not finish in time")
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_job_solves_and_persists() {
    let h = harness(test_config(), vec![minilp()]);
    let id = h.orchestrator.submit(day_request()).unwrap();

    assert_eq!(outcome(&h, id).await, JobState::Solved);
    tokio::time::timeout(WAIT, h.orchestrator.wait_for_persisted(id))
        .await
        .unwrap()
        .unwrap();

    let status = h.orchestrator.get_status(id).unwrap();
    assert_eq!(status.state, JobState::Persisted);
    assert_eq!(status.persisted_from, Some(JobState::Solved));
    assert_eq!(status.progress.fraction, 1.0);

    match h.orchestrator.get_result(id).unwrap() {
        JobResult::Solved { solution } => {
            assert_eq!(solution.status, SolveStatus::Optimal);
            assert!(solution.objective_value < -18.9);
        }
        other => panic!("unexpected result {other:?}"),
    }

    let record = h.store.get(id.0).expect("record written");
    assert_eq!(record.metadata.state, JobState::Solved);
    // battery charge + discharge, grid import + export, curtailment
    assert_eq!(record.schedule.len(), 5 * 24);
    assert!(!record.costs.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_solver_error_is_retried_once_with_next_backend() {
    let crashing = CrashingBackend::new(SolverKind::Highs);
    let h = harness(
        test_config(),
        vec![crashing.clone() as Arc<dyn SolverBackend>, minilp()],
    );
    let id = h.orchestrator.submit(day_request()).unwrap();

    assert_eq!(outcome(&h, id).await, JobState::Solved);
    let status = h.orchestrator.get_status(id).unwrap();
    assert_eq!(status.attempts.len(), 2);
    assert_eq!(status.attempts[0].backend, Some(SolverKind::Highs));
    assert_eq!(status.attempts[0].status, SolveStatus::SolverError);
    assert_eq!(status.attempts[1].backend, Some(SolverKind::Minilp));
    assert_eq!(crashing.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_solver_error_fails_the_job() {
    let first = CrashingBackend::new(SolverKind::Highs);
    let second = CrashingBackend::new(SolverKind::Cbc);
    let h = harness(
        test_config(),
        vec![
            first.clone() as Arc<dyn SolverBackend>,
            second.clone() as Arc<dyn SolverBackend>,
            minilp(),
        ],
    );
    let id = h.orchestrator.submit(day_request()).unwrap();

    assert_eq!(outcome(&h, id).await, JobState::Failed);
    let status = h.orchestrator.get_status(id).unwrap();
    assert_eq!(status.attempts.len(), 2);
    assert_eq!((first.calls(), second.calls()), (1, 1));

    let diagnostic = status.diagnostic.unwrap();
    assert_eq!(diagnostic.kind, DiagnosticKind::SolverError);
    assert_eq!(diagnostic.responsibility, Responsibility::Engine);
    assert_eq!(diagnostic.backend.as_deref(), Some("cbc"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_infeasible_job_reports_conflicts() {
    let h = harness(test_config(), vec![minilp()]);
    h.registry.upsert(Asset::Grid(grid("weak-grid", 0.0, 0.0)));
    h.registry.upsert(Asset::Battery(Battery {
        initial_soc: 0.5,
        terminal_soc: Some(1.0),
        ..battery("stuck")
    }));
    let mut request = JobRequest::new(
        ObjectiveType::CostMinimization,
        4 * 3600,
        3600,
        vec![AssetId::new("stuck"), AssetId::new("weak-grid")],
    );
    request.start = Some(t0());
    let id = h.orchestrator.submit(request).unwrap();

    assert_eq!(outcome(&h, id).await, JobState::Infeasible);
    match h.orchestrator.get_result(id).unwrap() {
        JobResult::Unsuccessful { state, diagnostic } => {
            assert_eq!(state, JobState::Infeasible);
            assert_eq!(diagnostic.kind, DiagnosticKind::Infeasible);
            assert_eq!(diagnostic.responsibility, Responsibility::Caller);
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_while_solving_ends_failed() {
    let gate = GatedBackend::new();
    let h = harness(test_config(), vec![gate.clone() as Arc<dyn SolverBackend>]);
    let id = h.orchestrator.submit(day_request()).unwrap();

    tokio::time::timeout(WAIT, h.orchestrator.wait_until(id, |s| s == JobState::Solving))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.orchestrator.cancel(id).unwrap(), JobState::Solving);

    assert_eq!(outcome(&h, id).await, JobState::Failed);
    let diagnostic = h.orchestrator.get_status(id).unwrap().diagnostic.unwrap();
    assert_eq!(diagnostic.kind, DiagnosticKind::Cancelled);

    // cancelling a finished job is a no-op
    let state = h.orchestrator.cancel(id).unwrap();
    assert!(state.is_final());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_incumbent_returned_after_cancel_is_discarded() {
    let h = harness(test_config(), vec![Arc::new(IncumbentOnAbortBackend) as Arc<dyn SolverBackend>]);
    let id = h.orchestrator.submit(day_request()).unwrap();

    tokio::time::timeout(WAIT, h.orchestrator.wait_until(id, |s| s == JobState::Solving))
        .await
        .unwrap()
        .unwrap();
    h.orchestrator.cancel(id).unwrap();

    assert_eq!(outcome(&h, id).await, JobState::Failed);
    let status = h.orchestrator.get_status(id).unwrap();
    assert_eq!(status.diagnostic.unwrap().kind, DiagnosticKind::Cancelled);
    assert!(matches!(
        h.orchestrator.get_result(id).unwrap(),
        JobResult::Unsuccessful { .. }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_supervisor_deadline_times_out_hung_solver() {
    let mut config = test_config();
    config.engine.supervisor_grace_secs = 0;
    let h = harness(
        config,
        vec![Arc::new(HangingBackend {
            hang: Duration::from_secs(3),
        }) as Arc<dyn SolverBackend>],
    );
    let mut request = day_request();
    request.time_limit_secs = Some(1);
    let id = h.orchestrator.submit(request).unwrap();

    assert_eq!(outcome(&h, id).await, JobState::Timeout);
    let diagnostic = h.orchestrator.get_status(id).unwrap().diagnostic.unwrap();
    assert_eq!(diagnostic.kind, DiagnosticKind::Timeout);
    assert_eq!(diagnostic.responsibility, Responsibility::Caller);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_running_job_keeps_its_snapshot() {
    let gate = GatedBackend::new();
    let h = harness(test_config(), vec![gate.clone() as Arc<dyn SolverBackend>]);
    let id = h.orchestrator.submit(day_request()).unwrap();
    tokio::time::timeout(WAIT, h.orchestrator.wait_until(id, |s| s == JobState::Solving))
        .await
        .unwrap()
        .unwrap();

    h.registry.upsert(Asset::Battery(Battery {
        capacity_kwh: 10.0,
        ..battery("bat")
    }));
    gate.open();

    assert_eq!(outcome(&h, id).await, JobState::Solved);
    let JobResult::Solved { solution } = h.orchestrator.get_result(id).unwrap() else {
        panic!("expected a solution");
    };
    let charged: f64 = match solution.schedule_for(&AssetId::new("bat")).unwrap() {
        AssetDispatch::Battery { charge_kw, .. } => charge_kw.iter().sum(),
        other => panic!("unexpected {other:?}"),
    };
    // a full cycle of the 100 kWh battery taken at submission, not the 10 kWh update
    assert!(charged > 100.0, "charged {charged} kWh");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_asset_fails_as_caller_error() {
    let h = harness(test_config(), vec![minilp()]);
    let mut request = day_request();
    request.asset_ids.push(AssetId::new("ghost"));
    let id = h.orchestrator.submit(request).unwrap();

    assert_eq!(outcome(&h, id).await, JobState::Failed);
    let diagnostic = h.orchestrator.get_status(id).unwrap().diagnostic.unwrap();
    assert_eq!(diagnostic.kind, DiagnosticKind::Specification);
    assert!(diagnostic.message.contains("ghost"));
    assert!(h.orchestrator.get_status(id).unwrap().attempts.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_soc_override_above_measured_soc_fails_the_job() {
    let h = harness(test_config(), vec![minilp()]);
    let mut request = day_request();
    request.overrides.min_soc = Some(0.5);
    let id = h.orchestrator.submit(request).unwrap();

    assert_eq!(outcome(&h, id).await, JobState::Failed);
    let diagnostic = h.orchestrator.get_status(id).unwrap().diagnostic.unwrap();
    assert_eq!(diagnostic.kind, DiagnosticKind::Specification);
    assert!(diagnostic.message.contains("bat.initial_soc"));
    assert!(h.orchestrator.get_status(id).unwrap().attempts.is_empty());
}

#[rstest]
#[case::zero_timestep(86_400, 0, None, "invalid_timestep")]
#[case::horizon_not_multiple(5_400, 3_600, None, "horizon_not_multiple")]
#[case::finer_than_forecast(86_400, 1_800, None, "granularity_mismatch")]
#[case::beyond_forecast(3 * 86_400, 3_600, None, "horizon_beyond_forecast")]
#[case::zero_time_limit(86_400, 3_600, Some(0), "invalid_time_limit")]
#[tokio::test]
async fn test_submission_rejections(
    #[case] horizon_secs: i64,
    #[case] timestep_secs: i64,
    #[case] time_limit_secs: Option<u64>,
    #[case] code: &str,
) {
    let h = harness(test_config(), vec![minilp()]);
    let mut request = day_request();
    request.horizon_secs = horizon_secs;
    request.timestep_secs = timestep_secs;
    request.time_limit_secs = time_limit_secs;

    let err = h.orchestrator.submit(request).unwrap_err();
    let EngineError::Rejected(reason) = err else {
        panic!("expected a rejection, got {err:?}");
    };
    assert_eq!(serde_json::to_value(&reason).unwrap()["code"], code);
    assert!(h.orchestrator.list_jobs().is_empty());
}

#[tokio::test]
async fn test_empty_asset_list_is_rejected() {
    let h = harness(test_config(), vec![minilp()]);
    let mut request = day_request();
    request.asset_ids.clear();
    assert!(matches!(
        h.orchestrator.submit(request),
        Err(EngineError::Rejected(SpecificationError::NoAssets))
    ));
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let h = harness(test_config(), vec![minilp()]);
    let id = energy_dispatch::domain::JobId::new();
    assert!(matches!(h.orchestrator.get_status(id), Err(EngineError::JobNotFound(_))));
    assert!(matches!(h.orchestrator.cancel(id), Err(EngineError::JobNotFound(_))));
}

#[tokio::test]
async fn test_shutdown_refuses_new_jobs() {
    let h = harness(test_config(), vec![minilp()]);
    h.orchestrator.shutdown();
    assert!(matches!(h.orchestrator.submit(day_request()), Err(EngineError::ShuttingDown)));
}

/// Fails the first `failures` writes
struct FlakyStore {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn persist(&self, _record: &JobRecord) -> Result<(), PersistenceError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            Err(PersistenceError::Write("replica lagging".to_string()))
        } else {
            Ok(())
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_persistence_is_retried_until_acknowledged() {
    let store = Arc::new(FlakyStore {
        failures: 2,
        calls: AtomicUsize::new(0),
    });
    let (orchestrator, _) = orchestrator_with_store(test_config(), vec![minilp()], store.clone());
    let id = orchestrator.submit(day_request()).unwrap();

    tokio::time::timeout(WAIT, orchestrator.wait_for_persisted(id))
        .await
        .unwrap()
        .unwrap();
    let status = orchestrator.get_status(id).unwrap();
    assert_eq!(status.persisted_from, Some(JobState::Solved));
    assert_eq!(status.persist_attempts, 3);
    assert_eq!(store.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_persistence_failure_keeps_computed_state() {
    let store = Arc::new(FlakyStore {
        failures: usize::MAX,
        calls: AtomicUsize::new(0),
    });
    let (orchestrator, _) = orchestrator_with_store(test_config(), vec![minilp()], store.clone());
    let id = orchestrator.submit(day_request()).unwrap();

    let state = tokio::time::timeout(WAIT, orchestrator.wait_for_outcome(id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state, JobState::Solved);

    // max_attempts = 3 with 1 ms backoff
    for _ in 0..200 {
        if store.calls.load(Ordering::SeqCst) >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    assert_eq!(orchestrator.get_status(id).unwrap().state, JobState::Solved);
    assert!(matches!(orchestrator.get_result(id).unwrap(), JobResult::Solved { .. }));
}
