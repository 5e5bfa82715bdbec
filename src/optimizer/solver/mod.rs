//! Solver Adapter
//!
//! Backends sit behind [`SolverBackend`]; the [`SolverAdapter`] walks an
//! ordered fallback list, skipping backends that are not installed or cannot
//! handle integer columns, and normalises every native status into
//! [`SolveStatus`]. All per-call settings travel in [`SolverConfig`].

pub mod cbc;
pub mod highs;
pub mod minilp;

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::program::ProgramSpec;
use crate::domain::SolveStatus;

pub use self::cbc::CbcBackend;
pub use self::highs::HighsBackend;
pub use self::minilp::MinilpBackend;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SolverKind {
    Highs,
    Cbc,
    Minilp,
}

/// Cooperative abort flag shared between the orchestrator and a running solve
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Hard wall-clock limit handed to the backend
    pub time_limit: Duration,
    pub threads: usize,
    pub preference: Option<SolverKind>,
    /// Backends that must not be tried (e.g. the one that just failed)
    pub excluded: Vec<SolverKind>,
    /// Relative MIP gap at which a backend may stop
    pub mip_gap: f64,
    /// Branch-and-bound node cap for backends that enumerate nodes themselves
    pub max_branch_nodes: usize,
    pub abort: AbortHandle,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_secs(30),
            threads: 1,
            preference: None,
            excluded: Vec::new(),
            mip_gap: 1e-4,
            max_branch_nodes: 10_000,
            abort: AbortHandle::new(),
        }
    }
}

/// Which search limit ended a solve early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    TimeLimit,
    NodeLimit,
    IterationLimit,
    Aborted,
}

/// What a backend reports for one solve, already in the normalised vocabulary
#[derive(Debug, Clone, PartialEq)]
pub struct BackendOutput {
    pub status: SolveStatus,
    pub values: Option<Vec<f64>>,
    pub objective: Option<f64>,
    pub native_status: String,
    /// Constraint labels the backend identified as conflicting
    pub conflicting: Vec<String>,
    /// Which limit ended the search when `status` is `Timeout`
    pub stopped_by: Option<StopReason>,
}

impl BackendOutput {
    pub fn without_values(status: SolveStatus, native_status: impl Into<String>) -> Self {
        Self {
            status,
            values: None,
            objective: None,
            native_status: native_status.into(),
            conflicting: Vec::new(),
            stopped_by: None,
        }
    }

    pub fn with_values(status: SolveStatus, values: Vec<f64>, objective: f64, native_status: impl Into<String>) -> Self {
        Self {
            values: Some(values),
            objective: Some(objective),
            ..Self::without_values(status, native_status)
        }
    }

    pub fn stopped_by(mut self, reason: StopReason) -> Self {
        self.stopped_by = Some(reason);
        self
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SolverFailure {
    /// Not compiled in, not installed or not licensed; the adapter falls through
    #[error("{0} backend is unavailable")]
    Unavailable(SolverKind),

    #[error("solver failed: {0}")]
    Failed(String),
}

#[cfg_attr(test, mockall::automock)]
pub trait SolverBackend: Send + Sync {
    fn kind(&self) -> SolverKind;

    fn is_available(&self) -> bool;

    fn supports_integer(&self) -> bool;

    /// Whether the backend polls [`AbortHandle`] while solving
    fn supports_abort(&self) -> bool {
        false
    }

    fn solve(&self, spec: &ProgramSpec, config: &SolverConfig) -> Result<BackendOutput, SolverFailure>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubstitutionReason {
    Unavailable,
    NoIntegerSupport,
}

/// A backend that was passed over on the way to the one that ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Substitution {
    pub skipped: SolverKind,
    pub reason: SubstitutionReason,
}

#[derive(Debug, Clone)]
pub struct RawResult {
    /// `None` when no backend could be run
    pub backend: Option<SolverKind>,
    pub status: SolveStatus,
    pub values: Option<Vec<f64>>,
    pub objective: Option<f64>,
    pub native_status: String,
    pub conflicting: Vec<String>,
    pub stopped_by: Option<StopReason>,
    pub substitutions: Vec<Substitution>,
    pub elapsed: Duration,
    /// Failure detail for `SOLVER_ERROR`
    pub error: Option<String>,
}

impl RawResult {
    fn failure(
        backend: Option<SolverKind>,
        error: String,
        substitutions: Vec<Substitution>,
        elapsed: Duration,
    ) -> Self {
        Self {
            backend,
            status: SolveStatus::SolverError,
            values: None,
            objective: None,
            native_status: "error".to_string(),
            conflicting: Vec::new(),
            stopped_by: None,
            substitutions,
            elapsed,
            error: Some(error),
        }
    }
}

#[derive(Clone)]
pub struct SolverAdapter {
    backends: Vec<Arc<dyn SolverBackend>>,
}

impl SolverAdapter {
    /// Backends in fallback order
    pub fn new(backends: Vec<Arc<dyn SolverBackend>>) -> Self {
        Self { backends }
    }

    pub fn with_default_backends(order: &[SolverKind]) -> Self {
        let backends = order
            .iter()
            .map(|kind| -> Arc<dyn SolverBackend> {
                match kind {
                    SolverKind::Highs => Arc::new(HighsBackend::new()),
                    SolverKind::Cbc => Arc::new(CbcBackend::new()),
                    SolverKind::Minilp => Arc::new(MinilpBackend::new()),
                }
            })
            .collect();
        Self::new(backends)
    }

    pub fn kinds(&self) -> Vec<SolverKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    /// Preferred backend first, then the rest in fallback order, minus exclusions
    fn candidates(&self, config: &SolverConfig) -> Vec<Arc<dyn SolverBackend>> {
        let mut ordered: Vec<Arc<dyn SolverBackend>> = Vec::with_capacity(self.backends.len());
        if let Some(preferred) = config.preference {
            ordered.extend(self.backends.iter().filter(|b| b.kind() == preferred).cloned());
        }
        ordered.extend(
            self.backends
                .iter()
                .filter(|b| Some(b.kind()) != config.preference)
                .cloned(),
        );
        ordered.retain(|b| !config.excluded.contains(&b.kind()));
        ordered
    }

    pub fn solve(&self, spec: &ProgramSpec, config: &SolverConfig) -> RawResult {
        let started = Instant::now();
        let mip = spec.is_mip();
        let mut substitutions = Vec::new();

        for backend in self.candidates(config) {
            let kind = backend.kind();
            if !backend.is_available() {
                warn!(backend = %kind, "solver backend unavailable, falling back");
                substitutions.push(Substitution {
                    skipped: kind,
                    reason: SubstitutionReason::Unavailable,
                });
                continue;
            }
            if mip && !backend.supports_integer() {
                warn!(backend = %kind, "solver backend cannot handle integer variables, falling back");
                substitutions.push(Substitution {
                    skipped: kind,
                    reason: SubstitutionReason::NoIntegerSupport,
                });
                continue;
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| backend.solve(spec, config)));
            let elapsed = started.elapsed();
            let output = match outcome {
                Ok(Ok(output)) => output,
                Ok(Err(SolverFailure::Unavailable(_))) => {
                    warn!(backend = %kind, "solver backend reported itself unavailable, falling back");
                    substitutions.push(Substitution {
                        skipped: kind,
                        reason: SubstitutionReason::Unavailable,
                    });
                    continue;
                }
                Ok(Err(err)) => {
                    warn!(backend = %kind, error = %err, "solver backend failed");
                    return RawResult::failure(Some(kind), err.to_string(), substitutions, elapsed);
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(backend = %kind, panic = %message, "solver backend panicked");
                    return RawResult::failure(
                        Some(kind),
                        format!("backend panicked: {message}"),
                        substitutions,
                        elapsed,
                    );
                }
            };

            if !substitutions.is_empty() {
                info!(backend = %kind, skipped = substitutions.len(), "solved with substitute backend");
            }
            return normalize(kind, spec, output, substitutions, elapsed);
        }

        RawResult::failure(
            None,
            "no solver backend available".to_string(),
            substitutions,
            started.elapsed(),
        )
    }
}

/// Absolute slack, scaled by `max(1, |rhs|)`, for accepting a timed-out incumbent
const INCUMBENT_TOLERANCE: f64 = 1e-5;

fn normalize(
    kind: SolverKind,
    spec: &ProgramSpec,
    output: BackendOutput,
    substitutions: Vec<Substitution>,
    elapsed: Duration,
) -> RawResult {
    let BackendOutput {
        mut status,
        mut values,
        mut objective,
        native_status,
        conflicting,
        stopped_by,
    } = output;

    // some backends fill the column vector even when the search found nothing
    let violated = match (status, values.as_deref()) {
        (SolveStatus::Timeout, Some(incumbent)) => spec.first_violation(incumbent, INCUMBENT_TOLERANCE),
        _ => None,
    };
    if let Some(violated) = violated {
        debug!(
            backend = %kind,
            violated = %violated,
            "timed-out solve returned values that are not a feasible incumbent, discarding them"
        );
        values = None;
        objective = None;
    }

    match (status, values.is_some()) {
        (SolveStatus::Timeout, true) => status = SolveStatus::FeasibleSuboptimal,
        (SolveStatus::Optimal | SolveStatus::FeasibleSuboptimal, false) => {
            return RawResult::failure(
                Some(kind),
                format!("backend reported {status} without a solution ({native_status})"),
                substitutions,
                elapsed,
            );
        }
        _ => {}
    }
    let values = if status.has_schedule() { values } else { None };

    RawResult {
        backend: Some(kind),
        status,
        values,
        objective,
        native_status,
        conflicting,
        stopped_by,
        substitutions,
        elapsed,
        error: None,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
