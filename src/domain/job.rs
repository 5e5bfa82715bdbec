use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use uuid::Uuid;

use super::{AssetId, ConstraintOverrides, ObjectiveType, OptimizationProblem, Solution, SolveStatus};
use crate::optimizer::{SolverKind, Substitution};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Job lifecycle:
/// `PENDING -> BUILDING -> SOLVING -> {SOLVED, INFEASIBLE, TIMEOUT, FAILED} -> PERSISTED`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Building,
    Solving,
    Solved,
    Infeasible,
    Timeout,
    Failed,
    Persisted,
}

impl JobState {
    /// Computed outcome reached; only persistence can follow
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Solved | Self::Infeasible | Self::Timeout | Self::Failed)
    }

    /// Nothing further will happen to the job
    pub fn is_final(&self) -> bool {
        self.is_terminal() || *self == Self::Persisted
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Pending, Building) | (Pending, Failed) => true,
            (Building, Solving) | (Building, Failed) => true,
            (Solving, Solved | Infeasible | Timeout | Failed) => true,
            (from, Persisted) => from.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub from: JobState,
    pub to: JobState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Specification,
    Infeasible,
    Unbounded,
    SolverError,
    Timeout,
    ValidationMismatch,
    Cancelled,
    /// Asset registry or forecast service could not serve the snapshot
    Collaborator,
}

/// Whether a failure stems from the request or from the engine itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Responsibility {
    Caller,
    Engine,
}

impl DiagnosticKind {
    pub fn responsibility(&self) -> Responsibility {
        match self {
            Self::SolverError | Self::ValidationMismatch | Self::Collaborator => Responsibility::Engine,
            Self::Specification | Self::Infeasible | Self::Unbounded | Self::Timeout | Self::Cancelled => {
                Responsibility::Caller
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub responsibility: Responsibility,
    pub message: String,
    /// Constraint labels found mutually unsatisfiable, when known
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicting: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            responsibility: kind.responsibility(),
            message: message.into(),
            conflicting: Vec::new(),
            backend: None,
        }
    }

    pub fn with_conflicting(mut self, labels: Vec<String>) -> Self {
        self.conflicting = labels;
        self
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let who = match self.responsibility {
            Responsibility::Caller => "input",
            Responsibility::Engine => "engine",
        };
        write!(f, "[{who}] {}", self.message)
    }
}

/// Submission parameters as received from a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default)]
    pub objective: ObjectiveType,
    pub horizon_secs: i64,
    pub timestep_secs: i64,
    pub asset_ids: Vec<AssetId>,
    #[serde(default)]
    pub overrides: ConstraintOverrides,
    /// Defaults to now, floored to the timestep
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_limit_secs: Option<u64>,
    #[serde(default)]
    pub solver_preference: Option<SolverKind>,
}

impl JobRequest {
    pub fn new(objective: ObjectiveType, horizon_secs: i64, timestep_secs: i64, asset_ids: Vec<AssetId>) -> Self {
        Self {
            objective,
            horizon_secs,
            timestep_secs,
            asset_ids,
            overrides: ConstraintOverrides::default(),
            start: None,
            time_limit_secs: None,
            solver_preference: None,
        }
    }
}

/// One call into the solver adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveAttempt {
    pub backend: Option<SolverKind>,
    pub status: SolveStatus,
    pub native_status: String,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub substitutions: Vec<Substitution>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressHint {
    /// 0.0 to 1.0
    pub fraction: f64,
    pub phase: JobState,
}

#[derive(Debug, Clone)]
pub struct OptimizationJob {
    pub id: JobId,
    pub request: JobRequest,
    pub state: JobState,
    /// Terminal state a `PERSISTED` job came from
    pub persisted_from: Option<JobState>,
    pub start: DateTime<Utc>,
    pub time_limit: StdDuration,
    pub problem: Option<Arc<OptimizationProblem>>,
    pub solution: Option<Arc<Solution>>,
    pub diagnostic: Option<Diagnostic>,
    pub history: Vec<StateChange>,
    pub attempts: Vec<SolveAttempt>,
    pub persist_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub solve_started_at: Option<DateTime<Utc>>,
}

impl OptimizationJob {
    pub fn new(request: JobRequest, start: DateTime<Utc>, time_limit: StdDuration) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            request,
            state: JobState::Pending,
            persisted_from: None,
            start,
            time_limit,
            problem: None,
            solution: None,
            diagnostic: None,
            history: Vec::new(),
            attempts: Vec::new(),
            persist_attempts: 0,
            created_at: now,
            updated_at: now,
            solve_started_at: None,
        }
    }

    /// The computed outcome, looking through `PERSISTED` to the state it came from
    pub fn outcome(&self) -> JobState {
        match (self.state, self.persisted_from) {
            (JobState::Persisted, Some(from)) => from,
            (state, _) => state,
        }
    }

    /// Apply a transition; refuses (returns `false`) anything the state machine forbids
    pub fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        if next == JobState::Persisted {
            self.persisted_from = Some(self.state);
        }
        if next == JobState::Solving {
            self.solve_started_at = Some(now);
        }
        self.history.push(StateChange {
            from: self.state,
            to: next,
            at: now,
        });
        self.state = next;
        self.updated_at = now;
        true
    }

    pub fn progress(&self) -> ProgressHint {
        let fraction = match self.state {
            JobState::Pending => 0.0,
            JobState::Building => 0.1,
            JobState::Solving => {
                let elapsed = self
                    .solve_started_at
                    .map(|at| (Utc::now() - at).to_std().unwrap_or_default())
                    .unwrap_or_default();
                let limit = self.time_limit.as_secs_f64().max(f64::EPSILON);
                0.2 + 0.7 * (elapsed.as_secs_f64() / limit).min(1.0)
            }
            _ => 1.0,
        };
        ProgressHint {
            fraction,
            phase: self.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(JobState::Pending, JobState::Building, true)]
    #[case(JobState::Pending, JobState::Failed, true)]
    #[case(JobState::Pending, JobState::Solving, false)]
    #[case(JobState::Building, JobState::Solving, true)]
    #[case(JobState::Building, JobState::Solved, false)]
    #[case(JobState::Solving, JobState::Timeout, true)]
    #[case(JobState::Solved, JobState::Persisted, true)]
    #[case(JobState::Failed, JobState::Persisted, true)]
    #[case(JobState::Solving, JobState::Persisted, false)]
    #[case(JobState::Solved, JobState::Failed, false)]
    #[case(JobState::Persisted, JobState::Solved, false)]
    fn test_state_machine(#[case] from: JobState, #[case] to: JobState, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn test_persisted_remembers_outcome() {
        let request = JobRequest::new(ObjectiveType::CostMinimization, 3600, 3600, vec![AssetId::new("b")]);
        let mut job = OptimizationJob::new(request, Utc::now(), StdDuration::from_secs(10));
        assert!(job.transition(JobState::Building));
        assert!(job.transition(JobState::Solving));
        assert!(job.transition(JobState::Infeasible));
        assert!(!job.transition(JobState::Solved));
        assert!(job.transition(JobState::Persisted));
        assert_eq!(job.outcome(), JobState::Infeasible);
        assert_eq!(job.history.len(), 4);
        assert_eq!(job.progress().fraction, 1.0);
    }

    #[test]
    fn test_diagnostic_responsibility() {
        let d = Diagnostic::new(DiagnosticKind::Infeasible, "load exceeds supply");
        assert_eq!(d.responsibility, Responsibility::Caller);
        let d = Diagnostic::new(DiagnosticKind::ValidationMismatch, "soc drift");
        assert_eq!(d.responsibility, Responsibility::Engine);
        assert_eq!(d.to_string(), "[engine] soc drift");
    }
}
