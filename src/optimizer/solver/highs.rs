//! HiGHS through the `highs` crate (cargo feature `highs`).

use super::{BackendOutput, SolverBackend, SolverConfig, SolverFailure, SolverKind};
use crate::optimizer::program::ProgramSpec;

#[derive(Debug, Clone, Copy, Default)]
pub struct HighsBackend;

impl HighsBackend {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "highs")]
impl SolverBackend for HighsBackend {
    fn kind(&self) -> SolverKind {
        SolverKind::Highs
    }

    fn is_available(&self) -> bool {
        true
    }

    fn supports_integer(&self) -> bool {
        true
    }

    fn solve(&self, spec: &ProgramSpec, config: &SolverConfig) -> Result<BackendOutput, SolverFailure> {
        use crate::domain::SolveStatus;
        use crate::optimizer::program::Sense;
        use crate::optimizer::solver::StopReason;
        use highs::{HighsModelStatus, RowProblem, Sense as Direction};

        let mut problem = RowProblem::default();
        let cols: Vec<highs::Col> = spec
            .variables
            .iter()
            .map(|v| {
                if v.integer {
                    problem.add_integer_column(v.cost, v.lower..=v.upper)
                } else {
                    problem.add_column(v.cost, v.lower..=v.upper)
                }
            })
            .collect();

        for row in &spec.constraints {
            let factors: Vec<(highs::Col, f64)> = row.terms.iter().map(|(var, coef)| (cols[var.index()], *coef)).collect();
            match row.sense {
                Sense::Le => problem.add_row(..=row.rhs, factors),
                Sense::Ge => problem.add_row(row.rhs.., factors),
                Sense::Eq => problem.add_row(row.rhs..=row.rhs, factors),
            };
        }

        let mut model = problem.optimise(Direction::Minimise);
        model.make_quiet();
        model.set_option("time_limit", config.time_limit.as_secs_f64());
        model.set_option("threads", config.threads.max(1) as i32);
        model.set_option("mip_rel_gap", config.mip_gap);

        let solved = model
            .try_solve()
            .map_err(|status| SolverFailure::Failed(format!("highs: {status:?}")))?;
        let native = format!("{:?}", solved.status());

        let with_values = |status: SolveStatus| {
            let values = solved.get_solution().columns().to_vec();
            let objective = spec.objective_value(&values);
            BackendOutput::with_values(status, values, objective, native.clone())
        };

        Ok(match solved.status() {
            HighsModelStatus::Optimal => with_values(SolveStatus::Optimal),
            HighsModelStatus::Infeasible => BackendOutput::without_values(SolveStatus::Infeasible, native.clone()),
            HighsModelStatus::Unbounded | HighsModelStatus::UnboundedOrInfeasible => {
                BackendOutput::without_values(SolveStatus::Unbounded, native.clone())
            }
            // the column vector is allocated with or without an incumbent, the adapter screens it
            HighsModelStatus::ReachedTimeLimit => with_values(SolveStatus::Timeout).stopped_by(StopReason::TimeLimit),
            HighsModelStatus::ReachedIterationLimit => {
                with_values(SolveStatus::Timeout).stopped_by(StopReason::IterationLimit)
            }
            _ => return Err(SolverFailure::Failed(format!("highs: {native}"))),
        })
    }
}

#[cfg(not(feature = "highs"))]
impl SolverBackend for HighsBackend {
    fn kind(&self) -> SolverKind {
        SolverKind::Highs
    }

    fn is_available(&self) -> bool {
        false
    }

    fn supports_integer(&self) -> bool {
        true
    }

    fn solve(&self, _spec: &ProgramSpec, _config: &SolverConfig) -> Result<BackendOutput, SolverFailure> {
        Err(SolverFailure::Unavailable(SolverKind::Highs))
    }
}
