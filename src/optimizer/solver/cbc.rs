//! COIN-OR CBC through `good_lp` (cargo feature `cbc`).

use super::{BackendOutput, SolverBackend, SolverConfig, SolverFailure, SolverKind};
use crate::optimizer::program::ProgramSpec;

#[derive(Debug, Clone, Copy, Default)]
pub struct CbcBackend;

impl CbcBackend {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "cbc")]
impl SolverBackend for CbcBackend {
    fn kind(&self) -> SolverKind {
        SolverKind::Cbc
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
        use good_lp::{
            coin_cbc, constraint, variable, Expression, ProblemVariables, ResolutionError, Solution, SolverModel,
            Variable,
        };

        let mut vars = ProblemVariables::new();
        let cols: Vec<Variable> = spec
            .variables
            .iter()
            .map(|v| {
                let def = variable().min(v.lower).max(v.upper).name(v.name.clone());
                vars.add(if v.integer { def.integer() } else { def })
            })
            .collect();

        let objective: Expression = spec
            .variables
            .iter()
            .zip(&cols)
            .map(|(v, col)| v.cost * *col)
            .sum();

        let mut model = vars.minimise(objective).using(coin_cbc);
        model.set_parameter("logLevel", "0");
        model.set_parameter("sec", &config.time_limit.as_secs_f64().to_string());
        model.set_parameter("threads", &config.threads.max(1).to_string());
        model.set_parameter("ratioGap", &config.mip_gap.to_string());

        for row in &spec.constraints {
            let lhs: Expression = row.terms.iter().map(|(var, coef)| *coef * cols[var.index()]).sum();
            let c = match row.sense {
                Sense::Le => constraint::leq(lhs, row.rhs),
                Sense::Ge => constraint::geq(lhs, row.rhs),
                Sense::Eq => constraint::eq(lhs, row.rhs),
            };
            model.add_constraint(c);
        }

        match model.solve() {
            Ok(solution) => {
                let values: Vec<f64> = cols.iter().map(|c| solution.value(*c)).collect();
                let objective = spec.objective_value(&values);
                Ok(BackendOutput::with_values(SolveStatus::Optimal, values, objective, "finished"))
            }
            Err(ResolutionError::Infeasible) => Ok(BackendOutput::without_values(SolveStatus::Infeasible, "infeasible")),
            Err(ResolutionError::Unbounded) => Ok(BackendOutput::without_values(SolveStatus::Unbounded, "unbounded")),
            Err(ResolutionError::Other("Stopped")) => {
                Ok(BackendOutput::without_values(SolveStatus::Timeout, "stopped").stopped_by(StopReason::TimeLimit))
            }
            Err(err) => Err(SolverFailure::Failed(format!("cbc: {err}"))),
        }
    }
}

#[cfg(not(feature = "cbc"))]
impl SolverBackend for CbcBackend {
    fn kind(&self) -> SolverKind {
        SolverKind::Cbc
    }

    fn is_available(&self) -> bool {
        false
    }

    fn supports_integer(&self) -> bool {
        true
    }

    fn solve(&self, _spec: &ProgramSpec, _config: &SolverConfig) -> Result<BackendOutput, SolverFailure> {
        Err(SolverFailure::Unavailable(SolverKind::Cbc))
    }
}
