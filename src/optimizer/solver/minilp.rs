//! Pure-Rust backend on `minilp`.
//!
//! `minilp` only solves continuous LPs; integer columns are handled by a
//! depth-first branch-and-bound over re-solved relaxations. The wall-clock
//! limit, the abort flag and the node cap are checked between nodes.

use minilp::{ComparisonOp, Error as LpError, LinearExpr, OptimizationDirection, Problem};
use std::time::Instant;
use tracing::debug;

use super::{BackendOutput, SolverBackend, SolverConfig, SolverFailure, SolverKind, StopReason};
use crate::domain::SolveStatus;
use crate::optimizer::program::{ProgramSpec, Sense};

const INTEGRALITY_EPS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Default)]
pub struct MinilpBackend;

impl MinilpBackend {
    pub fn new() -> Self {
        Self
    }
}

enum Relaxation {
    Solved { values: Vec<f64>, objective: f64 },
    Infeasible,
    Unbounded,
}

/// Solve the LP relaxation of `spec` with column bounds replaced by `bounds`
fn relax(spec: &ProgramSpec, bounds: &[(f64, f64)]) -> Relaxation {
    let mut problem = Problem::new(OptimizationDirection::Minimize);
    let vars: Vec<_> = spec
        .variables
        .iter()
        .zip(bounds)
        .map(|(v, &(lo, hi))| problem.add_var(v.cost, (lo, hi)))
        .collect();

    for row in &spec.constraints {
        let mut expr = LinearExpr::empty();
        for (var, coef) in &row.terms {
            expr.add(vars[var.index()], *coef);
        }
        let op = match row.sense {
            Sense::Le => ComparisonOp::Le,
            Sense::Ge => ComparisonOp::Ge,
            Sense::Eq => ComparisonOp::Eq,
        };
        problem.add_constraint(expr, op, row.rhs);
    }

    match problem.solve() {
        Ok(solution) => Relaxation::Solved {
            values: vars.iter().map(|v| *solution.var_value(*v)).collect(),
            objective: solution.objective() + spec.objective_offset,
        },
        Err(LpError::Infeasible) => Relaxation::Infeasible,
        Err(LpError::Unbounded) => Relaxation::Unbounded,
    }
}

/// Integer column whose relaxed value is furthest from an integer
fn most_fractional(spec: &ProgramSpec, values: &[f64]) -> Option<(usize, f64)> {
    spec.variables
        .iter()
        .zip(values)
        .enumerate()
        .filter(|(_, (v, _))| v.integer)
        .map(|(j, (_, &x))| (j, x, (x - x.round()).abs()))
        .filter(|(_, _, frac)| *frac > INTEGRALITY_EPS)
        .max_by(|a, b| a.2.total_cmp(&b.2))
        .map(|(j, x, _)| (j, x))
}

impl SolverBackend for MinilpBackend {
    fn kind(&self) -> SolverKind {
        SolverKind::Minilp
    }

    fn is_available(&self) -> bool {
        true
    }

    fn supports_integer(&self) -> bool {
        true
    }

    fn supports_abort(&self) -> bool {
        true
    }

    fn solve(&self, spec: &ProgramSpec, config: &SolverConfig) -> Result<BackendOutput, SolverFailure> {
        let root: Vec<(f64, f64)> = spec.variables.iter().map(|v| (v.lower, v.upper)).collect();

        if !spec.is_mip() {
            return Ok(match relax(spec, &root) {
                Relaxation::Solved { values, objective } => {
                    BackendOutput::with_values(SolveStatus::Optimal, values, objective, "optimal")
                }
                Relaxation::Infeasible => BackendOutput::without_values(SolveStatus::Infeasible, "infeasible"),
                Relaxation::Unbounded => BackendOutput::without_values(SolveStatus::Unbounded, "unbounded"),
            });
        }

        let deadline = Instant::now() + config.time_limit;
        let mut stack = vec![root];
        let mut incumbent: Option<(Vec<f64>, f64)> = None;
        let mut nodes = 0usize;
        let mut stopped: Option<StopReason> = None;

        while let Some(bounds) = stack.pop() {
            if config.abort.is_aborted() {
                stopped = Some(StopReason::Aborted);
                break;
            }
            if Instant::now() >= deadline {
                stopped = Some(StopReason::TimeLimit);
                break;
            }
            if nodes >= config.max_branch_nodes {
                stopped = Some(StopReason::NodeLimit);
                break;
            }
            nodes += 1;

            let (values, objective) = match relax(spec, &bounds) {
                Relaxation::Solved { values, objective } => (values, objective),
                Relaxation::Unbounded if nodes == 1 => {
                    return Ok(BackendOutput::without_values(SolveStatus::Unbounded, "unbounded"));
                }
                Relaxation::Infeasible | Relaxation::Unbounded => continue,
            };

            if let Some((_, best)) = &incumbent {
                if objective >= best - config.mip_gap * best.abs().max(1.0) {
                    continue;
                }
            }

            match most_fractional(spec, &values) {
                None => {
                    let mut rounded = values;
                    for (x, v) in rounded.iter_mut().zip(&spec.variables) {
                        if v.integer {
                            *x = x.round();
                        }
                    }
                    let objective = spec.objective_value(&rounded);
                    incumbent = Some((rounded, objective));
                }
                Some((j, x)) => {
                    let floor = x.floor();
                    let mut down = bounds.clone();
                    down[j].1 = floor;
                    let mut up = bounds;
                    up[j].0 = floor + 1.0;
                    // nearer child is explored first
                    if x - floor < 0.5 {
                        stack.push(up);
                        stack.push(down);
                    } else {
                        stack.push(down);
                        stack.push(up);
                    }
                }
            }
        }

        debug!(nodes, stopped = ?stopped, "branch and bound finished");

        let stopped_status = |reason: StopReason| match reason {
            StopReason::NodeLimit => format!("node limit of {} reached", config.max_branch_nodes),
            StopReason::TimeLimit | StopReason::IterationLimit => format!("time limit reached after {nodes} nodes"),
            StopReason::Aborted => format!("aborted after {nodes} nodes"),
        };
        Ok(match (stopped, incumbent) {
            (None, Some((values, objective))) => BackendOutput::with_values(
                SolveStatus::Optimal,
                values,
                objective,
                format!("optimal after {nodes} nodes"),
            ),
            (None, None) => BackendOutput::without_values(SolveStatus::Infeasible, "infeasible"),
            (Some(reason), Some((values, objective))) => {
                BackendOutput::with_values(SolveStatus::Timeout, values, objective, stopped_status(reason))
                    .stopped_by(reason)
            }
            (Some(reason), None) => {
                BackendOutput::without_values(SolveStatus::Timeout, stopped_status(reason)).stopped_by(reason)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::time::Duration;

    #[test]
    fn test_lp_optimum() {
        let mut spec = ProgramSpec::new();
        let x = spec.add_variable("x", 0.0, 10.0).unwrap();
        let y = spec.add_variable("y", 0.0, 10.0).unwrap();
        spec.add_cost(x, 1.0);
        spec.add_cost(y, 2.0);
        spec.add_constraint("cover", vec![(x, 1.0), (y, 1.0)], Sense::Ge, 12.0);
        let out = MinilpBackend.solve(&spec, &SolverConfig::default()).unwrap();
        assert_eq!(out.status, SolveStatus::Optimal);
        let values = out.values.unwrap();
        assert_relative_eq!(values[0], 10.0, epsilon = 1e-6);
        assert_relative_eq!(values[1], 2.0, epsilon = 1e-6);
        assert_relative_eq!(out.objective.unwrap(), 14.0, epsilon = 1e-6);
    }

    #[test]
    fn test_branch_and_bound_finds_integer_optimum() {
        // knapsack as minimisation: max 5a + 4b + 3c s.t. 2a + 3b + c <= 5
        let mut spec = ProgramSpec::new();
        let a = spec.add_binary("a");
        let b = spec.add_binary("b");
        let c = spec.add_binary("c");
        spec.add_cost(a, -5.0);
        spec.add_cost(b, -4.0);
        spec.add_cost(c, -3.0);
        spec.add_constraint("cap", vec![(a, 2.0), (b, 3.0), (c, 1.0)], Sense::Le, 5.0);
        let out = MinilpBackend.solve(&spec, &SolverConfig::default()).unwrap();
        assert_eq!(out.status, SolveStatus::Optimal);
        assert_relative_eq!(out.objective.unwrap(), -9.0, epsilon = 1e-6);
        assert!(out.values.unwrap().iter().all(|x| x.fract() == 0.0));
    }

    #[test]
    fn test_infeasible_lp() {
        let mut spec = ProgramSpec::new();
        let x = spec.add_variable("x", 0.0, 1.0).unwrap();
        spec.add_constraint("impossible", vec![(x, 1.0)], Sense::Ge, 2.0);
        let out = MinilpBackend.solve(&spec, &SolverConfig::default()).unwrap();
        assert_eq!(out.status, SolveStatus::Infeasible);
        assert!(out.values.is_none());
    }

    #[test]
    fn test_abort_stops_branching() {
        let mut spec = ProgramSpec::new();
        let a = spec.add_binary("a");
        spec.add_cost(a, -1.0);
        spec.add_constraint("half", vec![(a, 2.0)], Sense::Le, 1.0);
        let config = SolverConfig {
            time_limit: Duration::from_secs(5),
            ..Default::default()
        };
        config.abort.abort();
        let out = MinilpBackend.solve(&spec, &config).unwrap();
        assert_eq!(out.status, SolveStatus::Timeout);
        assert_eq!(out.stopped_by, Some(StopReason::Aborted));
        assert!(out.native_status.starts_with("aborted"));
    }

    #[test]
    fn test_node_cap_is_reported_as_node_limit() {
        let mut spec = ProgramSpec::new();
        let a = spec.add_binary("a");
        spec.add_cost(a, -1.0);
        spec.add_constraint("half", vec![(a, 2.0)], Sense::Le, 1.0);
        let config = SolverConfig {
            max_branch_nodes: 0,
            ..Default::default()
        };
        let out = MinilpBackend.solve(&spec, &config).unwrap();
        assert_eq!(out.status, SolveStatus::Timeout);
        assert_eq!(out.stopped_by, Some(StopReason::NodeLimit));
        assert_eq!(out.native_status, "node limit of 0 reached");
    }
}
