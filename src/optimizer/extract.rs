//! Result Extractor & Validator
//!
//! Turns a normalised [`RawResult`] into either a validated [`Solution`] or a
//! [`Diagnostic`]. Coupling values (SOC, balance, commitment) and costs are
//! recomputed from the dispatch itself rather than trusted from the solver.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::builder::BuiltProgram;
use super::formulation::{AssetVars, BatteryVars, GeneratorVars, GridVars};
use super::program::VarId;
use super::solver::{RawResult, StopReason};
use crate::domain::{
    Asset, AssetDispatch, AssetSchedule, CostBreakdown, Diagnostic, DiagnosticKind, Exclusivity, Generator, ObjectiveType,
    OptimizationProblem, Solution, SolveStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValidationCheck {
    ValueCount,
    VariableBounds,
    Integrality,
    SocRecursion,
    SocWindow,
    PowerBalance,
    Commitment,
    MinUpDown,
    Ramp,
    Exclusivity,
    ObjectiveDrift,
}

/// Solver output disagrees with an independently recomputed value
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{check} check failed at `{label}`: expected {expected}, got {actual}")]
pub struct ValidationMismatch {
    pub check: ValidationCheck,
    pub label: String,
    pub timestep: Option<usize>,
    pub expected: f64,
    pub actual: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Schedule(Solution),
    NoSchedule(Diagnostic),
}

#[derive(Debug, Clone, Copy)]
pub struct ResultExtractor {
    tolerance: f64,
}

impl Default for ResultExtractor {
    fn default() -> Self {
        Self::new(1e-4)
    }
}

impl ResultExtractor {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// `|a - b| <= tol * max(1, |a|, |b|)`
    fn close(&self, a: f64, b: f64) -> bool {
        (a - b).abs() <= self.tolerance * 1f64.max(a.abs()).max(b.abs())
    }

    fn mismatch(
        &self,
        check: ValidationCheck,
        label: impl Into<String>,
        timestep: Option<usize>,
        expected: f64,
        actual: f64,
    ) -> ValidationMismatch {
        ValidationMismatch {
            check,
            label: label.into(),
            timestep,
            expected,
            actual,
        }
    }

    pub fn extract(
        &self,
        problem: &OptimizationProblem,
        built: &BuiltProgram,
        raw: &RawResult,
    ) -> Result<Extraction, ValidationMismatch> {
        let backend = raw.backend.map(|k| k.to_string()).unwrap_or_else(|| "none".to_string());
        let values = match (&raw.values, raw.status.has_schedule()) {
            (Some(values), true) => values,
            _ => return Ok(Extraction::NoSchedule(self.diagnose(problem, built, raw, &backend))),
        };

        self.check_columns(built, values)?;

        let n = problem.horizon_steps;
        let dt = problem.dt_hours();
        let value = |id: &VarId| values[id.index()];
        let series = |ids: &[VarId]| ids.iter().map(|id| values[id.index()]).collect::<Vec<f64>>();

        let mut schedules = Vec::with_capacity(built.index.assets.len());
        let mut warnings = Vec::new();
        let mut costs = CostBreakdown::default();
        let mut exchanged_kwh = 0.0;
        let mut supply = vec![0.0; n];
        let mut demand = vec![0.0; n];
        let mut imports = vec![0.0; n];

        for (asset, entry) in problem.assets.iter().zip(&built.index.assets) {
            let dispatch = match (asset, &entry.vars) {
                (Asset::Battery(b), AssetVars::Battery(BatteryVars { charge, discharge, soc, mode })) => {
                    let charge = series(charge);
                    let discharge = series(discharge);
                    let (lo, hi) = b.soc_window();

                    let mut derived = Vec::with_capacity(n + 1);
                    derived.push(b.initial_soc);
                    for t in 0..n {
                        let next = b.next_soc(derived[t], charge[t], discharge[t], dt);
                        let reported = value(&soc[t + 1]);
                        if !self.close(next, reported) {
                            return Err(self.mismatch(
                                ValidationCheck::SocRecursion,
                                format!("soc[{},{}]", b.id, t),
                                Some(t),
                                next,
                                reported,
                            ));
                        }
                        derived.push(next);
                    }
                    for (t, s) in derived.iter().enumerate().skip(1) {
                        let lower = if t == n { lo.max(b.terminal_soc.unwrap_or(lo)) } else { lo };
                        let bound = if *s < lower { lower } else { hi };
                        if (*s < lower || *s > hi) && !self.close(*s, bound) {
                            return Err(self.mismatch(
                                ValidationCheck::SocWindow,
                                format!("soc[{},{}]", b.id, t),
                                Some(t),
                                bound,
                                *s,
                            ));
                        }
                    }

                    let mut overlap = 0;
                    for t in 0..n {
                        supply[t] += discharge[t];
                        demand[t] += charge[t];
                        let throughput = (charge[t] + discharge[t]) * dt;
                        costs.degradation_cost += b.degradation_cost_per_kwh * throughput;
                        if b.exclusivity == Exclusivity::Penalty {
                            costs.penalty_cost += problem.settings.exclusivity_penalty_per_kwh * throughput;
                            if charge[t] > self.tolerance && discharge[t] > self.tolerance {
                                overlap += 1;
                            }
                        }
                    }
                    if let Some(mode) = mode {
                        for t in 0..n {
                            let (row, idle) = if value(&mode[t]).round() >= 1.0 {
                                ("excl_discharge", discharge[t])
                            } else {
                                ("excl_charge", charge[t])
                            };
                            if !self.close(idle, 0.0) {
                                return Err(self.mismatch(
                                    ValidationCheck::Exclusivity,
                                    format!("{row}[{},{}]", b.id, t),
                                    Some(t),
                                    0.0,
                                    idle,
                                ));
                            }
                        }
                    }
                    if overlap > 0 {
                        warnings.push(format!(
                            "battery {} charges and discharges in the same timestep at {overlap} timesteps",
                            b.id
                        ));
                    }

                    AssetDispatch::Battery {
                        charge_kw: charge,
                        discharge_kw: discharge,
                        soc: derived,
                    }
                }
                (
                    Asset::Generator(g),
                    AssetVars::Generator(GeneratorVars {
                        output,
                        on,
                        start,
                        stop,
                        curve,
                        ..
                    }),
                ) => {
                    let output = series(output);
                    let on: Vec<bool> = match on {
                        Some(on) => on.iter().map(|id| value(id).round() >= 1.0).collect(),
                        None => output
                            .iter()
                            .map(|p| g.min_power_kw > 0.0 || *p > self.tolerance)
                            .collect(),
                    };
                    let committed = g.needs_commitment();
                    let (starts, stops) = transitions(g.initial_on, &on);

                    if let (Some(start), Some(stop)) = (start, stop) {
                        for t in 0..n {
                            for (row, cols, derived) in [("start", start, &starts), ("stop", stop, &stops)] {
                                let expected = if derived[t] { 1.0 } else { 0.0 };
                                let actual = value(&cols[t]);
                                if !self.close(expected, actual) {
                                    return Err(self.mismatch(
                                        ValidationCheck::Commitment,
                                        format!("{row}[{},{}]", g.id, t),
                                        Some(t),
                                        expected,
                                        actual,
                                    ));
                                }
                            }
                        }
                        self.check_min_up_down(g, &on, &starts, &stops)?;
                    }
                    self.check_ramps(g, &output, committed.then_some((&starts[..], &stops[..])), dt)?;

                    for t in 0..n {
                        let running = on[t] || !committed;
                        let (lower, upper) = if on[t] {
                            (g.min_power_kw, g.max_power_kw)
                        } else if committed {
                            (0.0, 0.0)
                        } else {
                            (g.min_power_kw, g.max_power_kw)
                        };
                        let p = output[t];
                        if (p < lower && !self.close(p, lower)) || (p > upper && !self.close(p, upper)) {
                            return Err(self.mismatch(
                                ValidationCheck::Commitment,
                                format!("commit[{},{}]", g.id, t),
                                Some(t),
                                if p < lower { lower } else { upper },
                                p,
                            ));
                        }
                        supply[t] += p;
                        costs.fuel_cost += curve.cost_per_h(p, g.min_power_kw, running) * dt;
                        if committed && starts[t] {
                            costs.startup_cost += g.startup_cost;
                        }
                    }

                    AssetDispatch::Generator { output_kw: output, on }
                }
                (
                    Asset::Grid(g),
                    AssetVars::Grid(GridVars {
                        import,
                        export,
                        import_price,
                        export_price,
                    }),
                ) => {
                    let import = series(import);
                    let export = series(export);
                    let mut overlap = 0;
                    for t in 0..n {
                        supply[t] += import[t];
                        demand[t] += export[t];
                        imports[t] += import[t];
                        costs.import_cost += import[t] * import_price[t] * dt;
                        costs.export_revenue += export[t] * export_price[t] * dt;
                        exchanged_kwh += (import[t] + export[t]) * dt;
                        if import[t] > self.tolerance && export[t] > self.tolerance {
                            overlap += 1;
                        }
                    }
                    if overlap > 0 {
                        warnings.push(format!(
                            "grid connection {} imports and exports in the same timestep at {overlap} timesteps",
                            g.id
                        ));
                    }
                    AssetDispatch::Grid {
                        import_kw: import,
                        export_kw: export,
                    }
                }
                _ => {
                    return Err(self.mismatch(
                        ValidationCheck::ValueCount,
                        format!("index[{}]", asset.id()),
                        None,
                        0.0,
                        0.0,
                    ))
                }
            };
            schedules.push(AssetSchedule {
                asset_id: asset.id().clone(),
                dispatch,
            });
        }

        let curtailment = series(&built.index.curtailment);
        for t in 0..n {
            let net = supply[t] - demand[t] - curtailment[t];
            let required = built.index.load[t] - built.index.renewable[t];
            if !self.close(net, required) {
                return Err(self.mismatch(
                    ValidationCheck::PowerBalance,
                    format!("balance[{t}]"),
                    Some(t),
                    required,
                    net,
                ));
            }
        }

        let peak_import_kw = imports.iter().copied().fold(0.0, f64::max);
        if problem.objective == ObjectiveType::PeakShaving {
            costs.peak_cost = problem.settings.peak_tariff_per_kw * peak_import_kw;
        }
        let costs = costs.finalize();

        let recomputed = match problem.objective {
            ObjectiveType::CostMinimization => costs.total,
            ObjectiveType::PeakShaving => costs.total,
            ObjectiveType::SelfConsumption => {
                exchanged_kwh + costs.fuel_cost + costs.startup_cost + costs.degradation_cost + costs.penalty_cost
            }
        };
        let objective_value = raw.objective.unwrap_or(recomputed);
        if !self.close(recomputed, objective_value) {
            if raw.status == SolveStatus::Optimal {
                return Err(self.mismatch(
                    ValidationCheck::ObjectiveDrift,
                    "objective",
                    None,
                    recomputed,
                    objective_value,
                ));
            }
            warnings.push(format!(
                "incumbent objective {objective_value} differs from recomputed cost {recomputed}"
            ));
        }

        debug!(
            backend = %backend,
            status = %raw.status,
            objective = objective_value,
            warnings = warnings.len(),
            "solution validated"
        );

        Ok(Extraction::Schedule(Solution {
            objective_value,
            status: raw.status,
            backend,
            timestamps: problem.timestamps(),
            assets: schedules,
            curtailment_kw: curtailment,
            peak_import_kw,
            costs,
            warnings,
        }))
    }

    /// Every start (stop) inside the last `min_up` (`min_down`) steps keeps the unit on (off)
    fn check_min_up_down(
        &self,
        g: &Generator,
        on: &[bool],
        starts: &[bool],
        stops: &[bool],
    ) -> Result<(), ValidationMismatch> {
        for t in 0..on.len() {
            let (row, window, events) = match on[t] {
                false => ("min_up", g.min_up_steps, starts),
                true => ("min_down", g.min_down_steps, stops),
            };
            if window == 0 {
                continue;
            }
            let from = (t + 1).saturating_sub(window);
            if let Some(tau) = (from..=t).find(|&tau| events[tau]) {
                return Err(self.mismatch(
                    ValidationCheck::MinUpDown,
                    format!("{row}[{},{}]", g.id, t),
                    Some(t),
                    window as f64,
                    (t - tau) as f64,
                ));
            }
        }
        Ok(())
    }

    /// Output deltas against the ramp limits, relaxed on start-up and shut-down steps
    fn check_ramps(
        &self,
        g: &Generator,
        output: &[f64],
        transitions: Option<(&[bool], &[bool])>,
        dt: f64,
    ) -> Result<(), ValidationMismatch> {
        let relaxed = |ramp: f64, events: Option<&[bool]>, t: usize| {
            let limit = ramp * dt;
            match events {
                Some(events) if events[t] => limit + (g.min_power_kw - limit).max(0.0),
                _ => limit,
            }
        };
        for t in 0..output.len() {
            let previous = match t {
                0 => match g.initial_output_kw {
                    Some(initial) => initial,
                    None => continue,
                },
                _ => output[t - 1],
            };
            let delta = output[t] - previous;
            let limits = [
                ("ramp_up", g.ramp_up_kw_per_h, delta, transitions.map(|(starts, _)| starts)),
                ("ramp_down", g.ramp_down_kw_per_h, -delta, transitions.map(|(_, stops)| stops)),
            ];
            for (row, ramp, change, events) in limits {
                let Some(ramp) = ramp else { continue };
                let allowed = relaxed(ramp, events, t);
                if change > allowed && !self.close(change, allowed) {
                    return Err(self.mismatch(
                        ValidationCheck::Ramp,
                        format!("{row}[{},{}]", g.id, t),
                        Some(t),
                        allowed,
                        change,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Value count, column bounds and integrality
    fn check_columns(&self, built: &BuiltProgram, values: &[f64]) -> Result<(), ValidationMismatch> {
        let spec = &built.spec;
        if values.len() != spec.num_variables() {
            return Err(self.mismatch(
                ValidationCheck::ValueCount,
                "values",
                None,
                spec.num_variables() as f64,
                values.len() as f64,
            ));
        }
        for (var, &x) in spec.variables.iter().zip(values) {
            if !x.is_finite() {
                return Err(self.mismatch(ValidationCheck::VariableBounds, var.name.clone(), None, var.lower, x));
            }
            if x < var.lower && !self.close(x, var.lower) {
                return Err(self.mismatch(ValidationCheck::VariableBounds, var.name.clone(), None, var.lower, x));
            }
            if x > var.upper && !self.close(x, var.upper) {
                return Err(self.mismatch(ValidationCheck::VariableBounds, var.name.clone(), None, var.upper, x));
            }
        }
        for (var, &x) in spec.variables.iter().zip(values).filter(|(v, _)| v.integer) {
            if (x - x.round()).abs() > self.tolerance {
                return Err(self.mismatch(ValidationCheck::Integrality, var.name.clone(), None, x.round(), x));
            }
        }
        Ok(())
    }

    fn diagnose(&self, problem: &OptimizationProblem, built: &BuiltProgram, raw: &RawResult, backend: &str) -> Diagnostic {
        let diagnostic = match raw.status {
            SolveStatus::Infeasible => {
                let conflicting = if raw.conflicting.is_empty() {
                    built.spec.screen_infeasibility(self.tolerance)
                } else {
                    raw.conflicting.clone()
                };
                let message = if conflicting.is_empty() {
                    "no schedule satisfies all asset and balance constraints; no conflicting subset could be isolated"
                        .to_string()
                } else {
                    format!(
                        "no schedule satisfies all constraints; unsatisfiable under the asset bounds: {}",
                        conflicting.join(", ")
                    )
                };
                Diagnostic::new(DiagnosticKind::Infeasible, message).with_conflicting(conflicting)
            }
            SolveStatus::Unbounded => Diagnostic::new(
                DiagnosticKind::Unbounded,
                "objective is unbounded; some quantity has no effective limit",
            ),
            SolveStatus::Timeout => {
                let steps = problem.horizon_steps;
                let message = match raw.stopped_by {
                    Some(StopReason::NodeLimit) => format!(
                        "branch-and-bound node cap hit without a feasible schedule over {steps} steps ({}); \
                         raise solver.max_branch_nodes",
                        raw.native_status
                    ),
                    Some(StopReason::IterationLimit) => format!(
                        "iteration limit hit without a feasible schedule over {steps} steps ({})",
                        raw.native_status
                    ),
                    Some(StopReason::Aborted) => {
                        format!("solve aborted before a feasible schedule was found ({})", raw.native_status)
                    }
                    Some(StopReason::TimeLimit) | None => format!(
                        "time budget exhausted without a feasible schedule over {steps} steps ({}); \
                         resubmit with a larger time limit",
                        raw.native_status
                    ),
                };
                Diagnostic::new(DiagnosticKind::Timeout, message)
            }
            SolveStatus::SolverError | SolveStatus::Optimal | SolveStatus::FeasibleSuboptimal => Diagnostic::new(
                DiagnosticKind::SolverError,
                raw.error
                    .clone()
                    .unwrap_or_else(|| format!("solver returned no usable result ({})", raw.native_status)),
            ),
        };
        diagnostic.with_backend(backend)
    }
}

/// Start-up and shut-down steps implied by the on/off sequence
fn transitions(initial_on: bool, on: &[bool]) -> (Vec<bool>, Vec<bool>) {
    let mut previous = initial_on;
    on.iter()
        .map(|&now| {
            let step = (now && !previous, previous && !now);
            previous = now;
            step
        })
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::asset::tests::{battery, generator};
    use crate::domain::Battery;
    use crate::optimizer::builder::tests::{grid, problem};
    use crate::optimizer::solver::{SolverAdapter, SolverConfig, SolverKind};
    use crate::optimizer::ProblemBuilder;
    use std::time::Duration;

    fn solve(p: &OptimizationProblem) -> (BuiltProgram, RawResult) {
        let built = ProblemBuilder::new().build(p).unwrap();
        let raw = SolverAdapter::with_default_backends(&[SolverKind::Minilp]).solve(&built.spec, &SolverConfig::default());
        (built, raw)
    }

    fn battery_problem() -> OptimizationProblem {
        problem(
            ObjectiveType::CostMinimization,
            vec![Asset::Battery(battery("bat")), Asset::Grid(grid("grid", 100.0, 100.0))],
            vec![0.0; 4],
            vec![0.0; 4],
            vec![0.1, 0.1, 0.3, 0.3],
        )
    }

    #[test]
    fn test_extracts_validated_schedule() {
        let p = battery_problem();
        let (built, raw) = solve(&p);
        let Extraction::Schedule(solution) = ResultExtractor::default().extract(&p, &built, &raw).unwrap() else {
            panic!("expected a schedule");
        };
        assert_eq!(solution.status, SolveStatus::Optimal);
        assert!(solution.objective_value < 0.0);
        assert!((solution.costs.total - solution.objective_value).abs() < 1e-4);
        let Some(AssetDispatch::Battery { soc, .. }) = solution.schedule_for(&"bat".into()) else {
            panic!("battery missing");
        };
        assert_eq!(soc.len(), 5);
    }

    #[test]
    fn test_tampered_soc_is_a_mismatch() {
        let p = battery_problem();
        let (built, mut raw) = solve(&p);
        let AssetVars::Battery(vars) = &built.index.assets[0].vars else { unreachable!() };
        let values = raw.values.as_mut().unwrap();
        values[vars.soc[2].index()] -= 0.05;
        let err = ResultExtractor::default().extract(&p, &built, &raw).unwrap_err();
        assert_eq!(err.check, ValidationCheck::SocRecursion);
    }

    #[test]
    fn test_tampered_objective_is_drift() {
        let p = battery_problem();
        let (built, mut raw) = solve(&p);
        raw.objective = raw.objective.map(|o| o + 1.0);
        let err = ResultExtractor::default().extract(&p, &built, &raw).unwrap_err();
        assert_eq!(err.check, ValidationCheck::ObjectiveDrift);
    }

    #[test]
    fn test_infeasible_yields_conflicting_rows() {
        let p = problem(
            ObjectiveType::CostMinimization,
            vec![Asset::Grid(grid("grid", 10.0, 0.0))],
            vec![20.0, 5.0],
            vec![0.0; 2],
            vec![0.2; 2],
        );
        let (built, raw) = solve(&p);
        assert_eq!(raw.status, SolveStatus::Infeasible);
        let Extraction::NoSchedule(d) = ResultExtractor::default().extract(&p, &built, &raw).unwrap() else {
            panic!("infeasible programs have no schedule");
        };
        assert_eq!(d.kind, DiagnosticKind::Infeasible);
        assert_eq!(d.conflicting, vec!["balance[0]".to_string()]);
        assert_eq!(d.backend.as_deref(), Some("minilp"));
    }

    #[test]
    fn test_short_value_vector_is_a_mismatch() {
        let p = battery_problem();
        let (built, mut raw) = solve(&p);
        raw.values.as_mut().unwrap().pop();
        raw.elapsed = Duration::ZERO;
        let err = ResultExtractor::default().extract(&p, &built, &raw).unwrap_err();
        assert_eq!(err.check, ValidationCheck::ValueCount);
    }

    #[test]
    fn test_node_cap_diagnostic_names_the_cap() {
        let p = generator_problem(Generator {
            min_up_steps: 2,
            ..generator("gen")
        });
        let built = ProblemBuilder::new().build(&p).unwrap();
        let config = SolverConfig {
            max_branch_nodes: 0,
            ..Default::default()
        };
        let raw = SolverAdapter::with_default_backends(&[SolverKind::Minilp]).solve(&built.spec, &config);
        assert_eq!(raw.status, SolveStatus::Timeout);
        assert_eq!(raw.stopped_by, Some(StopReason::NodeLimit));

        let Extraction::NoSchedule(d) = ResultExtractor::default().extract(&p, &built, &raw).unwrap() else {
            panic!("no incumbent means no schedule");
        };
        assert_eq!(d.kind, DiagnosticKind::Timeout);
        assert!(d.message.contains("node cap"), "{}", d.message);
        assert!(d.message.contains("max_branch_nodes"), "{}", d.message);
        assert!(!d.message.contains("time budget"), "{}", d.message);
    }

    fn generator_problem(g: Generator) -> OptimizationProblem {
        problem(
            ObjectiveType::CostMinimization,
            vec![Asset::Generator(g), Asset::Grid(grid("grid", 100.0, 0.0))],
            vec![5.0; 4],
            vec![0.0; 4],
            vec![0.1; 4],
        )
    }

    #[test]
    fn test_short_run_violates_min_up() {
        let p = generator_problem(Generator {
            min_up_steps: 3,
            ..generator("gen")
        });
        let (built, mut raw) = solve(&p);
        let AssetVars::Generator(vars) = &built.index.assets[0].vars else { unreachable!() };
        let (on, start, stop) = (
            vars.on.as_ref().unwrap(),
            vars.start.as_ref().unwrap(),
            vars.stop.as_ref().unwrap(),
        );
        let values = raw.values.as_mut().unwrap();

        // one step on, started at t=1 and stopped at t=2
        for t in 0..4 {
            values[on[t].index()] = if t == 1 { 1.0 } else { 0.0 };
            values[start[t].index()] = if t == 1 { 1.0 } else { 0.0 };
            values[stop[t].index()] = if t == 2 { 1.0 } else { 0.0 };
            values[vars.output[t].index()] = if t == 1 { 5.0 } else { 0.0 };
        }
        raw.objective = None;

        let err = ResultExtractor::default().extract(&p, &built, &raw).unwrap_err();
        assert_eq!(err.check, ValidationCheck::MinUpDown);
        assert_eq!(err.label, "min_up[gen,2]");
        assert_eq!(err.timestep, Some(2));
    }

    #[test]
    fn test_start_without_switching_on_is_a_mismatch() {
        let p = generator_problem(Generator {
            startup_cost: 1.0,
            ..generator("gen")
        });
        let (built, mut raw) = solve(&p);
        let AssetVars::Generator(vars) = &built.index.assets[0].vars else { unreachable!() };
        let values = raw.values.as_mut().unwrap();
        for t in 0..4 {
            values[vars.on.as_ref().unwrap()[t].index()] = 0.0;
            values[vars.start.as_ref().unwrap()[t].index()] = 0.0;
            values[vars.stop.as_ref().unwrap()[t].index()] = 0.0;
            values[vars.output[t].index()] = 0.0;
        }
        values[vars.start.as_ref().unwrap()[0].index()] = 1.0;
        values[vars.stop.as_ref().unwrap()[0].index()] = 1.0;
        raw.objective = None;

        let err = ResultExtractor::default().extract(&p, &built, &raw).unwrap_err();
        assert_eq!(err.check, ValidationCheck::Commitment);
        assert_eq!(err.label, "start[gen,0]");
    }

    #[test]
    fn test_output_jump_violates_ramp() {
        let p = generator_problem(Generator {
            ramp_up_kw_per_h: Some(2.0),
            ..generator("gen")
        });
        let (built, mut raw) = solve(&p);
        let AssetVars::Generator(vars) = &built.index.assets[0].vars else { unreachable!() };
        let values = raw.values.as_mut().unwrap();
        values[vars.output[1].index()] = values[vars.output[0].index()] + 10.0;
        raw.objective = None;

        let err = ResultExtractor::default().extract(&p, &built, &raw).unwrap_err();
        assert_eq!(err.check, ValidationCheck::Ramp);
        assert_eq!(err.label, "ramp_up[gen,1]");
        assert_eq!(err.expected, 2.0);
    }

    #[test]
    fn test_binary_mode_rejects_simultaneous_charge_and_discharge() {
        let b = Battery {
            exclusivity: Exclusivity::Binary,
            ..battery("bat")
        };
        let (eta_c, _) = b.efficiencies();
        let p = problem(
            ObjectiveType::CostMinimization,
            vec![Asset::Battery(b), Asset::Grid(grid("grid", 100.0, 100.0))],
            vec![0.0; 4],
            vec![0.0; 4],
            vec![0.1, 0.1, 0.3, 0.3],
        );
        let (built, mut raw) = solve(&p);
        let AssetVars::Battery(vars) = &built.index.assets[0].vars else { unreachable!() };
        let values = raw.values.as_mut().unwrap();
        let t = (0..4)
            .find(|&t| values[vars.discharge[t].index()] > 1.0)
            .expect("battery discharges at the expensive hours");

        // charge 1 kW while discharging, keeping the reported SOC consistent
        values[vars.charge[t].index()] += 1.0;
        for k in t + 1..=4 {
            values[vars.soc[k].index()] += eta_c / 100.0;
        }
        raw.objective = None;

        let err = ResultExtractor::default().extract(&p, &built, &raw).unwrap_err();
        assert_eq!(err.check, ValidationCheck::Exclusivity);
        assert_eq!(err.label, format!("excl_charge[bat,{t}]"));
    }
}
