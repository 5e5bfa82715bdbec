//! Problem Builder
//!
//! Turns an [`OptimizationProblem`] snapshot into a [`ProgramSpec`]:
//! - per-asset columns, box bounds and coupling rows (see `formulation`)
//! - one curtailment column and exactly one `balance[t]` row per timestep
//! - the peak auxiliary column and `peak[t]` rows for peak shaving
//!
//! Specification errors are reported before any row is coupled.

use std::collections::HashSet;
use tracing::debug;

use super::formulation::{AssetVars, Formulator};
use super::program::{ProgramSpec, Sense, VarId};
use crate::domain::{AssetId, ObjectiveType, OptimizationProblem};
use crate::error::SpecificationError;

#[derive(Debug, Clone)]
pub struct AssetIndex {
    pub id: AssetId,
    pub vars: AssetVars,
}

/// Maps (asset, timestep) to program columns so extraction never depends on column order
#[derive(Debug, Clone)]
pub struct VariableIndex {
    pub assets: Vec<AssetIndex>,
    pub curtailment: Vec<VarId>,
    pub peak: Option<VarId>,
    /// Row index of `balance[t]` in `ProgramSpec::constraints`
    pub balance_rows: Vec<usize>,
    pub load: Vec<f64>,
    pub renewable: Vec<f64>,
}

impl VariableIndex {
    pub fn asset(&self, id: &AssetId) -> Option<&AssetVars> {
        self.assets.iter().find(|a| &a.id == id).map(|a| &a.vars)
    }
}

#[derive(Debug, Clone)]
pub struct BuiltProgram {
    pub spec: ProgramSpec,
    pub index: VariableIndex,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProblemBuilder;

impl ProblemBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, problem: &OptimizationProblem) -> Result<BuiltProgram, SpecificationError> {
        let n = problem.horizon_steps;
        if n == 0 {
            return Err(SpecificationError::EmptyHorizon);
        }
        if problem.timestep_secs <= 0 {
            return Err(SpecificationError::InvalidTimestep {
                seconds: problem.timestep_secs,
            });
        }
        if problem.assets.is_empty() {
            return Err(SpecificationError::NoAssets);
        }

        let mut seen = HashSet::new();
        for asset in problem.assets.iter() {
            if !seen.insert(asset.id()) {
                return Err(SpecificationError::DuplicateAsset {
                    asset: asset.id().to_string(),
                });
            }
            asset.validate()?;
        }

        let timestep = problem.timestep();
        let forecasts = &problem.forecasts;
        let load = forecasts.load.aligned_values("load", problem.start, timestep, n)?;
        let renewable = forecasts
            .renewable
            .aligned_values("renewable", problem.start, timestep, n)?;
        let price = forecasts.price.aligned_values("price", problem.start, timestep, n)?;

        let mut spec = ProgramSpec::new();
        let mut f = Formulator {
            spec: &mut spec,
            steps: n,
            dt: problem.dt_hours(),
            objective: problem.objective,
            settings: &problem.settings,
            price: &price,
            start: problem.start,
            timestep,
            balance_terms: vec![Vec::new(); n],
            import_terms: vec![Vec::new(); n],
        };

        let mut assets = Vec::with_capacity(problem.assets.len());
        for asset in problem.assets.iter() {
            let vars = asset.formulate(&mut f)?;
            assets.push(AssetIndex {
                id: asset.id().clone(),
                vars,
            });
        }
        let Formulator {
            balance_terms,
            import_terms,
            ..
        } = f;

        let mut curtailment = Vec::with_capacity(n);
        for t in 0..n {
            curtailment.push(spec.add_variable(format!("curtail[{t}]"), 0.0, renewable[t].max(0.0))?);
        }

        let mut balance_rows = Vec::with_capacity(n);
        for (t, mut terms) in balance_terms.into_iter().enumerate() {
            terms.push((curtailment[t], -1.0));
            balance_rows.push(spec.constraints.len());
            spec.add_constraint(format!("balance[{t}]"), terms, Sense::Eq, load[t] - renewable[t]);
        }

        let peak = if problem.objective == ObjectiveType::PeakShaving {
            let upper: f64 = problem
                .assets
                .iter()
                .filter_map(|a| match a {
                    crate::domain::Asset::Grid(g) => Some(g.max_import_kw),
                    _ => None,
                })
                .sum();
            let peak = spec.add_variable("peak", 0.0, upper)?;
            spec.add_cost(peak, problem.settings.peak_tariff_per_kw);
            for (t, imports) in import_terms.into_iter().enumerate() {
                let mut row = vec![(peak, 1.0)];
                row.extend(imports.into_iter().map(|v| (v, -1.0)));
                spec.add_constraint(format!("peak[{t}]"), row, Sense::Ge, 0.0);
            }
            Some(peak)
        } else {
            None
        };

        debug!(
            variables = spec.num_variables(),
            constraints = spec.constraints.len(),
            mip = spec.is_mip(),
            objective = %problem.objective,
            "program built"
        );

        Ok(BuiltProgram {
            spec,
            index: VariableIndex {
                assets,
                curtailment,
                peak,
                balance_rows,
                load,
                renewable,
            },
        })
    }
}
