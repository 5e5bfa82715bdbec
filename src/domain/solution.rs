use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AssetId;

/// Solver outcome, normalised across backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveStatus {
    Optimal,
    /// Feasible incumbent, optimality not proven (typically a time limit hit)
    FeasibleSuboptimal,
    Infeasible,
    Unbounded,
    /// Time budget exhausted with no usable incumbent
    Timeout,
    SolverError,
}

impl SolveStatus {
    pub fn has_schedule(&self) -> bool {
        matches!(self, Self::Optimal | Self::FeasibleSuboptimal)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssetDispatch {
    Battery {
        charge_kw: Vec<f64>,
        discharge_kw: Vec<f64>,
        /// `horizon + 1` values; `soc[t]` is the state before step `t`
        soc: Vec<f64>,
    },
    Generator {
        output_kw: Vec<f64>,
        on: Vec<bool>,
    },
    Grid {
        import_kw: Vec<f64>,
        export_kw: Vec<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSchedule {
    pub asset_id: AssetId,
    #[serde(flatten)]
    pub dispatch: AssetDispatch,
}

/// Costs recomputed from the schedule, in currency units over the whole horizon
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub import_cost: f64,
    pub export_revenue: f64,
    /// `import_cost - export_revenue`
    pub grid_cost: f64,
    pub fuel_cost: f64,
    pub startup_cost: f64,
    pub degradation_cost: f64,
    /// `grid_cost + fuel_cost`
    pub energy_cost: f64,
    pub peak_cost: f64,
    /// Exclusivity penalty terms
    pub penalty_cost: f64,
    pub total: f64,
}

impl CostBreakdown {
    /// Fill the derived fields from the itemised ones
    pub fn finalize(mut self) -> Self {
        self.grid_cost = self.import_cost - self.export_revenue;
        self.energy_cost = self.grid_cost + self.fuel_cost;
        self.total =
            self.energy_cost + self.startup_cost + self.degradation_cost + self.peak_cost + self.penalty_cost;
        self
    }
}

/// Validated dispatch schedule for a solved job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub objective_value: f64,
    pub status: SolveStatus,
    pub backend: String,
    pub timestamps: Vec<DateTime<Utc>>,
    pub assets: Vec<AssetSchedule>,
    pub curtailment_kw: Vec<f64>,
    /// Highest total grid import over the horizon
    pub peak_import_kw: f64,
    pub costs: CostBreakdown,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl Solution {
    pub fn schedule_for(&self, id: &AssetId) -> Option<&AssetDispatch> {
        self.assets.iter().find(|a| &a.asset_id == id).map(|a| &a.dispatch)
    }
}
