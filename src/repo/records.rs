//! Persisted job layout: one metadata row, per-timestep schedule rows, cost rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{AssetDispatch, AssetId, Diagnostic, JobState, ObjectiveType, OptimizationJob, Quantity, Solution};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadataRow {
    pub job_id: Uuid,
    /// Terminal state the job reached
    pub state: JobState,
    pub objective: ObjectiveType,
    pub horizon_secs: i64,
    pub timestep_secs: i64,
    pub start: DateTime<Utc>,
    pub backend: Option<String>,
    pub objective_value: Option<f64>,
    pub diagnostic: Option<Diagnostic>,
    pub created_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub job_id: Uuid,
    /// `None` for site-level quantities (curtailment)
    pub asset_id: Option<AssetId>,
    pub timestep: usize,
    pub timestamp: DateTime<Utc>,
    pub quantity: Quantity,
    pub value: f64,
    /// Battery SOC at the end of the timestep
    pub soc: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRow {
    pub job_id: Uuid,
    pub component: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub metadata: JobMetadataRow,
    pub schedule: Vec<ScheduleRow>,
    pub costs: Vec<CostRow>,
}

impl JobRecord {
    pub fn from_job(job: &OptimizationJob) -> Self {
        let job_id = job.id.0;
        let solution = job.solution.as_deref();
        let metadata = JobMetadataRow {
            job_id,
            state: job.outcome(),
            objective: job.request.objective,
            horizon_secs: job.request.horizon_secs,
            timestep_secs: job.request.timestep_secs,
            start: job.start,
            backend: solution
                .map(|s| s.backend.clone())
                .or_else(|| job.diagnostic.as_ref().and_then(|d| d.backend.clone())),
            objective_value: solution.map(|s| s.objective_value),
            diagnostic: job.diagnostic.clone(),
            created_at: job.created_at,
            finished_at: job.updated_at,
        };
        let (schedule, costs) = match solution {
            Some(s) => (schedule_rows(job_id, s), cost_rows(job_id, s)),
            None => (Vec::new(), Vec::new()),
        };
        Self {
            metadata,
            schedule,
            costs,
        }
    }
}

fn schedule_rows(job_id: Uuid, solution: &Solution) -> Vec<ScheduleRow> {
    let mut rows = Vec::new();
    let mut push = |asset_id: Option<&AssetId>, quantity: Quantity, values: &[f64], soc: Option<&[f64]>| {
        for (t, (value, timestamp)) in values.iter().zip(&solution.timestamps).enumerate() {
            rows.push(ScheduleRow {
                job_id,
                asset_id: asset_id.cloned(),
                timestep: t,
                timestamp: *timestamp,
                quantity,
                value: *value,
                soc: soc.and_then(|s| s.get(t + 1).copied()),
            });
        }
    };

    for asset in &solution.assets {
        let id = Some(&asset.asset_id);
        match &asset.dispatch {
            AssetDispatch::Battery {
                charge_kw,
                discharge_kw,
                soc,
            } => {
                push(id, Quantity::ChargeKw, charge_kw, Some(soc));
                push(id, Quantity::DischargeKw, discharge_kw, Some(soc));
            }
            AssetDispatch::Generator { output_kw, .. } => push(id, Quantity::OutputKw, output_kw, None),
            AssetDispatch::Grid { import_kw, export_kw } => {
                push(id, Quantity::ImportKw, import_kw, None);
                push(id, Quantity::ExportKw, export_kw, None);
            }
        }
    }
    push(None, Quantity::CurtailmentKw, &solution.curtailment_kw, None);
    rows
}

fn cost_rows(job_id: Uuid, solution: &Solution) -> Vec<CostRow> {
    let c = &solution.costs;
    [
        ("import_cost", c.import_cost),
        ("export_revenue", c.export_revenue),
        ("grid_cost", c.grid_cost),
        ("fuel_cost", c.fuel_cost),
        ("startup_cost", c.startup_cost),
        ("degradation_cost", c.degradation_cost),
        ("energy_cost", c.energy_cost),
        ("peak_cost", c.peak_cost),
        ("penalty_cost", c.penalty_cost),
        ("total", c.total),
    ]
    .into_iter()
    .map(|(component, amount)| CostRow {
        job_id,
        component: component.to_string(),
        amount,
    })
    .collect()
}
