//! Per-asset decision variables, box bounds and coupling constraints.
//!
//! Each asset variant contributes its own columns and rows to the shared
//! [`ProgramSpec`] and registers its supply/demand terms with the
//! [`Formulator`], which owns the single power-balance row per timestep.

use crate::domain::{
    Asset, AssetId, Battery, Exclusivity, Generator, GridConnection, LinearizedCurve, ModelSettings, ObjectiveType,
    Quantity,
};
use crate::error::SpecificationError;
use crate::optimizer::program::{ProgramSpec, Sense, VarId};

/// Shared build state for one program
pub(crate) struct Formulator<'a> {
    pub spec: &'a mut ProgramSpec,
    pub steps: usize,
    pub dt: f64,
    pub objective: ObjectiveType,
    pub settings: &'a ModelSettings,
    /// Forecast price, the default for grid connections without their own series
    pub price: &'a [f64],
    pub start: chrono::DateTime<chrono::Utc>,
    pub timestep: chrono::Duration,
    /// Terms entering `balance[t]` with supply positive
    pub balance_terms: Vec<Vec<(VarId, f64)>>,
    /// Grid import columns per timestep, for the peak row
    pub import_terms: Vec<Vec<VarId>>,
}

impl<'a> Formulator<'a> {
    fn bounded(&mut self, asset: &Asset, quantity: Quantity, t: usize, name: String) -> Result<VarId, SpecificationError> {
        let bound = asset
            .box_bounds(t, self.steps)
            .into_iter()
            .find(|(q, _)| *q == quantity)
            .map(|(_, b)| b)
            .ok_or_else(|| SpecificationError::asset(asset.id(), format!("declares no {quantity} bound at {t}")))?;
        self.spec.add_variable(name, bound.lower, bound.upper)
    }

    fn supply(&mut self, t: usize, var: VarId) {
        self.balance_terms[t].push((var, 1.0));
    }

    fn demand(&mut self, t: usize, var: VarId) {
        self.balance_terms[t].push((var, -1.0));
    }
}

/// Column ids of one battery
#[derive(Debug, Clone)]
pub struct BatteryVars {
    pub charge: Vec<VarId>,
    pub discharge: Vec<VarId>,
    /// `steps + 1` columns
    pub soc: Vec<VarId>,
    pub mode: Option<Vec<VarId>>,
}

/// Column ids of one generator, plus the linearised curve used to price them
#[derive(Debug, Clone)]
pub struct GeneratorVars {
    pub output: Vec<VarId>,
    pub on: Option<Vec<VarId>>,
    pub start: Option<Vec<VarId>>,
    pub stop: Option<Vec<VarId>>,
    /// `segments[k][t]`
    pub segments: Vec<Vec<VarId>>,
    pub curve: LinearizedCurve,
}

/// Column ids of one grid connection with the prices bound to them
#[derive(Debug, Clone)]
pub struct GridVars {
    pub import: Vec<VarId>,
    pub export: Vec<VarId>,
    pub import_price: Vec<f64>,
    pub export_price: Vec<f64>,
}

#[derive(Debug, Clone)]
pub enum AssetVars {
    Battery(BatteryVars),
    Generator(GeneratorVars),
    Grid(GridVars),
}

pub(crate) trait Formulation {
    fn formulate(&self, asset: &Asset, f: &mut Formulator<'_>) -> Result<AssetVars, SpecificationError>;
}

impl Asset {
    pub(crate) fn formulate(&self, f: &mut Formulator<'_>) -> Result<AssetVars, SpecificationError> {
        match self {
            Asset::Battery(b) => b.formulate(self, f),
            Asset::Generator(g) => g.formulate(self, f),
            Asset::Grid(g) => g.formulate(self, f),
        }
    }
}

fn label(kind: &str, id: &AssetId, t: usize) -> String {
    format!("{kind}[{id},{t}]")
}

impl Formulation for Battery {
    fn formulate(&self, asset: &Asset, f: &mut Formulator<'_>) -> Result<AssetVars, SpecificationError> {
        let id = &self.id;
        let n = f.steps;
        let mut charge = Vec::with_capacity(n);
        let mut discharge = Vec::with_capacity(n);
        let mut soc = Vec::with_capacity(n + 1);

        for t in 0..=n {
            soc.push(f.bounded(asset, Quantity::Soc, t, label("soc", id, t))?);
        }
        for t in 0..n {
            charge.push(f.bounded(asset, Quantity::ChargeKw, t, label("charge", id, t))?);
            discharge.push(f.bounded(asset, Quantity::DischargeKw, t, label("discharge", id, t))?);
        }

        let throughput_cost = self.degradation_cost_per_kwh
            + match self.exclusivity {
                Exclusivity::Penalty => f.settings.exclusivity_penalty_per_kwh,
                Exclusivity::Binary => 0.0,
            };
        for t in 0..n {
            f.spec.add_cost(charge[t], throughput_cost * f.dt);
            f.spec.add_cost(discharge[t], throughput_cost * f.dt);
            f.supply(t, discharge[t]);
            f.demand(t, charge[t]);
        }

        if !self.is_degenerate() {
            let (eta_c, eta_d) = self.efficiencies();
            let charge_gain = eta_c * f.dt / self.capacity_kwh;
            let discharge_loss = f.dt / (eta_d * self.capacity_kwh);
            for t in 0..n {
                f.spec.add_constraint(
                    label("soc", id, t),
                    vec![
                        (soc[t + 1], 1.0),
                        (soc[t], -1.0),
                        (charge[t], -charge_gain),
                        (discharge[t], discharge_loss),
                    ],
                    Sense::Eq,
                    0.0,
                );
            }
        }

        let mode = match self.exclusivity {
            Exclusivity::Binary if !self.is_degenerate() => {
                let mut mode = Vec::with_capacity(n);
                for t in 0..n {
                    let m = f.spec.add_binary(label("mode", id, t));
                    f.spec.add_constraint(
                        label("excl_charge", id, t),
                        vec![(charge[t], 1.0), (m, -self.max_charge_kw)],
                        Sense::Le,
                        0.0,
                    );
                    f.spec.add_constraint(
                        label("excl_discharge", id, t),
                        vec![(discharge[t], 1.0), (m, self.max_discharge_kw)],
                        Sense::Le,
                        self.max_discharge_kw,
                    );
                    mode.push(m);
                }
                Some(mode)
            }
            _ => None,
        };

        Ok(AssetVars::Battery(BatteryVars {
            charge,
            discharge,
            soc,
            mode,
        }))
    }
}

impl Formulation for Generator {
    fn formulate(&self, asset: &Asset, f: &mut Formulator<'_>) -> Result<AssetVars, SpecificationError> {
        let id = &self.id;
        let n = f.steps;
        let curve = self
            .fuel_curve
            .linearize(self.min_power_kw, self.max_power_kw, f.settings.quadratic_segments);
        let committed = self.needs_commitment();

        let mut output = Vec::with_capacity(n);
        for t in 0..n {
            output.push(f.bounded(asset, Quantity::OutputKw, t, label("output", id, t))?);
            f.supply(t, output[t]);
        }

        let mut segments = Vec::with_capacity(curve.segments.len());
        for (k, seg) in curve.segments.iter().enumerate() {
            let mut cols = Vec::with_capacity(n);
            for t in 0..n {
                let col = f.spec.add_variable(format!("seg[{id},{k},{t}]"), 0.0, seg.width_kw)?;
                f.spec.add_cost(col, seg.marginal_cost_per_kwh * f.dt);
                cols.push(col);
            }
            segments.push(cols);
        }

        let (on, start, stop) = if committed {
            let on: Vec<VarId> = (0..n).map(|t| f.spec.add_binary(label("on", id, t))).collect();
            let start = (0..n)
                .map(|t| f.spec.add_variable(label("start", id, t), 0.0, 1.0))
                .collect::<Result<Vec<_>, _>>()?;
            let stop = (0..n)
                .map(|t| f.spec.add_variable(label("stop", id, t), 0.0, 1.0))
                .collect::<Result<Vec<_>, _>>()?;

            for t in 0..n {
                f.spec.add_cost(on[t], curve.no_load_cost_per_h * f.dt);
                f.spec.add_cost(start[t], self.startup_cost);

                // p = min * on + Σ seg, each segment only available while on
                let mut link = vec![(output[t], 1.0), (on[t], -self.min_power_kw)];
                link.extend(segments.iter().map(|cols| (cols[t], -1.0)));
                f.spec.add_constraint(label("gen_link", id, t), link, Sense::Eq, 0.0);
                for (k, seg) in curve.segments.iter().enumerate() {
                    f.spec.add_constraint(
                        format!("seg_cap[{id},{k},{t}]"),
                        vec![(segments[k][t], 1.0), (on[t], -seg.width_kw)],
                        Sense::Le,
                        0.0,
                    );
                }

                let mut transition = vec![(on[t], 1.0), (start[t], -1.0), (stop[t], 1.0)];
                let rhs = if t == 0 {
                    if self.initial_on {
                        1.0
                    } else {
                        0.0
                    }
                } else {
                    transition.push((on[t - 1], -1.0));
                    0.0
                };
                f.spec.add_constraint(label("commit", id, t), transition, Sense::Eq, rhs);
                // start only into an on step, stop only into an off step
                f.spec.add_constraint(
                    label("start_cap", id, t),
                    vec![(start[t], 1.0), (on[t], -1.0)],
                    Sense::Le,
                    0.0,
                );
                f.spec.add_constraint(
                    label("stop_cap", id, t),
                    vec![(stop[t], 1.0), (on[t], 1.0)],
                    Sense::Le,
                    1.0,
                );

                if self.min_up_steps > 0 {
                    let from = (t + 1).saturating_sub(self.min_up_steps);
                    let mut row: Vec<(VarId, f64)> = (from..=t).map(|tau| (start[tau], 1.0)).collect();
                    row.push((on[t], -1.0));
                    f.spec.add_constraint(label("min_up", id, t), row, Sense::Le, 0.0);
                }
                if self.min_down_steps > 0 {
                    let from = (t + 1).saturating_sub(self.min_down_steps);
                    let mut row: Vec<(VarId, f64)> = (from..=t).map(|tau| (stop[tau], 1.0)).collect();
                    row.push((on[t], 1.0));
                    f.spec.add_constraint(label("min_down", id, t), row, Sense::Le, 1.0);
                }
            }
            (Some(on), Some(start), Some(stop))
        } else {
            for t in 0..n {
                let mut link = vec![(output[t], 1.0)];
                link.extend(segments.iter().map(|cols| (cols[t], -1.0)));
                f.spec.add_constraint(label("gen_link", id, t), link, Sense::Eq, self.min_power_kw);
            }
            f.spec.add_objective_constant(curve.no_load_cost_per_h * f.dt * n as f64);
            (None, None, None)
        };

        self.add_ramp_rows(f, &output, start.as_deref(), stop.as_deref());

        Ok(AssetVars::Generator(GeneratorVars {
            output,
            on,
            start,
            stop,
            segments,
            curve,
        }))
    }
}

impl Generator {
    /// Ramp limits; a start-up (shut-down) step may jump to (from) minimum output
    fn add_ramp_rows(&self, f: &mut Formulator<'_>, output: &[VarId], start: Option<&[VarId]>, stop: Option<&[VarId]>) {
        let id = &self.id;
        if let Some(ramp) = self.ramp_up_kw_per_h {
            let limit = ramp * f.dt;
            let relax = (self.min_power_kw - limit).max(0.0);
            for t in 0..output.len() {
                let mut row = vec![(output[t], 1.0)];
                let mut rhs = limit;
                if t == 0 {
                    match self.initial_output_kw {
                        Some(initial) => rhs += initial,
                        None => continue,
                    }
                } else {
                    row.push((output[t - 1], -1.0));
                }
                if let Some(start) = start {
                    if relax > 0.0 {
                        row.push((start[t], -relax));
                    }
                }
                f.spec.add_constraint(label("ramp_up", id, t), row, Sense::Le, rhs);
            }
        }
        if let Some(ramp) = self.ramp_down_kw_per_h {
            let limit = ramp * f.dt;
            let relax = (self.min_power_kw - limit).max(0.0);
            for t in 0..output.len() {
                let mut row = vec![(output[t], -1.0)];
                let mut rhs = limit;
                if t == 0 {
                    match self.initial_output_kw {
                        Some(initial) => rhs -= initial,
                        None => continue,
                    }
                } else {
                    row.push((output[t - 1], 1.0));
                }
                if let Some(stop) = stop {
                    if relax > 0.0 {
                        row.push((stop[t], -relax));
                    }
                }
                f.spec.add_constraint(label("ramp_down", id, t), row, Sense::Le, rhs);
            }
        }
    }
}

impl Formulation for GridConnection {
    fn formulate(&self, asset: &Asset, f: &mut Formulator<'_>) -> Result<AssetVars, SpecificationError> {
        let id = &self.id;
        let n = f.steps;
        let import_price = match &self.import_prices {
            Some(series) => series.aligned_values(&format!("{id}.import_prices"), f.start, f.timestep, n)?,
            None => f.price.to_vec(),
        };
        let export_price = match &self.export_prices {
            Some(series) => series.aligned_values(&format!("{id}.export_prices"), f.start, f.timestep, n)?,
            None => f.price.to_vec(),
        };

        let mut import = Vec::with_capacity(n);
        let mut export = Vec::with_capacity(n);
        for t in 0..n {
            let imp = f.bounded(asset, Quantity::ImportKw, t, label("import", id, t))?;
            let exp = f.bounded(asset, Quantity::ExportKw, t, label("export", id, t))?;
            match f.objective {
                ObjectiveType::CostMinimization | ObjectiveType::PeakShaving => {
                    f.spec.add_cost(imp, import_price[t] * f.dt);
                    f.spec.add_cost(exp, -export_price[t] * f.dt);
                }
                ObjectiveType::SelfConsumption => {
                    f.spec.add_cost(imp, f.dt);
                    f.spec.add_cost(exp, f.dt);
                }
            }
            f.supply(t, imp);
            f.demand(t, exp);
            f.import_terms[t].push(imp);
            import.push(imp);
            export.push(exp);
        }

        Ok(AssetVars::Grid(GridVars {
            import,
            export,
            import_price,
            export_price,
        }))
    }
}
