//! Asset Model
//!
//! A portfolio is a closed set of asset variants (battery, generator, grid
//! connection). Each variant exposes the same capability interface:
//! - parameter validation (`validate`)
//! - per-timestep box bounds for its power/state quantities (`box_bounds`)
//!
//! Coupling constraints (SOC recursion, commitment, ramping) are generated by
//! `optimizer::formulation` over explicit index ranges.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ForecastSeries;
use crate::error::SpecificationError;

/// Numeric slack used when comparing user-supplied parameters
pub(crate) const PARAM_EPS: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Storable,
    Dispatchable,
    GridConnected,
}

/// The per-timestep quantities an asset contributes to a schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Quantity {
    ChargeKw,
    DischargeKw,
    Soc,
    OutputKw,
    ImportKw,
    ExportKw,
    CurtailmentKw,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub lower: f64,
    pub upper: f64,
}

impl Bound {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub fn fixed(value: f64) -> Self {
        Self::new(value, value)
    }

    pub fn is_satisfiable(&self) -> bool {
        self.lower <= self.upper + PARAM_EPS
    }
}

/// How a battery is kept from charging and discharging in the same timestep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusivity {
    /// Throughput penalty in the objective; keeps the program an LP
    #[default]
    Penalty,
    /// Binary mode variable per timestep; turns the program into a MIP
    Binary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Battery {
    pub id: AssetId,
    #[serde(default)]
    pub name: String,
    pub capacity_kwh: f64,
    /// Narrows the SOC window to `min_soc + usable / capacity` when set
    #[serde(default)]
    pub usable_capacity_kwh: Option<f64>,
    pub min_soc: f64,
    pub max_soc: f64,
    pub initial_soc: f64,
    /// Minimum SOC required at the end of the horizon
    #[serde(default)]
    pub terminal_soc: Option<f64>,
    pub max_charge_kw: f64,
    pub max_discharge_kw: f64,
    pub round_trip_efficiency: f64,
    #[serde(default)]
    pub charge_efficiency: Option<f64>,
    #[serde(default)]
    pub discharge_efficiency: Option<f64>,
    /// Wear cost per kWh of charge or discharge throughput
    #[serde(default)]
    pub degradation_cost_per_kwh: f64,
    #[serde(default)]
    pub exclusivity: Exclusivity,
}

impl Battery {
    /// Split round-trip efficiency into (charge, discharge) efficiencies.
    ///
    /// Explicit values win; a single explicit value determines the other so that
    /// their product still equals the round-trip efficiency.
    pub fn efficiencies(&self) -> (f64, f64) {
        match (self.charge_efficiency, self.discharge_efficiency) {
            (Some(c), Some(d)) => (c, d),
            (Some(c), None) => (c, self.round_trip_efficiency / c),
            (None, Some(d)) => (self.round_trip_efficiency / d, d),
            (None, None) => {
                let split = self.round_trip_efficiency.sqrt();
                (split, split)
            }
        }
    }

    /// Effective SOC window as fractions of `capacity_kwh`
    pub fn soc_window(&self) -> (f64, f64) {
        let upper = match self.usable_capacity_kwh {
            Some(usable) if self.capacity_kwh > 0.0 => {
                self.max_soc.min(self.min_soc + usable / self.capacity_kwh)
            }
            _ => self.max_soc,
        };
        (self.min_soc, upper)
    }

    /// A zero-capacity battery cannot move energy; its power bounds collapse to zero
    pub fn is_degenerate(&self) -> bool {
        self.capacity_kwh <= 0.0
    }

    /// SOC recursion: `soc' = soc + (charge * eta_c - discharge / eta_d) * dt / capacity`
    pub fn next_soc(&self, soc: f64, charge_kw: f64, discharge_kw: f64, dt_hours: f64) -> f64 {
        if self.is_degenerate() {
            return soc;
        }
        let (eta_c, eta_d) = self.efficiencies();
        soc + (charge_kw * eta_c - discharge_kw / eta_d) * dt_hours / self.capacity_kwh
    }

    fn validate(&self) -> Result<(), SpecificationError> {
        let id = &self.id;
        for (what, value) in [
            ("capacity_kwh", self.capacity_kwh),
            ("min_soc", self.min_soc),
            ("max_soc", self.max_soc),
            ("initial_soc", self.initial_soc),
            ("max_charge_kw", self.max_charge_kw),
            ("max_discharge_kw", self.max_discharge_kw),
            ("round_trip_efficiency", self.round_trip_efficiency),
            ("degradation_cost_per_kwh", self.degradation_cost_per_kwh),
        ] {
            ensure_finite(id, what, value)?;
        }

        if self.capacity_kwh < 0.0 {
            return Err(SpecificationError::asset(id, "capacity_kwh must be non-negative"));
        }
        if let Some(usable) = self.usable_capacity_kwh {
            ensure_finite(id, "usable_capacity_kwh", usable)?;
            if usable < 0.0 || usable > self.capacity_kwh + PARAM_EPS {
                return Err(SpecificationError::asset(
                    id,
                    format!("usable capacity {usable} kWh must be within [0, {}]", self.capacity_kwh),
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.min_soc) || !(0.0..=1.0).contains(&self.max_soc) {
            return Err(SpecificationError::asset(id, "min_soc and max_soc must be fractions in [0, 1]"));
        }
        if self.min_soc > self.max_soc {
            return Err(SpecificationError::asset(
                id,
                format!("min_soc {} exceeds max_soc {}", self.min_soc, self.max_soc),
            ));
        }
        let (lo, hi) = self.soc_window();
        if self.initial_soc < lo - PARAM_EPS || self.initial_soc > hi + PARAM_EPS {
            return Err(SpecificationError::asset(
                id,
                format!("initial_soc {} outside the SOC window [{lo}, {hi}]", self.initial_soc),
            ));
        }
        if let Some(terminal) = self.terminal_soc {
            ensure_finite(id, "terminal_soc", terminal)?;
            if terminal > hi + PARAM_EPS {
                return Err(SpecificationError::asset(
                    id,
                    format!("terminal_soc {terminal} above the SOC window upper bound {hi}"),
                ));
            }
        }
        if self.max_charge_kw < 0.0 || self.max_discharge_kw < 0.0 {
            return Err(SpecificationError::asset(id, "power limits must be non-negative"));
        }
        if self.round_trip_efficiency <= 0.0 || self.round_trip_efficiency > 1.0 {
            return Err(SpecificationError::asset(id, "round_trip_efficiency must be in (0, 1]"));
        }
        let (eta_c, eta_d) = self.efficiencies();
        if !(eta_c > 0.0 && eta_c <= 1.0 + PARAM_EPS && eta_d > 0.0 && eta_d <= 1.0 + PARAM_EPS) {
            return Err(SpecificationError::asset(
                id,
                format!("charge/discharge efficiencies ({eta_c}, {eta_d}) must be in (0, 1]"),
            ));
        }
        if self.degradation_cost_per_kwh < 0.0 {
            return Err(SpecificationError::asset(id, "degradation cost must be non-negative"));
        }
        Ok(())
    }
}

/// Marginal cost step of a piecewise-linear fuel curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostSegment {
    pub width_kw: f64,
    pub marginal_cost_per_kwh: f64,
}

/// Fuel cost as a function of output power, in currency per hour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FuelCurve {
    /// Cost of running at minimum output plus marginal steps above it
    PiecewiseLinear {
        #[serde(default)]
        no_load_cost_per_h: f64,
        segments: Vec<CostSegment>,
    },
    /// `a + b * p + c * p^2`
    Quadratic { a: f64, b: f64, c: f64 },
}

impl FuelCurve {
    /// Express the curve as convex cost steps over `[min_kw, max_kw]`.
    ///
    /// Quadratic curves become `pieces` equal-width secants; the same
    /// linearisation is used by the builder and when costs are recomputed.
    pub fn linearize(&self, min_kw: f64, max_kw: f64, pieces: usize) -> LinearizedCurve {
        let span = (max_kw - min_kw).max(0.0);
        match self {
            Self::PiecewiseLinear {
                no_load_cost_per_h,
                segments,
            } => {
                let mut remaining = span;
                let mut steps = Vec::with_capacity(segments.len());
                for seg in segments {
                    if remaining <= PARAM_EPS {
                        break;
                    }
                    let width = seg.width_kw.min(remaining);
                    if width > PARAM_EPS {
                        steps.push(CostSegment {
                            width_kw: width,
                            marginal_cost_per_kwh: seg.marginal_cost_per_kwh,
                        });
                    }
                    remaining -= width;
                }
                LinearizedCurve {
                    no_load_cost_per_h: *no_load_cost_per_h,
                    segments: steps,
                }
            }
            Self::Quadratic { a, b, c } => {
                let cost = |p: f64| a + b * p + c * p * p;
                let pieces = pieces.max(1);
                let width = span / pieces as f64;
                let segments = if span <= PARAM_EPS {
                    Vec::new()
                } else {
                    (0..pieces)
                        .map(|k| {
                            let lo = min_kw + width * k as f64;
                            let hi = lo + width;
                            CostSegment {
                                width_kw: width,
                                marginal_cost_per_kwh: (cost(hi) - cost(lo)) / width,
                            }
                        })
                        .collect()
                };
                LinearizedCurve {
                    no_load_cost_per_h: cost(min_kw),
                    segments,
                }
            }
        }
    }
}

/// Convex piecewise-linear fuel curve above minimum output
#[derive(Debug, Clone, PartialEq)]
pub struct LinearizedCurve {
    pub no_load_cost_per_h: f64,
    pub segments: Vec<CostSegment>,
}

impl LinearizedCurve {
    /// Cost per hour at a given output, filling the cheapest steps first
    pub fn cost_per_h(&self, output_kw: f64, min_kw: f64, on: bool) -> f64 {
        if !on {
            return 0.0;
        }
        let mut above_min = (output_kw - min_kw).max(0.0);
        let mut cost = self.no_load_cost_per_h;
        for seg in &self.segments {
            if above_min <= 0.0 {
                break;
            }
            let fill = above_min.min(seg.width_kw);
            cost += fill * seg.marginal_cost_per_kwh;
            above_min -= fill;
        }
        cost
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generator {
    pub id: AssetId,
    #[serde(default)]
    pub name: String,
    pub min_power_kw: f64,
    pub max_power_kw: f64,
    pub fuel_curve: FuelCurve,
    #[serde(default)]
    pub min_up_steps: usize,
    #[serde(default)]
    pub min_down_steps: usize,
    #[serde(default)]
    pub startup_cost: f64,
    #[serde(default)]
    pub ramp_up_kw_per_h: Option<f64>,
    #[serde(default)]
    pub ramp_down_kw_per_h: Option<f64>,
    #[serde(default)]
    pub initial_on: bool,
    #[serde(default)]
    pub initial_output_kw: Option<f64>,
}

impl Generator {
    /// Commitment (binary on/off) is modelled only when up/down times or startup cost are declared
    pub fn needs_commitment(&self) -> bool {
        self.min_up_steps > 0 || self.min_down_steps > 0 || self.startup_cost > 0.0
    }

    fn validate(&self) -> Result<(), SpecificationError> {
        let id = &self.id;
        ensure_finite(id, "min_power_kw", self.min_power_kw)?;
        ensure_finite(id, "max_power_kw", self.max_power_kw)?;
        ensure_finite(id, "startup_cost", self.startup_cost)?;

        if self.min_power_kw < 0.0 || self.max_power_kw < 0.0 {
            return Err(SpecificationError::asset(id, "power limits must be non-negative"));
        }
        if self.min_power_kw > self.max_power_kw {
            return Err(SpecificationError::asset(
                id,
                format!("min_power_kw {} exceeds max_power_kw {}", self.min_power_kw, self.max_power_kw),
            ));
        }
        if self.startup_cost < 0.0 {
            return Err(SpecificationError::asset(id, "startup_cost must be non-negative"));
        }
        for (what, ramp) in [
            ("ramp_up_kw_per_h", self.ramp_up_kw_per_h),
            ("ramp_down_kw_per_h", self.ramp_down_kw_per_h),
        ] {
            if let Some(ramp) = ramp {
                ensure_finite(id, what, ramp)?;
                if ramp < 0.0 {
                    return Err(SpecificationError::asset(id, format!("{what} must be non-negative")));
                }
            }
        }
        if let Some(initial) = self.initial_output_kw {
            ensure_finite(id, "initial_output_kw", initial)?;
        }

        match &self.fuel_curve {
            FuelCurve::PiecewiseLinear {
                no_load_cost_per_h,
                segments,
            } => {
                ensure_finite(id, "no_load_cost_per_h", *no_load_cost_per_h)?;
                let mut covered = 0.0;
                for (k, seg) in segments.iter().enumerate() {
                    ensure_finite(id, "segment width", seg.width_kw)?;
                    ensure_finite(id, "segment marginal cost", seg.marginal_cost_per_kwh)?;
                    if seg.width_kw < 0.0 {
                        return Err(SpecificationError::asset(id, format!("segment {k} has negative width")));
                    }
                    if k > 0 && seg.marginal_cost_per_kwh + PARAM_EPS < segments[k - 1].marginal_cost_per_kwh {
                        return Err(SpecificationError::NonConvexFuelCurve {
                            asset: id.to_string(),
                            segment: k,
                        });
                    }
                    covered += seg.width_kw;
                }
                let span = self.max_power_kw - self.min_power_kw;
                if covered + 1e-6 < span {
                    return Err(SpecificationError::asset(
                        id,
                        format!("fuel curve covers {covered} kW above minimum, output range spans {span} kW"),
                    ));
                }
            }
            FuelCurve::Quadratic { a, b, c } => {
                ensure_finite(id, "quadratic a", *a)?;
                ensure_finite(id, "quadratic b", *b)?;
                ensure_finite(id, "quadratic c", *c)?;
                if *c < 0.0 {
                    return Err(SpecificationError::NonConvexFuelCurve {
                        asset: id.to_string(),
                        segment: 0,
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConnection {
    pub id: AssetId,
    #[serde(default)]
    pub name: String,
    pub max_import_kw: f64,
    pub max_export_kw: f64,
    /// Falls back to the forecast price series when absent
    #[serde(default)]
    pub import_prices: Option<ForecastSeries>,
    /// Falls back to the forecast price series when absent
    #[serde(default)]
    pub export_prices: Option<ForecastSeries>,
}

impl GridConnection {
    fn validate(&self) -> Result<(), SpecificationError> {
        ensure_finite(&self.id, "max_import_kw", self.max_import_kw)?;
        ensure_finite(&self.id, "max_export_kw", self.max_export_kw)?;
        if self.max_import_kw < 0.0 || self.max_export_kw < 0.0 {
            return Err(SpecificationError::asset(&self.id, "import/export limits must be non-negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Asset {
    Battery(Battery),
    Generator(Generator),
    Grid(GridConnection),
}

impl Asset {
    pub fn id(&self) -> &AssetId {
        match self {
            Self::Battery(b) => &b.id,
            Self::Generator(g) => &g.id,
            Self::Grid(g) => &g.id,
        }
    }

    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Self::Battery(_) => &[Capability::Storable, Capability::Dispatchable],
            Self::Generator(_) => &[Capability::Dispatchable],
            Self::Grid(_) => &[Capability::GridConnected],
        }
    }

    pub fn validate(&self) -> Result<(), SpecificationError> {
        match self {
            Self::Battery(b) => b.validate(),
            Self::Generator(g) => g.validate(),
            Self::Grid(g) => g.validate(),
        }
    }

    /// Box bounds of every quantity this asset declares at timestep `t`.
    ///
    /// SOC is indexed over `0..=steps` (the state before step `t`); `t == 0`
    /// pins the initial SOC and `t == steps` applies the terminal requirement.
    pub fn box_bounds(&self, t: usize, steps: usize) -> Vec<(Quantity, Bound)> {
        match self {
            Self::Battery(b) => {
                let (lo, hi) = b.soc_window();
                let soc = if t == 0 || b.is_degenerate() {
                    Bound::fixed(b.initial_soc)
                } else if t == steps {
                    Bound::new(lo.max(b.terminal_soc.unwrap_or(lo)), hi)
                } else {
                    Bound::new(lo, hi)
                };
                let (charge, discharge) = if b.is_degenerate() {
                    (0.0, 0.0)
                } else {
                    (b.max_charge_kw, b.max_discharge_kw)
                };
                let mut bounds = vec![(Quantity::Soc, soc)];
                if t < steps {
                    bounds.push((Quantity::ChargeKw, Bound::new(0.0, charge)));
                    bounds.push((Quantity::DischargeKw, Bound::new(0.0, discharge)));
                }
                bounds
            }
            Self::Generator(g) if t < steps => {
                let lower = if g.needs_commitment() { 0.0 } else { g.min_power_kw };
                vec![(Quantity::OutputKw, Bound::new(lower, g.max_power_kw))]
            }
            Self::Grid(g) if t < steps => vec![
                (Quantity::ImportKw, Bound::new(0.0, g.max_import_kw)),
                (Quantity::ExportKw, Bound::new(0.0, g.max_export_kw)),
            ],
            _ => Vec::new(),
        }
    }
}

fn ensure_finite(asset: &AssetId, what: &str, value: f64) -> Result<(), SpecificationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SpecificationError::NonFinite {
            what: format!("{asset}.{what}"),
        })
    }
}
