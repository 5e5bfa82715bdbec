use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::asset::PARAM_EPS;
use super::{Asset, Exclusivity, ForecastBundle};
use crate::error::SpecificationError;

/// Optimization objective
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ObjectiveType {
    /// Minimize total grid, fuel, startup and wear cost
    CostMinimization,
    /// Minimize energy exchanged with the grid
    SelfConsumption,
    /// Cost minimization plus a tariff on the highest grid import
    PeakShaving,
}

impl Default for ObjectiveType {
    fn default() -> Self {
        Self::CostMinimization
    }
}

/// Per-job adjustments applied to the snapshot, never to registry records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintOverrides {
    #[serde(default)]
    pub min_soc: Option<f64>,
    #[serde(default)]
    pub max_soc: Option<f64>,
    #[serde(default)]
    pub terminal_soc: Option<f64>,
    #[serde(default)]
    pub max_grid_import_kw: Option<f64>,
    #[serde(default)]
    pub max_grid_export_kw: Option<f64>,
    #[serde(default)]
    pub peak_tariff_per_kw: Option<f64>,
    #[serde(default)]
    pub battery_exclusivity: Option<Exclusivity>,
}

impl ConstraintOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply to owned copies of the assets and settings, re-validating every asset
    pub fn apply(&self, assets: &mut [Asset], settings: &mut ModelSettings) -> Result<(), SpecificationError> {
        for (what, value) in [
            ("overrides.min_soc", self.min_soc),
            ("overrides.max_soc", self.max_soc),
            ("overrides.terminal_soc", self.terminal_soc),
            ("overrides.max_grid_import_kw", self.max_grid_import_kw),
            ("overrides.max_grid_export_kw", self.max_grid_export_kw),
            ("overrides.peak_tariff_per_kw", self.peak_tariff_per_kw),
        ] {
            if matches!(value, Some(v) if !v.is_finite()) {
                return Err(SpecificationError::NonFinite { what: what.to_string() });
            }
        }

        for asset in assets.iter_mut() {
            match asset {
                Asset::Battery(b) => {
                    if let Some(v) = self.min_soc {
                        b.min_soc = v;
                    }
                    if let Some(v) = self.max_soc {
                        b.max_soc = v;
                    }
                    if let Some(v) = self.terminal_soc {
                        b.terminal_soc = Some(v);
                    }
                    if let Some(mode) = self.battery_exclusivity {
                        b.exclusivity = mode;
                    }
                }
                Asset::Grid(g) => {
                    if let Some(v) = self.max_grid_import_kw {
                        g.max_import_kw = v;
                    }
                    if let Some(v) = self.max_grid_export_kw {
                        g.max_export_kw = v;
                    }
                }
                Asset::Generator(_) => {}
            }
            overridden_bounds(asset)?;
        }

        if let Some(tariff) = self.peak_tariff_per_kw {
            if tariff < 0.0 {
                return Err(SpecificationError::InconsistentBounds {
                    name: "peak_tariff_per_kw".to_string(),
                    lower: 0.0,
                    upper: tariff,
                });
            }
            settings.peak_tariff_per_kw = tariff;
        }
        Ok(())
    }
}

/// Report an override that produced an empty interval as an inconsistent bound
fn overridden_bounds(asset: &Asset) -> Result<(), SpecificationError> {
    if let Asset::Battery(b) = asset {
        if b.min_soc > b.max_soc {
            return Err(SpecificationError::InconsistentBounds {
                name: format!("{}.soc", b.id),
                lower: b.min_soc,
                upper: b.max_soc,
            });
        }
        // The measured initial SOC stays fixed, the window has to contain it
        let (lo, hi) = b.soc_window();
        let (lower, upper) = if b.initial_soc < lo - PARAM_EPS {
            (lo, b.initial_soc)
        } else {
            (b.initial_soc, hi)
        };
        if lower > upper + PARAM_EPS {
            return Err(SpecificationError::InconsistentBounds {
                name: format!("{}.initial_soc", b.id),
                lower,
                upper,
            });
        }
        if let Some(terminal) = b.terminal_soc {
            let (_, hi) = b.soc_window();
            if terminal > hi {
                return Err(SpecificationError::InconsistentBounds {
                    name: format!("{}.terminal_soc", b.id),
                    lower: terminal,
                    upper: hi,
                });
            }
        }
    }
    asset.validate()
}

/// Model constants that are not part of any asset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Currency per kW of the horizon's peak import (peak shaving only)
    pub peak_tariff_per_kw: f64,
    /// Throughput penalty for batteries in `Exclusivity::Penalty` mode
    pub exclusivity_penalty_per_kwh: f64,
    /// Secant count used to linearise quadratic fuel curves
    pub quadratic_segments: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            peak_tariff_per_kw: 10.0,
            exclusivity_penalty_per_kwh: 1e-4,
            quadratic_segments: 8,
        }
    }
}

/// Immutable snapshot of everything one job solves for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationProblem {
    pub start: DateTime<Utc>,
    pub timestep_secs: i64,
    pub horizon_steps: usize,
    pub objective: ObjectiveType,
    pub assets: Arc<[Asset]>,
    pub forecasts: Arc<ForecastBundle>,
    pub settings: ModelSettings,
}

impl OptimizationProblem {
    pub fn timestep(&self) -> Duration {
        Duration::seconds(self.timestep_secs)
    }

    /// Timestep length in hours, the factor between kW and kWh
    pub fn dt_hours(&self) -> f64 {
        self.timestep_secs as f64 / 3600.0
    }

    pub fn timestamp_at(&self, t: usize) -> DateTime<Utc> {
        self.start + self.timestep() * t as i32
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        (0..self.horizon_steps).map(|t| self.timestamp_at(t)).collect()
    }
}
