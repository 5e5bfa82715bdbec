//! Flat LP/MIP representation handed to solver backends.
//!
//! Variables carry their own bounds, integrality flag and objective
//! coefficient; constraints are labelled linear rows. Backends translate a
//! `ProgramSpec` into their native model without knowing anything about assets.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SpecificationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VarId(pub usize);

impl VarId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub integer: bool,
    /// Linear objective coefficient
    pub cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sense {
    Le,
    Ge,
    Eq,
}

impl fmt::Display for Sense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Eq => "=",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearConstraint {
    pub label: String,
    pub terms: Vec<(VarId, f64)>,
    pub sense: Sense,
    pub rhs: f64,
}

impl LinearConstraint {
    pub fn activity(&self, values: &[f64]) -> f64 {
        self.terms.iter().map(|(v, c)| c * values[v.0]).sum()
    }

    /// Smallest and largest activity the variable bounds allow
    fn activity_range(&self, variables: &[Variable]) -> (f64, f64) {
        self.terms.iter().fold((0.0, 0.0), |(lo, hi), (v, c)| {
            let var = &variables[v.0];
            if *c >= 0.0 {
                (lo + c * var.lower, hi + c * var.upper)
            } else {
                (lo + c * var.upper, hi + c * var.lower)
            }
        })
    }
}

/// Solver-ready program: minimise `Σ cost_i * x_i + objective_offset`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramSpec {
    pub variables: Vec<Variable>,
    pub constraints: Vec<LinearConstraint>,
    /// Constant objective terms (e.g. no-load cost of must-run generators)
    pub objective_offset: f64,
}

impl ProgramSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_variable(&mut self, name: impl Into<String>, lower: f64, upper: f64) -> Result<VarId, SpecificationError> {
        self.push_variable(name.into(), lower, upper, false)
    }

    pub fn add_binary(&mut self, name: impl Into<String>) -> VarId {
        let id = VarId(self.variables.len());
        self.variables.push(Variable {
            name: name.into(),
            lower: 0.0,
            upper: 1.0,
            integer: true,
            cost: 0.0,
        });
        id
    }

    fn push_variable(&mut self, name: String, lower: f64, upper: f64, integer: bool) -> Result<VarId, SpecificationError> {
        if lower.is_nan() || upper.is_nan() || lower > upper + 1e-9 {
            return Err(SpecificationError::InconsistentBounds { name, lower, upper });
        }
        let id = VarId(self.variables.len());
        self.variables.push(Variable {
            name,
            lower,
            upper: upper.max(lower),
            integer,
            cost: 0.0,
        });
        Ok(id)
    }

    pub fn add_cost(&mut self, var: VarId, coefficient: f64) {
        self.variables[var.0].cost += coefficient;
    }

    pub fn add_objective_constant(&mut self, value: f64) {
        self.objective_offset += value;
    }

    pub fn add_constraint(&mut self, label: impl Into<String>, terms: Vec<(VarId, f64)>, sense: Sense, rhs: f64) {
        self.constraints.push(LinearConstraint {
            label: label.into(),
            terms,
            sense,
            rhs,
        });
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn is_mip(&self) -> bool {
        self.variables.iter().any(|v| v.integer)
    }

    pub fn variable(&self, id: VarId) -> &Variable {
        &self.variables[id.0]
    }

    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.variables
            .iter()
            .zip(values)
            .map(|(v, x)| v.cost * x)
            .sum::<f64>()
            + self.objective_offset
    }

    /// Name of the first column bound, integrality or row that `values` violates
    pub fn first_violation(&self, values: &[f64], tolerance: f64) -> Option<String> {
        if values.len() != self.variables.len() {
            return Some(format!("{} values for {} columns", values.len(), self.variables.len()));
        }
        for (var, &x) in self.variables.iter().zip(values) {
            let slack = tolerance * x.abs().max(1.0);
            let fractional = var.integer && (x - x.round()).abs() > tolerance;
            if !x.is_finite() || x < var.lower - slack || x > var.upper + slack || fractional {
                return Some(var.name.clone());
            }
        }
        self.constraints
            .iter()
            .find(|c| {
                let activity = c.activity(values);
                let slack = tolerance * c.rhs.abs().max(1.0);
                match c.sense {
                    Sense::Le => activity > c.rhs + slack,
                    Sense::Ge => activity < c.rhs - slack,
                    Sense::Eq => (activity - c.rhs).abs() > slack,
                }
            })
            .map(|c| c.label.clone())
    }

    pub fn constraints_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a LinearConstraint> + 'a {
        self.constraints.iter().filter(move |c| {
            c.label
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('['))
        })
    }

    /// Labels of rows that cannot be satisfied under the variable bounds alone.
    ///
    /// Cheap necessary-condition screening; an empty result does not prove
    /// the program feasible.
    pub fn screen_infeasibility(&self, tolerance: f64) -> Vec<String> {
        self.constraints
            .iter()
            .filter(|c| {
                let (lo, hi) = c.activity_range(&self.variables);
                let slack = tolerance * c.rhs.abs().max(1.0);
                match c.sense {
                    Sense::Le => lo > c.rhs + slack,
                    Sense::Ge => hi < c.rhs - slack,
                    Sense::Eq => lo > c.rhs + slack || hi < c.rhs - slack,
                }
            })
            .map(|c| c.label.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverted_bounds_are_rejected() {
        let mut spec = ProgramSpec::new();
        let err = spec.add_variable("x", 2.0, 1.0).unwrap_err();
        assert!(matches!(err, SpecificationError::InconsistentBounds { .. }));
    }

    #[test]
    fn test_objective_includes_offset() {
        let mut spec = ProgramSpec::new();
        let x = spec.add_variable("x", 0.0, 10.0).unwrap();
        let y = spec.add_binary("y");
        spec.add_cost(x, 2.0);
        spec.add_cost(y, -1.0);
        spec.add_objective_constant(0.5);
        assert!(spec.is_mip());
        assert_eq!(spec.objective_value(&[3.0, 1.0]), 5.5);
    }

    #[test]
    fn test_screening_finds_unreachable_balance() {
        let mut spec = ProgramSpec::new();
        let import = spec.add_variable("import", 0.0, 10.0).unwrap();
        let export = spec.add_variable("export", 0.0, 5.0).unwrap();
        spec.add_constraint("balance[0]", vec![(import, 1.0), (export, -1.0)], Sense::Eq, 20.0);
        spec.add_constraint("balance[1]", vec![(import, 1.0), (export, -1.0)], Sense::Eq, 4.0);
        assert_eq!(spec.screen_infeasibility(1e-9), vec!["balance[0]".to_string()]);
        assert_eq!(spec.constraints_with_prefix("balance").count(), 2);
    }

    #[test]
    fn test_first_violation_names_the_offending_row() {
        let mut spec = ProgramSpec::new();
        let x = spec.add_variable("x", 0.0, 10.0).unwrap();
        let on = spec.add_binary("on");
        spec.add_constraint("cover", vec![(x, 1.0)], Sense::Ge, 4.0);
        spec.add_constraint("link", vec![(x, 1.0), (on, -10.0)], Sense::Le, 0.0);

        assert_eq!(spec.first_violation(&[5.0, 1.0], 1e-6), None);
        assert_eq!(spec.first_violation(&[0.0, 0.0], 1e-6).as_deref(), Some("cover"));
        assert_eq!(spec.first_violation(&[5.0, 0.0], 1e-6).as_deref(), Some("link"));
        assert_eq!(spec.first_violation(&[5.0, 0.5], 1e-6).as_deref(), Some("on"));
        assert_eq!(spec.first_violation(&[11.0, 1.0], 1e-6).as_deref(), Some("x"));
        assert!(spec.first_violation(&[5.0], 1e-6).is_some());
    }
}
