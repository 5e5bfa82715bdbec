use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::JobId;

/// Bad input: rejected before any solver is invoked and never retried.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum SpecificationError {
    #[error("horizon must contain at least one timestep")]
    EmptyHorizon,

    #[error("timestep must be positive, got {seconds}s")]
    InvalidTimestep { seconds: i64 },

    #[error("horizon of {horizon_secs}s is not a whole multiple of the {timestep_secs}s timestep")]
    HorizonNotMultiple { horizon_secs: u64, timestep_secs: u64 },

    #[error("timestep of {timestep_secs}s is not a multiple of the {granularity_secs}s forecast granularity")]
    GranularityMismatch { timestep_secs: u64, granularity_secs: u64 },

    #[error("horizon of {requested_secs}s exceeds forecast availability of {available_secs}s")]
    HorizonBeyondForecast { requested_secs: u64, available_secs: u64 },

    #[error("time limit must be positive")]
    InvalidTimeLimit,

    #[error("no assets requested")]
    NoAssets,

    #[error("unknown asset `{asset}`")]
    UnknownAsset { asset: String },

    #[error("asset `{asset}` appears more than once")]
    DuplicateAsset { asset: String },

    #[error("{series} series has {actual} points, horizon needs {expected}")]
    SeriesLengthMismatch {
        series: String,
        expected: usize,
        actual: usize,
    },

    #[error("{series} series has a gap or irregular spacing at index {index}")]
    SeriesGap { series: String, index: usize },

    #[error("{series} series starts at {actual}, problem starts at {expected}")]
    SeriesMisaligned {
        series: String,
        expected: DateTime<Utc>,
        actual: DateTime<Utc>,
    },

    #[error("{owner} uses a {actual_secs}s timestep, problem uses {expected_secs}s")]
    TimestepMismatch {
        owner: String,
        expected_secs: i64,
        actual_secs: i64,
    },

    #[error("asset `{asset}`: {reason}")]
    InconsistentAsset { asset: String, reason: String },

    #[error("asset `{asset}`: fuel curve segment {segment} is cheaper than the one before it, only convex curves are supported")]
    NonConvexFuelCurve { asset: String, segment: usize },

    #[error("variable `{name}` has lower bound {lower} above upper bound {upper}")]
    InconsistentBounds { name: String, lower: f64, upper: f64 },

    #[error("{what} is not a finite number")]
    NonFinite { what: String },
}

impl SpecificationError {
    pub(crate) fn asset(asset: impl ToString, reason: impl Into<String>) -> Self {
        Self::InconsistentAsset {
            asset: asset.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors returned by the orchestrator's public operations.
///
/// Failures that happen while a job runs never show up here: they end the job in a
/// terminal state and are reported through its [`crate::domain::Diagnostic`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("submission rejected: {0}")]
    Rejected(#[from] SpecificationError),

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("engine is shutting down")]
    ShuttingDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specification_error_display() {
        let err = SpecificationError::SeriesLengthMismatch {
            series: "load".to_string(),
            expected: 24,
            actual: 23,
        };
        assert_eq!(err.to_string(), "load series has 23 points, horizon needs 24");
    }

    #[test]
    fn test_specification_error_serializes_with_code() {
        let err = SpecificationError::UnknownAsset {
            asset: "bat-9".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "unknown_asset");
        assert_eq!(json["asset"], "bat-9");
    }
}
