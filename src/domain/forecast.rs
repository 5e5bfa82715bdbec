use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SpecificationError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Ordered, uniformly spaced series of forecast values.
///
/// Construction rejects gaps, irregular spacing and non-finite values; nothing
/// is interpolated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ForecastPoint>", into = "Vec<ForecastPoint>")]
pub struct ForecastSeries {
    points: Vec<ForecastPoint>,
}

impl ForecastSeries {
    pub fn try_new(label: &str, points: Vec<ForecastPoint>) -> Result<Self, SpecificationError> {
        if let Some(idx) = points.iter().position(|p| !p.value.is_finite()) {
            return Err(SpecificationError::NonFinite {
                what: format!("{label}[{idx}]"),
            });
        }
        if points.len() >= 2 {
            let step = points[1].timestamp - points[0].timestamp;
            if step <= Duration::zero() {
                return Err(SpecificationError::SeriesGap {
                    series: label.to_string(),
                    index: 1,
                });
            }
            for (k, pair) in points.windows(2).enumerate() {
                if pair[1].timestamp - pair[0].timestamp != step {
                    return Err(SpecificationError::SeriesGap {
                        series: label.to_string(),
                        index: k + 1,
                    });
                }
            }
        }
        Ok(Self { points })
    }

    /// Build a series from consecutive values starting at `start`
    pub fn uniform(start: DateTime<Utc>, step: Duration, values: impl IntoIterator<Item = f64>) -> Self {
        let points = values
            .into_iter()
            .enumerate()
            .map(|(k, value)| ForecastPoint {
                timestamp: start + step * k as i32,
                value,
            })
            .collect();
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.points.first().map(|p| p.timestamp)
    }

    /// Spacing between points; `None` for series shorter than two points
    pub fn step(&self) -> Option<Duration> {
        match self.points.as_slice() {
            [a, b, ..] => Some(b.timestamp - a.timestamp),
            _ => None,
        }
    }

    pub fn points(&self) -> &[ForecastPoint] {
        &self.points
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    /// Check this series against a problem discretisation and return its values
    pub fn aligned_values(
        &self,
        label: &str,
        start: DateTime<Utc>,
        timestep: Duration,
        steps: usize,
    ) -> Result<Vec<f64>, SpecificationError> {
        if self.len() != steps {
            return Err(SpecificationError::SeriesLengthMismatch {
                series: label.to_string(),
                expected: steps,
                actual: self.len(),
            });
        }
        if let Some(actual) = self.start() {
            if actual != start {
                return Err(SpecificationError::SeriesMisaligned {
                    series: label.to_string(),
                    expected: start,
                    actual,
                });
            }
        }
        if let Some(step) = self.step() {
            if step != timestep {
                return Err(SpecificationError::TimestepMismatch {
                    owner: label.to_string(),
                    expected_secs: timestep.num_seconds(),
                    actual_secs: step.num_seconds(),
                });
            }
        }
        Ok(self.values())
    }
}

impl TryFrom<Vec<ForecastPoint>> for ForecastSeries {
    type Error = SpecificationError;

    fn try_from(points: Vec<ForecastPoint>) -> Result<Self, Self::Error> {
        Self::try_new("series", points)
    }
}

impl From<ForecastSeries> for Vec<ForecastPoint> {
    fn from(series: ForecastSeries) -> Self {
        series.points
    }
}

/// Load, renewable production and price, fetched together for one horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastBundle {
    /// kW
    pub load: ForecastSeries,
    /// kW
    pub renewable: ForecastSeries,
    /// Currency per kWh
    pub price: ForecastSeries,
}
