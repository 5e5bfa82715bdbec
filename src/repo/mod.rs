//! Collaborator seams: asset registry, forecast service and job store.
//!
//! The engine only reads from the registry and the forecast service, and
//! only writes finished jobs to the store. In-memory implementations live in
//! [`memory`].

pub mod memory;
pub mod records;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::domain::{Asset, AssetId, ForecastBundle};
use crate::error::SpecificationError;

pub use memory::{ForecastProfiles, InMemoryAssetRegistry, InMemoryJobStore, Portfolio, ProfileForecastService};
pub use records::{CostRow, JobMetadataRow, JobRecord, ScheduleRow};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown assets: {}", .0.iter().map(|a| a.as_str()).collect::<Vec<_>>().join(", "))]
    UnknownAssets(Vec<AssetId>),

    #[error("asset registry unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("forecast service unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Invalid(#[from] SpecificationError),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("job store write failed: {0}")]
    Write(String),
}

#[async_trait]
pub trait AssetRegistry: Send + Sync {
    /// Owned copies of the requested assets, in request order
    async fn snapshot(&self, ids: &[AssetId]) -> Result<Vec<Asset>, RegistryError>;
}

#[async_trait]
pub trait ForecastService: Send + Sync {
    /// Native resolution of the forecasts; problem timesteps must be a multiple of it
    fn granularity(&self) -> Duration;

    /// How far ahead forecasts are available
    fn max_horizon(&self) -> Duration;

    async fn fetch(
        &self,
        start: DateTime<Utc>,
        timestep: Duration,
        steps: usize,
    ) -> Result<ForecastBundle, ForecastError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn persist(&self, record: &JobRecord) -> Result<(), PersistenceError>;
}
