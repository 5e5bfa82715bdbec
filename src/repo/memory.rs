use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

use super::{AssetRegistry, ForecastError, ForecastService, JobRecord, JobStore, PersistenceError, RegistryError};
use crate::domain::{Asset, AssetId, ForecastBundle, ForecastSeries};

#[derive(Debug, Default)]
pub struct InMemoryAssetRegistry {
    assets: RwLock<HashMap<AssetId, Asset>>,
}

impl InMemoryAssetRegistry {
    pub fn new(assets: impl IntoIterator<Item = Asset>) -> Self {
        let assets = assets.into_iter().map(|a| (a.id().clone(), a)).collect();
        Self {
            assets: RwLock::new(assets),
        }
    }

    /// Insert or replace a record; running jobs keep the snapshot they took
    pub fn upsert(&self, asset: Asset) {
        self.assets.write().insert(asset.id().clone(), asset);
    }

    pub fn remove(&self, id: &AssetId) -> Option<Asset> {
        self.assets.write().remove(id)
    }

    pub fn ids(&self) -> Vec<AssetId> {
        let mut ids: Vec<_> = self.assets.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl AssetRegistry for InMemoryAssetRegistry {
    async fn snapshot(&self, ids: &[AssetId]) -> Result<Vec<Asset>, RegistryError> {
        let assets = self.assets.read();
        let missing: Vec<AssetId> = ids.iter().filter(|id| !assets.contains_key(*id)).cloned().collect();
        if !missing.is_empty() {
            return Err(RegistryError::UnknownAssets(missing));
        }
        Ok(ids.iter().filter_map(|id| assets.get(id).cloned()).collect())
    }
}

/// Daily-style cyclic profiles at the service granularity, anchored at the Unix epoch
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ForecastProfiles {
    pub granularity_secs: i64,
    pub max_horizon_secs: i64,
    pub load: Vec<f64>,
    pub renewable: Vec<f64>,
    pub price: Vec<f64>,
}

/// Forecast service replaying cyclic profiles, averaged up to the requested timestep
#[derive(Debug)]
pub struct ProfileForecastService {
    profiles: RwLock<ForecastProfiles>,
}

impl ForecastProfiles {
    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.granularity_secs > 0, "forecast granularity must be positive");
        anyhow::ensure!(
            !self.load.is_empty() && !self.renewable.is_empty() && !self.price.is_empty(),
            "forecast profiles must not be empty"
        );
        Ok(())
    }
}

impl ProfileForecastService {
    pub fn new(profiles: ForecastProfiles) -> Result<Self> {
        profiles.validate()?;
        Ok(Self {
            profiles: RwLock::new(profiles),
        })
    }

    /// Replace the profiles; fetches already returned are unaffected.
    /// Invalid profiles are rejected and the current ones stay in place.
    pub fn update(&self, profiles: ForecastProfiles) -> Result<()> {
        profiles.validate()?;
        *self.profiles.write() = profiles;
        Ok(())
    }

    fn resample(profile: &[f64], granularity: i64, start: DateTime<Utc>, timestep: Duration, steps: usize) -> Vec<f64> {
        let per_step = (timestep.num_seconds() / granularity).max(1);
        let len = profile.len() as i64;
        (0..steps as i64)
            .map(|k| {
                let first = (start.timestamp() + k * timestep.num_seconds()).div_euclid(granularity);
                let sum: f64 = (0..per_step)
                    .map(|j| profile[(first + j).rem_euclid(len) as usize])
                    .sum();
                sum / per_step as f64
            })
            .collect()
    }
}

#[async_trait]
impl ForecastService for ProfileForecastService {
    fn granularity(&self) -> Duration {
        Duration::seconds(self.profiles.read().granularity_secs)
    }

    fn max_horizon(&self) -> Duration {
        Duration::seconds(self.profiles.read().max_horizon_secs)
    }

    async fn fetch(
        &self,
        start: DateTime<Utc>,
        timestep: Duration,
        steps: usize,
    ) -> Result<ForecastBundle, ForecastError> {
        let p = self.profiles.read().clone();
        let series = |values: &[f64]| {
            ForecastSeries::uniform(
                start,
                timestep,
                Self::resample(values, p.granularity_secs, start, timestep, steps),
            )
        };
        Ok(ForecastBundle {
            load: series(&p.load),
            renewable: series(&p.renewable),
            price: series(&p.price),
        })
    }
}

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    records: RwLock<HashMap<Uuid, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job_id: Uuid) -> Option<JobRecord> {
        self.records.read().get(&job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn persist(&self, record: &JobRecord) -> Result<(), PersistenceError> {
        self.records.write().insert(record.metadata.job_id, record.clone());
        Ok(())
    }
}

/// Static asset list plus forecast profiles served by the binary
#[derive(Debug, Clone, Deserialize)]
pub struct Portfolio {
    #[serde(default)]
    pub assets: Vec<Asset>,
    pub forecast: ForecastProfiles,
}

impl Portfolio {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading portfolio {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("parsing portfolio {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let portfolio: Portfolio = toml::from_str(raw)?;
        for asset in &portfolio.assets {
            asset.validate()?;
        }
        Ok(portfolio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn profiles() -> ForecastProfiles {
        ForecastProfiles {
            granularity_secs: 900,
            max_horizon_secs: 86_400,
            load: vec![1.0, 2.0, 3.0, 4.0],
            renewable: vec![0.0],
            price: vec![0.25, 0.75],
        }
    }

    #[tokio::test]
    async fn test_fetch_averages_up_to_timestep() {
        let service = ProfileForecastService::new(profiles()).unwrap();
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let bundle = service.fetch(start, Duration::minutes(30), 4).await.unwrap();
        assert_eq!(bundle.load.values(), vec![1.5, 3.5, 1.5, 3.5]);
        assert_eq!(bundle.price.values(), vec![0.5; 4]);
        assert_eq!(bundle.load.start(), Some(start));
        assert_eq!(bundle.load.step(), Some(Duration::minutes(30)));
    }

    #[rstest]
    #[case::zero_granularity(ForecastProfiles { granularity_secs: 0, ..profiles() })]
    #[case::negative_granularity(ForecastProfiles { granularity_secs: -900, ..profiles() })]
    #[case::empty_price(ForecastProfiles { price: Vec::new(), ..profiles() })]
    #[tokio::test]
    async fn test_invalid_update_keeps_current_profiles(#[case] replacement: ForecastProfiles) {
        let service = ProfileForecastService::new(profiles()).unwrap();
        assert!(service.update(replacement).is_err());
        assert_eq!(service.granularity(), Duration::seconds(900));

        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let bundle = service.fetch(start, Duration::minutes(15), 2).await.unwrap();
        assert_eq!(bundle.price.values(), vec![0.25, 0.75]);
    }

    #[tokio::test]
    async fn test_update_replaces_profiles() {
        let service = ProfileForecastService::new(profiles()).unwrap();
        service
            .update(ForecastProfiles {
                granularity_secs: 3600,
                ..profiles()
            })
            .unwrap();
        assert_eq!(service.granularity(), Duration::hours(1));
    }

    #[tokio::test]
    async fn test_registry_reports_unknown_ids() {
        let registry = InMemoryAssetRegistry::default();
        let err = registry.snapshot(&[AssetId::new("ghost")]).await.unwrap_err();
        assert!(matches!(err, RegistryError::UnknownAssets(ids) if ids == vec![AssetId::new("ghost")]));
    }

    #[test]
    fn test_portfolio_from_toml() {
        let raw = r#"
            [[assets]]
            kind = "battery"
            id = "bat-1"
            capacity_kwh = 10.0
            min_soc = 0.1
            max_soc = 0.9
            initial_soc = 0.5
            max_charge_kw = 5.0
            max_discharge_kw = 5.0
            round_trip_efficiency = 0.9

            [[assets]]
            kind = "generator"
            id = "gen-1"
            min_power_kw = 0.0
            max_power_kw = 8.0
            fuel_curve = { type = "quadratic", a = 0.5, b = 0.2, c = 0.01 }

            [forecast]
            granularity_secs = 3600
            max_horizon_secs = 172800
            load = [2.0, 3.0]
            renewable = [0.0, 1.0]
            price = [0.2]
        "#;
        let portfolio = Portfolio::from_toml(raw).unwrap();
        assert_eq!(portfolio.assets.len(), 2);
        assert_eq!(portfolio.assets[1].id().as_str(), "gen-1");
    }
}
