use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::optimizer::SolverKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub solver: SolverSettings,
    pub persistence: PersistenceConfig,
    pub portfolio: PortfolioConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool size
    pub max_concurrent_jobs: usize,
    /// Thread cap handed to each solver call
    pub solver_threads: usize,
    pub default_time_limit_secs: u64,
    /// Extra time past the solver limit before the supervisor force-cancels
    pub supervisor_grace_secs: u64,
    pub validation_tolerance: f64,
    pub default_peak_tariff_per_kw: f64,
    pub exclusivity_penalty_per_kwh: f64,
    pub quadratic_segments: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2),
            solver_threads: 1,
            default_time_limit_secs: 30,
            supervisor_grace_secs: 5,
            validation_tolerance: 1e-4,
            default_peak_tariff_per_kw: 10.0,
            exclusivity_penalty_per_kwh: 1e-4,
            quadratic_segments: 8,
        }
    }
}

impl EngineConfig {
    pub fn default_time_limit(&self) -> Duration {
        Duration::from_secs(self.default_time_limit_secs)
    }

    pub fn supervisor_grace(&self) -> Duration {
        Duration::from_secs(self.supervisor_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub fallback_order: Vec<SolverKind>,
    pub mip_gap: f64,
    pub max_branch_nodes: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            fallback_order: vec![SolverKind::Highs, SolverKind::Cbc, SolverKind::Minilp],
            mip_gap: 1e-4,
            max_branch_nodes: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    pub path: PathBuf,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("config/portfolio.toml"),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::figment().extract().map_err(Into::into)
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("DISPATCH__").split("__"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides_file_and_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/default.toml",
                r#"
                [engine]
                max_concurrent_jobs = 3
                default_time_limit_secs = 12

                [solver]
                fallback_order = ["minilp"]
                "#,
            )?;
            jail.set_env("DISPATCH__ENGINE__MAX_CONCURRENT_JOBS", "7");

            let config = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(config.engine.max_concurrent_jobs, 7);
            assert_eq!(config.engine.default_time_limit_secs, 12);
            assert_eq!(config.solver.fallback_order, vec![SolverKind::Minilp]);
            assert_eq!(config.persistence.max_attempts, 5);
            assert_eq!(config.server.port, 8080);
            Ok(())
        });
    }
}
