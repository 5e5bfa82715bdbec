#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use energy_dispatch::config::Config;
use energy_dispatch::domain::{
    Asset, AssetId, Battery, CostSegment, Exclusivity, ForecastBundle, ForecastSeries, FuelCurve, Generator,
    GridConnection, ModelSettings, ObjectiveType, OptimizationProblem, SolveStatus,
};
use energy_dispatch::optimizer::{
    AbortHandle, BackendOutput, MinilpBackend, ProgramSpec, SolverBackend, SolverConfig, SolverFailure, SolverKind,
    StopReason,
};
use energy_dispatch::repo::{ForecastProfiles, InMemoryAssetRegistry, InMemoryJobStore, JobStore, ProfileForecastService};
use energy_dispatch::Orchestrator;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
}

/// 100 kWh, 50 kW, 95% round trip, empty at start
pub fn battery(id: &str) -> Battery {
    Battery {
        id: AssetId::new(id),
        name: String::new(),
        capacity_kwh: 100.0,
        usable_capacity_kwh: None,
        min_soc: 0.0,
        max_soc: 1.0,
        initial_soc: 0.0,
        terminal_soc: None,
        max_charge_kw: 50.0,
        max_discharge_kw: 50.0,
        round_trip_efficiency: 0.95,
        charge_efficiency: None,
        discharge_efficiency: None,
        degradation_cost_per_kwh: 0.0,
        exclusivity: Exclusivity::Penalty,
    }
}

pub fn grid(id: &str, max_import_kw: f64, max_export_kw: f64) -> GridConnection {
    GridConnection {
        id: AssetId::new(id),
        name: String::new(),
        max_import_kw,
        max_export_kw,
        import_prices: None,
        export_prices: None,
    }
}

/// Linear-cost unit without commitment
pub fn generator(id: &str, max_power_kw: f64, marginal_cost_per_kwh: f64) -> Generator {
    Generator {
        id: AssetId::new(id),
        name: String::new(),
        min_power_kw: 0.0,
        max_power_kw,
        fuel_curve: FuelCurve::PiecewiseLinear {
            no_load_cost_per_h: 0.0,
            segments: if max_power_kw > 0.0 {
                vec![CostSegment {
                    width_kw: max_power_kw,
                    marginal_cost_per_kwh,
                }]
            } else {
                Vec::new()
            },
        },
        min_up_steps: 0,
        min_down_steps: 0,
        startup_cost: 0.0,
        ramp_up_kw_per_h: None,
        ramp_down_kw_per_h: None,
        initial_on: false,
        initial_output_kw: None,
    }
}

/// 0.10 for hours 0-5, 0.30 for hours 10-15, 0.20 otherwise
pub fn arbitrage_prices() -> Vec<f64> {
    (0..24)
        .map(|h| match h {
            0..=5 => 0.10,
            10..=15 => 0.30,
            _ => 0.20,
        })
        .collect()
}

pub fn hourly_problem(
    objective: ObjectiveType,
    assets: Vec<Asset>,
    load: Vec<f64>,
    renewable: Vec<f64>,
    price: Vec<f64>,
) -> OptimizationProblem {
    let step = Duration::hours(1);
    let horizon_steps = load.len();
    OptimizationProblem {
        start: t0(),
        timestep_secs: 3600,
        horizon_steps,
        objective,
        assets: assets.into(),
        forecasts: Arc::new(ForecastBundle {
            load: ForecastSeries::uniform(t0(), step, load),
            renewable: ForecastSeries::uniform(t0(), step, renewable),
            price: ForecastSeries::uniform(t0(), step, price),
        }),
        settings: ModelSettings::default(),
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.engine.max_concurrent_jobs = 2;
    config.engine.default_time_limit_secs = 20;
    config.engine.supervisor_grace_secs = 1;
    config.persistence.max_attempts = 3;
    config.persistence.initial_backoff_ms = 1;
    config
}

/// Hourly profiles, two days of availability, zero load, arbitrage prices
pub fn profiles() -> ForecastProfiles {
    ForecastProfiles {
        granularity_secs: 3600,
        max_horizon_secs: 2 * 86_400,
        load: vec![0.0; 24],
        renewable: vec![0.0; 24],
        price: arbitrage_prices(),
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub registry: Arc<InMemoryAssetRegistry>,
    pub store: Arc<InMemoryJobStore>,
}

/// Orchestrator over a battery `bat` and a grid `grid`, backed by the given backends
pub fn harness(config: Config, backends: Vec<Arc<dyn SolverBackend>>) -> Harness {
    energy_dispatch::telemetry::init_test_tracing();
    let store = Arc::new(InMemoryJobStore::new());
    let (orchestrator, registry) = orchestrator_with_store(config, backends, store.clone());
    Harness {
        orchestrator,
        registry,
        store,
    }
}

pub fn orchestrator_with_store(
    config: Config,
    backends: Vec<Arc<dyn SolverBackend>>,
    store: Arc<dyn JobStore>,
) -> (Orchestrator, Arc<InMemoryAssetRegistry>) {
    let registry = Arc::new(InMemoryAssetRegistry::new([
        Asset::Battery(battery("bat")),
        Asset::Grid(grid("grid", 1000.0, 1000.0)),
    ]));
    let forecasts = Arc::new(ProfileForecastService::new(profiles()).unwrap());
    let orchestrator = Orchestrator::new(
        config,
        energy_dispatch::optimizer::SolverAdapter::new(backends),
        registry.clone(),
        forecasts,
        store,
    );
    (orchestrator, registry)
}

pub fn minilp() -> Arc<dyn SolverBackend> {
    Arc::new(MinilpBackend::new())
}

/// Reports itself as not installed
pub struct UnavailableBackend(pub SolverKind);

impl SolverBackend for UnavailableBackend {
    fn kind(&self) -> SolverKind {
        self.0
    }

    fn is_available(&self) -> bool {
        false
    }

    fn supports_integer(&self) -> bool {
        true
    }

    fn solve(&self, _spec: &ProgramSpec, _config: &SolverConfig) -> Result<BackendOutput, SolverFailure> {
        Err(SolverFailure::Unavailable(self.0))
    }
}

/// Available, but every call fails as if the backend crashed
pub struct CrashingBackend {
    pub kind: SolverKind,
    pub calls: AtomicUsize,
}

impl CrashingBackend {
    pub fn new(kind: SolverKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SolverBackend for CrashingBackend {
    fn kind(&self) -> SolverKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        true
    }

    fn supports_integer(&self) -> bool {
        true
    }

    fn solve(&self, _spec: &ProgramSpec, _config: &SolverConfig) -> Result<BackendOutput, SolverFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SolverFailure::Failed("license server unreachable".to_string()))
    }
}

/// Blocks until opened, then delegates to minilp. Honours abort while waiting.
pub struct GatedBackend {
    pub open: AtomicBool,
}

impl GatedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(false),
        })
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }
}

impl SolverBackend for GatedBackend {
    fn kind(&self) -> SolverKind {
        SolverKind::Minilp
    }

    fn is_available(&self) -> bool {
        true
    }

    fn supports_integer(&self) -> bool {
        true
    }

    fn supports_abort(&self) -> bool {
        true
    }

    fn solve(&self, spec: &ProgramSpec, config: &SolverConfig) -> Result<BackendOutput, SolverFailure> {
        while !self.open.load(Ordering::SeqCst) {
            if config.abort.is_aborted() {
                return Ok(BackendOutput::without_values(SolveStatus::Timeout, "aborted before start"));
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        MinilpBackend::new().solve(spec, config)
    }
}

/// Runs until aborted, then hands back a feasible incumbent the way an interrupted MIP search does
pub struct IncumbentOnAbortBackend;

impl SolverBackend for IncumbentOnAbortBackend {
    fn kind(&self) -> SolverKind {
        SolverKind::Minilp
    }

    fn is_available(&self) -> bool {
        true
    }

    fn supports_integer(&self) -> bool {
        true
    }

    fn supports_abort(&self) -> bool {
        true
    }

    fn solve(&self, spec: &ProgramSpec, config: &SolverConfig) -> Result<BackendOutput, SolverFailure> {
        while !config.abort.is_aborted() {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let fresh = SolverConfig {
            abort: AbortHandle::new(),
            ..config.clone()
        };
        let mut output = MinilpBackend::new().solve(spec, &fresh)?;
        output.status = SolveStatus::Timeout;
        output.native_status = "aborted with incumbent".to_string();
        output.stopped_by = Some(StopReason::Aborted);
        Ok(output)
    }
}

/// Ignores abort and the time limit entirely
pub struct HangingBackend {
    pub hang: std::time::Duration,
}

impl SolverBackend for HangingBackend {
    fn kind(&self) -> SolverKind {
        SolverKind::Cbc
    }

    fn is_available(&self) -> bool {
        true
    }

    fn supports_integer(&self) -> bool {
        true
    }

    fn solve(&self, _spec: &ProgramSpec, _config: &SolverConfig) -> Result<BackendOutput, SolverFailure> {
        std::thread::sleep(self.hang);
        Err(SolverFailure::Failed("woke up too late".to_string()))
    }
}

/// Cost-minimisation request over the default harness assets
pub fn day_request() -> energy_dispatch::domain::JobRequest {
    let mut request = energy_dispatch::domain::JobRequest::new(
        ObjectiveType::CostMinimization,
        24 * 3600,
        3600,
        vec![AssetId::new("bat"), AssetId::new("grid")],
    );
    request.start = Some(t0());
    request
}
