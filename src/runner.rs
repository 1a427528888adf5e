//! Config-driven wiring of one microgrid run.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bus::TopicBus;
use crate::cnp::ResponderActor;
use crate::config::{ScenarioConfig, SolarConfig};
use crate::devices::battery::Battery;
use crate::devices::external::ExternalSource;
use crate::devices::load::{Load, LoadProfile};
use crate::devices::solar::{SolarArray, SolarModel};
use crate::devices::weather::{WeatherHandle, WeatherModel};
use crate::error::SimError;
use crate::forecast::ensemble::EnsembleParams;
use crate::forecast::{EnsembleForecaster, Forecaster, PersistenceForecaster};
use crate::planning::planner::DeterministicPlanner;
use crate::planning::scenario::{MonteCarlo, QuantileTree, ScenarioGenerator, ScenarioSelection};
use crate::sim::actors::{LoadActor, SolarActor, WeatherActor};
use crate::sim::aggregator::{AGGREGATOR_ID, Aggregator, AggregatorSettings};
use crate::sim::clock::{TickControl, TickSource};
use crate::sim::events::EventControl;
use crate::sim::kpi::KpiReport;
use crate::sim::registry::StateRegistry;
use crate::sim::types::TickSummary;

/// Seed offsets keep the per-component RNG streams apart.
const WEATHER_SEED_OFFSET: u64 = 1;
const LOAD_SEED_OFFSET: u64 = 100;
const FORECAST_SEED_OFFSET: u64 = 1000;
const SCENARIO_SEED_OFFSET: u64 = 2000;

/// Tick summaries collected so far, shared with readers such as the API.
#[derive(Debug, Clone, Default)]
pub struct TelemetryLog {
    inner: Arc<RwLock<Vec<TickSummary>>>,
}

impl TelemetryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, summary: TickSummary) {
        self.inner.write().push(summary);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn latest(&self) -> Option<TickSummary> {
        self.inner.read().last().cloned()
    }

    /// Copies the summaries whose tick lies in `from..=to`.
    pub fn range(&self, from: i64, to: i64) -> Vec<TickSummary> {
        self.inner
            .read()
            .iter()
            .filter(|s| s.tick >= from && s.tick <= to)
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> Vec<TickSummary> {
        self.inner.read().clone()
    }
}

/// Summaries and KPIs of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summaries: Vec<TickSummary>,
    pub kpi: KpiReport,
}

/// A running microgrid: every actor spawned, ticking until the limit.
///
/// Dropping the simulation aborts its tasks.
pub struct Simulation {
    config: ScenarioConfig,
    bus: TopicBus,
    registry: StateRegistry,
    events: EventControl,
    weather: WeatherHandle,
    control: TickControl,
    telemetry: TelemetryLog,
    summaries: UnboundedReceiver<TickSummary>,
    tasks: Vec<JoinHandle<()>>,
}

impl Simulation {
    /// Validates `config`, wires every actor and starts the tick source.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Config`] if validation fails.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(config: &ScenarioConfig) -> Result<Self, SimError> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(SimError::Config(errors));
        }

        let s = &config.simulation;
        let bus = TopicBus::new();
        let registry = StateRegistry::new();
        let events = EventControl::new();
        let weather = WeatherHandle::new(config.weather.clone());
        let control = TickControl::new(Duration::from_millis(s.tick_interval_ms));
        let mut tasks = Vec::new();

        let model = WeatherModel::new(
            weather.clone(),
            s.steps_per_day,
            s.seed.wrapping_add(WEATHER_SEED_OFFSET),
        );
        let actor = WeatherActor::new(model, bus.clone(), registry.clone());
        tasks.push(tokio::spawn(actor.run()));

        for (i, cfg) in config.loads.iter().enumerate() {
            let profile = match cfg.profile.as_str() {
                "constant" => LoadProfile::Constant,
                _ => LoadProfile::Campus,
            };
            let seed = s.seed.wrapping_add(LOAD_SEED_OFFSET + i as u64);
            let load = Load::new(cfg.nominal_kw, profile, s.steps_per_day, seed);
            let actor = LoadActor::new(
                cfg.name.clone(),
                load,
                bus.clone(),
                events.clone(),
                registry.clone(),
                AGGREGATOR_ID,
            );
            tasks.push(tokio::spawn(actor.run()));
        }

        for cfg in &config.solar {
            let actor = SolarActor::new(
                cfg.name.clone(),
                SolarArray::new(solar_model(cfg)),
                bus.clone(),
                events.clone(),
                registry.clone(),
                AGGREGATOR_ID,
            );
            tasks.push(tokio::spawn(actor.run()));
        }

        let mut storages = Vec::with_capacity(config.batteries.len());
        for cfg in &config.batteries {
            let mut battery = Battery::new(
                cfg.capacity_kwh,
                cfg.initial_soc * cfg.capacity_kwh,
                cfg.eta_charge,
                cfg.eta_discharge,
                cfg.c_rate,
            );
            if let Some(cost) = cfg.cost {
                battery = battery.with_cost(cost);
            }
            storages.push(battery.spec(cfg.name.clone()));
            let actor =
                ResponderActor::new(
                    cfg.name.clone(),
                    battery,
                    bus.clone(),
                    events.clone(),
                    registry.clone(),
                );
            tasks.push(tokio::spawn(actor.run()));
        }

        let ext = &config.external;
        let import_cap = if ext.enabled {
            let source = ExternalSource::new(ext.max_supply_kw, ext.cost);
            let actor =
                ResponderActor::new(
                    ext.name.clone(),
                    source,
                    bus.clone(),
                    events.clone(),
                    registry.clone(),
                );
            tasks.push(tokio::spawn(actor.run()));
            ext.max_supply_kw
        } else {
            0.0
        };

        let f = &config.forecast;
        let forecaster: Box<dyn Forecaster> = match f.model.as_str() {
            "persistence" => Box::new(PersistenceForecaster::new(f.horizon, s.steps_per_day)),
            _ => Box::new(EnsembleForecaster::new(EnsembleParams {
                horizon: f.horizon,
                min_samples: f.min_samples,
                members: f.members,
                steps_per_day: s.steps_per_day,
                seed: s.seed.wrapping_add(FORECAST_SEED_OFFSET),
            })),
        };
        let generator: Box<dyn ScenarioGenerator> = match f.scenarios.as_str() {
            "monte_carlo" => Box::new(MonteCarlo::new(
                f.mc_draws,
                f.mc_rho,
                f.mc_cross,
                s.seed.wrapping_add(SCENARIO_SEED_OFFSET),
            )),
            _ => Box::new(QuantileTree),
        };
        let selection = match f.selection.as_str() {
            "index" => ScenarioSelection::Index(f.selection_index),
            _ => ScenarioSelection::ClosestToMedian,
        };

        let settings = AggregatorSettings {
            history_len: f.history_len,
            replan_every: f.replan_every,
            epsilon_kw: f.epsilon_kw,
            expected_reports: config.reporters(),
            report_window: Duration::from_millis(config.negotiation.report_window_ms),
            negotiation_window: Duration::from_millis(config.negotiation.window_ms),
            selection,
            external_id: ext.enabled.then(|| ext.name.clone()),
        };
        let planner = DeterministicPlanner::new(storages, ext.name.clone(), import_cap);
        let (tx, rx) = mpsc::unbounded_channel();
        let aggregator = Aggregator::new(
            settings,
            bus.clone(),
            registry.clone(),
            forecaster,
            generator,
            planner,
            tx,
        );
        tasks.push(tokio::spawn(aggregator.run()));

        let source = TickSource::new(control.clone(), 0, 1).with_limit(s.ticks);
        tasks.push(tokio::spawn(source.run(bus.clone())));

        info!(
            loads = config.loads.len(),
            solar = config.solar.len(),
            batteries = config.batteries.len(),
            external = ext.enabled,
            ticks = s.ticks,
            "simulation started"
        );

        Ok(Self {
            config: config.clone(),
            bus,
            registry,
            events,
            weather,
            control,
            telemetry: TelemetryLog::new(),
            summaries: rx,
            tasks,
        })
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn bus(&self) -> &TopicBus {
        &self.bus
    }

    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventControl {
        &self.events
    }

    pub fn weather(&self) -> &WeatherHandle {
        &self.weather
    }

    pub fn tick_control(&self) -> &TickControl {
        &self.control
    }

    pub fn telemetry(&self) -> &TelemetryLog {
        &self.telemetry
    }

    /// Waits for the next tick summary and records it in the telemetry log.
    ///
    /// Returns `None` once the aggregator has stopped.
    pub async fn next_summary(&mut self) -> Option<TickSummary> {
        let summary = self.summaries.recv().await?;
        self.telemetry.push(summary.clone());
        Some(summary)
    }

    /// Collects summaries until the configured tick count is reached.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Closed`] if the aggregator stops early.
    pub async fn run(mut self) -> Result<RunReport, SimError> {
        let target = self.config.simulation.ticks as usize;
        while self.telemetry.len() < target {
            if self.next_summary().await.is_none() {
                warn!(received = self.telemetry.len(), target, "aggregator stopped early");
                return Err(SimError::Closed);
            }
        }
        Ok(self.report())
    }

    /// Summaries and KPIs of everything received so far.
    pub fn report(&self) -> RunReport {
        let summaries = self.telemetry.snapshot();
        let kpi = KpiReport::from_summaries(&summaries, self.registry.rmse());
        RunReport { summaries, kpi }
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn solar_model(cfg: &SolarConfig) -> SolarModel {
    match cfg.model.as_str() {
        "constant" => SolarModel::Constant { kw: cfg.kw },
        _ => SolarModel::Array {
            kw_peak: cfg.kw_peak,
            temp_coeff: cfg.temp_coeff,
        },
    }
}
