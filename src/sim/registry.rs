//! Run-scoped shared state for observers.
//!
//! Resource actors write their own entry; the aggregator writes forecast
//! state and counters. Readers take snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::forecast::{HistorySnapshot, QuantileForecast};

/// Role of an agent in the microgrid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Battery,
    External,
    Load,
    Solar,
    Weather,
    Aggregator,
}

/// Latest known state of one agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentState {
    pub kind: AgentKind,
    pub tick: i64,
    pub demand_kw: f64,
    pub production_kw: f64,
    pub soc_kwh: f64,
    pub capacity_kwh: f64,
    pub broken: bool,
}

impl AgentState {
    pub fn new(kind: AgentKind) -> Self {
        Self {
            kind,
            tick: 0,
            demand_kw: 0.0,
            production_kw: 0.0,
            soc_kwh: 0.0,
            capacity_kwh: 0.0,
            broken: false,
        }
    }
}

/// The forecast value exposed for one tick, and what was then observed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForecastSample {
    pub tick: i64,
    pub load_q05: f64,
    pub load_q50: f64,
    pub load_q95: f64,
    pub production_q05: f64,
    pub production_q50: f64,
    pub production_q95: f64,
}

/// Full quantile trajectories from the most recent replan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FanChart {
    /// Tick the forecast was made at; step 0 applies to the next tick.
    pub issued_at: i64,
    pub load: QuantileForecast,
    pub production: QuantileForecast,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
struct ErrorAccumulator {
    sum_sq: f64,
    count: u64,
}

impl ErrorAccumulator {
    fn add(&mut self, predicted: f64, observed: f64) {
        let e = predicted - observed;
        self.sum_sq += e * e;
        self.count += 1;
    }

    fn rmse(&self) -> Option<f64> {
        (self.count > 0).then(|| (self.sum_sq / self.count as f64).sqrt())
    }
}

/// Root-mean-square forecast errors so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ForecastRmse {
    pub load: Option<f64>,
    pub production: Option<f64>,
    pub samples: u64,
}

#[derive(Debug, Default)]
struct RegistryState {
    agents: BTreeMap<String, AgentState>,
    forecast: Option<ForecastSample>,
    fan_chart: Option<FanChart>,
    history: Option<HistorySnapshot>,
    load_error: ErrorAccumulator,
    production_error: ErrorAccumulator,
    negotiations: u64,
}

/// Shared per-run registry. Cloning shares state.
#[derive(Debug, Clone, Default)]
pub struct StateRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an agent's state.
    pub fn upsert(&self, name: &str, state: AgentState) {
        self.inner.write().agents.insert(name.to_string(), state);
    }

    pub fn agent(&self, name: &str) -> Option<AgentState> {
        self.inner.read().agents.get(name).cloned()
    }

    /// All agents, sorted by name.
    pub fn agents(&self) -> Vec<(String, AgentState)> {
        self.inner
            .read()
            .agents
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Sum of the stored energy across batteries (kWh).
    pub fn aggregate_soc(&self) -> f64 {
        self.inner
            .read()
            .agents
            .values()
            .filter(|a| a.kind == AgentKind::Battery)
            .map(|a| a.soc_kwh)
            .sum()
    }

    pub fn set_forecast(&self, sample: Option<ForecastSample>) {
        self.inner.write().forecast = sample;
    }

    /// Forecast exposed for the current tick, if any.
    pub fn forecast(&self) -> Option<ForecastSample> {
        self.inner.read().forecast
    }

    pub fn set_fan_chart(&self, chart: FanChart) {
        self.inner.write().fan_chart = Some(chart);
    }

    pub fn fan_chart(&self) -> Option<FanChart> {
        self.inner.read().fan_chart.clone()
    }

    pub fn set_history(&self, history: HistorySnapshot) {
        self.inner.write().history = Some(history);
    }

    /// Observation window the forecaster trains on.
    pub fn history(&self) -> Option<HistorySnapshot> {
        self.inner.read().history.clone()
    }

    /// Accumulates the median forecast error against observed values.
    pub fn record_error(
        &self,
        sample: &ForecastSample,
        observed_load: f64,
        observed_production: f64,
    ) {
        let mut state = self.inner.write();
        state.load_error.add(sample.load_q50, observed_load);
        state.production_error.add(sample.production_q50, observed_production);
    }

    pub fn rmse(&self) -> ForecastRmse {
        let state = self.inner.read();
        ForecastRmse {
            load: state.load_error.rmse(),
            production: state.production_error.rmse(),
            samples: state.load_error.count,
        }
    }

    pub fn count_negotiation(&self) {
        self.inner.write().negotiations += 1;
    }

    /// Number of CNP rounds run so far.
    pub fn negotiations(&self) -> u64 {
        self.inner.read().negotiations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn battery(soc: f64) -> AgentState {
        AgentState {
            soc_kwh: soc,
            capacity_kwh: 100.0,
            ..AgentState::new(AgentKind::Battery)
        }
    }

    #[test]
    fn aggregate_soc_counts_batteries_only() {
        let registry = StateRegistry::new();
        registry.upsert("b1", battery(10.0));
        registry.upsert("b2", battery(25.0));
        registry.upsert(
            "load",
            AgentState {
                soc_kwh: 99.0,
                ..AgentState::new(AgentKind::Load)
            },
        );
        assert_eq!(registry.aggregate_soc(), 35.0);
        assert_eq!(registry.agents().len(), 3);
    }

    #[test]
    fn upsert_replaces() {
        let registry = StateRegistry::new();
        registry.upsert("b1", battery(10.0));
        registry.upsert("b1", battery(5.0));
        assert_eq!(registry.agent("b1").unwrap().soc_kwh, 5.0);
        assert!(registry.agent("missing").is_none());
    }

    #[test]
    fn rmse_over_recorded_samples() {
        let registry = StateRegistry::new();
        assert_eq!(registry.rmse().load, None);
        let sample = ForecastSample {
            tick: 1,
            load_q05: 0.0,
            load_q50: 10.0,
            load_q95: 20.0,
            production_q05: 0.0,
            production_q50: 5.0,
            production_q95: 10.0,
        };
        registry.record_error(&sample, 13.0, 5.0);
        registry.record_error(&sample, 7.0, 1.0);
        let rmse = registry.rmse();
        assert_eq!(rmse.samples, 2);
        assert!((rmse.load.unwrap() - 3.0).abs() < 1e-12);
        assert!((rmse.production.unwrap() - 8f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn negotiation_counter() {
        let registry = StateRegistry::new();
        let clone = registry.clone();
        clone.count_negotiation();
        clone.count_negotiation();
        assert_eq!(registry.negotiations(), 2);
    }
}
