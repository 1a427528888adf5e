//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use microgrid_twin::config::{BatteryConfig, LoadConfig, ScenarioConfig, SolarConfig};
use microgrid_twin::forecast::QuantileForecast;
use microgrid_twin::planning::StorageSpec;

/// A microgrid with one constant load, one constant producer and the given
/// batteries; no grid connection unless enabled by the caller.
///
/// Uses the persistence forecaster and a short history so replanning starts
/// after two ticks.
pub fn constant_config(
    load_kw: f64,
    pv_kw: f64,
    batteries: Vec<BatteryConfig>,
    ticks: u64,
) -> ScenarioConfig {
    let mut cfg = ScenarioConfig::campus();
    cfg.simulation.ticks = ticks;
    cfg.simulation.tick_interval_ms = 2000;
    cfg.forecast.model = "persistence".to_string();
    cfg.forecast.history_len = 2;
    cfg.forecast.horizon = 3;
    cfg.forecast.replan_every = 2;
    cfg.external.enabled = false;
    cfg.loads = vec![LoadConfig {
        name: "office".to_string(),
        nominal_kw: load_kw,
        profile: "constant".to_string(),
    }];
    cfg.solar = vec![SolarConfig {
        name: "roof".to_string(),
        model: "constant".to_string(),
        kw: pv_kw,
        ..SolarConfig::default()
    }];
    cfg.batteries = batteries;
    cfg
}

/// Battery with unit efficiencies and a fixed cost.
pub fn battery(name: &str, capacity_kwh: f64, initial_soc: f64, cost: f64) -> BatteryConfig {
    BatteryConfig {
        name: name.to_string(),
        capacity_kwh,
        initial_soc,
        eta_charge: 1.0,
        eta_discharge: 1.0,
        c_rate: 0.5,
        cost: Some(cost),
    }
}

/// Lossless [`StorageSpec`] for planner tests.
pub fn storage(id: &str, capacity_kwh: f64, c_rate: f64) -> StorageSpec {
    StorageSpec {
        id: id.to_string(),
        capacity_kwh,
        eta_charge: 1.0,
        eta_discharge: 1.0,
        c_rate,
    }
}

/// Quantile forecast with the same low/median/high values at every step.
pub fn quantiles(lo: f64, mid: f64, hi: f64, horizon: usize) -> QuantileForecast {
    QuantileForecast {
        q05: vec![lo; horizon],
        q50: vec![mid; horizon],
        q95: vec![hi; horizon],
    }
}
