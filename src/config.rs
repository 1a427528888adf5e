//! TOML-based scenario configuration and preset definitions.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::devices::weather::WeatherParams;

/// Top-level scenario configuration parsed from TOML.
///
/// All fields have defaults matching the `campus` preset. Load from TOML
/// with [`ScenarioConfig::from_toml_file`] or use
/// [`ScenarioConfig::campus`] for the built-in default. Resource tables
/// given in TOML replace the default resources entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Simulation timing and global parameters.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Forecasting and planning hyperparameters.
    #[serde(default)]
    pub forecast: ForecastConfig,
    /// CNP and report timing.
    #[serde(default)]
    pub negotiation: NegotiationConfig,
    /// External grid connection.
    #[serde(default)]
    pub external: ExternalConfig,
    /// Initial weather parameters; hot-reloadable at runtime.
    #[serde(default)]
    pub weather: WeatherParams,
    /// Battery storage units.
    #[serde(default = "default_batteries")]
    pub batteries: Vec<BatteryConfig>,
    /// Consumers.
    #[serde(default = "default_loads")]
    pub loads: Vec<LoadConfig>,
    /// Producers.
    #[serde(default = "default_solar")]
    pub solar: Vec<SolarConfig>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self::campus()
    }
}

/// Simulation timing and global parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Number of ticks per simulated day (must be > 0).
    pub steps_per_day: usize,
    /// Ticks to simulate (must be > 0).
    pub ticks: u64,
    /// Wall-clock period between ticks (ms, must be > 0).
    pub tick_interval_ms: u64,
    /// Master random seed.
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            steps_per_day: 24,
            ticks: 72,
            tick_interval_ms: 1000,
            seed: 42,
        }
    }
}

/// Forecasting and planning hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForecastConfig {
    /// Forecaster: `"ensemble"` or `"persistence"`.
    pub model: String,
    /// History buffer capacity (samples, must be > 0).
    pub history_len: usize,
    /// Forecast and plan horizon (ticks, must be > 0).
    pub horizon: usize,
    /// Replan every this many ticks once history is full (must be > 0).
    pub replan_every: i64,
    /// Plan deviation that triggers an ε-break (kW, must be >= 0).
    pub epsilon_kw: f64,
    /// Samples required before the ensemble is refit.
    pub min_samples: usize,
    /// Bootstrap members in the ensemble.
    pub members: usize,
    /// Scenario generator: `"tree"` or `"monte_carlo"`.
    pub scenarios: String,
    /// Monte-Carlo draw count.
    pub mc_draws: usize,
    /// Monte-Carlo temporal correlation ρ (0.0–1.0).
    pub mc_rho: f64,
    /// Monte-Carlo load/production cross-correlation κ (-1.0–1.0).
    pub mc_cross: f64,
    /// Scenario selection: `"closest_to_median"` or `"index"`.
    pub selection: String,
    /// Scenario index used with `selection = "index"`.
    pub selection_index: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            model: "ensemble".to_string(),
            history_len: 24,
            horizon: 12,
            replan_every: 6,
            epsilon_kw: 25.0,
            min_samples: 10,
            members: 25,
            scenarios: "tree".to_string(),
            mc_draws: 50,
            mc_rho: 0.8,
            mc_cross: 0.3,
            selection: "closest_to_median".to_string(),
            selection_index: 1,
        }
    }
}

/// CNP and report timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NegotiationConfig {
    /// Proposal collection window (ms).
    pub window_ms: u64,
    /// How long the aggregator waits for a tick's reports (ms).
    pub report_window_ms: u64,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            window_ms: 500,
            report_window_ms: 500,
        }
    }
}

/// External grid connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExternalConfig {
    /// Whether the microgrid is connected at all.
    pub enabled: bool,
    pub name: String,
    /// Supply cap per tick (kWh).
    pub max_supply_kw: f64,
    /// Unit cost of imports.
    pub cost: f64,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "grid".to_string(),
            max_supply_kw: 9999.0,
            cost: 9999.0,
        }
    }
}

/// One battery storage unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatteryConfig {
    pub name: String,
    /// Total energy capacity (kWh).
    pub capacity_kwh: f64,
    /// Initial state of charge (0.0–1.0).
    pub initial_soc: f64,
    /// Charge efficiency (0.0–1.0].
    pub eta_charge: f64,
    /// Discharge efficiency (0.0–1.0].
    pub eta_discharge: f64,
    /// Power limit as a multiple of capacity per tick.
    pub c_rate: f64,
    /// Fixed unit cost; defaults to `1 - efficiency`.
    pub cost: Option<f64>,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            name: "bess-1".to_string(),
            capacity_kwh: 200.0,
            initial_soc: 0.5,
            eta_charge: 0.95,
            eta_discharge: 0.95,
            c_rate: 0.25,
            cost: None,
        }
    }
}

/// One consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadConfig {
    pub name: String,
    /// Demand at profile fraction 1.0 (kW).
    pub nominal_kw: f64,
    /// Profile: `"campus"` or `"constant"`.
    pub profile: String,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            name: "campus".to_string(),
            nominal_kw: 150.0,
            profile: "campus".to_string(),
        }
    }
}

/// One producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolarConfig {
    pub name: String,
    /// Model: `"array"` (weather-driven) or `"constant"`.
    pub model: String,
    /// Rated output at standard test conditions (kW).
    pub kw_peak: f64,
    /// Power temperature coefficient per °C.
    pub temp_coeff: f64,
    /// Output of the constant model (kW).
    pub kw: f64,
}

impl Default for SolarConfig {
    fn default() -> Self {
        Self {
            name: "pv-1".to_string(),
            model: "array".to_string(),
            kw_peak: 120.0,
            temp_coeff: -0.004,
            kw: 0.0,
        }
    }
}

fn default_batteries() -> Vec<BatteryConfig> {
    vec![BatteryConfig::default()]
}

fn default_loads() -> Vec<LoadConfig> {
    vec![LoadConfig::default()]
}

fn default_solar() -> Vec<SolarConfig> {
    vec![SolarConfig::default()]
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"simulation.steps_per_day"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

fn check_one_of(errors: &mut Vec<ConfigError>, field: &str, value: &str, allowed: &[&str]) {
    if !allowed.contains(&value) {
        let quoted: Vec<String> = allowed.iter().map(|a| format!("\"{a}\"")).collect();
        errors.push(ConfigError::new(
            field,
            format!("must be one of {}, got \"{value}\"", quoted.join(", ")),
        ));
    }
}

impl ScenarioConfig {
    /// Returns the campus preset: grid-connected office campus with PV and
    /// one battery.
    pub fn campus() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            forecast: ForecastConfig::default(),
            negotiation: NegotiationConfig::default(),
            external: ExternalConfig {
                max_supply_kw: 100.0,
                cost: 0.25,
                ..ExternalConfig::default()
            },
            weather: WeatherParams::default(),
            batteries: default_batteries(),
            loads: default_loads(),
            solar: default_solar(),
        }
    }

    /// Returns the islanded preset: no grid connection, two batteries and a
    /// larger array.
    pub fn islanded() -> Self {
        Self {
            external: ExternalConfig {
                enabled: false,
                ..ExternalConfig::default()
            },
            batteries: vec![
                BatteryConfig {
                    name: "bess-1".to_string(),
                    capacity_kwh: 300.0,
                    initial_soc: 0.8,
                    c_rate: 0.3,
                    ..BatteryConfig::default()
                },
                BatteryConfig {
                    name: "bess-2".to_string(),
                    capacity_kwh: 150.0,
                    initial_soc: 0.8,
                    eta_charge: 0.9,
                    eta_discharge: 0.9,
                    c_rate: 0.5,
                    cost: None,
                },
            ],
            loads: vec![LoadConfig {
                nominal_kw: 100.0,
                ..LoadConfig::default()
            }],
            solar: vec![SolarConfig {
                kw_peak: 200.0,
                ..SolarConfig::default()
            }],
            ..Self::campus()
        }
    }

    /// Returns the volatile preset: cloudy, fast-changing weather, two loads,
    /// Monte-Carlo scenarios and a tight ε.
    pub fn volatile() -> Self {
        Self {
            forecast: ForecastConfig {
                scenarios: "monte_carlo".to_string(),
                epsilon_kw: 10.0,
                replan_every: 3,
                ..ForecastConfig::default()
            },
            weather: WeatherParams {
                sigma_g: 0.35,
                sigma_t: 1.5,
                cloud_alpha: 0.5,
                ..WeatherParams::default()
            },
            loads: vec![
                LoadConfig::default(),
                LoadConfig {
                    name: "lab".to_string(),
                    nominal_kw: 40.0,
                    profile: "constant".to_string(),
                },
            ],
            ..Self::campus()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["campus", "islanded", "volatile"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "campus" => Ok(Self::campus()),
            "islanded" => Ok(Self::islanded()),
            "volatile" => Ok(Self::volatile()),
            _ => Err(ConfigError::new(
                "preset",
                format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            )),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("scenario", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Number of production and consumption reports expected per tick.
    pub fn reporters(&self) -> usize {
        self.loads.len() + self.solar.len()
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let s = &self.simulation;
        if s.steps_per_day == 0 {
            errors.push(ConfigError::new("simulation.steps_per_day", "must be > 0"));
        }
        if s.ticks == 0 {
            errors.push(ConfigError::new("simulation.ticks", "must be > 0"));
        }
        if s.tick_interval_ms == 0 {
            errors.push(ConfigError::new("simulation.tick_interval_ms", "must be > 0"));
        }

        let f = &self.forecast;
        check_one_of(&mut errors, "forecast.model", &f.model, &["ensemble", "persistence"]);
        check_one_of(&mut errors, "forecast.scenarios", &f.scenarios, &["tree", "monte_carlo"]);
        check_one_of(
            &mut errors,
            "forecast.selection",
            &f.selection,
            &["closest_to_median", "index"],
        );
        if f.history_len == 0 {
            errors.push(ConfigError::new("forecast.history_len", "must be > 0"));
        }
        if f.horizon == 0 {
            errors.push(ConfigError::new("forecast.horizon", "must be > 0"));
        }
        if f.replan_every <= 0 {
            errors.push(ConfigError::new("forecast.replan_every", "must be > 0"));
        }
        if !(f.epsilon_kw >= 0.0) {
            errors.push(ConfigError::new("forecast.epsilon_kw", "must be >= 0"));
        }
        if f.members == 0 {
            errors.push(ConfigError::new("forecast.members", "must be > 0"));
        }
        if f.scenarios == "monte_carlo" && f.mc_draws == 0 {
            errors.push(ConfigError::new("forecast.mc_draws", "must be > 0"));
        }
        if !(0.0..=1.0).contains(&f.mc_rho) {
            errors.push(ConfigError::new("forecast.mc_rho", "must be in [0.0, 1.0]"));
        }
        if !(-1.0..=1.0).contains(&f.mc_cross) {
            errors.push(ConfigError::new("forecast.mc_cross", "must be in [-1.0, 1.0]"));
        }

        let n = &self.negotiation;
        if n.window_ms == 0 {
            errors.push(ConfigError::new("negotiation.window_ms", "must be > 0"));
        }

        let e = &self.external;
        if e.max_supply_kw < 0.0 {
            errors.push(ConfigError::new("external.max_supply_kw", "must be >= 0"));
        }

        for (field, message) in self.weather.problems() {
            errors.push(ConfigError::new(format!("weather.{field}"), message));
        }

        let mut names: Vec<&str> = Vec::new();
        if e.enabled {
            names.push(&e.name);
        }

        for (i, b) in self.batteries.iter().enumerate() {
            let p = format!("batteries[{i}]");
            names.push(&b.name);
            if b.capacity_kwh <= 0.0 {
                errors.push(ConfigError::new(format!("{p}.capacity_kwh"), "must be > 0"));
            }
            if !(0.0..=1.0).contains(&b.initial_soc) {
                errors.push(ConfigError::new(format!("{p}.initial_soc"), "must be in [0.0, 1.0]"));
            }
            if !(b.eta_charge > 0.0 && b.eta_charge <= 1.0) {
                errors.push(ConfigError::new(format!("{p}.eta_charge"), "must be in (0.0, 1.0]"));
            }
            if !(b.eta_discharge > 0.0 && b.eta_discharge <= 1.0) {
                errors.push(ConfigError::new(
                    format!("{p}.eta_discharge"),
                    "must be in (0.0, 1.0]",
                ));
            }
            if b.c_rate < 0.0 {
                errors.push(ConfigError::new(format!("{p}.c_rate"), "must be >= 0"));
            }
        }

        for (i, l) in self.loads.iter().enumerate() {
            let p = format!("loads[{i}]");
            names.push(&l.name);
            check_one_of(&mut errors, &format!("{p}.profile"), &l.profile, &["campus", "constant"]);
            if l.nominal_kw < 0.0 {
                errors.push(ConfigError::new(format!("{p}.nominal_kw"), "must be >= 0"));
            }
        }

        for (i, pv) in self.solar.iter().enumerate() {
            let p = format!("solar[{i}]");
            names.push(&pv.name);
            check_one_of(&mut errors, &format!("{p}.model"), &pv.model, &["array", "constant"]);
            if pv.kw_peak < 0.0 || pv.kw < 0.0 {
                errors.push(ConfigError::new(format!("{p}.kw_peak"), "outputs must be >= 0"));
            }
        }

        let mut sorted = names.clone();
        sorted.sort_unstable();
        for pair in sorted.windows(2) {
            if pair[0] == pair[1] {
                errors.push(ConfigError::new(
                    "names",
                    format!("resource name \"{}\" is used twice", pair[0]),
                ));
            }
        }
        for reserved in [
            crate::sim::aggregator::AGGREGATOR_ID,
            crate::sim::actors::WEATHER_ID,
            crate::sim::clock::TICK_SOURCE_ID,
        ] {
            if names.contains(&reserved) {
                errors.push(ConfigError::new(
                    "names",
                    format!("resource name \"{reserved}\" is reserved"),
                ));
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn campus_preset_valid() {
        let cfg = ScenarioConfig::campus();
        let errors = cfg.validate();
        assert!(errors.is_empty(), "campus should be valid: {errors:?}");
    }

    #[test]
    fn from_preset_unknown() {
        let e = ScenarioConfig::from_preset("nonexistent").unwrap_err();
        assert!(e.message.contains("unknown preset"));
    }

    #[test]
    fn all_presets_are_valid() {
        for name in ScenarioConfig::PRESETS {
            let cfg = ScenarioConfig::from_preset(name);
            assert!(cfg.is_ok(), "preset \"{name}\" should load");
            let errors = cfg.as_ref().map(|c| c.validate()).unwrap_or_default();
            assert!(
                errors.is_empty(),
                "preset \"{name}\" should be valid: {errors:?}"
            );
        }
    }

    #[test]
    fn valid_toml_parses() {
        let toml = r#"
[simulation]
steps_per_day = 24
ticks = 48
seed = 99

[forecast]
horizon = 6
scenarios = "monte_carlo"
mc_draws = 20

[external]
max_supply_kw = 50.0
cost = 0.3

[weather]
g_peak = 900.0

[[batteries]]
name = "b1"
capacity_kwh = 100.0
cost = 0.05

[[batteries]]
name = "b2"
capacity_kwh = 50.0

[[loads]]
name = "office"
nominal_kw = 80.0
profile = "constant"

[[solar]]
name = "roof"
model = "constant"
kw = 60.0
"#;
        let cfg = ScenarioConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.simulation.ticks, 48);
        assert_eq!(cfg.forecast.horizon, 6);
        assert_eq!(cfg.batteries.len(), 2);
        assert_eq!(cfg.batteries[0].cost, Some(0.05));
        assert_eq!(cfg.batteries[1].initial_soc, 0.5);
        assert_eq!(cfg.weather.g_peak, 900.0);
        assert_eq!(cfg.reporters(), 2);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn invalid_toml_unknown_field() {
        let toml = r#"
[simulation]
steps_per_day = 24
bogus_field = true
"#;
        assert!(ScenarioConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml = r#"
[simulation]
seed = 99
"#;
        let cfg = ScenarioConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.simulation.seed, 99);
        assert_eq!(cfg.simulation.steps_per_day, 24);
        assert_eq!(cfg.batteries.len(), 1);
        assert_eq!(cfg.external.cost, 9999.0);
    }

    #[test]
    fn validation_catches_bad_fields() {
        let mut cfg = ScenarioConfig::campus();
        cfg.simulation.steps_per_day = 0;
        cfg.batteries[0].initial_soc = 1.5;
        cfg.forecast.model = "oracle".to_string();
        cfg.weather.cloud_alpha = 3.0;
        let fields: Vec<String> = cfg.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"simulation.steps_per_day".to_string()));
        assert!(fields.contains(&"batteries[0].initial_soc".to_string()));
        assert!(fields.contains(&"forecast.model".to_string()));
        assert!(fields.contains(&"weather.cloud_alpha".to_string()));
    }

    #[test]
    fn validation_catches_duplicate_and_reserved_names() {
        let mut cfg = ScenarioConfig::campus();
        cfg.loads.push(LoadConfig::default());
        cfg.solar[0].name = "aggregator".to_string();
        let messages: Vec<String> = cfg.validate().into_iter().map(|e| e.message).collect();
        assert!(messages.iter().any(|m| m.contains("used twice")));
        assert!(messages.iter().any(|m| m.contains("reserved")));
    }

    #[test]
    fn islanded_has_no_grid() {
        let cfg = ScenarioConfig::islanded();
        assert!(!cfg.external.enabled);
        assert_eq!(cfg.batteries.len(), 2);
    }

    #[test]
    fn volatile_uses_monte_carlo() {
        let cfg = ScenarioConfig::volatile();
        assert_eq!(cfg.forecast.scenarios, "monte_carlo");
        assert!(cfg.weather.sigma_g > ScenarioConfig::campus().weather.sigma_g);
    }

    #[test]
    fn error_display_names_field() {
        let e = ConfigError::new("a", "bad");
        assert_eq!(e.to_string(), "config error: a: bad");
    }
}
