//! Synthetic weather: clear-sky irradiance with an AR(1) cloud factor and a
//! diurnal temperature curve. Parameters can be swapped at runtime through a
//! versioned [`WeatherHandle`].

use std::f64::consts::{PI, TAU};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bus::message::Irradiance;
use crate::devices::types::{gaussian_noise, hour_of_day};

/// Minimum cloud multiplier (heavy overcast).
const CLOUD_MIN: f64 = 0.2;
/// Maximum cloud multiplier (enhanced irradiance from cloud edges).
const CLOUD_MAX: f64 = 1.2;

/// Hot-reloadable weather parameters. Hours refer to the hour of day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeatherParams {
    /// First daylight hour (inclusive).
    pub sunrise_hour: usize,
    /// Last daylight hour (exclusive).
    pub sunset_hour: usize,
    /// Clear-sky irradiance at solar noon (W/m²).
    pub g_peak: f64,
    /// Daytime mean temperature (°C).
    pub temp_mean_day: f64,
    /// Night-time mean temperature (°C).
    pub temp_mean_night: f64,
    /// Hour of the daily temperature minimum.
    pub temp_min_hour: usize,
    /// Cloud innovation standard deviation (fraction of irradiance).
    pub sigma_g: f64,
    /// Temperature noise standard deviation (°C).
    pub sigma_t: f64,
    /// AR(1) persistence of the cloud factor (0.0–1.0).
    pub cloud_alpha: f64,
}

impl Default for WeatherParams {
    fn default() -> Self {
        Self {
            sunrise_hour: 6,
            sunset_hour: 18,
            g_peak: 1000.0,
            temp_mean_day: 25.0,
            temp_mean_night: 15.0,
            temp_min_hour: 5,
            sigma_g: 0.15,
            sigma_t: 0.8,
            cloud_alpha: 0.8,
        }
    }
}

impl WeatherParams {
    /// Returns a description of each invalid field; empty when valid.
    pub fn problems(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if self.sunrise_hour >= self.sunset_hour {
            out.push(("sunrise_hour", "must be < sunset_hour".to_string()));
        }
        if self.sunset_hour > 24 {
            out.push(("sunset_hour", "must be <= 24".to_string()));
        }
        if self.temp_min_hour >= 24 {
            out.push(("temp_min_hour", "must be < 24".to_string()));
        }
        if self.g_peak < 0.0 {
            out.push(("g_peak", "must be >= 0".to_string()));
        }
        if self.sigma_g < 0.0 || self.sigma_t < 0.0 {
            out.push(("sigma_g", "noise deviations must be >= 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.cloud_alpha) {
            out.push(("cloud_alpha", "must be in [0.0, 1.0]".to_string()));
        }
        out
    }
}

/// Shared, versioned weather parameters.
///
/// Every [`WeatherHandle::update`] bumps the version; models compare versions
/// each tick and reload on change.
#[derive(Debug, Clone)]
pub struct WeatherHandle {
    params: Arc<RwLock<WeatherParams>>,
    version: Arc<AtomicU64>,
}

impl WeatherHandle {
    pub fn new(params: WeatherParams) -> Self {
        Self {
            params: Arc::new(RwLock::new(params)),
            version: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Installs new parameters and returns the new version.
    pub fn update(&self, params: WeatherParams) -> u64 {
        *self.params.write() = params;
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        info!(version, "weather parameters reloaded");
        version
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Current version and a copy of the parameters.
    pub fn snapshot(&self) -> (u64, WeatherParams) {
        let params = self.params.read().clone();
        (self.version(), params)
    }
}

/// Stateful weather generator.
#[derive(Debug)]
pub struct WeatherModel {
    handle: WeatherHandle,
    params: WeatherParams,
    version: u64,
    steps_per_day: usize,
    cloud: f64,
    rng: StdRng,
}

impl WeatherModel {
    pub fn new(handle: WeatherHandle, steps_per_day: usize, seed: u64) -> Self {
        let (version, params) = handle.snapshot();
        Self {
            handle,
            params,
            version,
            steps_per_day: steps_per_day.max(1),
            cloud: 1.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Parameters currently in effect.
    pub fn params(&self) -> &WeatherParams {
        &self.params
    }

    fn reload_if_changed(&mut self) {
        if self.handle.version() != self.version {
            let (version, params) = self.handle.snapshot();
            self.version = version;
            self.params = params;
        }
    }

    /// Clear-sky irradiance for an hour of the day.
    pub fn clear_sky(&self, hour: usize) -> f64 {
        let p = &self.params;
        if hour < p.sunrise_hour || hour >= p.sunset_hour {
            return 0.0;
        }
        let span = (p.sunset_hour - p.sunrise_hour) as f64;
        let x = (hour - p.sunrise_hour) as f64 + 0.5;
        p.g_peak * (PI * x / span).sin()
    }

    /// Noise-free temperature for an hour of the day.
    pub fn mean_temperature(&self, hour: usize) -> f64 {
        let p = &self.params;
        let phase = TAU * (hour as f64 - p.temp_min_hour as f64) / 24.0;
        p.temp_mean_night + (p.temp_mean_day - p.temp_mean_night) * 0.5 * (1.0 - phase.cos())
    }

    /// Produces the observation for `tick`, advancing the cloud process.
    pub fn observe(&mut self, tick: i64) -> Irradiance {
        self.reload_if_changed();
        let hour = hour_of_day(tick, self.steps_per_day);

        let alpha = self.params.cloud_alpha;
        let innovation = 1.0 + gaussian_noise(&mut self.rng, self.params.sigma_g);
        self.cloud = (alpha * self.cloud + (1.0 - alpha) * innovation).clamp(CLOUD_MIN, CLOUD_MAX);

        let g = (self.clear_sky(hour) * self.cloud).max(0.0);
        let t = self.mean_temperature(hour) + gaussian_noise(&mut self.rng, self.params.sigma_t);
        Irradiance { g, t }
    }
}
