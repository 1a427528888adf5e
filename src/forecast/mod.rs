//! Probabilistic forecasting of load and production.
//!
//! A [`Forecaster`] is refit from the history buffer on the re-plan cadence
//! and produces [`QuantileForecast`]s over a fixed horizon.

/// Bootstrap ensemble of autoregressive models.
pub mod ensemble;
/// Ring buffer of per-tick observations.
pub mod history;

use serde::Serialize;

use crate::error::ForecastError;

pub use ensemble::EnsembleForecaster;
pub use history::{HistoryBuffer, HistorySnapshot, Sample};

/// Spread applied around a flat fallback forecast.
const FALLBACK_SPREAD: f64 = 0.2;

/// Low/median/high quantile trajectories over the forecast horizon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuantileForecast {
    pub q05: Vec<f64>,
    pub q50: Vec<f64>,
    pub q95: Vec<f64>,
}

impl QuantileForecast {
    /// Flat forecast at `value` with a ±20% band, clamped to ≥ 0.
    pub fn flat(value: f64, horizon: usize) -> Self {
        let v = if value.is_finite() { value.max(0.0) } else { 0.0 };
        Self {
            q05: vec![v * (1.0 - FALLBACK_SPREAD); horizon],
            q50: vec![v; horizon],
            q95: vec![v * (1.0 + FALLBACK_SPREAD); horizon],
        }
    }

    pub fn horizon(&self) -> usize {
        self.q50.len()
    }

    /// Clamps every value to ≥ 0 and reorders each step so q05 ≤ q50 ≤ q95.
    pub fn normalized(mut self) -> Self {
        for k in 0..self.horizon() {
            let mut step = [
                self.q05[k].max(0.0),
                self.q50[k].max(0.0),
                self.q95[k].max(0.0),
            ];
            step.sort_by(f64::total_cmp);
            self.q05[k] = step[0];
            self.q50[k] = step[1];
            self.q95[k] = step[2];
        }
        self
    }

    /// `true` when every step is ordered and non-negative.
    pub fn is_monotone(&self) -> bool {
        (0..self.horizon()).all(|k| {
            0.0 <= self.q05[k] && self.q05[k] <= self.q50[k] && self.q50[k] <= self.q95[k]
        })
    }
}

/// Chronological training series handed to [`Forecaster::update`].
///
/// `last_tick` is the tick of the newest sample; it anchors the time-of-day
/// features.
#[derive(Debug, Clone, Copy)]
pub struct TrainingWindow<'a> {
    pub load: &'a [f64],
    pub production: &'a [f64],
    pub temperature: &'a [f64],
    pub last_tick: i64,
}

impl<'a> TrainingWindow<'a> {
    /// Builds a window from the aggregator's history buffer.
    pub fn from_history(
        load: &'a [f64],
        production: &'a [f64],
        temperature: &'a [f64],
        last_tick: i64,
    ) -> Self {
        Self {
            load,
            production,
            temperature,
            last_tick,
        }
    }

    fn check(&self) -> Result<usize, ForecastError> {
        let n = self.load.len();
        if self.production.len() != n || self.temperature.len() != n {
            return Err(ForecastError::MismatchedSeries {
                load: n,
                production: self.production.len(),
                temperature: self.temperature.len(),
            });
        }
        Ok(n)
    }
}

/// A model producing quantile forecasts for load and production.
pub trait Forecaster: Send {
    /// Number of steps produced by each prediction.
    fn horizon(&self) -> usize;

    /// Refits the model.
    ///
    /// # Errors
    ///
    /// Returns [`ForecastError`] when the window is too short or malformed.
    /// The previous model stays in effect.
    fn update(&mut self, window: &TrainingWindow<'_>) -> Result<(), ForecastError>;

    fn predict_load(&self) -> QuantileForecast;

    fn predict_production(&self) -> QuantileForecast;
}

/// Replaces non-finite or negative readings with the previous valid value.
///
/// Leading invalid readings become zero.
pub fn forward_fill(series: &[f64]) -> Vec<f64> {
    let mut last = 0.0;
    series
        .iter()
        .map(|&v| {
            if v.is_finite() && v >= 0.0 {
                last = v;
            }
            last
        })
        .collect()
}

/// "Tomorrow is today" forecaster.
///
/// Repeats the most recent day of each series across the horizon with a
/// ±20% band. Needs one full day of history; until then it predicts flat at
/// the last observation.
#[derive(Debug, Clone)]
pub struct PersistenceForecaster {
    horizon: usize,
    steps_per_day: usize,
    load: Vec<f64>,
    production: Vec<f64>,
}

impl PersistenceForecaster {
    /// # Panics
    ///
    /// Panics if `steps_per_day` is zero.
    pub fn new(horizon: usize, steps_per_day: usize) -> Self {
        assert!(steps_per_day > 0, "steps_per_day must be > 0");
        Self {
            horizon,
            steps_per_day,
            load: Vec::new(),
            production: Vec::new(),
        }
    }

    fn repeat(&self, baseline: &[f64]) -> QuantileForecast {
        if baseline.is_empty() {
            return QuantileForecast::flat(0.0, self.horizon);
        }
        let q50: Vec<f64> = baseline.iter().cycle().take(self.horizon).copied().collect();
        QuantileForecast {
            q05: q50.iter().map(|v| v * (1.0 - FALLBACK_SPREAD)).collect(),
            q95: q50.iter().map(|v| v * (1.0 + FALLBACK_SPREAD)).collect(),
            q50,
        }
    }
}

impl Forecaster for PersistenceForecaster {
    fn horizon(&self) -> usize {
        self.horizon
    }

    fn update(&mut self, window: &TrainingWindow<'_>) -> Result<(), ForecastError> {
        let n = window.check()?;
        if n < self.steps_per_day {
            if let (Some(&l), Some(&p)) = (window.load.last(), window.production.last()) {
                self.load = forward_fill(&[l]);
                self.production = forward_fill(&[p]);
            }
            return Err(ForecastError::InsufficientHistory {
                have: n,
                need: self.steps_per_day,
            });
        }
        let start = n - self.steps_per_day;
        self.load = forward_fill(&window.load[start..]);
        self.production = forward_fill(&window.production[start..]);
        Ok(())
    }

    fn predict_load(&self) -> QuantileForecast {
        self.repeat(&self.load)
    }

    fn predict_production(&self) -> QuantileForecast {
        self.repeat(&self.production)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_forecast_band() {
        let f = QuantileForecast::flat(10.0, 3);
        assert_eq!(f.horizon(), 3);
        assert!((f.q05[0] - 8.0).abs() < 1e-12);
        assert_eq!(f.q50[2], 10.0);
        assert!((f.q95[1] - 12.0).abs() < 1e-12);
        assert!(f.is_monotone());
    }

    #[test]
    fn flat_forecast_of_negative_is_zero() {
        let f = QuantileForecast::flat(-3.0, 2);
        assert_eq!(f.q95, vec![0.0, 0.0]);
    }

    #[test]
    fn normalized_reorders_and_clamps() {
        let f = QuantileForecast {
            q05: vec![5.0, -1.0],
            q50: vec![3.0, 2.0],
            q95: vec![4.0, 1.0],
        }
        .normalized();
        assert_eq!(f.q05, vec![3.0, 0.0]);
        assert_eq!(f.q50, vec![4.0, 1.0]);
        assert_eq!(f.q95, vec![5.0, 2.0]);
        assert!(f.is_monotone());
    }

    #[test]
    fn forward_fill_replaces_invalid_values() {
        let cleaned = forward_fill(&[f64::NAN, 2.0, -1.0, f64::INFINITY, 3.0]);
        assert_eq!(cleaned, vec![0.0, 2.0, 2.0, 2.0, 3.0]);
    }

    #[test]
    fn persistence_repeats_last_day() {
        let mut f = PersistenceForecaster::new(5, 2);
        let load = [9.0, 9.0, 1.0, 2.0];
        let prod = [0.0, 0.0, 3.0, 4.0];
        let temp = [20.0; 4];
        f.update(&TrainingWindow::from_history(&load, &prod, &temp, 3))
            .unwrap();
        assert_eq!(f.predict_load().q50, vec![1.0, 2.0, 1.0, 2.0, 1.0]);
        assert_eq!(f.predict_production().q50[1], 4.0);
    }

    #[test]
    fn persistence_short_history_falls_back_flat() {
        let mut f = PersistenceForecaster::new(3, 24);
        let err = f
            .update(&TrainingWindow::from_history(&[5.0], &[1.0], &[20.0], 0))
            .unwrap_err();
        assert_eq!(err, ForecastError::InsufficientHistory { have: 1, need: 24 });
        assert_eq!(f.predict_load().q50, vec![5.0; 3]);
    }

    #[test]
    fn mismatched_series_rejected() {
        let mut f = PersistenceForecaster::new(3, 1);
        let err = f
            .update(&TrainingWindow::from_history(&[1.0, 2.0], &[1.0], &[20.0, 20.0], 1))
            .unwrap_err();
        assert!(matches!(err, ForecastError::MismatchedSeries { .. }));
    }
}
