//! Bootstrap ensemble of ridge autoregressive models.
//!
//! Each member is a linear model over lag, moving-average, temperature and
//! time-of-day features, fit on a bootstrap resample of the history. The
//! spread of member predictions, widened by the in-sample residual error,
//! gives the quantile band.

use std::f64::consts::TAU;

use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::debug;

use super::{Forecaster, QuantileForecast, TrainingWindow, forward_fill};
use crate::error::ForecastError;
use crate::linalg::solve_spd;

/// Number of regression features including the intercept.
const FEATURES: usize = 7;
/// Standard-normal z-score for the 5%/95% quantiles.
const Z_90: f64 = 1.645;
/// Ridge strength relative to the mean feature energy.
const RIDGE: f64 = 1e-3;
/// Lags needed before the first training row.
const WARMUP: usize = 3;

/// Hyperparameters for [`EnsembleForecaster`].
#[derive(Debug, Clone)]
pub struct EnsembleParams {
    /// Forecast horizon in ticks.
    pub horizon: usize,
    /// Samples required before a refit is attempted.
    pub min_samples: usize,
    /// Number of bootstrap members.
    pub members: usize,
    /// Ticks per simulated day, for the time-of-day features.
    pub steps_per_day: usize,
    pub seed: u64,
}

impl Default for EnsembleParams {
    fn default() -> Self {
        Self {
            horizon: 12,
            min_samples: 10,
            members: 25,
            steps_per_day: 24,
            seed: 42,
        }
    }
}

/// Fitted state for one series.
#[derive(Debug, Clone)]
struct SeriesModel {
    members: Vec<[f64; FEATURES]>,
    sigma: f64,
    /// Last three cleaned observations, oldest first.
    recent: [f64; WARMUP],
    temperature: f64,
    temperature_trend: f64,
    last_tick: i64,
}

/// Default quantile forecaster.
#[derive(Debug, Clone)]
pub struct EnsembleForecaster {
    params: EnsembleParams,
    rng: StdRng,
    load: Option<SeriesModel>,
    production: Option<SeriesModel>,
    last_load: f64,
    last_production: f64,
}

impl EnsembleForecaster {
    /// # Panics
    ///
    /// Panics if `horizon`, `members` or `steps_per_day` is zero.
    pub fn new(params: EnsembleParams) -> Self {
        assert!(params.horizon > 0, "horizon must be > 0");
        assert!(params.members > 0, "ensemble needs at least one member");
        assert!(params.steps_per_day > 0, "steps_per_day must be > 0");
        Self {
            rng: StdRng::seed_from_u64(params.seed),
            params,
            load: None,
            production: None,
            last_load: 0.0,
            last_production: 0.0,
        }
    }

    /// `true` once at least one refit has succeeded.
    pub fn is_fitted(&self) -> bool {
        self.load.is_some() && self.production.is_some()
    }

    fn min_samples(&self) -> usize {
        self.params.min_samples.max(WARMUP + 2)
    }

    fn features(&self, lags: &[f64; WARMUP], temperature: f64, tick: i64) -> [f64; FEATURES] {
        let period = self.params.steps_per_day as i64;
        let phase = tick.rem_euclid(period) as f64 / period as f64;
        let [y3, y2, y1] = *lags;
        [
            1.0,
            y1,
            y2,
            (y1 + y2 + y3) / 3.0,
            temperature,
            (TAU * phase).sin(),
            (TAU * phase).cos(),
        ]
    }

    fn fit_series(
        &mut self,
        series: &[f64],
        temperature: &[f64],
        last_tick: i64,
    ) -> Result<SeriesModel, ForecastError> {
        let y = forward_fill(series);
        let temp = forward_fill_any(temperature);
        let n = y.len();
        let first_tick = last_tick - (n as i64 - 1);

        let rows: Vec<([f64; FEATURES], f64)> = (WARMUP..n)
            .map(|t| {
                let lags = [y[t - 3], y[t - 2], y[t - 1]];
                (self.features(&lags, temp[t], first_tick + t as i64), y[t])
            })
            .collect();

        let full = ridge_fit(&rows).ok_or(ForecastError::Singular)?;
        let sse: f64 = rows.iter().map(|(x, target)| (dot(&full, x) - target).powi(2)).sum();
        let sigma = (sse / rows.len() as f64).sqrt();

        let mut members = vec![full];
        let mut sample = Vec::with_capacity(rows.len());
        for _ in 1..self.params.members {
            sample.clear();
            for _ in 0..rows.len() {
                sample.push(rows[self.rng.random_range(0..rows.len())]);
            }
            if let Some(beta) = ridge_fit(&sample) {
                members.push(beta);
            }
        }

        let temperature_trend = if n >= 2 { temp[n - 1] - temp[n - 2] } else { 0.0 };
        Ok(SeriesModel {
            members,
            sigma,
            recent: [y[n - 3], y[n - 2], y[n - 1]],
            temperature: temp[n - 1],
            temperature_trend,
            last_tick,
        })
    }

    fn predict(&self, model: &SeriesModel) -> QuantileForecast {
        let horizon = self.params.horizon;
        let mut out = QuantileForecast {
            q05: Vec::with_capacity(horizon),
            q50: Vec::with_capacity(horizon),
            q95: Vec::with_capacity(horizon),
        };
        let mut lags = model.recent;
        // Persistence with half the last observed trend.
        let temperature = model.temperature + 0.5 * model.temperature_trend;
        let mut preds = Vec::with_capacity(model.members.len());

        for h in 0..horizon {
            let tick = model.last_tick + 1 + h as i64;
            let x = self.features(&lags, temperature, tick);
            preds.clear();
            preds.extend(model.members.iter().map(|beta| dot(beta, &x)));
            preds.sort_by(f64::total_cmp);

            let median = percentile(&preds, 0.5);
            let band = Z_90 * model.sigma * ((h + 1) as f64).sqrt();
            let q50 = median.max(0.0);
            let q05 = percentile(&preds, 0.05).min(median - band).clamp(0.0, q50);
            let q95 = percentile(&preds, 0.95).max(median + band).max(q50);
            out.q05.push(q05);
            out.q50.push(q50);
            out.q95.push(q95);

            lags = [lags[1], lags[2], q50];
        }
        out
    }
}

impl Forecaster for EnsembleForecaster {
    fn horizon(&self) -> usize {
        self.params.horizon
    }

    fn update(&mut self, window: &TrainingWindow<'_>) -> Result<(), ForecastError> {
        let n = window.check()?;
        if let Some(&v) = forward_fill(window.load).last() {
            self.last_load = v;
        }
        if let Some(&v) = forward_fill(window.production).last() {
            self.last_production = v;
        }

        let need = self.min_samples();
        if n < need {
            return Err(ForecastError::InsufficientHistory { have: n, need });
        }

        let load = self.fit_series(window.load, window.temperature, window.last_tick)?;
        let production = self.fit_series(window.production, window.temperature, window.last_tick)?;
        debug!(
            samples = n,
            load_members = load.members.len(),
            production_members = production.members.len(),
            load_sigma = load.sigma,
            production_sigma = production.sigma,
            "ensemble refit"
        );
        self.load = Some(load);
        self.production = Some(production);
        Ok(())
    }

    fn predict_load(&self) -> QuantileForecast {
        match &self.load {
            Some(model) => self.predict(model),
            None => QuantileForecast::flat(self.last_load, self.params.horizon),
        }
    }

    fn predict_production(&self) -> QuantileForecast {
        match &self.production {
            Some(model) => self.predict(model),
            None => QuantileForecast::flat(self.last_production, self.params.horizon),
        }
    }
}

/// Forward fill that allows negative values (temperatures).
fn forward_fill_any(series: &[f64]) -> Vec<f64> {
    let mut last = 0.0;
    series
        .iter()
        .map(|&v| {
            if v.is_finite() {
                last = v;
            }
            last
        })
        .collect()
}

fn dot(a: &[f64; FEATURES], b: &[f64; FEATURES]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Ridge regression via the normal equations; the intercept is not penalised.
fn ridge_fit(rows: &[([f64; FEATURES], f64)]) -> Option<[f64; FEATURES]> {
    if rows.is_empty() {
        return None;
    }
    let mut xtx = vec![vec![0.0; FEATURES]; FEATURES];
    let mut xty = vec![0.0; FEATURES];
    for (x, y) in rows {
        for i in 0..FEATURES {
            xty[i] += x[i] * y;
            for j in 0..FEATURES {
                xtx[i][j] += x[i] * x[j];
            }
        }
    }
    let energy = (1..FEATURES).map(|i| xtx[i][i]).sum::<f64>() / (FEATURES - 1) as f64;
    let lambda = RIDGE * energy.max(1.0);
    for (i, row) in xtx.iter_mut().enumerate().skip(1) {
        row[i] += lambda;
    }
    let beta = solve_spd(&xtx, &xty)?;
    let mut out = [0.0; FEATURES];
    out.copy_from_slice(&beta);
    out.iter().all(|b| b.is_finite()).then_some(out)
}

/// Linear-interpolated percentile of an ascending slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(horizon: usize) -> EnsembleParams {
        EnsembleParams {
            horizon,
            min_samples: 10,
            members: 15,
            steps_per_day: 24,
            seed: 7,
        }
    }

    fn diurnal(n: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let load = (0..n)
            .map(|t| 50.0 + 20.0 * (TAU * (t % 24) as f64 / 24.0).sin())
            .collect();
        let prod = (0..n)
            .map(|t| {
                let h = t % 24;
                if (6..18).contains(&h) {
                    40.0 * (std::f64::consts::PI * (h - 6) as f64 / 12.0).sin()
                } else {
                    0.0
                }
            })
            .collect();
        let temp = (0..n).map(|t| 20.0 + (t % 24) as f64 * 0.2).collect();
        (load, prod, temp)
    }

    #[test]
    fn rejects_short_history_and_falls_back_flat() {
        let mut f = EnsembleForecaster::new(params(4));
        let err = f
            .update(&TrainingWindow::from_history(
                &[10.0; 5],
                &[2.0; 5],
                &[20.0; 5],
                4,
            ))
            .unwrap_err();
        assert_eq!(err, ForecastError::InsufficientHistory { have: 5, need: 10 });
        assert!(!f.is_fitted());
        assert_eq!(f.predict_load().q50, vec![10.0; 4]);
        assert_eq!(f.predict_production().q50, vec![2.0; 4]);
    }

    #[test]
    fn forecasts_have_horizon_length_and_are_monotone() {
        let (load, prod, temp) = diurnal(72);
        let mut f = EnsembleForecaster::new(params(12));
        f.update(&TrainingWindow::from_history(&load, &prod, &temp, 71))
            .unwrap();
        assert!(f.is_fitted());
        for fc in [f.predict_load(), f.predict_production()] {
            assert_eq!(fc.horizon(), 12);
            assert!(fc.is_monotone(), "{fc:?}");
        }
    }

    #[test]
    fn constant_series_predicts_near_constant() {
        let n = 30;
        let mut f = EnsembleForecaster::new(params(3));
        f.update(&TrainingWindow::from_history(
            &vec![100.0; n],
            &vec![80.0; n],
            &vec![20.0; n],
            n as i64 - 1,
        ))
        .unwrap();
        for v in f.predict_load().q50 {
            assert!((v - 100.0).abs() < 1.0, "load median {v}");
        }
        for v in f.predict_production().q50 {
            assert!((v - 80.0).abs() < 1.0, "production median {v}");
        }
    }

    #[test]
    fn failed_refit_keeps_previous_model() {
        let (load, prod, temp) = diurnal(48);
        let mut f = EnsembleForecaster::new(params(6));
        f.update(&TrainingWindow::from_history(&load, &prod, &temp, 47))
            .unwrap();
        let before = f.predict_load();
        assert!(f
            .update(&TrainingWindow::from_history(&[1.0], &[1.0], &[1.0], 48))
            .is_err());
        assert_eq!(f.predict_load(), before);
    }

    #[test]
    fn percentile_interpolates() {
        let v = [0.0, 10.0];
        assert_eq!(percentile(&v, 0.5), 5.0);
        assert_eq!(percentile(&v, 0.0), 0.0);
        assert_eq!(percentile(&[3.0], 0.9), 3.0);
    }
}
