//! Conversion of quantile forecasts into weighted joint trajectories.

use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, StandardNormal};

use crate::forecast::QuantileForecast;
use crate::linalg::{cholesky, lower_mul};

/// Quantile-tree weights in low/median/high order.
pub const TREE_WEIGHTS: [f64; 3] = [0.15, 0.70, 0.15];

/// One joint load/production trajectory over the horizon.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub load: Vec<f64>,
    pub production: Vec<f64>,
    pub probability: f64,
}

impl Scenario {
    /// Planned net (production minus load) at offset `k`.
    pub fn net_kw(&self, k: usize) -> f64 {
        self.production[k] - self.load[k]
    }

    pub fn horizon(&self) -> usize {
        self.load.len()
    }
}

/// Strategy turning load and production quantiles into scenarios.
pub trait ScenarioGenerator: Send {
    fn generate(&mut self, load: &QuantileForecast, production: &QuantileForecast) -> Vec<Scenario>;
}

/// Three-branch tree over the low, median and high quantiles.
///
/// Weights sum to one. Index 1 is always the median branch.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuantileTree;

impl ScenarioGenerator for QuantileTree {
    fn generate(
        &mut self,
        load: &QuantileForecast,
        production: &QuantileForecast,
    ) -> Vec<Scenario> {
        let branches = [
            (&load.q05, &production.q05),
            (&load.q50, &production.q50),
            (&load.q95, &production.q95),
        ];
        branches
            .into_iter()
            .zip(TREE_WEIGHTS)
            .map(|((l, p), probability)| Scenario {
                load: l.clone(),
                production: p.clone(),
                probability,
            })
            .collect()
    }
}

/// Correlated Gaussian sampler over the 2H forecast dimensions.
///
/// Within each series the correlation between offsets `i` and `j` is
/// `rho^|i-j|`; between load and production it is additionally scaled by
/// `cross`. The per-step standard deviation is half the q05..q95 range and
/// the mean is q50. Draws are clamped to ≥ 0 and weighted `1/draws`.
#[derive(Debug, Clone)]
pub struct MonteCarlo {
    draws: usize,
    rho: f64,
    cross: f64,
    rng: StdRng,
}

impl MonteCarlo {
    /// # Panics
    ///
    /// Panics if `draws` is zero, `rho` is outside `[0, 1)` or `cross` is
    /// outside `(-1, 1)`.
    pub fn new(draws: usize, rho: f64, cross: f64, seed: u64) -> Self {
        assert!(draws > 0, "draws must be > 0");
        assert!((0.0..1.0).contains(&rho), "rho must be in [0, 1)");
        assert!(cross.abs() < 1.0, "cross correlation must be in (-1, 1)");
        Self {
            draws,
            rho,
            cross,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn correlation(&self, horizon: usize) -> Vec<Vec<f64>> {
        let dims = 2 * horizon;
        let mut corr = vec![vec![0.0; dims]; dims];
        for (i, row) in corr.iter_mut().enumerate() {
            for (j, c) in row.iter_mut().enumerate() {
                let dt = (i % horizon).abs_diff(j % horizon);
                let same_series = (i < horizon) == (j < horizon);
                let scale = if same_series { 1.0 } else { self.cross };
                *c = scale * self.rho.powi(dt as i32);
            }
        }
        corr
    }
}

impl ScenarioGenerator for MonteCarlo {
    fn generate(
        &mut self,
        load: &QuantileForecast,
        production: &QuantileForecast,
    ) -> Vec<Scenario> {
        let horizon = load.horizon().min(production.horizon());
        if horizon == 0 {
            return Vec::new();
        }
        let l = cholesky(&self.correlation(horizon));
        let mean: Vec<f64> = load.q50[..horizon]
            .iter()
            .chain(&production.q50[..horizon])
            .copied()
            .collect();
        let sigma: Vec<f64> = (0..horizon)
            .map(|k| 0.5 * (load.q95[k] - load.q05[k]).max(0.0))
            .chain((0..horizon).map(|k| 0.5 * (production.q95[k] - production.q05[k]).max(0.0)))
            .collect();

        let weight = 1.0 / self.draws as f64;
        (0..self.draws)
            .map(|_| {
                let z: Vec<f64> = (0..2 * horizon)
                    .map(|_| {
                        let v: f64 = StandardNormal.sample(&mut self.rng);
                        v
                    })
                    .collect();
                let x: Vec<f64> = lower_mul(&l, &z)
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (mean[i] + sigma[i] * v).max(0.0))
                    .collect();
                Scenario {
                    load: x[..horizon].to_vec(),
                    production: x[horizon..].to_vec(),
                    probability: weight,
                }
            })
            .collect()
    }
}

/// Policy choosing the scenario handed to the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioSelection {
    /// A fixed position in the generated list.
    Index(usize),
    /// The scenario with the smallest L2 distance to the median trajectories.
    ClosestToMedian,
}

impl ScenarioSelection {
    /// Picks one scenario; `None` if `scenarios` is empty.
    ///
    /// An out-of-range index falls back to the last scenario.
    pub fn select<'a>(
        &self,
        scenarios: &'a [Scenario],
        load: &QuantileForecast,
        production: &QuantileForecast,
    ) -> Option<&'a Scenario> {
        match *self {
            Self::Index(i) => scenarios.get(i).or_else(|| scenarios.last()),
            Self::ClosestToMedian => scenarios.iter().min_by(|a, b| {
                distance(a, load, production).total_cmp(&distance(b, load, production))
            }),
        }
    }
}

fn distance(s: &Scenario, load: &QuantileForecast, production: &QuantileForecast) -> f64 {
    let l: f64 = s.load.iter().zip(&load.q50).map(|(a, b)| (a - b).powi(2)).sum();
    let p: f64 = s
        .production
        .iter()
        .zip(&production.q50)
        .map(|(a, b)| (a - b).powi(2))
        .sum();
    (l + p).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quantiles(lo: f64, mid: f64, hi: f64, h: usize) -> QuantileForecast {
        QuantileForecast {
            q05: vec![lo; h],
            q50: vec![mid; h],
            q95: vec![hi; h],
        }
    }

    #[test]
    fn tree_returns_three_weighted_branches() {
        let load = quantiles(80.0, 100.0, 120.0, 4);
        let prod = quantiles(10.0, 20.0, 30.0, 4);
        for _ in 0..3 {
            let scenarios = QuantileTree.generate(&load, &prod);
            assert_eq!(scenarios.len(), 3);
            let total: f64 = scenarios.iter().map(|s| s.probability).sum();
            assert!((total - 1.0).abs() < 1e-9);
            assert_eq!(scenarios[1].load, load.q50);
            assert_eq!(scenarios[0].production, prod.q05);
            assert_eq!(scenarios[2].net_kw(0), 30.0 - 120.0);
        }
    }

    #[test]
    fn monte_carlo_draws_are_equally_weighted_and_nonnegative() {
        let load = quantiles(0.0, 5.0, 40.0, 6);
        let prod = quantiles(0.0, 2.0, 30.0, 6);
        let scenarios = MonteCarlo::new(50, 0.6, 0.3, 1).generate(&load, &prod);
        assert_eq!(scenarios.len(), 50);
        for s in &scenarios {
            assert_eq!(s.horizon(), 6);
            assert!((s.probability - 0.02).abs() < 1e-12);
            assert!(s.load.iter().chain(&s.production).all(|v| *v >= 0.0));
        }
    }

    #[test]
    fn monte_carlo_with_zero_spread_reproduces_median() {
        let load = quantiles(50.0, 50.0, 50.0, 3);
        let prod = quantiles(7.0, 7.0, 7.0, 3);
        let scenarios = MonteCarlo::new(5, 0.6, 0.0, 3).generate(&load, &prod);
        for s in scenarios {
            assert_eq!(s.load, vec![50.0; 3]);
            assert_eq!(s.production, vec![7.0; 3]);
        }
    }

    #[test]
    fn monte_carlo_is_seeded() {
        let load = quantiles(80.0, 100.0, 120.0, 4);
        let prod = quantiles(10.0, 20.0, 30.0, 4);
        let a = MonteCarlo::new(4, 0.6, 0.3, 9).generate(&load, &prod);
        let b = MonteCarlo::new(4, 0.6, 0.3, 9).generate(&load, &prod);
        assert_eq!(a, b);
    }

    #[test]
    fn closest_to_median_picks_tree_median() {
        let load = quantiles(80.0, 100.0, 120.0, 4);
        let prod = quantiles(10.0, 20.0, 30.0, 4);
        let scenarios = QuantileTree.generate(&load, &prod);
        let picked = ScenarioSelection::ClosestToMedian
            .select(&scenarios, &load, &prod)
            .unwrap();
        assert_eq!(picked, &scenarios[1]);
    }

    #[test]
    fn index_selection_clamps_to_last() {
        let load = quantiles(1.0, 2.0, 3.0, 2);
        let prod = quantiles(1.0, 2.0, 3.0, 2);
        let scenarios = QuantileTree.generate(&load, &prod);
        let sel = ScenarioSelection::Index(9);
        assert_eq!(sel.select(&scenarios, &load, &prod), Some(&scenarios[2]));
        assert_eq!(sel.select(&[], &load, &prod), None);
    }
}
