use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::devices::types::hour_of_day;

/// Lower bound on the daily-profile fraction after noise.
const FRACTION_MIN: f64 = 0.1;
/// Upper bound on the daily-profile fraction after noise.
const FRACTION_MAX: f64 = 1.3;

/// Shape of a load's daily consumption.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadProfile {
    /// Office-style day: busy working hours, shoulders at the edges, quiet night.
    Campus,
    /// Same demand every tick.
    Constant,
}

/// A consumer reporting demand every tick.
///
/// For the campus profile the demand is a baseline fraction by hour
/// (0.8 from 08 to 18, 0.5 from 06 to 08 and 18 to 20, 0.1 otherwise) plus a
/// uniform perturbation in `[-0.1, 0.3]`, clamped to `[0.1, 1.3]` and scaled
/// by the nominal power.
///
/// # Examples
///
/// ```
/// use microgrid_twin::devices::load::{Load, LoadProfile};
///
/// let mut load = Load::new(100.0, LoadProfile::Constant, 24, 42);
/// assert_eq!(load.demand_kw(12, 1.0), 100.0);
/// assert_eq!(load.demand_kw(12, 1.5), 150.0);
/// ```
#[derive(Debug, Clone)]
pub struct Load {
    /// Nominal demand in kilowatts.
    pub nominal_kw: f64,

    pub profile: LoadProfile,

    /// Number of ticks per simulated day.
    pub steps_per_day: usize,

    /// Random number generator for the perturbation.
    rng: StdRng,
}

impl Load {
    /// Creates a new load.
    ///
    /// # Arguments
    ///
    /// * `nominal_kw` - Demand at profile fraction 1.0
    /// * `profile` - Daily shape
    /// * `steps_per_day` - Ticks per simulated day
    /// * `seed` - Random seed for reproducible perturbations
    pub fn new(nominal_kw: f64, profile: LoadProfile, steps_per_day: usize, seed: u64) -> Self {
        Self {
            nominal_kw: nominal_kw.max(0.0),
            profile,
            steps_per_day: steps_per_day.max(1),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Baseline fraction of nominal demand for an hour of the day.
    pub fn campus_fraction(hour: usize) -> f64 {
        match hour {
            8..18 => 0.8,
            6..8 | 18..20 => 0.5,
            _ => 0.1,
        }
    }

    /// Demand in kW at `tick`, scaled by an event `multiplier`.
    ///
    /// The demand is guaranteed to be non-negative.
    pub fn demand_kw(&mut self, tick: i64, multiplier: f64) -> f64 {
        let fraction = match self.profile {
            LoadProfile::Constant => 1.0,
            LoadProfile::Campus => {
                let hour = hour_of_day(tick, self.steps_per_day);
                let delta = self.rng.random_range(-0.1..=0.3);
                (Self::campus_fraction(hour) + delta).clamp(FRACTION_MIN, FRACTION_MAX)
            }
        };
        (fraction * self.nominal_kw * multiplier.max(0.0)).max(0.0)
    }
}
