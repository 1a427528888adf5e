//! Capability interfaces shared by resource models.

use rand::{Rng, rngs::StdRng};
use rand_distr::StandardNormal;

use crate::bus::message::{CfpKind, Offer};

/// Cost attached to offers that must never win a round.
pub const PROHIBITIVE_COST: f64 = 9999.0;

/// Live capability query exposed by storage-capable resources.
///
/// Quantities are per tick; with one-hour ticks kW and kWh coincide.
pub trait CapabilityProvider {
    /// Energy the resource can deliver this tick, after losses.
    fn available_to_discharge(&self) -> f64;

    /// Energy the resource can absorb this tick, before losses.
    fn available_to_charge(&self) -> f64;

    /// Fraction of absorbed energy that is stored, in `(0, 1]`.
    fn charge_efficiency(&self) -> f64;

    /// Fraction of released energy that is delivered, in `(0, 1]`.
    fn discharge_efficiency(&self) -> f64;

    /// Unit cost the resource asks for the given direction.
    fn unit_cost(&self, kind: CfpKind) -> f64;
}

/// Builds an offer bounded by live capability and priced by the cost function.
pub fn capability_offer<C: CapabilityProvider + ?Sized>(
    resource: &C,
    kind: CfpKind,
    requested: f64,
) -> Offer {
    let available = match kind {
        CfpKind::Shortfall => resource.available_to_discharge(),
        CfpKind::Surplus => resource.available_to_charge(),
    };
    Offer {
        kind,
        amount: requested.min(available).max(0.0),
        cost: resource.unit_cost(kind),
    }
}

/// Participant in CNP rounds.
pub trait NegotiationResponder {
    /// Answers a call for proposals; `None` means no reply at all.
    fn offer(&mut self, kind: CfpKind, requested: f64) -> Option<Offer>;

    /// Applies an accepted amount to private state and returns what was
    /// actually delivered or absorbed.
    fn accept(&mut self, kind: CfpKind, amount: f64) -> f64;

    /// Notification that the offer lost. No state change by default.
    fn reject(&mut self, _kind: CfpKind) {}

    /// Marks the resource broken or repaired for the current tick.
    fn set_broken(&mut self, broken: bool);
}

/// Per-tick hook for resources with time-dependent state.
pub trait Tickable {
    fn on_tick(&mut self, tick: i64);
}

/// Zero-mean Gaussian noise with the given standard deviation.
///
/// Returns zero for non-positive `std_dev`.
pub fn gaussian_noise(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }
    let z: f64 = rng.sample(StandardNormal);
    z * std_dev
}

/// Hour-of-day index for a tick given the number of ticks per day.
pub fn hour_of_day(tick: i64, steps_per_day: usize) -> usize {
    let period = steps_per_day.max(1) as i64;
    (tick.rem_euclid(period) * 24 / period) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    struct Fixed {
        discharge: f64,
        charge: f64,
    }

    impl CapabilityProvider for Fixed {
        fn available_to_discharge(&self) -> f64 {
            self.discharge
        }
        fn available_to_charge(&self) -> f64 {
            self.charge
        }
        fn charge_efficiency(&self) -> f64 {
            1.0
        }
        fn discharge_efficiency(&self) -> f64 {
            1.0
        }
        fn unit_cost(&self, kind: CfpKind) -> f64 {
            match kind {
                CfpKind::Shortfall => 0.1,
                CfpKind::Surplus => 0.2,
            }
        }
    }

    #[test]
    fn offer_is_bounded_by_capability() {
        let r = Fixed {
            discharge: 5.0,
            charge: 50.0,
        };
        let o = capability_offer(&r, CfpKind::Shortfall, 20.0);
        assert_eq!((o.amount, o.cost), (5.0, 0.1));
        let o = capability_offer(&r, CfpKind::Surplus, 20.0);
        assert_eq!((o.amount, o.cost), (20.0, 0.2));
    }

    #[test]
    fn noise_is_zero_without_spread() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(gaussian_noise(&mut rng, 0.0), 0.0);
        assert!(gaussian_noise(&mut rng, 1.0).is_finite());
    }

    #[test]
    fn noise_has_requested_spread() {
        let mut rng = StdRng::seed_from_u64(11);
        let draws: Vec<f64> = (0..20_000).map(|_| gaussian_noise(&mut rng, 2.0)).collect();
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        let var = draws.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / draws.len() as f64;
        assert!(mean.abs() < 0.1, "mean {mean}");
        assert!((var.sqrt() - 2.0).abs() < 0.1, "std {}", var.sqrt());
    }

    #[test]
    fn hour_of_day_wraps() {
        assert_eq!(hour_of_day(0, 24), 0);
        assert_eq!(hour_of_day(25, 24), 1);
        assert_eq!(hour_of_day(-1, 24), 23);
        assert_eq!(hour_of_day(2, 4), 12);
    }
}
