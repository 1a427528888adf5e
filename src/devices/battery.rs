use crate::bus::message::{CfpKind, Offer};
use crate::devices::types::{CapabilityProvider, NegotiationResponder, Tickable, capability_offer};
use crate::planning::StorageSpec;

/// A battery energy storage system taking part in CNP rounds.
///
/// State of charge is tracked in kWh. Power per tick is bounded by
/// `c_rate * capacity_kwh`; energy by the current SoC and headroom.
///
/// # Efficiency Convention
/// - Delivering `x` kWh drains `x / eta_d` from storage.
/// - Absorbing `x` kWh stores `x * eta_c`.
#[derive(Debug, Clone)]
pub struct Battery {
    /// Battery capacity in kilowatt-hours.
    pub capacity_kwh: f64,

    /// Stored energy in kilowatt-hours.
    pub soc_kwh: f64,

    /// Charging efficiency (0..1.0).
    pub eta_c: f64,

    /// Discharging efficiency (0..1.0).
    pub eta_d: f64,

    /// Maximum power as a multiple of capacity per tick.
    pub c_rate: f64,

    /// Fixed unit cost overriding the `1 - efficiency` default.
    cost: Option<f64>,

    broken: bool,
}

impl Battery {
    /// Creates a new battery.
    ///
    /// # Arguments
    ///
    /// * `capacity_kwh` - Battery capacity in kWh (must be > 0)
    /// * `soc_kwh` - Initial stored energy in kWh (0 to capacity)
    /// * `eta_c` - Charging efficiency (0..1.0)
    /// * `eta_d` - Discharging efficiency (0..1.0)
    /// * `c_rate` - Power limit as a multiple of capacity (≥ 0)
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero/negative, SoC out of range, or efficiencies invalid.
    pub fn new(capacity_kwh: f64, soc_kwh: f64, eta_c: f64, eta_d: f64, c_rate: f64) -> Self {
        assert!(capacity_kwh > 0.0);
        assert!((0.0..=capacity_kwh).contains(&soc_kwh));
        assert!(eta_c > 0.0 && eta_c <= 1.0);
        assert!(eta_d > 0.0 && eta_d <= 1.0);
        assert!(c_rate >= 0.0);

        Self {
            capacity_kwh,
            soc_kwh,
            eta_c,
            eta_d,
            c_rate,
            cost: None,
            broken: false,
        }
    }

    /// Replaces the efficiency-derived unit cost with a fixed one.
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    /// State of charge as a fraction of capacity.
    pub fn soc_fraction(&self) -> f64 {
        self.soc_kwh / self.capacity_kwh
    }

    pub fn max_power_kw(&self) -> f64 {
        self.c_rate * self.capacity_kwh
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Delivers up to `amount` kWh and returns what was delivered.
    pub fn discharge(&mut self, amount: f64) -> f64 {
        let delivered = amount.clamp(0.0, self.available_to_discharge());
        self.soc_kwh = (self.soc_kwh - delivered / self.eta_d).max(0.0);
        delivered
    }

    /// Absorbs up to `amount` kWh and returns what was absorbed.
    pub fn charge(&mut self, amount: f64) -> f64 {
        let absorbed = amount.clamp(0.0, self.available_to_charge());
        self.soc_kwh = (self.soc_kwh + absorbed * self.eta_c).min(self.capacity_kwh);
        absorbed
    }

    /// Static metadata for the planner.
    pub fn spec(&self, id: impl Into<String>) -> StorageSpec {
        StorageSpec {
            id: id.into(),
            capacity_kwh: self.capacity_kwh,
            eta_charge: self.eta_c,
            eta_discharge: self.eta_d,
            c_rate: self.c_rate,
        }
    }
}

impl CapabilityProvider for Battery {
    fn available_to_discharge(&self) -> f64 {
        (self.soc_kwh * self.eta_d).min(self.max_power_kw()).max(0.0)
    }

    fn available_to_charge(&self) -> f64 {
        ((self.capacity_kwh - self.soc_kwh) / self.eta_c)
            .min(self.max_power_kw())
            .max(0.0)
    }

    fn charge_efficiency(&self) -> f64 {
        self.eta_c
    }

    fn discharge_efficiency(&self) -> f64 {
        self.eta_d
    }

    fn unit_cost(&self, kind: CfpKind) -> f64 {
        self.cost.unwrap_or(match kind {
            CfpKind::Shortfall => 1.0 - self.eta_d,
            CfpKind::Surplus => 1.0 - self.eta_c,
        })
    }
}

impl NegotiationResponder for Battery {
    fn offer(&mut self, kind: CfpKind, requested: f64) -> Option<Offer> {
        if self.broken {
            return None;
        }
        Some(capability_offer(self, kind, requested))
    }

    fn accept(&mut self, kind: CfpKind, amount: f64) -> f64 {
        if self.broken {
            return 0.0;
        }
        match kind {
            CfpKind::Shortfall => self.discharge(amount),
            CfpKind::Surplus => self.charge(amount),
        }
    }

    fn set_broken(&mut self, broken: bool) {
        self.broken = broken;
    }
}

impl Tickable for Battery {
    fn on_tick(&mut self, _tick: i64) {}
}
