use crate::bus::message::{CfpKind, Offer};
use crate::devices::types::{
    CapabilityProvider, NegotiationResponder, PROHIBITIVE_COST, Tickable, capability_offer,
};

/// Connection to the upstream grid, bidding only on shortfalls.
///
/// Supply is capped per tick. During a blackout the source still answers
/// calls for proposals, with a zero amount at [`PROHIBITIVE_COST`].
#[derive(Debug, Clone)]
pub struct ExternalSource {
    /// Maximum energy supplied per tick (kWh).
    pub max_supply_per_tick: f64,
    /// Unit cost of imported energy.
    pub cost: f64,
    supplied_this_tick: f64,
    blackout: bool,
    broken: bool,
}

impl ExternalSource {
    pub fn new(max_supply_per_tick: f64, cost: f64) -> Self {
        Self {
            max_supply_per_tick: max_supply_per_tick.max(0.0),
            cost,
            supplied_this_tick: 0.0,
            blackout: false,
            broken: false,
        }
    }

    pub fn set_blackout(&mut self, blackout: bool) {
        self.blackout = blackout;
    }

    pub fn in_blackout(&self) -> bool {
        self.blackout
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn supplied_this_tick(&self) -> f64 {
        self.supplied_this_tick
    }
}

impl Default for ExternalSource {
    fn default() -> Self {
        Self::new(PROHIBITIVE_COST, PROHIBITIVE_COST)
    }
}

impl CapabilityProvider for ExternalSource {
    fn available_to_discharge(&self) -> f64 {
        if self.blackout || self.broken {
            return 0.0;
        }
        (self.max_supply_per_tick - self.supplied_this_tick).max(0.0)
    }

    fn available_to_charge(&self) -> f64 {
        0.0
    }

    fn charge_efficiency(&self) -> f64 {
        1.0
    }

    fn discharge_efficiency(&self) -> f64 {
        1.0
    }

    fn unit_cost(&self, _kind: CfpKind) -> f64 {
        if self.blackout {
            PROHIBITIVE_COST
        } else {
            self.cost
        }
    }
}

impl NegotiationResponder for ExternalSource {
    fn offer(&mut self, kind: CfpKind, requested: f64) -> Option<Offer> {
        match kind {
            CfpKind::Surplus => None,
            CfpKind::Shortfall if self.broken => None,
            CfpKind::Shortfall => Some(capability_offer(self, kind, requested)),
        }
    }

    fn accept(&mut self, kind: CfpKind, amount: f64) -> f64 {
        if kind != CfpKind::Shortfall || self.broken {
            return 0.0;
        }
        let supplied = amount.clamp(0.0, self.available_to_discharge());
        self.supplied_this_tick += supplied;
        supplied
    }

    fn set_broken(&mut self, broken: bool) {
        self.broken = broken;
    }
}

impl Tickable for ExternalSource {
    fn on_tick(&mut self, _tick: i64) {
        self.supplied_this_tick = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offers_up_to_cap() {
        let mut grid = ExternalSource::new(50.0, 0.25);
        let offer = grid.offer(CfpKind::Shortfall, 80.0).unwrap();
        assert_eq!(offer.amount, 50.0);
        assert_eq!(offer.cost, 0.25);
    }

    #[test]
    fn never_bids_on_surplus() {
        let mut grid = ExternalSource::new(50.0, 0.25);
        assert!(grid.offer(CfpKind::Surplus, 10.0).is_none());
        assert_eq!(grid.accept(CfpKind::Surplus, 10.0), 0.0);
    }

    #[test]
    fn broken_source_supplies_nothing() {
        let mut grid = ExternalSource::new(50.0, 0.25);
        grid.set_broken(true);
        assert_eq!(grid.accept(CfpKind::Shortfall, 10.0), 0.0);
        grid.set_broken(false);
        assert_eq!(grid.accept(CfpKind::Shortfall, 10.0), 10.0);
    }

    #[test]
    fn blackout_offers_nothing_at_prohibitive_cost() {
        let mut grid = ExternalSource::new(50.0, 0.25);
        grid.set_blackout(true);
        let offer = grid.offer(CfpKind::Shortfall, 10.0).unwrap();
        assert_eq!(offer.encode(), "supply=0;cost=9999");
    }

    #[test]
    fn cap_is_per_tick() {
        let mut grid = ExternalSource::new(30.0, 0.25);
        assert_eq!(grid.accept(CfpKind::Shortfall, 20.0), 20.0);
        assert_eq!(grid.accept(CfpKind::Shortfall, 20.0), 10.0);
        assert_eq!(grid.available_to_discharge(), 0.0);
        grid.on_tick(1);
        assert_eq!(grid.available_to_discharge(), 30.0);
    }

    #[test]
    fn defaults_are_prohibitive() {
        let grid = ExternalSource::default();
        assert_eq!(grid.max_supply_per_tick, 9999.0);
        assert_eq!(grid.cost, 9999.0);
    }
}
