//! Planned dispatch actions and the FIFO queue the aggregator consumes.

use std::collections::VecDeque;
use std::fmt;

/// One planned dispatch step for a single target.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    /// Ticks from the moment the plan was made (0 = next tick).
    pub tick_offset: usize,
    /// Resource the action is addressed to.
    pub target: String,
    /// Battery power; positive charges, negative discharges (kW).
    pub charge_kw: f64,
    /// External import; negative values are exports (kW).
    pub import_kw: f64,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "+{} {}: charge={:.3} kW import={:.3} kW",
            self.tick_offset, self.target, self.charge_kw, self.import_kw
        )
    }
}

/// All actions planned for one tick offset.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanSlice {
    pub tick_offset: usize,
    /// Production minus load expected by the plan at this offset (kW).
    pub planned_net_kw: f64,
    pub actions: Vec<Action>,
}

/// A solved plan: one slice per horizon step, in offset order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub slices: Vec<PlanSlice>,
}

impl Plan {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Total number of actions across all slices.
    pub fn action_count(&self) -> usize {
        self.slices.iter().map(|s| s.actions.len()).sum()
    }
}

/// FIFO of plan slices; one slice is consumed per tick.
///
/// Owned exclusively by the aggregator.
#[derive(Debug, Default)]
pub struct ActionQueue {
    slices: VecDeque<PlanSlice>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops whatever is queued and enqueues `plan`.
    pub fn replace(&mut self, plan: Plan) {
        self.slices.clear();
        self.slices.extend(plan.slices);
    }

    pub fn pop_slice(&mut self) -> Option<PlanSlice> {
        self.slices.pop_front()
    }

    pub fn clear(&mut self) {
        self.slices.clear();
    }

    /// Number of queued slices.
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}
