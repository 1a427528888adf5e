//! Injected fault and disturbance control.
//!
//! Operators schedule events with a duration in ticks. Each affected
//! resource consumes one tick of its countdown when it handles a tick, so an
//! event lasting `n` ticks affects exactly the next `n` ticks of that
//! resource.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

/// Load multiplier active for a number of ticks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoadSpike {
    pub multiplier: f64,
    pub remaining: u32,
}

#[derive(Debug, Default)]
struct EventState {
    broken: HashMap<String, u32>,
    spikes: HashMap<String, LoadSpike>,
    blackout: u32,
}

/// Snapshot of pending events, for observers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventSnapshot {
    pub broken: Vec<(String, u32)>,
    pub spikes: Vec<(String, LoadSpike)>,
    pub blackout_ticks: u32,
}

/// Shared handle to scheduled events. Cloning shares state.
#[derive(Debug, Clone, Default)]
pub struct EventControl {
    state: Arc<Mutex<EventState>>,
}

impl EventControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes `name` out of service for the next `ticks` ticks.
    pub fn break_component(&self, name: &str, ticks: u32) {
        self.state.lock().broken.insert(name.to_string(), ticks);
        info!(component = name, ticks, "component broken");
    }

    /// Scales `name`'s demand by `multiplier` for the next `ticks` ticks.
    pub fn load_spike(&self, name: &str, multiplier: f64, ticks: u32) {
        self.state.lock().spikes.insert(
            name.to_string(),
            LoadSpike {
                multiplier,
                remaining: ticks,
            },
        );
        info!(load = name, multiplier, ticks, "load spike scheduled");
    }

    /// Cuts the external grid connection for the next `ticks` ticks.
    pub fn blackout(&self, ticks: u32) {
        self.state.lock().blackout = ticks;
        info!(ticks, "external blackout scheduled");
    }

    /// Returns whether `name` is broken this tick, consuming one tick.
    pub fn take_broken(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        let Some(remaining) = state.broken.get_mut(name) else {
            return false;
        };
        if *remaining == 0 {
            state.broken.remove(name);
            return false;
        }
        *remaining -= 1;
        if *remaining == 0 {
            state.broken.remove(name);
        }
        true
    }

    /// Returns `name`'s demand multiplier this tick, consuming one tick.
    pub fn take_load_multiplier(&self, name: &str) -> f64 {
        let mut state = self.state.lock();
        let Some(spike) = state.spikes.get_mut(name) else {
            return 1.0;
        };
        if spike.remaining == 0 {
            state.spikes.remove(name);
            return 1.0;
        }
        spike.remaining -= 1;
        let multiplier = spike.multiplier;
        if spike.remaining == 0 {
            state.spikes.remove(name);
        }
        multiplier
    }

    /// Returns whether the grid is blacked out this tick, consuming one tick.
    pub fn take_blackout(&self) -> bool {
        let mut state = self.state.lock();
        if state.blackout == 0 {
            return false;
        }
        state.blackout -= 1;
        true
    }

    pub fn snapshot(&self) -> EventSnapshot {
        let state = self.state.lock();
        let mut broken: Vec<_> = state.broken.iter().map(|(k, v)| (k.clone(), *v)).collect();
        broken.sort();
        let mut spikes: Vec<_> = state.spikes.iter().map(|(k, v)| (k.clone(), *v)).collect();
        spikes.sort_by(|a, b| a.0.cmp(&b.0));
        EventSnapshot {
            broken,
            spikes,
            blackout_ticks: state.blackout,
        }
    }
}
