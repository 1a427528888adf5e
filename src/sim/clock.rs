//! Periodic tick source driving the simulation.
//!
//! The source is the only component that advances simulation time. It can be
//! paused, resumed and re-timed at runtime through a [`TickControl`] handle;
//! every change takes effect on the next wake-up.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};

use crate::bus::TopicBus;
use crate::bus::message::{Envelope, Ontology, TICK_TOPIC};

/// Actor id used as the sender of tick messages.
pub const TICK_SOURCE_ID: &str = "tick-source";

/// One simulation step as broadcast on the tick topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickEvent {
    pub tick: i64,
}

impl TickEvent {
    pub fn to_envelope(self) -> Envelope {
        Envelope::new(TICK_SOURCE_ID, Ontology::Tick, self.tick.to_string())
            .with_conversation(self.tick)
    }
}

#[derive(Debug)]
struct ControlState {
    paused: AtomicBool,
    period_ms: AtomicU64,
}

/// Shared handle for pausing, resuming and re-timing the tick source.
#[derive(Debug, Clone)]
pub struct TickControl {
    state: Arc<ControlState>,
}

impl TickControl {
    /// Creates a running control with the given period.
    pub fn new(period: Duration) -> Self {
        Self {
            state: Arc::new(ControlState {
                paused: AtomicBool::new(false),
                period_ms: AtomicU64::new(clamp_period_ms(period)),
            }),
        }
    }

    pub fn pause(&self) {
        self.state.paused.store(true, Ordering::SeqCst);
        info!("tick source paused");
    }

    pub fn resume(&self) {
        self.state.paused.store(false, Ordering::SeqCst);
        info!("tick source resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::SeqCst)
    }

    /// Sets a new tick period. Periods below one millisecond are raised to one.
    pub fn set_interval(&self, period: Duration) {
        let ms = clamp_period_ms(period);
        self.state.period_ms.store(ms, Ordering::SeqCst);
        info!(period_ms = ms, "tick interval changed");
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.state.period_ms.load(Ordering::SeqCst))
    }
}

fn clamp_period_ms(period: Duration) -> u64 {
    u64::try_from(period.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// What the tick source decided on one wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wake {
    /// New period to reschedule with, if it changed since the last wake-up.
    pub reschedule: Option<Duration>,
    /// Tick emitted on this wake-up; `None` while paused or after the limit.
    pub event: Option<TickEvent>,
}

/// Periodic generator of [`TickEvent`]s.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use microgrid_twin::sim::clock::{TickControl, TickSource};
///
/// let control = TickControl::new(Duration::from_millis(100));
/// let mut source = TickSource::new(control.clone(), 0, 1).with_limit(2);
///
/// assert_eq!(source.wake().event.map(|e| e.tick), Some(1));
/// control.pause();
/// assert_eq!(source.wake().event, None);
/// control.resume();
/// assert_eq!(source.wake().event.map(|e| e.tick), Some(2));
/// assert!(source.is_finished());
/// ```
pub struct TickSource {
    control: TickControl,
    period: Duration,
    sim_time: i64,
    increment: i64,
    emitted: u64,
    limit: Option<u64>,
}

impl TickSource {
    /// Creates a source starting at `start`, advancing by `increment` per tick.
    ///
    /// # Panics
    ///
    /// Panics if `increment` is not positive.
    pub fn new(control: TickControl, start: i64, increment: i64) -> Self {
        assert!(increment > 0, "tick increment must be > 0");
        let period = control.interval();
        Self {
            control,
            period,
            sim_time: start,
            increment,
            emitted: 0,
            limit: None,
        }
    }

    /// Stops the source after `ticks` events have been emitted.
    pub fn with_limit(mut self, ticks: u64) -> Self {
        self.limit = Some(ticks);
        self
    }

    /// Current simulation time (the last emitted tick, or the start value).
    pub fn sim_time(&self) -> i64 {
        self.sim_time
    }

    /// Returns `true` once the tick limit has been reached.
    pub fn is_finished(&self) -> bool {
        self.limit.is_some_and(|limit| self.emitted >= limit)
    }

    /// Handles one wake-up without publishing.
    pub fn wake(&mut self) -> Wake {
        let configured = self.control.interval();
        let reschedule = if configured != self.period {
            self.period = configured;
            Some(configured)
        } else {
            None
        };

        if self.control.is_paused() || self.is_finished() {
            return Wake {
                reschedule,
                event: None,
            };
        }

        self.sim_time += self.increment;
        self.emitted += 1;
        Wake {
            reschedule,
            event: Some(TickEvent {
                tick: self.sim_time,
            }),
        }
    }

    /// Runs until the tick limit is reached, publishing on [`TICK_TOPIC`].
    ///
    /// Without a limit this never returns; abort the task to stop it.
    pub async fn run(mut self, bus: TopicBus) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.is_finished() {
            ticker.tick().await;
            let wake = self.wake();
            if let Some(period) = wake.reschedule {
                debug!(period_ms = period.as_millis() as u64, "rescheduling tick source");
                ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            }
            if let Some(event) = wake.event {
                let reached = bus.publish(TICK_TOPIC, event.to_envelope());
                debug!(tick = event.tick, subscribers = reached, "tick published");
            }
        }
        info!(tick = self.sim_time, "tick source finished");
    }
}
