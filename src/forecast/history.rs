//! Fixed-capacity ring buffer of per-tick observations.

use serde::Serialize;

/// One tick of observed history.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sample {
    /// Total consumption (kW).
    pub load_kw: f64,
    /// Total production (kW).
    pub production_kw: f64,
    /// Global irradiance (W/m²).
    pub irradiance: f64,
    /// Ambient temperature (°C).
    pub temperature: f64,
    /// Aggregate battery state of charge (kWh).
    pub soc_kwh: f64,
}

/// Column view of a [`HistoryBuffer`], oldest first.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct HistorySnapshot {
    pub load: Vec<f64>,
    pub production: Vec<f64>,
    pub irradiance: Vec<f64>,
    pub temperature: Vec<f64>,
    pub soc: Vec<f64>,
}

/// Ring buffer holding the most recent `capacity` samples.
///
/// Pushing into a full buffer overwrites the oldest sample. All getters
/// return chronological (oldest to newest) snapshots.
///
/// # Examples
///
/// ```
/// use microgrid_twin::forecast::history::{HistoryBuffer, Sample};
///
/// let mut buf = HistoryBuffer::new(2);
/// for load in [1.0, 2.0, 3.0] {
///     buf.push(Sample { load_kw: load, ..Sample::default() });
/// }
/// assert!(buf.is_full());
/// assert_eq!(buf.load(), vec![2.0, 3.0]);
/// ```
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    slots: Vec<Sample>,
    head: usize,
    count: usize,
}

impl HistoryBuffer {
    /// Creates an empty buffer.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "history capacity must be > 0");
        Self {
            slots: vec![Sample::default(); capacity],
            head: 0,
            count: 0,
        }
    }

    /// Writes `sample` into the slot at the head and advances it.
    pub fn push(&mut self, sample: Sample) {
        self.slots[self.head] = sample;
        self.head = (self.head + 1) % self.slots.len();
        self.count = (self.count + 1).min(self.slots.len());
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of samples currently held, at most the capacity.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// `true` once `capacity` samples have been pushed.
    pub fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    /// Chronological iterator over held samples.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> + '_ {
        let len = self.slots.len();
        let start = (self.head + len - self.count) % len;
        (0..self.count).map(move |i| &self.slots[(start + i) % len])
    }

    /// Most recent sample, if any.
    pub fn latest(&self) -> Option<&Sample> {
        self.iter().last()
    }

    pub fn load(&self) -> Vec<f64> {
        self.iter().map(|s| s.load_kw).collect()
    }

    pub fn production(&self) -> Vec<f64> {
        self.iter().map(|s| s.production_kw).collect()
    }

    pub fn irradiance(&self) -> Vec<f64> {
        self.iter().map(|s| s.irradiance).collect()
    }

    pub fn temperature(&self) -> Vec<f64> {
        self.iter().map(|s| s.temperature).collect()
    }

    pub fn soc(&self) -> Vec<f64> {
        self.iter().map(|s| s.soc_kwh).collect()
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            load: self.load(),
            production: self.production(),
            irradiance: self.irradiance(),
            temperature: self.temperature(),
            soc: self.soc(),
        }
    }
}
