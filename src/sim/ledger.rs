use std::collections::{BTreeMap, HashMap};

use tracing::debug;

/// Which side of the balance a report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Production,
    Consumption,
}

#[derive(Debug, Clone, Default)]
struct TickReports {
    production: HashMap<String, f64>,
    consumption: HashMap<String, f64>,
}

impl TickReports {
    fn count(&self) -> usize {
        self.production.len() + self.consumption.len()
    }
}

/// Totals of one tick's reports.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Balance {
    pub production_kw: f64,
    pub consumption_kw: f64,
    /// Number of distinct reports behind the totals.
    pub reports: usize,
}

impl Balance {
    /// Production minus consumption (kW).
    pub fn net_kw(&self) -> f64 {
        self.production_kw - self.consumption_kw
    }
}

/// Accumulates production and consumption reports per tick.
///
/// Each reporter counts once per tick; a repeated report from the same
/// sender replaces the earlier one.
#[derive(Debug, Clone)]
pub struct ReportLedger {
    expected: usize,
    pending: BTreeMap<i64, TickReports>,
}

impl ReportLedger {
    /// Creates a ledger expecting `expected` reports per tick.
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            pending: BTreeMap::new(),
        }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Records a report for `tick`. Negative readings count as zero.
    pub fn record(&mut self, tick: i64, kind: ReportKind, sender: &str, kw: f64) {
        let reports = self.pending.entry(tick).or_default();
        let side = match kind {
            ReportKind::Production => &mut reports.production,
            ReportKind::Consumption => &mut reports.consumption,
        };
        side.insert(sender.to_string(), kw.max(0.0));
    }

    /// Whether every expected reporter has reported for `tick`.
    pub fn is_complete(&self, tick: i64) -> bool {
        self.expected == 0
            || self
                .pending
                .get(&tick)
                .is_some_and(|r| r.count() >= self.expected)
    }

    /// Removes and totals the reports for `tick`.
    ///
    /// Reports for earlier ticks can no longer be used and are dropped.
    pub fn take(&mut self, tick: i64) -> Balance {
        let stale: Vec<i64> = self.pending.range(..tick).map(|(t, _)| *t).collect();
        for t in stale {
            self.pending.remove(&t);
            debug!(tick = t, "late reports discarded");
        }
        let Some(reports) = self.pending.remove(&tick) else {
            return Balance::default();
        };
        Balance {
            production_kw: reports.production.values().sum(),
            consumption_kw: reports.consumption.values().sum(),
            reports: reports.count(),
        }
    }

    /// Number of ticks with outstanding reports.
    pub fn pending_ticks(&self) -> usize {
        self.pending.len()
    }
}
