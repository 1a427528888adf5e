//! Per-tick outcome records emitted by the aggregator.

use std::fmt;

use serde::Serialize;

/// How a tick was balanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// The queued plan slice was within ε and dispatched directly.
    Planned,
    /// No plan was active; one CNP round ran on the live net.
    Reactive,
    /// The plan deviated by more than ε; the queue was dropped and one CNP
    /// round ran instead.
    EpsilonBreak,
    /// Production matched consumption and no plan was active.
    Idle,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Reactive => "reactive",
            Self::EpsilonBreak => "epsilon_break",
            Self::Idle => "idle",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete record of one aggregator tick.
///
/// Power values are kW sustained over the tick, so with one-hour ticks they
/// double as kWh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickSummary {
    pub tick: i64,
    /// Total reported production (kW).
    pub production_kw: f64,
    /// Total reported consumption (kW).
    pub consumption_kw: f64,
    /// Production minus consumption (kW).
    pub net_kw: f64,
    pub mode: Mode,
    /// Planned net for this offset, when a plan slice was consumed.
    pub planned_net_kw: Option<f64>,
    /// Storage discharge accepted this tick (kW).
    pub discharge_kw: f64,
    /// Storage charge accepted this tick (kW).
    pub charge_kw: f64,
    /// Energy bought from the external source (kW).
    pub import_kw: f64,
    /// Energy sent upstream under a plan (kW).
    pub export_kw: f64,
    /// Shortfall nobody covered (kW).
    pub unmet_kw: f64,
    /// Surplus nobody absorbed (kW).
    pub wasted_kw: f64,
    /// CNP rounds run this tick (0 or 1).
    pub negotiations: u32,
    /// Aggregate state of charge after dispatch (kWh).
    pub soc_kwh: f64,
    /// Plan slices left in the queue after this tick.
    pub queue_len: usize,
    /// Whether a replan ran at the end of this tick.
    pub replanned: bool,
}

impl TickSummary {
    /// Summary for a tick with the given readings and nothing dispatched.
    pub fn new(tick: i64, production_kw: f64, consumption_kw: f64) -> Self {
        Self {
            tick,
            production_kw,
            consumption_kw,
            net_kw: production_kw - consumption_kw,
            mode: Mode::Idle,
            planned_net_kw: None,
            discharge_kw: 0.0,
            charge_kw: 0.0,
            import_kw: 0.0,
            export_kw: 0.0,
            unmet_kw: 0.0,
            wasted_kw: 0.0,
            negotiations: 0,
            soc_kwh: 0.0,
            queue_len: 0,
            replanned: false,
        }
    }
}

impl fmt::Display for TickSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t={:>4} {:<13} | prod={:>7.2} cons={:>7.2} net={:>7.2} | \
             dis={:.2} chg={:.2} imp={:.2} exp={:.2} | unmet={:.2} wasted={:.2} | \
             SoC={:.1} kWh queue={}",
            self.tick,
            self.mode,
            self.production_kw,
            self.consumption_kw,
            self.net_kw,
            self.discharge_kw,
            self.charge_kw,
            self.import_kw,
            self.export_kw,
            self.unmet_kw,
            self.wasted_kw,
            self.soc_kwh,
            self.queue_len,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_summary_is_idle_with_net() {
        let s = TickSummary::new(3, 80.0, 100.0);
        assert_eq!(s.net_kw, -20.0);
        assert_eq!(s.mode, Mode::Idle);
        assert_eq!(s.planned_net_kw, None);
    }

    #[test]
    fn display_does_not_panic() {
        let mut s = TickSummary::new(0, 1.0, 2.0);
        s.mode = Mode::EpsilonBreak;
        let line = format!("{s}");
        assert!(line.contains("epsilon_break"));
    }
}
