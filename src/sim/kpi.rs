//! Post-hoc KPI computation from tick summaries.

use std::fmt;

use serde::Serialize;

use super::registry::ForecastRmse;
use super::types::{Mode, TickSummary};

/// Aggregate key performance indicators derived from a complete run.
///
/// Computed post-hoc from `Vec<TickSummary>` so the reported metrics always
/// agree with the per-tick record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiReport {
    pub ticks: usize,
    /// Consumption actually served (kWh).
    pub energy_served_kwh: f64,
    /// Shortfall left uncovered (kWh).
    pub unmet_kwh: f64,
    /// Surplus nobody absorbed (kWh).
    pub wasted_kwh: f64,
    /// Energy bought from the external source (kWh).
    pub import_kwh: f64,
    /// Ticks with a non-zero unmet shortfall.
    pub blackout_ticks: usize,
    pub epsilon_breaks: usize,
    /// CNP rounds across the run.
    pub negotiation_rounds: u64,
    /// Share of ticks balanced by a confirmed plan slice (0.0 to 1.0).
    pub planned_share: f64,
    /// Median-forecast RMSE for load, when any forecast was scored (kW).
    pub load_rmse_kw: Option<f64>,
    /// Median-forecast RMSE for production, when any forecast was scored (kW).
    pub production_rmse_kw: Option<f64>,
}

impl KpiReport {
    /// Computes all KPIs from the complete summary vector.
    ///
    /// # Arguments
    ///
    /// * `summaries` - One entry per simulated tick
    /// * `rmse` - Forecast error accumulated by the state registry
    pub fn from_summaries(summaries: &[TickSummary], rmse: ForecastRmse) -> Self {
        let mut served = 0.0;
        let mut unmet = 0.0;
        let mut wasted = 0.0;
        let mut import = 0.0;
        let mut blackout_ticks = 0;
        let mut breaks = 0;
        let mut rounds = 0_u64;
        let mut planned = 0_usize;

        for s in summaries {
            served += (s.consumption_kw - s.unmet_kw).max(0.0);
            unmet += s.unmet_kw;
            wasted += s.wasted_kw;
            import += s.import_kw;
            if s.unmet_kw > 0.0 {
                blackout_ticks += 1;
            }
            match s.mode {
                Mode::EpsilonBreak => breaks += 1,
                Mode::Planned => planned += 1,
                Mode::Reactive | Mode::Idle => {}
            }
            rounds += u64::from(s.negotiations);
        }

        let planned_share = if summaries.is_empty() {
            0.0
        } else {
            planned as f64 / summaries.len() as f64
        };

        Self {
            ticks: summaries.len(),
            energy_served_kwh: served,
            unmet_kwh: unmet,
            wasted_kwh: wasted,
            import_kwh: import,
            blackout_ticks,
            epsilon_breaks: breaks,
            negotiation_rounds: rounds,
            planned_share,
            load_rmse_kw: rmse.load,
            production_rmse_kw: rmse.production,
        }
    }
}

fn fmt_rmse(v: Option<f64>) -> String {
    v.map_or_else(|| "n/a".to_string(), |v| format!("{v:.3} kW"))
}

impl fmt::Display for KpiReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- KPI Report ---")?;
        writeln!(f, "Ticks simulated:       {}", self.ticks)?;
        writeln!(f, "Energy served:         {:.2} kWh", self.energy_served_kwh)?;
        writeln!(
            f,
            "Unmet shortfall:       {:.2} kWh over {} ticks",
            self.unmet_kwh, self.blackout_ticks
        )?;
        writeln!(f, "Wasted surplus:        {:.2} kWh", self.wasted_kwh)?;
        writeln!(f, "Imported:              {:.2} kWh", self.import_kwh)?;
        writeln!(f, "Epsilon breaks:        {}", self.epsilon_breaks)?;
        writeln!(f, "CNP rounds:            {}", self.negotiation_rounds)?;
        writeln!(f, "Planned share:         {:.1}%", self.planned_share * 100.0)?;
        writeln!(f, "Load forecast RMSE:    {}", fmt_rmse(self.load_rmse_kw))?;
        write!(f, "PV forecast RMSE:      {}", fmt_rmse(self.production_rmse_kw))
    }
}
