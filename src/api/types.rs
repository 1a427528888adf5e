//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::devices::weather::WeatherParams;
use crate::sim::events::EventSnapshot;
use crate::sim::kpi::KpiReport;
use crate::sim::registry::{AgentState, FanChart, ForecastRmse, ForecastSample};
use crate::sim::types::TickSummary;

/// One agent in the state response.
#[derive(Debug, Serialize)]
pub struct AgentEntry {
    pub name: String,
    #[serde(flatten)]
    pub state: AgentState,
}

/// Live snapshot of the whole microgrid.
#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub paused: bool,
    pub interval_ms: u64,
    /// Agents sorted by name.
    pub agents: Vec<AgentEntry>,
    /// Stored energy across all batteries (kWh).
    pub aggregate_soc_kwh: f64,
    /// Forecast sample exposed for the current tick, if any.
    pub forecast: Option<ForecastSample>,
    pub fan_chart: Option<FanChart>,
    pub rmse: ForecastRmse,
    /// CNP rounds so far.
    pub negotiations: u64,
    pub events: EventSnapshot,
    pub weather_version: u64,
    pub latest_tick: Option<TickSummary>,
    pub kpi: KpiReport,
}

/// Optional range query parameters for the telemetry endpoint.
#[derive(Debug, Deserialize)]
pub struct TelemetryQuery {
    /// First tick (inclusive).
    pub from: Option<i64>,
    /// Last tick (inclusive).
    pub to: Option<i64>,
}

/// Tick source state after a control call.
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub paused: bool,
    pub interval_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct IntervalRequest {
    pub interval_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct BreakRequest {
    pub name: String,
    pub ticks: u32,
}

#[derive(Debug, Deserialize)]
pub struct SpikeRequest {
    pub name: String,
    pub multiplier: f64,
    pub ticks: u32,
}

#[derive(Debug, Deserialize)]
pub struct BlackoutRequest {
    pub ticks: u32,
}

/// Pending events after an injection.
#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub events: EventSnapshot,
}

#[derive(Debug, Serialize)]
pub struct WeatherResponse {
    pub version: u64,
    pub params: WeatherParams,
}

/// Error response body for 4xx errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
}
