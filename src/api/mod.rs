//! REST API for live state and the control surface.
//!
//! Read endpoints:
//! - `GET /state`: agents, forecast, events, KPIs and the latest tick
//! - `GET /telemetry`: tick summaries with optional range filtering
//! - `GET /history`: the observation window the forecaster trains on
//! - `GET /config`: the scenario the run was started from
//! - `GET /weather`: current weather parameters and version
//!
//! Control endpoints:
//! - `POST /control/pause`, `POST /control/resume`, `POST /control/interval`
//! - `POST /events/break`, `POST /events/spike`, `POST /events/blackout`
//! - `PUT /weather`: hot-reload weather parameters

mod handlers;
mod types;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tracing::info;

use crate::config::ScenarioConfig;
use crate::devices::weather::WeatherHandle;
use crate::runner::{Simulation, TelemetryLog};
use crate::sim::clock::TickControl;
use crate::sim::events::EventControl;
use crate::sim::registry::StateRegistry;

pub use types::{
    BlackoutRequest, BreakRequest, ControlResponse, ErrorResponse, EventResponse, IntervalRequest,
    SpikeRequest, StateResponse, TelemetryQuery, WeatherResponse,
};

/// Handles shared across all request handlers.
///
/// Every field is a cheap clone of a handle owned by a running
/// [`Simulation`]; handlers never block on the simulation itself.
#[derive(Clone)]
pub struct AppState {
    pub config: ScenarioConfig,
    pub registry: StateRegistry,
    pub events: EventControl,
    pub control: TickControl,
    pub weather: WeatherHandle,
    pub telemetry: TelemetryLog,
}

impl AppState {
    /// Captures the handles of a running simulation.
    pub fn from_simulation(sim: &Simulation) -> Self {
        Self {
            config: sim.config().clone(),
            registry: sim.registry().clone(),
            events: sim.events().clone(),
            control: sim.tick_control().clone(),
            weather: sim.weather().clone(),
            telemetry: sim.telemetry().clone(),
        }
    }
}

/// Builds the axum router with all API routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/state", get(handlers::get_state))
        .route("/telemetry", get(handlers::get_telemetry))
        .route("/history", get(handlers::get_history))
        .route("/config", get(handlers::get_config))
        .route("/control/pause", post(handlers::pause))
        .route("/control/resume", post(handlers::resume))
        .route("/control/interval", post(handlers::set_interval))
        .route("/events/break", post(handlers::break_component))
        .route("/events/spike", post(handlers::load_spike))
        .route("/events/blackout", post(handlers::blackout))
        .route("/weather", get(handlers::get_weather).put(handlers::put_weather))
        .with_state(state)
}

/// Binds to the given address and serves the API until the task is dropped.
///
/// # Errors
///
/// Returns an `io::Error` if the listener cannot bind or the server fails.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");
    axum::serve(listener, app).await
}
