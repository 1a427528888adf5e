//! Request handlers for the API endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use tracing::info;

use super::AppState;
use super::types::{
    AgentEntry, BlackoutRequest, BreakRequest, ControlResponse, ErrorResponse, EventResponse,
    IntervalRequest, SpikeRequest, StateResponse, TelemetryQuery, WeatherResponse,
};
use crate::config::ScenarioConfig;
use crate::devices::weather::WeatherParams;
use crate::forecast::HistorySnapshot;
use crate::sim::kpi::KpiReport;
use crate::sim::types::TickSummary;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn control_response(state: &AppState) -> ControlResponse {
    ControlResponse {
        paused: state.control.is_paused(),
        interval_ms: state.control.interval().as_millis() as u64,
    }
}

/// `GET /state` → 200 + `StateResponse` JSON
pub async fn get_state(State(state): State<Arc<AppState>>) -> Json<StateResponse> {
    let registry = &state.registry;
    let summaries = state.telemetry.snapshot();
    let rmse = registry.rmse();
    let agents = registry
        .agents()
        .into_iter()
        .map(|(name, state)| AgentEntry { name, state })
        .collect();

    Json(StateResponse {
        paused: state.control.is_paused(),
        interval_ms: state.control.interval().as_millis() as u64,
        agents,
        aggregate_soc_kwh: registry.aggregate_soc(),
        forecast: registry.forecast(),
        fan_chart: registry.fan_chart(),
        rmse,
        negotiations: registry.negotiations(),
        events: state.events.snapshot(),
        weather_version: state.weather.version(),
        latest_tick: summaries.last().cloned(),
        kpi: KpiReport::from_summaries(&summaries, rmse),
    })
}

/// Returns tick summaries, optionally filtered by tick range.
///
/// `GET /telemetry?from=N&to=M` → inclusive range; `from > to` → 400
pub async fn get_telemetry(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TelemetryQuery>,
) -> Result<Json<Vec<TickSummary>>, ApiError> {
    let from = query.from.unwrap_or(i64::MIN);
    let to = query.to.unwrap_or(i64::MAX);

    if from > to {
        return Err(error(
            StatusCode::BAD_REQUEST,
            format!("`from` ({from}) must be <= `to` ({to})"),
        ));
    }

    Ok(Json(state.telemetry.range(from, to)))
}

/// `GET /history` → 200 + the observation window, empty before the first tick
pub async fn get_history(State(state): State<Arc<AppState>>) -> Json<HistorySnapshot> {
    Json(state.registry.history().unwrap_or_default())
}

/// `GET /config` → 200 + scenario JSON
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ScenarioConfig> {
    Json(state.config.clone())
}

/// `POST /control/pause`
pub async fn pause(State(state): State<Arc<AppState>>) -> Json<ControlResponse> {
    state.control.pause();
    Json(control_response(&state))
}

/// `POST /control/resume`
pub async fn resume(State(state): State<Arc<AppState>>) -> Json<ControlResponse> {
    state.control.resume();
    Json(control_response(&state))
}

/// `POST /control/interval` with `{"interval_ms": N}`; zero → 400
pub async fn set_interval(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IntervalRequest>,
) -> Result<Json<ControlResponse>, ApiError> {
    if req.interval_ms == 0 {
        return Err(error(StatusCode::BAD_REQUEST, "interval_ms must be > 0"));
    }
    state.control.set_interval(Duration::from_millis(req.interval_ms));
    Ok(Json(control_response(&state)))
}

/// `POST /events/break`; unknown agent → 404
pub async fn break_component(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BreakRequest>,
) -> Result<Json<EventResponse>, ApiError> {
    if state.registry.agent(&req.name).is_none() {
        return Err(error(
            StatusCode::NOT_FOUND,
            format!("unknown agent \"{}\"", req.name),
        ));
    }
    info!(name = %req.name, ticks = req.ticks, "component break injected");
    state.events.break_component(&req.name, req.ticks);
    Ok(Json(EventResponse {
        events: state.events.snapshot(),
    }))
}

/// `POST /events/spike`; unknown agent → 404, negative multiplier → 400
pub async fn load_spike(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SpikeRequest>,
) -> Result<Json<EventResponse>, ApiError> {
    if !(req.multiplier >= 0.0) {
        return Err(error(StatusCode::BAD_REQUEST, "multiplier must be >= 0"));
    }
    if state.registry.agent(&req.name).is_none() {
        return Err(error(
            StatusCode::NOT_FOUND,
            format!("unknown agent \"{}\"", req.name),
        ));
    }
    info!(name = %req.name, multiplier = req.multiplier, ticks = req.ticks, "load spike injected");
    state.events.load_spike(&req.name, req.multiplier, req.ticks);
    Ok(Json(EventResponse {
        events: state.events.snapshot(),
    }))
}

/// `POST /events/blackout`
pub async fn blackout(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BlackoutRequest>,
) -> Json<EventResponse> {
    info!(ticks = req.ticks, "grid blackout injected");
    state.events.blackout(req.ticks);
    Json(EventResponse {
        events: state.events.snapshot(),
    })
}

/// `GET /weather`
pub async fn get_weather(State(state): State<Arc<AppState>>) -> Json<WeatherResponse> {
    let (version, params) = state.weather.snapshot();
    Json(WeatherResponse { version, params })
}

/// `PUT /weather` with a full parameter set; invalid parameters → 400
pub async fn put_weather(
    State(state): State<Arc<AppState>>,
    Json(params): Json<WeatherParams>,
) -> Result<Json<WeatherResponse>, ApiError> {
    let problems = params.problems();
    if !problems.is_empty() {
        let message = problems
            .iter()
            .map(|(field, msg)| format!("{field}: {msg}"))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(error(StatusCode::BAD_REQUEST, message));
    }
    let version = state.weather.update(params.clone());
    Ok(Json(WeatherResponse { version, params }))
}
