#![cfg(feature = "api")]

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use microgrid_twin::api::{AppState, router};
use microgrid_twin::runner::Simulation;
use tower::ServiceExt;

async fn call(
    state: &Arc<AppState>,
    method: Method,
    uri: &str,
    body: Option<&str>,
) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router(state.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
}

#[tokio::test(start_paused = true)]
async fn api_reflects_a_running_simulation() {
    let batteries = vec![common::battery("bess", 100.0, 0.5, 0.05)];
    let cfg = common::constant_config(30.0, 10.0, batteries, 10);
    let mut sim = Simulation::start(&cfg).unwrap();
    let state = Arc::new(AppState::from_simulation(&sim));
    for _ in 0..3 {
        sim.next_summary().await.unwrap();
    }

    let (status, json) = call(&state, Method::GET, "/telemetry", None).await;
    assert_eq!(status, StatusCode::OK);
    let ticks: Vec<i64> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["tick"].as_i64().unwrap())
        .collect();
    assert_eq!(ticks, vec![1, 2, 3]);

    let (status, json) = call(&state, Method::GET, "/telemetry?from=2&to=3", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().map(Vec::len), Some(2));

    let (status, json) = call(&state, Method::GET, "/state", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = json["agents"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|a| a["name"].as_str())
        .collect();
    assert!(names.contains(&"bess"), "{names:?}");
    assert!(names.contains(&"office"), "{names:?}");
    assert_eq!(json["latest_tick"]["tick"], 3);
    assert!(json["negotiations"].as_u64().unwrap() >= 1);

    let body = Some(r#"{"name":"bess","ticks":2}"#);
    let (status, json) = call(&state, Method::POST, "/events/break", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["events"]["broken"][0][0], "bess");

    let (status, json) = call(&state, Method::POST, "/control/pause", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["paused"], true);
    assert!(sim.tick_control().is_paused());

    let (status, json) = call(&state, Method::GET, "/config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["simulation"]["ticks"], 10);
}
