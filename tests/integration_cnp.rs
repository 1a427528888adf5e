//! Contract-net rounds between a live negotiator and responder actors.

mod common;

use std::time::Duration;

use microgrid_twin::bus::{CfpKind, TopicBus};
use microgrid_twin::cnp::{Negotiator, Proposal, ResponderActor, clear};
use microgrid_twin::devices::{Battery, ExternalSource};
use microgrid_twin::sim::events::EventControl;
use microgrid_twin::sim::registry::StateRegistry;
use tokio::time::Instant;

fn proposal(sender: &str, amount: f64, cost: f64, arrival: usize) -> Proposal {
    Proposal {
        sender: sender.to_string(),
        amount,
        cost,
        arrival,
    }
}

fn spawn_battery(
    bus: &TopicBus,
    registry: &StateRegistry,
    events: &EventControl,
    name: &str,
    soc: f64,
    cost: f64,
) {
    let battery = Battery::new(100.0, soc, 1.0, 1.0, 0.5).with_cost(cost);
    let actor = ResponderActor::new(name, battery, bus.clone(), events.clone(), registry.clone());
    tokio::spawn(actor.run());
}

#[test]
fn clearing_prefers_cost_then_arrival() {
    // Request 8 with arrivals B, C, A.
    let result = clear(
        8.0,
        vec![
            proposal("B", 3.0, 1.0, 0),
            proposal("C", 3.0, 1.0, 1),
            proposal("A", 5.0, 2.0, 2),
        ],
    );
    let winners: Vec<(&str, f64)> = result
        .awards
        .iter()
        .map(|a| (a.sender.as_str(), a.amount))
        .collect();
    assert_eq!(winners, vec![("B", 3.0), ("C", 3.0), ("A", 2.0)]);
    assert!(result.rejected.is_empty());
    assert_eq!(result.unmet, 0.0);
}

#[test]
fn partial_fill_reports_unmet() {
    let result = clear(10.0, vec![proposal("b1", 4.0, 0.05, 0)]);
    assert_eq!(result.accepted(), 4.0);
    assert_eq!(result.unmet, 6.0);
}

#[tokio::test(start_paused = true)]
async fn shortfall_round_awards_cheapest_battery_first() {
    let bus = TopicBus::new();
    let registry = StateRegistry::new();
    let events = EventControl::new();
    spawn_battery(&bus, &registry, &events, "cheap", 50.0, 0.01);
    spawn_battery(&bus, &registry, &events, "dear", 50.0, 0.2);

    let mut inbox = bus.register("aggregator");
    let mut negotiator = Negotiator::new(bus.clone(), registry.clone(), Duration::from_millis(500));
    let outcome = negotiator.run(&mut inbox, CfpKind::Shortfall, 60.0).await;

    assert_eq!(outcome.proposals, 2);
    let winners: Vec<(&str, f64)> = outcome
        .awards
        .iter()
        .map(|a| (a.sender.as_str(), a.amount))
        .collect();
    // Each battery is power-limited to 50 kW.
    assert_eq!(winners, vec![("cheap", 50.0), ("dear", 10.0)]);
    assert_eq!(outcome.unmet, 0.0);
    assert_eq!(registry.negotiations(), 1);

    // Let the responders apply their awards.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let cheap = registry.agent("cheap").map(|s| s.soc_kwh);
    let dear = registry.agent("dear").map(|s| s.soc_kwh);
    assert_eq!(cheap, Some(0.0));
    assert_eq!(dear, Some(40.0));
}

#[tokio::test(start_paused = true)]
async fn external_source_covers_what_storage_cannot() {
    let bus = TopicBus::new();
    let registry = StateRegistry::new();
    let events = EventControl::new();
    spawn_battery(&bus, &registry, &events, "bess", 10.0, 0.05);
    let grid = ResponderActor::new(
        "grid",
        ExternalSource::new(30.0, 0.3),
        bus.clone(),
        events.clone(),
        registry.clone(),
    );
    tokio::spawn(grid.run());

    let mut inbox = bus.register("aggregator");
    let mut negotiator = Negotiator::new(bus.clone(), registry.clone(), Duration::from_millis(500));
    let outcome = negotiator.run(&mut inbox, CfpKind::Shortfall, 50.0).await;

    let winners: Vec<(&str, f64)> = outcome
        .awards
        .iter()
        .map(|a| (a.sender.as_str(), a.amount))
        .collect();
    assert_eq!(winners, vec![("bess", 10.0), ("grid", 30.0)]);
    assert_eq!(outcome.unmet, 10.0);
}

#[tokio::test(start_paused = true)]
async fn surplus_round_skips_the_grid() {
    let bus = TopicBus::new();
    let registry = StateRegistry::new();
    let events = EventControl::new();
    spawn_battery(&bus, &registry, &events, "bess", 90.0, 0.05);
    let grid = ResponderActor::new(
        "grid",
        ExternalSource::default(),
        bus.clone(),
        events.clone(),
        registry.clone(),
    );
    tokio::spawn(grid.run());

    let mut inbox = bus.register("aggregator");
    let mut negotiator = Negotiator::new(bus.clone(), registry.clone(), Duration::from_millis(500));
    let started = Instant::now();
    let outcome = negotiator.run(&mut inbox, CfpKind::Surplus, 25.0).await;

    // Only the battery is asked, so the round closes as soon as it answers.
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(outcome.proposals, 1);
    assert_eq!(outcome.accepted(), 10.0);
    assert_eq!(outcome.unmet, 15.0);
}

#[tokio::test(start_paused = true)]
async fn broken_battery_sits_out_the_round() {
    let bus = TopicBus::new();
    let registry = StateRegistry::new();
    let events = EventControl::new();
    let battery = Battery::new(100.0, 50.0, 1.0, 1.0, 0.5).with_cost(0.01);
    let mut actor =
        ResponderActor::new("bess", battery, bus.clone(), events.clone(), registry.clone());
    events.break_component("bess", 1);
    // The responder consumes the break on its next tick.
    actor.handle(microgrid_twin::sim::clock::TickEvent { tick: 1 }.to_envelope());
    tokio::spawn(actor.run());

    let mut inbox = bus.register("aggregator");
    let mut negotiator = Negotiator::new(bus.clone(), registry.clone(), Duration::from_millis(500));
    let started = Instant::now();
    let outcome = negotiator.run(&mut inbox, CfpKind::Shortfall, 20.0).await;

    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(outcome.proposals, 0);
    assert_eq!(outcome.unmet, 20.0);
    assert_eq!(registry.agent("bess").map(|s| s.broken), Some(true));
}
