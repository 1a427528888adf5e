/// Per-resource actors reporting production and consumption.
pub mod actors;
/// Hybrid plan/react controller.
pub mod aggregator;
/// Tick source and pause/resume control.
pub mod clock;
/// Injected fault, spike and blackout countdowns.
pub mod events;
pub mod kpi;
pub mod ledger;
/// Shared per-agent snapshots and forecast accuracy.
pub mod registry;
pub mod types;
