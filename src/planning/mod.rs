//! Scenario generation, deterministic planning and the action queue.

pub mod action;
pub mod planner;
pub mod scenario;

pub use action::{Action, ActionQueue, Plan, PlanSlice};
pub use planner::{DeterministicPlanner, StorageSpec};
pub use scenario::{MonteCarlo, QuantileTree, Scenario, ScenarioGenerator, ScenarioSelection};
