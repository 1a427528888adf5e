//! Error types shared across the crate.

use thiserror::Error;

use crate::config::ConfigError;

/// A message payload that could not be decoded.
///
/// Receivers log and drop the message; the sender is never notified.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MessageError {
    #[error("payload is empty")]
    Empty,
    #[error("invalid number \"{value}\" for key \"{key}\"")]
    InvalidNumber { key: String, value: String },
    #[error("missing key \"{0}\"")]
    MissingKey(&'static str),
    #[error("unexpected ontology {0}")]
    UnexpectedOntology(String),
}

/// Why a forecaster refit was skipped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForecastError {
    #[error("insufficient history: have {have} samples, need {need}")]
    InsufficientHistory { have: usize, need: usize },
    #[error(
        "series lengths differ: load={load}, production={production}, temperature={temperature}"
    )]
    MismatchedSeries {
        load: usize,
        production: usize,
        temperature: usize,
    },
    #[error("regression system is singular")]
    Singular,
}

/// Why the planner produced no plan.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("scenario horizon mismatch: load={load}, production={production}")]
    HorizonMismatch { load: usize, production: usize },
    #[error("solver failed: {0}")]
    Solver(#[from] good_lp::ResolutionError),
}

/// Failures while wiring or running a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {}", format_config_errors(.0))]
    Config(Vec<ConfigError>),
    #[error("simulation channel closed")]
    Closed,
}

fn format_config_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
