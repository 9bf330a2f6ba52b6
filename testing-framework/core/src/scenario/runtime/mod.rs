mod context;
mod runner;

use std::time::Duration;

pub use context::RunContext;
pub use runner::{Scenario, ScenarioRunner};
use thiserror::Error;

use super::{DynError, convergence::ConvergenceError, http_probe::AssertionError};
use crate::deployment::ProcessState;

/// Why a scenario failed. The first fatal error wins; teardown failures only
/// surface when nothing failed before them.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("setup step '{step}' failed: {source}")]
    Setup {
        step: String,
        #[source]
        source: DynError,
    },
    #[error(transparent)]
    Convergence(#[from] ConvergenceError<ProcessState>),
    #[error(transparent)]
    Assertion(#[from] AssertionError),
    #[error("scenario panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Teardown(#[from] TeardownError),
}

impl ScenarioError {
    pub fn setup(step: impl Into<String>, source: impl Into<DynError>) -> Self {
        Self::Setup {
            step: step.into(),
            source: source.into(),
        }
    }
}

/// Best-effort teardown failures, collected across every release attempt.
#[derive(Debug, Error)]
#[error("teardown failed: {}", .failures.join("; "))]
pub struct TeardownError {
    pub failures: Vec<String>,
}

/// A step as logged by the scenario, with its offset from the run start.
#[derive(Clone, Debug)]
pub struct StepRecord {
    pub description: String,
    pub at: Duration,
}

/// Outcome of a successful scenario run.
#[derive(Clone, Debug)]
pub struct ScenarioReport {
    pub scenario: String,
    pub deployment: String,
    pub steps: Vec<StepRecord>,
    pub elapsed: Duration,
}
