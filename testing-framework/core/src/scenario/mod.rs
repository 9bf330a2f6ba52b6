//! Convergence-based acceptance scenarios: a bounded poller, a transient
//! backend, tunnels into the deployment and a runner that always tears down.

pub mod backend;
pub mod convergence;
pub mod health_check;
pub mod http_probe;
mod runtime;
pub mod tunnel;

pub use backend::{BackendServer, BackendServerError};
pub use convergence::{
    Converged, ConvergenceError, ConvergenceExpectation, Observed, wait_until,
};
pub use health_check::HealthCheckScenario;
pub use http_probe::{AssertionError, ProbeResponse};
pub use runtime::{
    RunContext, Scenario, ScenarioError, ScenarioReport, ScenarioRunner, StepRecord,
    TeardownError,
};
pub use tunnel::{
    ForwardRequest, LocalForwarder, PortForwarder, SshForwarder, TunnelError, TunnelSession,
};

/// Error type used by collaborator traits.
pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;
