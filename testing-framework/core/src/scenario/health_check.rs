use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{RunContext, Scenario, ScenarioError, convergence::ConvergenceExpectation};
use crate::{
    constants::{self, BACKEND_GREETING, HEALTH_CHECK_PATH, HEALTH_CHECK_PORT},
    deployment::{DeploymentRequest, ProcessState},
};

const DEFAULT_INSTANCE_GROUP: &str = "haproxy";
const PROXY_PORT: u16 = 80;

/// Ops file enabling HAProxy's HTTP health check on `instance_group`.
#[must_use]
pub fn enable_health_check_ops(instance_group: &str) -> String {
    format!(
        "---\n\
         # Enable health check\n\
         - type: replace\n  \
         path: /instance_groups/name={instance_group}/jobs/name=haproxy/properties/ha_proxy/enable_health_check_http?\n  \
         value: true\n"
    )
}

/// HAProxy with the HTTP health check enabled must report `failing` while no
/// backend is reachable, then `running` once a backend is tunnelled in, and
/// must proxy traffic to it.
///
/// The supervisor initially reports the process as `running` before the
/// failing health check is noticed, so the scenario waits for `failing`
/// explicitly instead of trusting the first observation.
#[derive(Clone, Debug)]
pub struct HealthCheckScenario {
    deployment: String,
    instance_group: String,
    backend_port: u16,
    health_port: u16,
    proxy_port: u16,
    greeting: String,
    convergence_timeout: Duration,
    poll_interval: Duration,
    stable_observations: u32,
}

impl HealthCheckScenario {
    #[must_use]
    pub fn new(deployment: impl Into<String>) -> Self {
        Self {
            deployment: deployment.into(),
            instance_group: DEFAULT_INSTANCE_GROUP.to_owned(),
            backend_port: constants::backend_port(),
            health_port: HEALTH_CHECK_PORT,
            proxy_port: PROXY_PORT,
            greeting: BACKEND_GREETING.to_owned(),
            convergence_timeout: constants::convergence_timeout(),
            poll_interval: constants::poll_interval(),
            stable_observations: 1,
        }
    }

    #[must_use]
    pub fn with_instance_group(mut self, instance_group: impl Into<String>) -> Self {
        self.instance_group = instance_group.into();
        self
    }

    #[must_use]
    pub const fn with_backend_port(mut self, port: u16) -> Self {
        self.backend_port = port;
        self
    }

    /// Port of the HAProxy monitor endpoint.
    #[must_use]
    pub const fn with_health_port(mut self, port: u16) -> Self {
        self.health_port = port;
        self
    }

    /// Port HAProxy accepts proxied traffic on.
    #[must_use]
    pub const fn with_proxy_port(mut self, port: u16) -> Self {
        self.proxy_port = port;
        self
    }

    #[must_use]
    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = greeting.into();
        self
    }

    #[must_use]
    pub const fn with_convergence_timeout(mut self, timeout: Duration) -> Self {
        self.convergence_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Require the health state to be seen this many times in a row.
    #[must_use]
    pub const fn with_stable_observations(mut self, count: u32) -> Self {
        self.stable_observations = count;
        self
    }

    #[must_use]
    pub const fn backend_port(&self) -> u16 {
        self.backend_port
    }

    fn expect_state(&self, state: ProcessState) -> ConvergenceExpectation<ProcessState> {
        ConvergenceExpectation::equals(state)
            .with_timeout(crate::adjust_timeout(self.convergence_timeout))
            .with_poll_interval(self.poll_interval)
            .with_consecutive_matches(self.stable_observations)
    }
}

#[async_trait]
impl Scenario for HealthCheckScenario {
    fn name(&self) -> &str {
        "http health check"
    }

    fn deployment(&self) -> DeploymentRequest {
        DeploymentRequest::new(&self.deployment, self.backend_port)
            .with_ops_file(enable_health_check_ops(&self.instance_group))
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<(), ScenarioError> {
        ctx.step("waiting for the supervisor to report HAProxy failing (no healthy backend)");
        ctx.wait_for_process_state(&self.expect_state(ProcessState::Failing))
            .await?;

        ctx.step("starting a local http server to act as a backend");
        let greeting = format!("{}\n", self.greeting);
        let local_port = ctx.start_fixed_backend(&greeting).await?;

        ctx.step(format!(
            "creating a reverse tunnel from HAProxy backend (port {}) to local http server (port {local_port})",
            self.backend_port
        ));
        ctx.open_tunnel(self.backend_port, local_port).await?;

        ctx.step("waiting for the supervisor to report HAProxy running (healthy backend)");
        ctx.wait_for_process_state(&self.expect_state(ProcessState::Running))
            .await?;

        ctx.step("the health endpoint should report a 200 status code");
        ctx.expect_status(self.health_port, HEALTH_CHECK_PATH, StatusCode::OK)
            .await?;

        ctx.step("sending a request to HAProxy works");
        ctx.expect_body_contains(self.proxy_port, "/", StatusCode::OK, &self.greeting)
            .await?;

        Ok(())
    }
}
