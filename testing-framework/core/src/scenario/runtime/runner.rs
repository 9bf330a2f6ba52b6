use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt as _;
use reqwest::Client as ReqwestClient;
use tracing::{debug, error, info, warn};

use super::{RunContext, ScenarioError, ScenarioReport};
use crate::{
    deployment::{DeploymentProvider, DeploymentRequest},
    scenario::{http_probe::probe_client, tunnel::PortForwarder},
};

/// A test case driven by the [`ScenarioRunner`]. The runner deploys first and
/// tears down afterwards; `run` only performs the steps in between.
#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &str;

    fn deployment(&self) -> DeploymentRequest;

    async fn run(&self, ctx: &mut RunContext) -> Result<(), ScenarioError>;
}

/// Sequences deploy, scenario steps and teardown for one scenario execution.
#[derive(Clone)]
pub struct ScenarioRunner {
    provider: Arc<dyn DeploymentProvider>,
    forwarder: Arc<dyn PortForwarder>,
    client: ReqwestClient,
}

impl ScenarioRunner {
    #[must_use]
    pub fn new(provider: Arc<dyn DeploymentProvider>, forwarder: Arc<dyn PortForwarder>) -> Self {
        Self {
            provider,
            forwarder,
            client: probe_client(),
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: ReqwestClient) -> Self {
        self.client = client;
        self
    }

    /// Executes the scenario. Teardown runs on every exit path, including
    /// panics inside scenario steps, and the first fatal error is returned.
    pub async fn run(&self, scenario: &dyn Scenario) -> Result<ScenarioReport, ScenarioError> {
        let request = scenario.deployment();
        info!(
            scenario = scenario.name(),
            deployment = %request.name,
            "starting scenario"
        );

        let mut context = RunContext::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.forwarder),
            self.client.clone(),
        );

        let outcome = AssertUnwindSafe(Self::execute(scenario, &request, &mut context))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ScenarioError::Panicked(panic_message(panic))));

        let teardown = context.teardown().await;
        let (steps, elapsed) = context.take_steps();

        match (outcome, teardown) {
            (Ok(()), Ok(())) => {
                info!(
                    scenario = scenario.name(),
                    elapsed_secs = elapsed.as_secs_f32(),
                    "scenario passed"
                );
                Ok(ScenarioReport {
                    scenario: scenario.name().to_owned(),
                    deployment: request.name,
                    steps,
                    elapsed,
                })
            }
            (Err(err), teardown) => {
                if let Err(teardown_err) = teardown {
                    warn!(error = %teardown_err, "teardown also failed");
                }
                error!(scenario = scenario.name(), error = %err, "scenario failed");
                Err(err)
            }
            (Ok(()), Err(teardown_err)) => {
                error!(scenario = scenario.name(), error = %teardown_err, "scenario teardown failed");
                Err(teardown_err.into())
            }
        }
    }

    async fn execute(
        scenario: &dyn Scenario,
        request: &DeploymentRequest,
        context: &mut RunContext,
    ) -> Result<(), ScenarioError> {
        // Registered before deploying so a half-created deployment is still
        // deleted.
        context.register_deployment(&request.name);
        context.step(format!("deploying {}", request.name));
        let handle = context
            .provider()
            .deploy(request)
            .await
            .map_err(|err| ScenarioError::setup("deploy", err))?;
        info!(
            deployment = %handle.name,
            public_ip = %handle.public_ip,
            backend_port = handle.backend_port,
            "deployment ready"
        );

        match context.provider().dump_config(&handle).await {
            Ok(config) => debug!(deployment = %handle.name, %config, "rendered config"),
            Err(err) => debug!(deployment = %handle.name, error = %err, "config dump unavailable"),
        }

        context.attach_deployment(handle);
        scenario.run(context).await
    }
}

/// Attempts to turn a panic payload into a readable string for diagnostics.
fn panic_message(panic: Box<dyn Any + Send>) -> String {
    panic.downcast::<String>().map_or_else(
        |panic| {
            panic.downcast::<&'static str>().map_or_else(
                |_| "unknown panic".to_owned(),
                |message| (*message).to_owned(),
            )
        },
        |message| *message,
    )
}
