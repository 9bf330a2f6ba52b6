use std::{path::PathBuf, sync::Arc};

use anyhow::{Context as _, Result};
use testing_framework_core::{
    constants,
    scenario::{HealthCheckScenario, ScenarioReport, ScenarioRunner, SshForwarder},
};
use testing_framework_env as tf_env;
use testing_framework_runner_bosh::{BoshConfig, BoshDeployer};
use tracing::info;

use crate::defaults::DEFAULT_DEPLOYMENT;

/// Inputs for one health-check run against a real director.
#[derive(Clone, Debug)]
pub struct LiveHealthCheck {
    pub deployment: String,
    pub base_manifest: Option<PathBuf>,
    pub backend_port: u16,
    pub stable_observations: u32,
    pub preserve: bool,
}

impl LiveHealthCheck {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            deployment: tf_env::bosh_deployment().unwrap_or_else(|| DEFAULT_DEPLOYMENT.to_owned()),
            base_manifest: tf_env::haproxy_base_manifest(),
            backend_port: constants::backend_port(),
            stable_observations: 1,
            preserve: tf_env::bosh_runner_preserve(),
        }
    }
}

/// Deploy HAProxy with the HTTP health check enabled, drive the scenario and
/// tear everything down again.
pub async fn run_live_health_check(run: &LiveHealthCheck) -> Result<ScenarioReport> {
    let mut config = BoshConfig::from_env().with_preserve(run.preserve);
    if let Some(manifest) = &run.base_manifest {
        config = config.with_base_manifest(manifest);
    }
    let instance_group = config.instance_group.clone();

    info!(
        deployment = %run.deployment,
        backend_port = run.backend_port,
        instance_group = %instance_group,
        preserve = run.preserve,
        "running haproxy health check"
    );

    let runner = ScenarioRunner::new(
        Arc::new(BoshDeployer::new(config)),
        Arc::new(SshForwarder::new()),
    );
    let scenario = HealthCheckScenario::new(&run.deployment)
        .with_instance_group(instance_group)
        .with_backend_port(run.backend_port)
        .with_stable_observations(run.stable_observations);

    runner
        .run(&scenario)
        .await
        .with_context(|| format!("health check against deployment {} failed", run.deployment))
}
