use std::{path::PathBuf, process};

use clap::Parser;
use haproxy_acceptance::{LiveHealthCheck, defaults::init_tracing, run_live_health_check};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(about = "HAProxy HTTP health-check acceptance run against a BOSH director")]
struct Args {
    /// Deployment to create and delete.
    #[arg(long, env = "BOSH_DEPLOYMENT")]
    deployment: Option<String>,
    /// Base HAProxy manifest the ops files are applied to.
    #[arg(long, env = "HAPROXY_BASE_MANIFEST")]
    manifest: Option<PathBuf>,
    /// Port HAProxy forwards to on its own loopback.
    #[arg(long, env = "HAPROXY_BACKEND_PORT")]
    backend_port: Option<u16>,
    /// Consecutive matching observations required per wait step.
    #[arg(long, default_value_t = 1)]
    stable_observations: u32,
    /// Keep the deployment after the run. Setting `BOSH_RUNNER_PRESERVE` to
    /// any value does the same.
    #[arg(long)]
    preserve: bool,
}

impl Args {
    fn into_run(self) -> LiveHealthCheck {
        let mut run = LiveHealthCheck::from_env();
        if let Some(deployment) = self.deployment {
            run.deployment = deployment;
        }
        if let Some(manifest) = self.manifest {
            run.base_manifest = Some(manifest);
        }
        if let Some(port) = self.backend_port {
            run.backend_port = port;
        }
        run.stable_observations = self.stable_observations;
        run.preserve |= self.preserve;
        run
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let run = Args::parse().into_run();

    match run_live_health_check(&run).await {
        Ok(report) => {
            for step in &report.steps {
                info!(at_ms = step.at.as_millis(), "{}", step.description);
            }
            info!(
                scenario = %report.scenario,
                deployment = %report.deployment,
                elapsed_secs = report.elapsed.as_secs_f32(),
                "health check passed"
            );
        }
        Err(err) => {
            warn!("health check failed: {err:#}");
            process::exit(1);
        }
    }
}
