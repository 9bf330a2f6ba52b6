use std::{sync::Arc, time::Duration};

use axum::Router;
use reqwest::{Client as ReqwestClient, StatusCode};
use tokio::time::Instant;
use tracing::{info, warn};

use super::{ScenarioError, StepRecord, TeardownError};
use crate::{
    deployment::{DeploymentHandle, DeploymentProvider, ProcessState, first_instance_state},
    scenario::{
        backend::BackendServer,
        convergence::{Converged, ConvergenceExpectation, wait_until},
        http_probe::{self, ProbeResponse},
        tunnel::{ForwardRequest, PortForwarder, TunnelSession},
    },
};

/// Everything a scenario acquires while it runs. The runner owns it and
/// tears it down in reverse acquisition order once the scenario returns.
pub struct RunContext {
    provider: Arc<dyn DeploymentProvider>,
    forwarder: Arc<dyn PortForwarder>,
    client: ReqwestClient,
    deployment_name: Option<String>,
    handle: Option<DeploymentHandle>,
    backend: Option<BackendServer>,
    tunnel: Option<TunnelSession>,
    started: Instant,
    steps: Vec<StepRecord>,
}

impl RunContext {
    pub(crate) fn new(
        provider: Arc<dyn DeploymentProvider>,
        forwarder: Arc<dyn PortForwarder>,
        client: ReqwestClient,
    ) -> Self {
        Self {
            provider,
            forwarder,
            client,
            deployment_name: None,
            handle: None,
            backend: None,
            tunnel: None,
            started: Instant::now(),
            steps: Vec::new(),
        }
    }

    /// Record and log a scenario step.
    pub fn step(&mut self, description: impl Into<String>) {
        let description = description.into();
        let at = self.started.elapsed();
        info!(step = %description, at_ms = at.as_millis(), "scenario step");
        self.steps.push(StepRecord { description, at });
    }

    #[must_use]
    pub fn provider(&self) -> &dyn DeploymentProvider {
        self.provider.as_ref()
    }

    #[must_use]
    pub const fn client(&self) -> &ReqwestClient {
        &self.client
    }

    pub fn deployment(&self) -> Result<&DeploymentHandle, ScenarioError> {
        self.handle
            .as_ref()
            .ok_or_else(|| ScenarioError::setup("deployment", "no deployment is active"))
    }

    #[must_use]
    pub fn backend(&self) -> Option<&BackendServer> {
        self.backend.as_ref()
    }

    #[must_use]
    pub fn tunnel(&self) -> Option<&TunnelSession> {
        self.tunnel.as_ref()
    }

    pub(crate) fn register_deployment(&mut self, name: &str) {
        self.deployment_name = Some(name.to_owned());
    }

    pub(crate) fn attach_deployment(&mut self, handle: DeploymentHandle) {
        self.handle = Some(handle);
    }

    /// Start the scenario's transient backend; only one may be active.
    pub async fn start_backend(&mut self, router: Router) -> Result<u16, ScenarioError> {
        self.ensure_no_backend()?;
        let server = BackendServer::start(router)
            .await
            .map_err(|err| ScenarioError::setup("start backend", err))?;
        Ok(self.attach_backend(server))
    }

    /// Start a backend answering every request with `body`.
    pub async fn start_fixed_backend(&mut self, body: &str) -> Result<u16, ScenarioError> {
        self.ensure_no_backend()?;
        let server = BackendServer::fixed_response(body)
            .await
            .map_err(|err| ScenarioError::setup("start backend", err))?;
        Ok(self.attach_backend(server))
    }

    fn ensure_no_backend(&self) -> Result<(), ScenarioError> {
        if self.backend.is_some() {
            return Err(ScenarioError::setup(
                "start backend",
                "a transient backend is already running",
            ));
        }
        Ok(())
    }

    fn attach_backend(&mut self, server: BackendServer) -> u16 {
        let port = server.port();
        self.backend = Some(server);
        port
    }

    /// Forward `remote_port` on the deployment to `local_port` here; only one
    /// tunnel may be active.
    pub async fn open_tunnel(
        &mut self,
        remote_port: u16,
        local_port: u16,
    ) -> Result<&TunnelSession, ScenarioError> {
        if self.tunnel.is_some() {
            return Err(ScenarioError::setup("open tunnel", "a tunnel is already open"));
        }
        let handle = self.deployment()?;
        let request = ForwardRequest {
            host: handle.public_ip.clone(),
            ssh: handle.ssh.clone(),
            remote_port,
            local_port,
        };
        let session = self
            .forwarder
            .open(&request)
            .await
            .map_err(|err| ScenarioError::setup("open tunnel", err))?;
        Ok(self.tunnel.insert(session))
    }

    /// Poll the first instance's process state until `expectation` holds.
    pub async fn wait_for_process_state(
        &self,
        expectation: &ConvergenceExpectation<ProcessState>,
    ) -> Result<Converged<ProcessState>, ScenarioError> {
        let handle = self.deployment()?;
        let provider = self.provider.as_ref();
        let converged =
            wait_until(|| first_instance_state(provider, handle), expectation).await?;
        Ok(converged)
    }

    /// GET `path` on the deployment's public address and require `expected`.
    pub async fn expect_status(
        &self,
        port: u16,
        path: &str,
        expected: StatusCode,
    ) -> Result<ProbeResponse, ScenarioError> {
        let url = http_probe::probe_url(&self.deployment()?.public_ip, port, path)?;
        Ok(http_probe::expect_status(&self.client, &url, expected).await?)
    }

    /// GET `path` on the deployment and require `expected` plus a body
    /// containing `marker`.
    pub async fn expect_body_contains(
        &self,
        port: u16,
        path: &str,
        expected: StatusCode,
        marker: &str,
    ) -> Result<ProbeResponse, ScenarioError> {
        let url = http_probe::probe_url(&self.deployment()?.public_ip, port, path)?;
        Ok(http_probe::expect_body_contains(&self.client, &url, expected, marker).await?)
    }

    pub(crate) fn take_steps(&mut self) -> (Vec<StepRecord>, Duration) {
        (std::mem::take(&mut self.steps), self.started.elapsed())
    }

    /// Release tunnel, backend and deployment, in that order. Every release
    /// is attempted even if an earlier one fails; the deployment is deleted at
    /// most once.
    pub(crate) async fn teardown(&mut self) -> Result<(), TeardownError> {
        let mut failures = Vec::new();

        if let Some(mut tunnel) = self.tunnel.take() {
            info!(remote_port = tunnel.remote_port(), "closing tunnel");
            if let Err(err) = tunnel.close().await {
                warn!(error = %err, "tunnel close reported an error");
                failures.push(format!("tunnel: {err}"));
            }
        }

        if let Some(backend) = self.backend.take() {
            info!(port = backend.port(), "stopping transient backend");
            backend.shutdown().await;
        }

        self.handle = None;
        if let Some(name) = self.deployment_name.take() {
            info!(deployment = %name, "deleting deployment");
            if let Err(err) = self.provider.delete(&name).await {
                warn!(deployment = %name, error = %err, "deployment delete failed");
                failures.push(format!("delete deployment {name}: {err}"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TeardownError { failures })
        }
    }
}
