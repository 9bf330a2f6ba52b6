use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use testing_framework_core::{
    deployment::{
        DeploymentHandle, DeploymentProvider, DeploymentRequest, InstanceObservation, SshAccess,
    },
    scenario::DynError,
};
use tracing::{debug, info};

use crate::{
    config::BoshConfig,
    infrastructure::{
        cli::{BoshCli, BoshError},
        instances::{InstancesError, parse_instances},
        manifest::{DeployWorkspace, ManifestError},
    },
    lifecycle::cleanup::delete_or_preserve,
};

const HAPROXY_CONFIG_PATH: &str = "/var/vcap/jobs/haproxy/config/haproxy.config";

/// Failures of the BOSH-backed deployment provider.
#[derive(Debug, thiserror::Error)]
pub enum BoshRunnerError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Bosh(#[from] BoshError),
    #[error(transparent)]
    Instances(#[from] InstancesError),
    #[error("deployment {deployment} has no instance with an ip address")]
    NoInstanceAddress { deployment: String },
}

/// Deploys HAProxy through the `bosh` CLI.
pub struct BoshDeployer {
    config: BoshConfig,
    cli: BoshCli,
    // Kept until delete so the vars store outlives the deploy call.
    workspaces: Mutex<HashMap<String, DeployWorkspace>>,
}

impl BoshDeployer {
    #[must_use]
    pub fn new(config: BoshConfig) -> Self {
        let cli = BoshCli::new(
            config.binary.clone(),
            config.environment.clone(),
            config.command_timeout,
        );
        Self {
            config,
            cli,
            workspaces: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::new(BoshConfig::from_env())
    }

    #[must_use]
    pub const fn config(&self) -> &BoshConfig {
        &self.config
    }

    async fn deploy_inner(
        &self,
        request: &DeploymentRequest,
    ) -> Result<DeploymentHandle, BoshRunnerError> {
        let workspace = DeployWorkspace::prepare(
            self.config.base_manifest.as_deref(),
            request,
            &self.config.instance_group,
            &self.config.ssh_user,
        )?;

        info!(
            deployment = %request.name,
            backend_port = request.backend_port,
            workspace = %workspace.path().display(),
            "deploying haproxy"
        );
        self.cli
            .deploy(
                &request.name,
                &workspace.manifest,
                &workspace.ops_files,
                &workspace.vars_file,
                &workspace.vars_store,
            )
            .await?;

        let private_key = workspace.private_key()?;
        let instances = self.list(&request.name).await?;
        let public_ip = instances
            .iter()
            .find_map(|instance| instance.ips.first().cloned())
            .ok_or_else(|| BoshRunnerError::NoInstanceAddress {
                deployment: request.name.clone(),
            })?;

        self.workspaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request.name.clone(), workspace);

        Ok(DeploymentHandle {
            name: request.name.clone(),
            public_ip,
            ssh: SshAccess {
                user: self.config.ssh_user.clone(),
                private_key,
            },
            backend_port: request.backend_port,
        })
    }

    async fn list(&self, deployment: &str) -> Result<Vec<InstanceObservation>, BoshRunnerError> {
        let raw = self.cli.instances(deployment).await?;
        let instances = parse_instances(&raw)?;
        debug!(deployment, instances = instances.len(), "listed instances");
        Ok(instances)
    }
}

#[async_trait]
impl DeploymentProvider for BoshDeployer {
    async fn deploy(&self, request: &DeploymentRequest) -> Result<DeploymentHandle, DynError> {
        Ok(self.deploy_inner(request).await?)
    }

    async fn delete(&self, name: &str) -> Result<(), DynError> {
        let workspace = self
            .workspaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        let result = delete_or_preserve(&self.cli, name, self.config.preserve).await;
        drop(workspace);
        Ok(result?)
    }

    async fn list_instances(
        &self,
        handle: &DeploymentHandle,
    ) -> Result<Vec<InstanceObservation>, DynError> {
        Ok(self.list(&handle.name).await?)
    }

    async fn dump_config(&self, handle: &DeploymentHandle) -> Result<String, DynError> {
        let script = format!("sudo cat {HAPROXY_CONFIG_PATH}");
        Ok(self
            .cli
            .ssh(&handle.name, &self.config.instance_group, &script)
            .await?)
    }
}
