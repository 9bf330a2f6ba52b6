use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::scenario::DynError;

/// Credentials for reaching a deployed instance over SSH.
#[derive(Clone)]
pub struct SshAccess {
    pub user: String,
    pub private_key: String,
}

impl fmt::Debug for SshAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshAccess")
            .field("user", &self.user)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Reference to a running deployment, produced by a [`DeploymentProvider`].
#[derive(Clone, Debug)]
pub struct DeploymentHandle {
    pub name: String,
    pub public_ip: String,
    pub ssh: SshAccess,
    pub backend_port: u16,
}

/// What to deploy: the name is fixed up front so teardown can remove a
/// deployment whose creation failed half way.
#[derive(Clone, Debug)]
pub struct DeploymentRequest {
    pub name: String,
    pub backend_port: u16,
    pub ops_files: Vec<String>,
    pub vars: BTreeMap<String, serde_yaml::Value>,
}

impl DeploymentRequest {
    #[must_use]
    pub fn new(name: impl Into<String>, backend_port: u16) -> Self {
        Self {
            name: name.into(),
            backend_port,
            ops_files: Vec::new(),
            vars: BTreeMap::new(),
        }
    }

    /// Append an ops-file overlay, passed to the provider verbatim.
    #[must_use]
    pub fn with_ops_file(mut self, ops_file: impl Into<String>) -> Self {
        self.ops_files.push(ops_file.into());
        self
    }

    #[must_use]
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<serde_yaml::Value>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

/// Process state reported for an instance by the deployment's supervisor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProcessState {
    Running,
    Failing,
    Starting,
    Stopped,
    Other(String),
}

impl ProcessState {
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Running => "running",
            Self::Failing => "failing",
            Self::Starting => "starting",
            Self::Stopped => "stopped",
            Self::Other(label) => label,
        }
    }
}

impl From<String> for ProcessState {
    fn from(label: String) -> Self {
        match label.trim() {
            "running" => Self::Running,
            "failing" => Self::Failing,
            "starting" => Self::Starting,
            "stopped" => Self::Stopped,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl From<&str> for ProcessState {
    fn from(label: &str) -> Self {
        Self::from(label.to_owned())
    }
}

impl From<ProcessState> for String {
    fn from(state: ProcessState) -> Self {
        state.label().to_owned()
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One instance row as listed by the deployment provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceObservation {
    pub instance: String,
    pub process_state: ProcessState,
    pub ips: Vec<String>,
}

/// External system that creates, inspects and deletes deployments.
#[async_trait]
pub trait DeploymentProvider: Send + Sync {
    async fn deploy(&self, request: &DeploymentRequest) -> Result<DeploymentHandle, DynError>;

    /// Delete by name; must tolerate deployments that never fully came up.
    async fn delete(&self, name: &str) -> Result<(), DynError>;

    async fn list_instances(
        &self,
        handle: &DeploymentHandle,
    ) -> Result<Vec<InstanceObservation>, DynError>;

    async fn dump_config(&self, _handle: &DeploymentHandle) -> Result<String, DynError> {
        Err("dump_config not supported by this provider".into())
    }
}

/// Observe the process state of the first listed instance.
pub async fn first_instance_state(
    provider: &dyn DeploymentProvider,
    handle: &DeploymentHandle,
) -> Result<ProcessState, DynError> {
    let instances = provider.list_instances(handle).await?;
    instances
        .into_iter()
        .next()
        .map(|instance| instance.process_state)
        .ok_or_else(|| format!("deployment {} lists no instances", handle.name).into())
}
