use std::{path::PathBuf, sync::LazyLock, time::Duration};

use testing_framework_env as tf_env;

const DEFAULT_BOSH_BINARY: &str = "bosh";
const DEFAULT_INSTANCE_GROUP: &str = "haproxy";
const DEFAULT_SSH_USER: &str = "tunnel";
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(1800);

static BOSH_COMMAND_TIMEOUT: LazyLock<Duration> = LazyLock::new(|| {
    env_duration_secs(tf_env::bosh_command_timeout_secs(), DEFAULT_COMMAND_TIMEOUT)
});

fn env_duration_secs(value: Option<u64>, default: Duration) -> Duration {
    value.map_or(default, Duration::from_secs)
}

/// How the deployer reaches the director and shapes the HAProxy deployment.
#[derive(Clone, Debug)]
pub struct BoshConfig {
    pub binary: String,
    /// `-e` target; when unset the CLI falls back to `BOSH_ENVIRONMENT`.
    pub environment: Option<String>,
    pub base_manifest: Option<PathBuf>,
    pub instance_group: String,
    pub ssh_user: String,
    pub command_timeout: Duration,
    /// Leave the deployment in place after the run.
    pub preserve: bool,
}

impl Default for BoshConfig {
    fn default() -> Self {
        Self {
            binary: DEFAULT_BOSH_BINARY.to_owned(),
            environment: None,
            base_manifest: None,
            instance_group: DEFAULT_INSTANCE_GROUP.to_owned(),
            ssh_user: DEFAULT_SSH_USER.to_owned(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            preserve: false,
        }
    }
}

impl BoshConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            binary: tf_env::bosh_binary().unwrap_or(defaults.binary),
            environment: tf_env::bosh_environment(),
            base_manifest: tf_env::haproxy_base_manifest(),
            instance_group: tf_env::haproxy_instance_group().unwrap_or(defaults.instance_group),
            ssh_user: tf_env::haproxy_ssh_user().unwrap_or(defaults.ssh_user),
            command_timeout: *BOSH_COMMAND_TIMEOUT,
            preserve: tf_env::bosh_runner_preserve(),
        }
    }

    #[must_use]
    pub fn with_base_manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_manifest = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    #[must_use]
    pub const fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_preserve(mut self, preserve: bool) -> Self {
        self.preserve = preserve;
        self
    }
}
