use std::{env, path::PathBuf};

#[must_use]
pub fn slow_test_env() -> bool {
    env::var("SLOW_TEST_ENV").is_ok_and(|s| s == "true")
}

#[must_use]
pub fn bosh_binary() -> Option<String> {
    non_empty("BOSH_BINARY")
}

#[must_use]
pub fn bosh_deployment() -> Option<String> {
    non_empty("BOSH_DEPLOYMENT")
}

#[must_use]
pub fn bosh_environment() -> Option<String> {
    non_empty("BOSH_ENVIRONMENT")
}

#[must_use]
pub fn bosh_command_timeout_secs() -> Option<u64> {
    parsed("BOSH_COMMAND_TIMEOUT_SECS")
}

#[must_use]
pub fn bosh_runner_preserve() -> bool {
    env::var("BOSH_RUNNER_PRESERVE").is_ok()
}

#[must_use]
pub fn haproxy_base_manifest() -> Option<PathBuf> {
    non_empty("HAPROXY_BASE_MANIFEST").map(PathBuf::from)
}

#[must_use]
pub fn haproxy_instance_group() -> Option<String> {
    non_empty("HAPROXY_INSTANCE_GROUP")
}

#[must_use]
pub fn haproxy_ssh_user() -> Option<String> {
    non_empty("HAPROXY_SSH_USER")
}

#[must_use]
pub fn haproxy_backend_port() -> Option<u16> {
    parsed("HAPROXY_BACKEND_PORT")
}

#[must_use]
pub fn haproxy_convergence_timeout_secs() -> Option<u64> {
    parsed("HAPROXY_CONVERGENCE_TIMEOUT_SECS")
}

#[must_use]
pub fn haproxy_poll_interval_secs() -> Option<u64> {
    parsed("HAPROXY_POLL_INTERVAL_SECS")
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|raw| raw.trim().parse::<T>().ok())
}
