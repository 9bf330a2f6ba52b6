use std::time::Duration;

use testing_framework_env as tf_env;

/// Port HAProxy serves its `/health` monitor endpoint on.
pub const HEALTH_CHECK_PORT: u16 = 8080;

/// Path of the HAProxy monitor endpoint.
pub const HEALTH_CHECK_PATH: &str = "/health";

/// Backend port HAProxy is configured to forward to when none is given.
pub const DEFAULT_BACKEND_PORT: u16 = 12000;

/// Body served by the transient backend and expected through the proxy.
pub const BACKEND_GREETING: &str = "Hello cloud foundry";

/// Default bound for each health-state convergence wait.
pub const DEFAULT_CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default gap between health-state observations.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Bound on establishing a tunnel before it counts as a setup failure.
pub const DEFAULT_TUNNEL_ESTABLISH_TIMEOUT: Duration = Duration::from_secs(30);

/// Time a cancelled tunnel is given to close before it is killed.
pub const TUNNEL_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Resolve the backend port from `HAPROXY_BACKEND_PORT`, falling back to the
/// default.
pub fn backend_port() -> u16 {
    tf_env::haproxy_backend_port().unwrap_or(DEFAULT_BACKEND_PORT)
}

/// Resolve the convergence timeout from `HAPROXY_CONVERGENCE_TIMEOUT_SECS`.
pub fn convergence_timeout() -> Duration {
    tf_env::haproxy_convergence_timeout_secs()
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_CONVERGENCE_TIMEOUT)
}

/// Resolve the poll interval from `HAPROXY_POLL_INTERVAL_SECS`.
pub fn poll_interval() -> Duration {
    tf_env::haproxy_poll_interval_secs()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_POLL_INTERVAL)
}
