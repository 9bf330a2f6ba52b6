use tracing_subscriber::{EnvFilter, fmt};

/// Deployment name used when neither `--deployment` nor `BOSH_DEPLOYMENT` is
/// given.
pub const DEFAULT_DEPLOYMENT: &str = "haproxy";

/// Install the global subscriber; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
