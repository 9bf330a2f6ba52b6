mod config;
mod deployer;
mod infrastructure;
mod lifecycle;

pub use config::BoshConfig;
pub use deployer::{BoshDeployer, BoshRunnerError};
pub use infrastructure::{
    cli::BoshError,
    instances::{InstancesError, parse_instances},
    manifest::{ManifestError, backend_ops},
};
