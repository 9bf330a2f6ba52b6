use tracing::info;

use crate::infrastructure::cli::{BoshCli, BoshError};

/// Delete the deployment unless preservation is requested.
pub async fn delete_or_preserve(
    cli: &BoshCli,
    deployment: &str,
    preserve: bool,
) -> Result<(), BoshError> {
    if preserve {
        info!(
            deployment,
            "preserving bosh deployment (BOSH_RUNNER_PRESERVE set)"
        );
        return Ok(());
    }

    cli.delete_deployment(deployment).await
}
