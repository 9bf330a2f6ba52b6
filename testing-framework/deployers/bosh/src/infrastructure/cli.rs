use std::{
    io,
    path::Path,
    process::{Output, Stdio},
    time::Duration,
};

use thiserror::Error;
use tokio::{process::Command, time::timeout};
use tracing::{debug, info};

/// Errors returned from `bosh` CLI invocations.
#[derive(Debug, Error)]
pub enum BoshError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{command} exited with status {status:?}\nstderr:\n{stderr}\nstdout:\n{stdout}")]
    Failed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("{command} did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

/// Thin wrapper over the `bosh` binary; every call is scoped to one
/// deployment and bounded by `timeout`.
#[derive(Clone, Debug)]
pub struct BoshCli {
    binary: String,
    environment: Option<String>,
    timeout: Duration,
}

impl BoshCli {
    pub fn new(binary: impl Into<String>, environment: Option<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            environment,
            timeout,
        }
    }

    fn base_args(&self, deployment: &str, non_interactive: bool) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(environment) = &self.environment {
            args.push("-e".to_owned());
            args.push(environment.clone());
        }
        if non_interactive {
            args.push("-n".to_owned());
        }
        args.push("-d".to_owned());
        args.push(deployment.to_owned());
        args
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} {}", self.binary, args.join(" "))
    }

    pub(crate) fn deploy_args(
        &self,
        deployment: &str,
        manifest: &Path,
        ops_files: &[impl AsRef<Path>],
        vars_file: &Path,
        vars_store: &Path,
    ) -> Vec<String> {
        let mut args = self.base_args(deployment, true);
        args.push("deploy".to_owned());
        args.push(manifest.display().to_string());
        for ops in ops_files {
            args.push("-o".to_owned());
            args.push(ops.as_ref().display().to_string());
        }
        args.push("-l".to_owned());
        args.push(vars_file.display().to_string());
        args.push("--vars-store".to_owned());
        args.push(vars_store.display().to_string());
        args
    }

    pub async fn deploy(
        &self,
        deployment: &str,
        manifest: &Path,
        ops_files: &[impl AsRef<Path>],
        vars_file: &Path,
        vars_store: &Path,
    ) -> Result<(), BoshError> {
        let args = self.deploy_args(deployment, manifest, ops_files, vars_file, vars_store);
        info!(
            deployment,
            manifest = %manifest.display(),
            ops_files = ops_files.len(),
            "issuing bosh deploy"
        );
        self.run(&args).await?;
        info!(deployment, "bosh deploy completed");
        Ok(())
    }

    /// Raw `instances --json` output.
    pub async fn instances(&self, deployment: &str) -> Result<String, BoshError> {
        let mut args = self.base_args(deployment, false);
        args.extend(["instances".to_owned(), "--json".to_owned()]);
        let output = self.run(&args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run `script` on every instance of `instance_group` and return the
    /// collected stdout column.
    pub async fn ssh(
        &self,
        deployment: &str,
        instance_group: &str,
        script: &str,
    ) -> Result<String, BoshError> {
        let mut args = self.base_args(deployment, false);
        args.extend([
            "ssh".to_owned(),
            instance_group.to_owned(),
            "-c".to_owned(),
            script.to_owned(),
            "--results".to_owned(),
            "--column=stdout".to_owned(),
        ]);
        let output = self.run(&args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub async fn delete_deployment(&self, deployment: &str) -> Result<(), BoshError> {
        let mut args = self.base_args(deployment, true);
        args.extend(["delete-deployment".to_owned(), "--force".to_owned()]);
        info!(deployment, "issuing bosh delete-deployment");
        self.run(&args).await?;
        info!(deployment, "bosh delete-deployment completed");
        Ok(())
    }

    async fn run(&self, args: &[String]) -> Result<Output, BoshError> {
        let command = self.describe(args);
        debug!(%command, timeout_secs = self.timeout.as_secs(), "running bosh command");
        run_bosh_command(self.command(args), &command, self.timeout).await
    }
}

async fn run_bosh_command(
    mut cmd: Command,
    command: &str,
    limit: Duration,
) -> Result<Output, BoshError> {
    // kill_on_drop reaps the child when the timeout drops the future.
    let output = match timeout(limit, cmd.output()).await {
        Ok(result) => result.map_err(|source| BoshError::Spawn {
            command: command.to_owned(),
            source,
        })?,
        Err(_) => {
            return Err(BoshError::Timeout {
                command: command.to_owned(),
                timeout: limit,
            });
        }
    };

    if output.status.success() {
        Ok(output)
    } else {
        Err(BoshError::Failed {
            command: command.to_owned(),
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
