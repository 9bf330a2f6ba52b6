use std::{io::Write as _, process::Stdio, time::Duration};

use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::{
    io::{AsyncBufReadExt as _, AsyncReadExt as _, BufReader},
    process::{Child, Command},
    time::timeout,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ForwardRequest, PortForwarder, TunnelError, TunnelSession};
use crate::{adjust_timeout, constants::DEFAULT_TUNNEL_ESTABLISH_TIMEOUT};

const STDERR_COLLECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Reverse tunnel through the system `ssh` client (`ssh -R`).
///
/// The remote side only prints the readiness marker once the forwarded port
/// accepts connections, so a successful `open` means traffic can flow.
#[derive(Clone, Debug)]
pub struct SshForwarder {
    binary: String,
    establish_timeout: Duration,
}

impl Default for SshForwarder {
    fn default() -> Self {
        Self::new()
    }
}

impl SshForwarder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: "ssh".to_owned(),
            establish_timeout: DEFAULT_TUNNEL_ESTABLISH_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    #[must_use]
    pub const fn with_establish_timeout(mut self, establish_timeout: Duration) -> Self {
        self.establish_timeout = establish_timeout;
        self
    }

    fn build_command(&self, request: &ForwardRequest, key_path: &str, marker: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-i")
            .arg(key_path)
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "StrictHostKeyChecking=no"])
            .args(["-o", "UserKnownHostsFile=/dev/null"])
            .args(["-o", "ExitOnForwardFailure=yes"])
            .args(["-o", "ServerAliveInterval=5"])
            .args(["-o", "ServerAliveCountMax=3"])
            .arg("-R")
            .arg(format!(
                "{}:127.0.0.1:{}",
                request.remote_port, request.local_port
            ))
            .arg(format!("{}@{}", request.ssh.user, request.host))
            .arg(remote_wait_script(request.remote_port, marker))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Remote command: block until the forwarded port accepts a connection,
/// announce readiness, then hold the session open on stdin.
fn remote_wait_script(remote_port: u16, marker: &str) -> String {
    format!(
        "bash -c 'until (exec 3<>/dev/tcp/127.0.0.1/{remote_port}) 2>/dev/null; do sleep 0.2; done; echo {marker}; exec cat'"
    )
}

fn write_private_key(private_key: &str) -> anyhow::Result<NamedTempFile> {
    // NamedTempFile is created with 0600 permissions, as ssh requires.
    let mut file = NamedTempFile::new().context("creating private key file")?;
    file.write_all(private_key.as_bytes())
        .context("writing private key")?;
    if !private_key.ends_with('\n') {
        file.write_all(b"\n").context("writing private key")?;
    }
    file.flush().context("flushing private key")?;
    Ok(file)
}

async fn collect_stderr(child: &mut Child) -> String {
    let Some(mut stderr) = child.stderr.take() else {
        return String::new();
    };
    let mut buf = String::new();
    let _ = timeout(STDERR_COLLECT_TIMEOUT, stderr.read_to_string(&mut buf)).await;
    buf.trim().to_owned()
}

async fn abort_child(child: &mut Child) -> String {
    let _ = child.start_kill();
    let stderr = collect_stderr(child).await;
    let _ = timeout(STDERR_COLLECT_TIMEOUT, child.wait()).await;
    stderr
}

#[async_trait]
impl PortForwarder for SshForwarder {
    async fn open(&self, request: &ForwardRequest) -> Result<TunnelSession, TunnelError> {
        let key_file = write_private_key(&request.ssh.private_key)
            .map_err(|source| TunnelError::setup(request, source))?;
        let key_path = key_file.path().display().to_string();
        let marker = format!("tunnel-ready-{}", Uuid::new_v4().simple());

        info!(
            host = %request.host,
            user = %request.ssh.user,
            remote_port = request.remote_port,
            local_port = request.local_port,
            "opening reverse ssh tunnel"
        );

        let mut child = self
            .build_command(request, &key_path, &marker)
            .spawn()
            .with_context(|| format!("spawning {}", self.binary))
            .map_err(|source| TunnelError::setup(request, source))?;

        let Some(stdout) = child.stdout.take() else {
            abort_child(&mut child).await;
            return Err(TunnelError::setup(request, anyhow!("ssh stdout not captured")));
        };
        let mut lines = BufReader::new(stdout).lines();

        let wait_for_marker = async {
            while let Some(line) = lines.next_line().await? {
                debug!(%line, "ssh tunnel output");
                if line.trim() == marker {
                    return Ok(true);
                }
            }
            Ok::<_, std::io::Error>(false)
        };

        let establish_timeout = adjust_timeout(self.establish_timeout);
        match timeout(establish_timeout, wait_for_marker).await {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                let stderr = abort_child(&mut child).await;
                return Err(TunnelError::setup(
                    request,
                    anyhow!("ssh exited before the tunnel was ready: {stderr}"),
                ));
            }
            Ok(Err(err)) => {
                let stderr = abort_child(&mut child).await;
                return Err(TunnelError::setup(
                    request,
                    anyhow!("reading ssh output failed: {err}; stderr: {stderr}"),
                ));
            }
            Err(_) => {
                let stderr = abort_child(&mut child).await;
                return Err(TunnelError::setup(
                    request,
                    anyhow!("tunnel not ready after {establish_timeout:?}; stderr: {stderr}"),
                ));
            }
        }

        info!(
            host = %request.host,
            remote_port = request.remote_port,
            "reverse ssh tunnel established"
        );

        let remote_port = request.remote_port;
        let local_port = request.local_port;
        Ok(TunnelSession::spawn(remote_port, local_port, move |cancel| {
            async move {
                // Keep the key file and output pipe alive for the session.
                let _key_file = key_file;
                let _lines = lines;
                let exited = tokio::select! {
                    _ = cancel => None,
                    status = child.wait() => Some(status),
                };
                let Some(status) = exited else {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Ok(());
                };
                let stderr = collect_stderr(&mut child).await;
                warn!(remote_port, ?status, %stderr, "reverse ssh tunnel dropped");
                Err(TunnelError::Dropped {
                    remote_port,
                    local_port,
                    source: anyhow!("ssh exited ({status:?}): {stderr}"),
                })
            }
        }))
    }
}
