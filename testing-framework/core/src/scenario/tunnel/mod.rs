mod local;
mod ssh;

use std::future::Future;

use async_trait::async_trait;
pub use local::LocalForwarder;
pub use ssh::SshForwarder;
use thiserror::Error;
use tokio::{sync::oneshot, task::JoinHandle, time::timeout};
use tracing::{info, warn};

use crate::{constants::TUNNEL_SHUTDOWN_GRACE, deployment::SshAccess};

/// Reverse forward from `remote_port` on `host` to `local_port` on this
/// machine.
#[derive(Clone, Debug)]
pub struct ForwardRequest {
    pub host: String,
    pub ssh: SshAccess,
    pub remote_port: u16,
    pub local_port: u16,
}

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("failed to establish tunnel {host}:{remote_port} -> 127.0.0.1:{local_port}: {source}")]
    Setup {
        host: String,
        remote_port: u16,
        local_port: u16,
        #[source]
        source: anyhow::Error,
    },
    #[error("tunnel {remote_port} -> {local_port} dropped after establishment: {source}")]
    Dropped {
        remote_port: u16,
        local_port: u16,
        #[source]
        source: anyhow::Error,
    },
    #[error("tunnel task failed: {source}")]
    Task {
        #[source]
        source: anyhow::Error,
    },
}

impl TunnelError {
    pub(crate) fn setup(request: &ForwardRequest, source: anyhow::Error) -> Self {
        Self::Setup {
            host: request.host.clone(),
            remote_port: request.remote_port,
            local_port: request.local_port,
            source,
        }
    }
}

/// Establishes tunnels. Establishment failures are returned from `open`;
/// later drops surface through the session and are not retried.
#[async_trait]
pub trait PortForwarder: Send + Sync {
    async fn open(&self, request: &ForwardRequest) -> Result<TunnelSession, TunnelError>;
}

/// A live tunnel running as a background task until cancelled.
#[derive(Debug)]
pub struct TunnelSession {
    remote_port: u16,
    local_port: u16,
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<(), TunnelError>>>,
}

impl TunnelSession {
    /// Run `forward` in the background. The future receives the cancellation
    /// signal and must release every connection it owns once it fires.
    pub fn spawn<F, Fut>(remote_port: u16, local_port: u16, forward: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = Result<(), TunnelError>> + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(forward(cancel_rx));
        Self {
            remote_port,
            local_port,
            cancel: Some(cancel_tx),
            task: Some(task),
        }
    }

    #[must_use]
    pub const fn remote_port(&self) -> u16 {
        self.remote_port
    }

    #[must_use]
    pub const fn local_port(&self) -> u16 {
        self.local_port
    }

    /// True once the background task has ended, whether cancelled or dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancel the tunnel and wait up to the shutdown grace period for it to
    /// close. Returns the forwarder's outcome; a second call is a no-op.
    pub async fn close(&mut self) -> Result<(), TunnelError> {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        let Some(mut task) = self.task.take() else {
            return Ok(());
        };

        match timeout(TUNNEL_SHUTDOWN_GRACE, &mut task).await {
            Ok(Ok(outcome)) => {
                info!(
                    remote_port = self.remote_port,
                    local_port = self.local_port,
                    "tunnel closed"
                );
                outcome
            }
            Ok(Err(join_err)) if join_err.is_cancelled() => Ok(()),
            Ok(Err(join_err)) => Err(TunnelError::Task {
                source: anyhow::anyhow!("tunnel task panicked: {join_err}"),
            }),
            Err(_) => {
                warn!(
                    remote_port = self.remote_port,
                    grace = ?TUNNEL_SHUTDOWN_GRACE,
                    "tunnel did not close within grace period; aborting"
                );
                task.abort();
                Ok(())
            }
        }
    }
}

impl Drop for TunnelSession {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
