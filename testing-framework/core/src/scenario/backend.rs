use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use axum::Router;
use thiserror::Error;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};

const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum BackendServerError {
    #[error("failed to bind transient backend listener: {source}")]
    Bind {
        #[source]
        source: io::Error,
    },
    #[error("failed to resolve transient backend address: {source}")]
    LocalAddr {
        #[source]
        source: io::Error,
    },
}

/// Short-lived HTTP responder on an ephemeral loopback port.
///
/// Releasing is idempotent and also happens on drop, so holding the server in
/// a scope is enough to guarantee the socket is closed on every exit path.
#[derive(Debug)]
pub struct BackendServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl BackendServer {
    /// Serve `router` on `127.0.0.1:0`.
    pub async fn start(router: Router) -> Result<Self, BackendServerError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|source| BackendServerError::Bind { source })?;
        // On error the listener is dropped here, closing the socket.
        let addr = listener
            .local_addr()
            .map_err(|source| BackendServerError::LocalAddr { source })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(error) = server.await {
                warn!(%addr, error = ?error, "transient backend terminated with error");
            }
        });

        info!(port = addr.port(), "transient backend listening");
        Ok(Self {
            addr,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Serve the same plain-text body on every path.
    pub async fn fixed_response(body: impl Into<String>) -> Result<Self, BackendServerError> {
        let body = body.into();
        let router = Router::new().fallback(move || {
            let body = body.clone();
            async move { body }
        });
        Self::start(router).await
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.task.is_none()
    }

    /// Stop accepting connections and drop the listener. Safe to call more
    /// than once.
    pub fn release(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
            info!(port = self.addr.port(), "transient backend released");
        }
    }

    /// Let in-flight requests finish before releasing, bounded by a grace
    /// period.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.as_mut() {
            if timeout(GRACEFUL_SHUTDOWN_TIMEOUT, task).await.is_err() {
                debug!(
                    port = self.addr.port(),
                    "graceful shutdown timed out; aborting"
                );
            }
        }
        self.release();
    }
}

impl Drop for BackendServer {
    fn drop(&mut self) {
        self.release();
    }
}
