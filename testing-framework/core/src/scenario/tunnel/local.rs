use std::net::{IpAddr, Ipv4Addr};

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::{
    io::copy_bidirectional,
    net::{TcpListener, TcpStream},
    task::JoinSet,
};
use tracing::{debug, info, warn};

use super::{ForwardRequest, PortForwarder, TunnelError, TunnelSession};

/// In-process TCP relay standing in for a reverse tunnel when the deployment
/// runs on this machine. Listens on `remote_port` (0 picks a free port) and
/// relays every connection to `local_port`.
#[derive(Clone, Copy, Debug)]
pub struct LocalForwarder {
    bind: IpAddr,
}

impl Default for LocalForwarder {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalForwarder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }

    #[must_use]
    pub const fn with_bind_address(mut self, bind: IpAddr) -> Self {
        self.bind = bind;
        self
    }
}

async fn relay(mut inbound: TcpStream, local_port: u16) {
    let mut outbound = match TcpStream::connect((Ipv4Addr::LOCALHOST, local_port)).await {
        Ok(stream) => stream,
        Err(error) => {
            debug!(local_port, %error, "relay target unreachable");
            return;
        }
    };
    if let Err(error) = copy_bidirectional(&mut inbound, &mut outbound).await {
        debug!(local_port, %error, "relay connection ended with error");
    }
}

#[async_trait]
impl PortForwarder for LocalForwarder {
    async fn open(&self, request: &ForwardRequest) -> Result<TunnelSession, TunnelError> {
        let listener = TcpListener::bind((self.bind, request.remote_port))
            .await
            .map_err(|err| TunnelError::setup(request, anyhow!(err)))?;
        let remote_port = listener
            .local_addr()
            .map_err(|err| TunnelError::setup(request, anyhow!(err)))?
            .port();
        let local_port = request.local_port;

        info!(remote_port, local_port, "local relay listening");

        Ok(TunnelSession::spawn(remote_port, local_port, move |mut cancel| {
            async move {
                let mut connections = JoinSet::new();
                let outcome = loop {
                    tokio::select! {
                        _ = &mut cancel => break Ok(()),
                        accepted = listener.accept() => match accepted {
                            Ok((inbound, peer)) => {
                                debug!(%peer, remote_port, "relaying connection");
                                connections.spawn(relay(inbound, local_port));
                            }
                            Err(error) => {
                                warn!(remote_port, %error, "local relay accept failed");
                                break Err(TunnelError::Dropped {
                                    remote_port,
                                    local_port,
                                    source: anyhow!(error),
                                });
                            }
                        },
                        Some(_) = connections.join_next(), if !connections.is_empty() => {}
                    }
                };
                connections.abort_all();
                while connections.join_next().await.is_some() {}
                debug!(remote_port, "local relay stopped");
                outcome
            }
        }))
    }
}
