//! In-process stand-ins for a BOSH-deployed HAProxy, so scenarios can be
//! exercised end to end without a director.
//!
//! [`LocalHaproxy`] serves a monitor endpoint whose status follows whether
//! anything listens on the backend port, and a proxy endpoint that forwards
//! to it. [`LocalProvider`] reports the supervisor state the same way and
//! counts deploy and delete calls.

use std::{
    net::{Ipv4Addr, TcpListener as StdTcpListener},
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

use async_trait::async_trait;
use axum::{Router, http::StatusCode, routing::get};
use testing_framework_core::{
    deployment::{
        DeploymentHandle, DeploymentProvider, DeploymentRequest, InstanceObservation,
        ProcessState, SshAccess,
    },
    scenario::{BackendServer, BackendServerError, DynError},
};
use tokio::net::TcpStream;
use tracing::debug;

pub use haproxy_acceptance::defaults::init_tracing;

/// Reserve an ephemeral loopback port and release it straight away.
pub fn free_port() -> std::io::Result<u16> {
    let listener = StdTcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

/// True when something accepts connections on `127.0.0.1:port`.
pub async fn port_is_open(port: u16) -> bool {
    TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.is_ok()
}

/// Monitor and proxy frontends in front of a single loopback backend.
pub struct LocalHaproxy {
    backend_port: u16,
    health: BackendServer,
    proxy: BackendServer,
}

impl LocalHaproxy {
    pub async fn start(backend_port: u16) -> Result<Self, BackendServerError> {
        let health = BackendServer::start(Router::new().route(
            "/health",
            get(move || async move {
                if port_is_open(backend_port).await {
                    (StatusCode::OK, "ok")
                } else {
                    (StatusCode::SERVICE_UNAVAILABLE, "no backend available")
                }
            }),
        ))
        .await?;

        let client = reqwest::Client::new();
        let proxy = BackendServer::start(Router::new().fallback(move || {
            let client = client.clone();
            async move {
                let url = format!("http://127.0.0.1:{backend_port}/");
                let response = client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
                response.text().await.map_err(|_| StatusCode::BAD_GATEWAY)
            }
        }))
        .await?;

        Ok(Self {
            backend_port,
            health,
            proxy,
        })
    }

    #[must_use]
    pub const fn backend_port(&self) -> u16 {
        self.backend_port
    }

    #[must_use]
    pub const fn health_port(&self) -> u16 {
        self.health.port()
    }

    #[must_use]
    pub const fn proxy_port(&self) -> u16 {
        self.proxy.port()
    }
}

/// Deployment provider backed by a [`LocalHaproxy`].
pub struct LocalProvider {
    haproxy: LocalHaproxy,
    flapping_reports: u32,
    fail_deploy: bool,
    fail_delete: bool,
    deployed: AtomicBool,
    observations: AtomicU32,
    deploys: AtomicU32,
    deletes: AtomicU32,
}

impl LocalProvider {
    pub async fn start(backend_port: u16) -> Result<Self, BackendServerError> {
        Ok(Self {
            haproxy: LocalHaproxy::start(backend_port).await?,
            flapping_reports: 0,
            fail_deploy: false,
            fail_delete: false,
            deployed: AtomicBool::new(false),
            observations: AtomicU32::new(0),
            deploys: AtomicU32::new(0),
            deletes: AtomicU32::new(0),
        })
    }

    /// Report `running` for the first `count` observations regardless of the
    /// backend, like a supervisor that has not noticed the failing check yet.
    #[must_use]
    pub const fn with_flapping_reports(mut self, count: u32) -> Self {
        self.flapping_reports = count;
        self
    }

    #[must_use]
    pub const fn failing_deploy(mut self) -> Self {
        self.fail_deploy = true;
        self
    }

    #[must_use]
    pub const fn failing_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    #[must_use]
    pub const fn haproxy(&self) -> &LocalHaproxy {
        &self.haproxy
    }

    #[must_use]
    pub fn deploy_calls(&self) -> u32 {
        self.deploys.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn delete_calls(&self) -> u32 {
        self.deletes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn observation_count(&self) -> u32 {
        self.observations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeploymentProvider for LocalProvider {
    async fn deploy(&self, request: &DeploymentRequest) -> Result<DeploymentHandle, DynError> {
        self.deploys.fetch_add(1, Ordering::SeqCst);
        if self.fail_deploy {
            return Err(format!("director rejected manifest for {}", request.name).into());
        }
        self.deployed.store(true, Ordering::SeqCst);
        Ok(DeploymentHandle {
            name: request.name.clone(),
            public_ip: Ipv4Addr::LOCALHOST.to_string(),
            ssh: SshAccess {
                user: "tunnel".to_owned(),
                private_key: String::new(),
            },
            backend_port: self.haproxy.backend_port(),
        })
    }

    async fn delete(&self, name: &str) -> Result<(), DynError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.deployed.store(false, Ordering::SeqCst);
        if self.fail_delete {
            return Err(format!("director refused to delete {name}").into());
        }
        Ok(())
    }

    async fn list_instances(
        &self,
        handle: &DeploymentHandle,
    ) -> Result<Vec<InstanceObservation>, DynError> {
        if !self.deployed.load(Ordering::SeqCst) {
            return Err(format!("deployment {} not found", handle.name).into());
        }
        let observation = self.observations.fetch_add(1, Ordering::SeqCst);
        let state = if observation < self.flapping_reports
            || port_is_open(self.haproxy.backend_port()).await
        {
            ProcessState::Running
        } else {
            ProcessState::Failing
        };
        debug!(observation, %state, "local supervisor report");
        Ok(vec![InstanceObservation {
            instance: "haproxy/0".to_owned(),
            process_state: state,
            ips: vec![handle.public_ip.clone()],
        }])
    }

    async fn dump_config(&self, _handle: &DeploymentHandle) -> Result<String, DynError> {
        Ok(format!(
            "backend http-routers\n    server node0 127.0.0.1:{} check\n",
            self.haproxy.backend_port()
        ))
    }
}
