use std::time::Duration;

use axum::{Router, routing::get};
use testing_framework_core::{
    constants::BACKEND_GREETING,
    scenario::{BackendServer, http_probe},
};
use tests_workflows::port_is_open;
use tokio::{task::JoinSet, time::sleep};

async fn wait_until_closed(port: u16) -> bool {
    for _ in 0..50 {
        if !port_is_open(port).await {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn fixed_response_is_served_on_every_path() -> anyhow::Result<()> {
    let server = BackendServer::fixed_response(format!("{BACKEND_GREETING}\n")).await?;
    let client = http_probe::probe_client();

    for path in ["/", "/health", "/some/deep/path"] {
        let url = http_probe::probe_url("127.0.0.1", server.port(), path)?;
        let response = http_probe::get(&client, &url).await?;
        assert_eq!(response.status, reqwest::StatusCode::OK);
        assert_eq!(response.body, "Hello cloud foundry\n");
    }

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn concurrent_requests_are_all_answered() -> anyhow::Result<()> {
    let server = BackendServer::start(Router::new().route("/", get(|| async { "pong" }))).await?;
    let url = http_probe::probe_url("127.0.0.1", server.port(), "/")?;
    let client = http_probe::probe_client();

    let mut requests = JoinSet::new();
    for _ in 0..16 {
        let client = client.clone();
        let url = url.clone();
        requests.spawn(async move { http_probe::get(&client, &url).await });
    }
    while let Some(result) = requests.join_next().await {
        assert_eq!(result??.body, "pong");
    }

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_closes_the_port() -> anyhow::Result<()> {
    let server = BackendServer::fixed_response("bye").await?;
    let port = server.port();
    assert!(port_is_open(port).await);

    server.shutdown().await;

    assert!(!port_is_open(port).await);
    Ok(())
}

#[tokio::test]
async fn release_is_idempotent() -> anyhow::Result<()> {
    let mut server = BackendServer::fixed_response("bye").await?;
    let port = server.port();
    assert!(!server.is_released());

    server.release();
    server.release();

    assert!(server.is_released());
    assert!(wait_until_closed(port).await, "port {port} still open");

    // Dropping after an explicit release is a no-op.
    drop(server);
    Ok(())
}

#[tokio::test]
async fn dropping_the_server_releases_it() -> anyhow::Result<()> {
    let port = {
        let server = BackendServer::fixed_response("scoped").await?;
        server.port()
    };

    assert!(wait_until_closed(port).await, "port {port} still open");
    Ok(())
}
