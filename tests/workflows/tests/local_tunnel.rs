use std::time::Duration;

use testing_framework_core::{
    deployment::SshAccess,
    scenario::{
        BackendServer, ForwardRequest, LocalForwarder, PortForwarder as _, TunnelError,
        http_probe,
    },
};
use tests_workflows::{free_port, port_is_open};
use tokio::{
    io::AsyncReadExt as _,
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::timeout,
};

fn request(remote_port: u16, local_port: u16) -> ForwardRequest {
    ForwardRequest {
        host: "127.0.0.1".to_owned(),
        ssh: SshAccess {
            user: "tunnel".to_owned(),
            private_key: String::new(),
        },
        remote_port,
        local_port,
    }
}

#[tokio::test]
async fn relay_forwards_to_local_backend() -> anyhow::Result<()> {
    let backend = BackendServer::fixed_response("through the tunnel").await?;
    let remote_port = free_port()?;

    let mut session = LocalForwarder::new()
        .open(&request(remote_port, backend.port()))
        .await?;
    assert_eq!(session.remote_port(), remote_port);
    assert_eq!(session.local_port(), backend.port());

    let client = http_probe::probe_client();
    for _ in 0..3 {
        let url = http_probe::probe_url("127.0.0.1", remote_port, "/")?;
        let response = http_probe::get(&client, &url).await?;
        assert_eq!(response.body, "through the tunnel");
    }

    session.close().await?;
    assert!(session.is_closed());
    assert!(!port_is_open(remote_port).await);
    // Closing twice is harmless.
    session.close().await?;
    Ok(())
}

#[tokio::test]
async fn ephemeral_remote_port_is_reported() -> anyhow::Result<()> {
    let backend = BackendServer::fixed_response("ok").await?;

    let mut session = LocalForwarder::new()
        .open(&request(0, backend.port()))
        .await?;

    assert_ne!(session.remote_port(), 0);
    assert!(port_is_open(session.remote_port()).await);
    session.close().await?;
    Ok(())
}

#[tokio::test]
async fn occupied_remote_port_is_a_setup_error() -> anyhow::Result<()> {
    let occupied = TcpListener::bind(("127.0.0.1", 0)).await?;
    let port = occupied.local_addr()?.port();

    let err = LocalForwarder::new()
        .open(&request(port, 1))
        .await
        .unwrap_err();

    assert!(
        matches!(&err, TunnelError::Setup { remote_port, .. } if *remote_port == port),
        "{err}"
    );
    Ok(())
}

#[tokio::test]
async fn dropping_the_session_stops_the_relay() -> anyhow::Result<()> {
    let backend = BackendServer::fixed_response("ok").await?;
    let remote_port = free_port()?;
    let session = LocalForwarder::new()
        .open(&request(remote_port, backend.port()))
        .await?;
    assert!(port_is_open(remote_port).await);

    drop(session);

    let mut closed = false;
    for _ in 0..50 {
        if !port_is_open(remote_port).await {
            closed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(closed, "relay still listening on {remote_port}");
    Ok(())
}

#[tokio::test]
async fn closing_the_session_ends_in_flight_connections() -> anyhow::Result<()> {
    // Backend that accepts and then holds the connection open forever.
    let backend = TcpListener::bind(("127.0.0.1", 0)).await?;
    let backend_port = backend.local_addr()?.port();
    let (accepted_tx, accepted_rx) = oneshot::channel();
    let holder = tokio::spawn(async move {
        let (stream, _) = backend.accept().await?;
        let _ = accepted_tx.send(());
        std::future::pending::<()>().await;
        drop(stream);
        anyhow::Ok(())
    });

    let mut session = LocalForwarder::new()
        .open(&request(0, backend_port))
        .await?;
    let mut client = TcpStream::connect(("127.0.0.1", session.remote_port())).await?;
    timeout(Duration::from_secs(2), accepted_rx).await??;

    session.close().await?;

    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(2), client.read(&mut buf)).await?;
    assert!(matches!(read, Ok(0)), "{read:?}");

    holder.abort();
    Ok(())
}
