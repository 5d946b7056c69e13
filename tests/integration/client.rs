use crate::*;
use cobus_broker::{ClientError, ClientState};
use cobus_core::MessageKind;
use tokio::net::TcpListener;

// ══════════════════════════════════════════════════════════════════════════════
//  Client lifecycle
// ══════════════════════════════════════════════════════════════════════════════

/// add_component sends exactly one REGISTER and has its receiver in place
/// before the broker can route DATA to it.
#[tokio::test]
async fn test_add_component_registers_once() -> Result<()> {
    let fake = TcpListener::bind("127.0.0.1:0").await?;
    let port = fake.local_addr()?.port();

    let client = Client::new(ClientOptions::default())?;
    client.connect("127.0.0.1", port)?;
    let (stream, _) = within(fake.accept()).await??;
    let mut broker = RawPeer { stream };
    assert!(client.wait_connected().await);

    client.add_component(5)?;
    assert_eq!(client.components(), vec![5]);

    let reg = broker.recv().await?;
    assert_eq!(reg.kind, MessageKind::Register);
    assert_eq!(reg.header.source, 5);
    assert!(broker.is_silent_for(Duration::from_millis(100)).await);

    broker.send(&data(5, 1, 7, b"first")).await?;
    let got = wait_some(|| client.poll_component(5)).await?;
    assert_eq!(got.payload.data(), b"first");
    Ok(())
}

/// disconnect unregisters every component, then closes the stream.
#[tokio::test]
async fn test_disconnect_drains_and_closes() -> Result<()> {
    let broker = Broker::start().await?;
    let client = broker.client(&[5, 6, 7]).await?;
    assert_eq!(broker.registry.connection_count(), 1);

    within(client.disconnect()).await?;
    assert_eq!(client.state(), ClientState::Idle);
    assert!(client.components().is_empty());

    wait_for(|| broker.registry.registered_components().is_empty()).await?;
    wait_for(|| broker.registry.connection_count() == 0).await?;

    // The client can connect again afterwards.
    client.add_component(8)?;
    client.connect("127.0.0.1", broker.port())?;
    assert!(client.wait_connected().await);
    broker.wait_registered(&[8]).await?;

    broker.stop().await
}

/// A client with no components closes straight away.
#[tokio::test]
async fn test_disconnect_without_components() -> Result<()> {
    let broker = Broker::start().await?;
    let client = broker.client(&[]).await?;
    wait_for(|| broker.registry.connection_count() == 1).await?;

    within(client.disconnect()).await?;
    assert_eq!(client.state(), ClientState::Idle);
    wait_for(|| broker.registry.connection_count() == 0).await?;

    broker.stop().await
}

/// Connecting twice is refused without disturbing the live connection.
#[tokio::test]
async fn test_second_connect_is_rejected() -> Result<()> {
    let broker = Broker::start().await?;
    let client = broker.client(&[5]).await?;

    assert_eq!(
        client.connect("127.0.0.1", broker.port()),
        Err(ClientError::AlreadyConnected)
    );
    assert!(client.is_connected());

    let peer = broker.client(&[6]).await?;
    peer.send_message(data(5, 6, 1, b"still up"))?;
    wait_some(|| client.poll_component(5)).await?;

    broker.stop().await
}

/// Nothing listening: the attempt fails and the client is free to retry.
#[tokio::test]
async fn test_refused_connect_returns_to_idle() -> Result<()> {
    let port = {
        let probe = TcpListener::bind("127.0.0.1:0").await?;
        probe.local_addr()?.port()
    };
    let client = Client::new(ClientOptions::default())?;
    client.connect("127.0.0.1", port)?;
    assert!(!client.wait_connected().await);
    assert_eq!(client.state(), ClientState::Idle);
    assert_eq!(client.listen(), Err(ClientError::NotConnected));
    Ok(())
}

/// Broker shutdown puts connected clients back to Idle, keeping their
/// components for the next connection.
#[tokio::test]
async fn test_broker_shutdown_idles_clients() -> Result<()> {
    let broker = Broker::start().await?;
    let client = broker.client(&[5]).await?;
    broker.stop().await?;

    wait_for(|| client.state() == ClientState::Idle).await?;
    assert_eq!(client.components(), vec![5]);

    let again = Broker::start().await?;
    client.connect("127.0.0.1", again.port())?;
    assert!(client.wait_connected().await);
    again.wait_registered(&[5]).await?;
    again.stop().await
}
