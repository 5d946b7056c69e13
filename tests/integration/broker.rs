use crate::*;
use cobus_core::MessageKind;

// ══════════════════════════════════════════════════════════════════════════════
//  Broker routing
// ══════════════════════════════════════════════════════════════════════════════

/// DATA for component 5 reaches only 5's stream, plus every listening stream.
#[tokio::test]
async fn test_directed_data_fans_out_to_owner_and_listener() -> Result<()> {
    let broker = Broker::start().await?;
    let five = broker.client(&[5]).await?;
    let six = broker.client(&[6]).await?;
    let listener = broker.client(&[]).await?;
    listener.listen()?;
    wait_for(|| broker.registry.listening_count() == 1).await?;

    let sender = broker.client(&[9]).await?;
    sender.send_message(data(5, 9, 0x31, b"hello"))?;

    let got = wait_some(|| five.poll_component(5)).await?;
    assert_eq!(got.header.source, 9);
    assert_eq!(got.payload.data(), b"hello");

    let mirrored = wait_some(|| listener.poll_overheard()).await?;
    assert_eq!(mirrored.header.destination, 5);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(six.next_packet().is_none(), "component 6 must not see DATA for 5");
    assert!(five.next_packet().is_none());
    assert!(sender.next_packet().is_none());

    broker.stop().await
}

/// Events reach every registered component's stream as overheard traffic.
#[tokio::test]
async fn test_event_reaches_every_component() -> Result<()> {
    let broker = Broker::start().await?;
    let a = broker.client(&[5]).await?;
    let b = broker.client(&[6, 7]).await?;
    let sender = broker.client(&[9]).await?;

    sender.send_message(data(0, 9, 0x02, &[]))?;

    let at_a = wait_some(|| a.poll_overheard()).await?;
    assert_eq!(at_a.header.identifier, 0x02);
    // One copy per distributor bound to b's stream.
    wait_some(|| b.poll_overheard()).await?;
    wait_some(|| b.poll_overheard()).await?;
    // The sender hosts component 9, so it hears its own event too.
    wait_some(|| sender.poll_overheard()).await?;

    broker.stop().await
}

/// A listening client that also hosts the destination gets the packet once.
#[tokio::test]
async fn test_listening_owner_is_not_delivered_twice() -> Result<()> {
    let broker = Broker::start().await?;
    let owner = broker.client(&[5]).await?;
    owner.listen()?;
    wait_for(|| broker.registry.listening_count() == 1).await?;
    let sender = broker.client(&[9]).await?;

    sender.send_message(data(5, 9, 1, b"once"))?;
    wait_some(|| owner.poll_component(5)).await?;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(owner.poll_component(5).is_none());
    assert!(owner.poll_overheard().is_none());

    broker.stop().await
}

/// DATA to an unregistered component is dropped without affecting the sender.
#[tokio::test]
async fn test_unknown_destination_is_dropped() -> Result<()> {
    let broker = Broker::start().await?;
    let sender = broker.client(&[9]).await?;
    sender.send_message(data(42, 9, 1, b"nobody"))?;
    sender.send_message(data(9, 9, 2, b"self"))?;

    let own = wait_some(|| sender.poll_component(9)).await?;
    assert_eq!(own.header.identifier, 2);
    assert!(sender.is_connected());

    broker.stop().await
}

// ══════════════════════════════════════════════════════════════════════════════
//  Raw protocol
// ══════════════════════════════════════════════════════════════════════════════

/// UNREGISTER is echoed on the same stream with the component as both ends.
#[tokio::test]
async fn test_unregister_is_echoed() -> Result<()> {
    let broker = Broker::start().await?;
    let mut peer = RawPeer::connect(broker.addr).await?;

    peer.send(&Message::register(5)).await?;
    broker.wait_registered(&[5]).await?;

    peer.send(&Message::unregister(5)).await?;
    let echo = peer.recv().await?;
    assert_eq!(echo.kind, MessageKind::Unregister);
    assert_eq!(echo.header.destination, 5);
    assert_eq!(echo.header.source, 5);
    assert!(broker.registry.registered_components().is_empty());

    broker.stop().await
}

/// CLOSE_CONNECTION closes the stream and forgets its components.
#[tokio::test]
async fn test_close_connection_purges_stream() -> Result<()> {
    let broker = Broker::start().await?;
    let mut peer = RawPeer::connect(broker.addr).await?;
    peer.send(&Message::register(3)).await?;
    broker.wait_registered(&[3]).await?;
    assert_eq!(broker.registry.connection_count(), 1);

    peer.send(&Message::close_connection()).await?;
    assert!(peer.recv().await.is_err(), "stream should be closed");
    wait_for(|| broker.registry.connection_count() == 0).await?;
    assert!(broker.registry.registered_components().is_empty());

    broker.stop().await
}

/// A malformed message is skipped; the stream keeps working.
#[tokio::test]
async fn test_malformed_message_does_not_kill_stream() -> Result<()> {
    let broker = Broker::start().await?;
    let mut peer = RawPeer::connect(broker.addr).await?;

    let mut garbage = Message::register(4).encode().to_vec();
    garbage[0] = 0xee;
    peer.stream.write_all(&garbage).await?;
    peer.send(&Message::register(5)).await?;
    broker.wait_registered(&[5]).await?;
    assert_eq!(broker.registry.registered_components(), vec![5]);

    peer.send(&data(5, 5, 1, b"loop")).await?;
    let back = peer.recv().await?;
    assert_eq!(back.payload.data(), b"loop");

    broker.stop().await
}

/// Losing a stream drops the components registered over it.
#[tokio::test]
async fn test_dropped_stream_unregisters_components() -> Result<()> {
    let broker = Broker::start().await?;
    let mut peer = RawPeer::connect(broker.addr).await?;
    peer.send(&Message::register(5)).await?;
    peer.send(&Message::register(6)).await?;
    broker.wait_registered(&[5, 6]).await?;

    drop(peer);
    wait_for(|| broker.registry.registered_components().is_empty()).await?;
    wait_for(|| broker.registry.connection_count() == 0).await?;

    broker.stop().await
}
