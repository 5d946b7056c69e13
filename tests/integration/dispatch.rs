use crate::*;
use std::sync::{Arc, Mutex};

use cobus_broker::TcpBackend;
use cobus_core::{ActionTable, Backend, DeliverInfo, Dispatcher, Packet, Postman};

// ══════════════════════════════════════════════════════════════════════════════
//  Dispatcher over the broker
// ══════════════════════════════════════════════════════════════════════════════

const CALLER: u8 = 0x20;
const SERVICE: u8 = 0x10;
const ACTION_ECHO: u8 = 0x01;
const EVENT_TICK: u8 = 0x09;

type Log = Arc<Mutex<Vec<Packet>>>;

fn recorder(log: &Log) -> impl FnMut(&Header, &Payload) + Send + 'static {
    let log = log.clone();
    move |header: &Header, payload: &Payload| {
        log.lock()
            .unwrap()
            .push(Packet::new(*header, payload.clone()))
    }
}

async fn node<P: Postman>(
    broker: &Broker,
    components: &[u8],
    postman: P,
) -> Result<Dispatcher<TcpBackend, P>> {
    let client = Client::new(ClientOptions::default())?;
    let mut backend = TcpBackend::new(client, None);
    for &id in components {
        backend.add_component(id)?;
    }
    if !backend.connect("127.0.0.1", broker.port()).await {
        bail!("backend failed to connect");
    }
    broker.wait_registered(components).await?;
    Ok(Dispatcher::new(backend, postman))
}

/// Tick `dispatcher` until it delivers something.
async fn pump<B: Backend, P: Postman>(dispatcher: &mut Dispatcher<B, P>) -> Result<DeliverInfo> {
    wait_some(|| dispatcher.update()).await
}

/// Request from one node, response from the other, both through dispatchers.
#[tokio::test]
async fn test_request_response_round_trip() -> Result<()> {
    let broker = Broker::start().await?;

    let requests: Log = Default::default();
    let mut service_table = ActionTable::new();
    service_table.on_action(SERVICE, ACTION_ECHO, recorder(&requests));
    let mut service = node(&broker, &[SERVICE], service_table).await?;

    let responses: Log = Default::default();
    let mut caller_table = ActionTable::new();
    caller_table.on_action(CALLER, ACTION_ECHO, recorder(&responses));
    let mut caller = node(&broker, &[CALLER], caller_table).await?;

    caller.send(
        Header::new(PacketType::Request, false, SERVICE, CALLER, ACTION_ECHO),
        Payload::copy_from_slice(b"marco"),
    )?;
    assert_eq!(pump(&mut service).await?, DeliverInfo::Ok);

    let request = requests.lock().unwrap().pop().context("request not recorded")?;
    assert_eq!(request.payload.data(), b"marco");

    service.send(
        Header::new(
            PacketType::Response,
            true,
            request.header.source,
            SERVICE,
            request.header.identifier,
        ),
        Payload::copy_from_slice(b"polo"),
    )?;
    assert_eq!(pump(&mut caller).await?, DeliverInfo::Ok);

    let response = responses.lock().unwrap().pop().context("response not recorded")?;
    assert_eq!(response.header.packet_type, PacketType::Response);
    assert!(response.header.is_acknowledge);
    assert_eq!(response.payload.data(), b"polo");

    broker.stop().await
}

/// Unknown actions and events without handlers are reported, not raised.
#[tokio::test]
async fn test_unhandled_packets_are_discarded() -> Result<()> {
    let broker = Broker::start().await?;

    let ticks: Log = Default::default();
    let mut table = ActionTable::new();
    table.add_component(SERVICE);
    table.on_event(EVENT_TICK, recorder(&ticks));
    let mut service = node(&broker, &[SERVICE], table).await?;
    let mut caller = node(&broker, &[CALLER], ActionTable::new()).await?;

    caller.send(
        Header::new(PacketType::Request, false, SERVICE, CALLER, 0x77),
        Payload::empty(),
    )?;
    assert_eq!(pump(&mut service).await?, DeliverInfo::NoAction);

    caller.send(Header::event(CALLER, 0x55), Payload::empty())?;
    assert_eq!(pump(&mut service).await?, DeliverInfo::NoAction);

    caller.send(Header::event(CALLER, EVENT_TICK), Payload::copy_from_slice(&[1]))?;
    assert_eq!(pump(&mut service).await?, DeliverInfo::Ok);
    assert_eq!(ticks.lock().unwrap().len(), 1);

    broker.stop().await
}
