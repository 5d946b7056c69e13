//! cobus integration test harness.
//!
//! Every test starts its own broker on 127.0.0.1 with an OS-assigned port,
//! so tests run in parallel without sharing state.
//!
//!   cargo test --test integration

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use cobus_broker::connection::read_message;
use cobus_broker::{Client, ClientOptions, Registry, Server};
use cobus_core::{Header, Message, PacketType, Payload};

mod broker;
mod client;
mod dispatch;

// ── Harness ───────────────────────────────────────────────────────────────────

/// A broker running in the background of the current test runtime.
pub struct Broker {
    pub addr: SocketAddr,
    pub registry: Registry,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl Broker {
    pub async fn start() -> Result<Self> {
        let (shutdown, rx) = broadcast::channel(1);
        let server = Server::bind("127.0.0.1:0", rx)
            .await
            .context("failed to bind broker")?;
        let addr = server.local_addr()?;
        let registry = server.registry();
        let task = tokio::spawn(server.run());
        Ok(Self {
            addr,
            registry,
            shutdown,
            task,
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// A client with `components` added, connected to this broker, with every
    /// registration visible in the registry.
    pub async fn client(&self, components: &[u8]) -> Result<Client> {
        let client = Client::new(ClientOptions::default())?;
        for &id in components {
            client.add_component(id)?;
        }
        client.connect("127.0.0.1", self.port())?;
        if !client.wait_connected().await {
            bail!("client failed to connect to {}", self.addr);
        }
        self.wait_registered(components).await?;
        Ok(client)
    }

    pub async fn wait_registered(&self, components: &[u8]) -> Result<()> {
        let registry = self.registry.clone();
        let wanted = components.to_vec();
        wait_for(move || wanted.iter().all(|c| registry.registered_components().contains(c)))
            .await
            .context("components never registered")
    }

    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.task.await??;
        Ok(())
    }
}

/// A bare broker connection for speaking the protocol by hand.
pub struct RawPeer {
    stream: TcpStream,
}

impl RawPeer {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(addr).await?,
        })
    }

    pub async fn send(&mut self, msg: &Message) -> Result<()> {
        self.stream.write_all(&msg.encode()).await?;
        Ok(())
    }

    /// Next message, or an error if none arrives within a second.
    pub async fn recv(&mut self) -> Result<Message> {
        let read = tokio::time::timeout(Duration::from_secs(1), read_message(&mut self.stream))
            .await
            .context("timed out waiting for message")?;
        read?.context("stream closed")
    }

    /// True if nothing arrives for `quiet`.
    pub async fn is_silent_for(&mut self, quiet: Duration) -> bool {
        tokio::time::timeout(quiet, read_message(&mut self.stream))
            .await
            .is_err()
    }
}

/// Poll `condition` every 5 ms for up to two seconds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> Result<()> {
    for _ in 0..400 {
        if condition() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    bail!("condition not met within 2s")
}

/// Poll `f` until it yields a value, for up to two seconds.
pub async fn wait_some<T>(mut f: impl FnMut() -> Option<T>) -> Result<T> {
    for _ in 0..400 {
        if let Some(v) = f() {
            return Ok(v);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    bail!("no value within 2s")
}

/// Run `fut` with a test-wide deadline.
pub async fn within<T>(fut: impl Future<Output = T>) -> Result<T> {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .context("test deadline exceeded")
}

pub fn data(destination: u8, source: u8, identifier: u8, body: &[u8]) -> Message {
    Message::data(
        Header::new(PacketType::Request, false, destination, source, identifier),
        Payload::copy_from_slice(body),
    )
    .expect("test payload fits")
}
