//! The broker: accepts streams, tracks which component lives behind which
//! stream, and routes DATA between them.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{broadcast, mpsc};

use cobus_core::packet::EVENT_DESTINATION;
use cobus_core::{Header, Message, MessageKind};

use crate::connection::{read_message, write_loop, Connection, OutboundTx};
use crate::distributor::Distributor;
use crate::error::TransportError;

/// Component → distributor map plus the list of accepted streams.
///
/// The distributor map sits behind one mutex that is only held while the map
/// is mutated or iterated, never across an await.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    distributors: Mutex<HashMap<u8, Distributor>>,
    connections: DashMap<u64, Arc<Connection>>,
    next_connection_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn distributors(&self) -> MutexGuard<'_, HashMap<u8, Distributor>> {
        self.inner
            .distributors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Component ids with a live distributor, ascending.
    pub fn registered_components(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.distributors().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn listening_count(&self) -> usize {
        self.inner
            .connections
            .iter()
            .filter(|c| c.is_listening())
            .count()
    }

    fn add_connection(&self, peer: SocketAddr, outbound: OutboundTx) -> Arc<Connection> {
        let id = self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let conn = Arc::new(Connection::new(id, peer, outbound));
        self.inner.connections.insert(id, conn.clone());
        conn
    }

    /// Route one DATA message.
    ///
    /// Listening streams get a copy of everything, except the stream that
    /// already hosts the destination component. Events go to every
    /// distributor; anything else only to the destination's distributor.
    pub fn distribute(&self, msg: &Message) {
        let destination = msg.header.destination;
        let distributors = self.distributors();
        let owner = match destination {
            EVENT_DESTINATION => None,
            _ => distributors.get(&destination).map(|d| d.connection_id()),
        };

        for conn in self.inner.connections.iter() {
            if conn.is_listening() && Some(conn.id()) != owner {
                conn.send(msg.clone());
            }
        }

        if destination == EVENT_DESTINATION {
            for distributor in distributors.values() {
                distributor.send_message(msg.clone());
            }
        } else if let Some(distributor) = distributors.get(&destination) {
            distributor.send_message(msg.clone());
        } else {
            tracing::warn!(
                component = destination,
                header = %msg.header,
                "destination not registered, message dropped"
            );
        }
    }

    /// Bind `component` to `conn`, replacing any earlier registration.
    pub async fn register(&self, component: u8, conn: &Connection) {
        let replaced = self
            .distributors()
            .insert(component, Distributor::spawn(component, conn));
        tracing::info!(component, peer = %conn.peer(), "component registered");
        if let Some(old) = replaced {
            tracing::debug!(component, old_peer = %old.peer(), "replacing registration");
            old.disconnect().await;
        }
    }

    /// Drop the registration for `component`. True if there was one.
    pub async fn unregister(&self, component: u8) -> bool {
        let removed = self.distributors().remove(&component);
        match removed {
            Some(distributor) => {
                distributor.disconnect().await;
                tracing::info!(component, "component unregistered");
                true
            }
            None => {
                tracing::debug!(component, "unregister for unknown component");
                false
            }
        }
    }

    /// Forget a stream and every component registered over it.
    async fn remove_connection(&self, id: u64) {
        let orphans: Vec<Distributor> = {
            let mut map = self.distributors();
            let ids: Vec<u8> = map
                .iter()
                .filter(|(_, d)| d.connection_id() == id)
                .map(|(c, _)| *c)
                .collect();
            ids.iter().filter_map(|c| map.remove(c)).collect()
        };
        for distributor in orphans {
            tracing::info!(component = distributor.component(), "component lost with its connection");
            distributor.disconnect().await;
        }
        if let Some((_, conn)) = self.inner.connections.remove(&id) {
            conn.close();
        }
    }

    async fn shutdown(&self) {
        let all: Vec<Distributor> = self.distributors().drain().map(|(_, d)| d).collect();
        for distributor in all {
            distributor.disconnect().await;
        }
        for conn in self.inner.connections.iter() {
            conn.close();
        }
        self.inner.connections.clear();
    }
}

pub struct Server {
    listener: TcpListener,
    registry: Registry,
    shutdown: broadcast::Receiver<()>,
}

impl Server {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        shutdown: broadcast::Receiver<()>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            registry: Registry::new(),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    /// Accept streams until shutdown is signalled.
    pub async fn run(mut self) -> io::Result<()> {
        tracing::info!(addr = %self.listener.local_addr()?, "broker listening");
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("broker shutting down");
                    self.registry.shutdown().await;
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let _ = stream.set_nodelay(true);
                    tracing::debug!(%peer, "connection accepted");
                    tokio::spawn(serve_connection(
                        self.registry.clone(),
                        stream,
                        peer,
                        self.shutdown.resubscribe(),
                    ));
                }
            }
        }
    }
}

async fn serve_connection(
    registry: Registry,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) {
    let (reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = registry.add_connection(peer, tx);
    tokio::spawn(async move {
        if let Err(e) = write_loop(writer, rx).await {
            tracing::debug!(%peer, error = %e, "writer stopped");
        }
    });

    let mut reader = BufReader::new(reader);
    loop {
        let result = tokio::select! {
            _ = shutdown.recv() => break,
            r = read_message(&mut reader) => r,
        };
        match result {
            Ok(Some(msg)) => {
                if !handle_message(&registry, &conn, msg).await {
                    break;
                }
            }
            Ok(None) => {
                tracing::debug!(%peer, "peer closed connection");
                break;
            }
            Err(TransportError::Wire(e)) => {
                tracing::warn!(%peer, error = %e, "malformed message skipped");
            }
            Err(TransportError::Io(e)) => {
                tracing::warn!(%peer, error = %e, "connection read failed");
                break;
            }
        }
    }

    registry.remove_connection(conn.id()).await;
    tracing::debug!(%peer, "connection closed");
}

/// Act on one inbound message. False when the connection should close.
async fn handle_message(registry: &Registry, conn: &Connection, msg: Message) -> bool {
    match msg.kind {
        MessageKind::Data => registry.distribute(&msg),
        MessageKind::Register => registry.register(msg.header.source, conn).await,
        MessageKind::Unregister => {
            let component = msg.header.source;
            registry.unregister(component).await;
            let echo = Header {
                destination: component,
                source: component,
                ..Header::default()
            };
            conn.send(Message::control(MessageKind::Unregister, echo));
        }
        MessageKind::CloseConnection => {
            tracing::debug!(peer = %conn.peer(), "close requested");
            return false;
        }
        MessageKind::Listen => {
            conn.set_listening();
            tracing::info!(peer = %conn.peer(), "connection now listening");
        }
        MessageKind::Ping => tracing::debug!(peer = %conn.peer(), "ping"),
        MessageKind::Error => {
            tracing::warn!(peer = %conn.peer(), header = %msg.header, "peer reported an error")
        }
    }
    true
}
