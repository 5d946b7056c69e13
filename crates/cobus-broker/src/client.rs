//! Broker client: one stream to the broker shared by every local component.
//!
//! The client walks `Idle → Connecting → Connected → Disconnecting → Idle`.
//! A connect attempt is bounded by a timeout; when it expires the attempt is
//! abandoned and a fresh `connect` may start. Each local component gets a
//! [`Receiver`] fed by the single read loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::BufReader;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use cobus_core::config::ClientConfig;
use cobus_core::packet::EVENT_DESTINATION;
use cobus_core::{Message, MessageKind, Packet};

use crate::connection::{read_message, write_loop, Outbound, OutboundTx};
use crate::dial::{Dialer, TcpDialer};
use crate::error::{ClientError, TransportError};
use crate::receiver::{Inbox, Receiver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub connect_timeout: Duration,
    /// How long `disconnect` waits for the broker to confirm every
    /// UNREGISTER before closing anyway.
    pub disconnect_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            disconnect_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&ClientConfig> for ClientOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            disconnect_timeout: config.disconnect_timeout(),
        }
    }
}

/// Handle to a broker client. Clones share the same connection.
pub struct Client<D: Dialer = TcpDialer> {
    inner: Arc<Inner<D>>,
}

impl<D: Dialer> Clone for Client<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<D> {
    dialer: D,
    runtime: Handle,
    options: ClientOptions,
    state: watch::Sender<ClientState>,
    /// Bumped whenever a connection or attempt is abandoned; late results
    /// from an older generation are discarded.
    generation: AtomicU64,
    links: Mutex<Links>,
    overheard: Inbox,
    closing: AtomicBool,
}

/// Everything guarded by the client's one mutex.
#[derive(Default)]
struct Links {
    outbound: Option<OutboundTx>,
    reader: Option<AbortHandle>,
    receivers: HashMap<u8, Receiver>,
    /// Round-robin position of `next_packet`.
    cursor: usize,
}

impl Client<TcpDialer> {
    /// A TCP client on the current tokio runtime.
    pub fn new(options: ClientOptions) -> Result<Self, ClientError> {
        let runtime = Handle::try_current().map_err(|_| ClientError::NoRuntime)?;
        Ok(Self::with_dialer(TcpDialer, options, runtime))
    }
}

impl<D: Dialer> Client<D> {
    pub fn with_dialer(dialer: D, options: ClientOptions, runtime: Handle) -> Self {
        let (state, _) = watch::channel(ClientState::Idle);
        Self {
            inner: Arc::new(Inner {
                dialer,
                runtime,
                options,
                state,
                generation: AtomicU64::new(0),
                links: Mutex::new(Links::default()),
                overheard: Inbox::default(),
                closing: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.state() == ClientState::Connecting
    }

    /// Start connecting to `host:port` in the background.
    ///
    /// Rejected while connected, connecting or disconnecting; a rejected call
    /// leaves any attempt in flight untouched.
    pub fn connect(&self, host: &str, port: u16) -> Result<(), ClientError> {
        let mut rejected = None;
        self.inner.state.send_if_modified(|state| match state {
            ClientState::Idle => {
                *state = ClientState::Connecting;
                true
            }
            ClientState::Connecting => {
                rejected = Some(ClientError::AlreadyConnecting);
                false
            }
            ClientState::Connected => {
                rejected = Some(ClientError::AlreadyConnected);
                false
            }
            ClientState::Disconnecting => {
                rejected = Some(ClientError::Disconnecting);
                false
            }
        });
        if let Some(e) = rejected {
            tracing::error!(host, port, error = %e, "unable to start new connection");
            return Err(e);
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(host, port, "connecting to broker");
        let inner = self.inner.clone();
        let host = host.to_owned();
        self.inner
            .runtime
            .spawn(async move { inner.attempt(host, port, generation).await });
        Ok(())
    }

    /// Wait for the current attempt to settle. True if it connected.
    pub async fn wait_connected(&self) -> bool {
        let mut rx = self.inner.state.subscribe();
        let connected = match rx.wait_for(|s| *s != ClientState::Connecting).await {
            Ok(state) => *state == ClientState::Connected,
            Err(_) => false,
        };
        connected
    }

    /// Register a local component and start its receiver.
    ///
    /// REGISTER goes out immediately when connected, otherwise on the next
    /// successful connect. Id 0 is the event destination and is refused.
    pub fn add_component(&self, component: u8) -> Result<(), ClientError> {
        if component == EVENT_DESTINATION {
            return Err(ClientError::ReservedComponent(component));
        }
        let mut links = self.inner.links();
        if self.state() == ClientState::Disconnecting {
            return Err(ClientError::Disconnecting);
        }
        if links.receivers.contains_key(&component) {
            tracing::debug!(component, "component already added");
            return Ok(());
        }
        links
            .receivers
            .insert(component, Receiver::spawn(component, &self.inner.runtime));
        if let Some(tx) = &links.outbound {
            let _ = tx.send(Outbound::Message(Message::register(component)));
        }
        tracing::info!(component, "component added");
        Ok(())
    }

    /// Ask the broker to mirror every DATA message to this client.
    pub fn listen(&self) -> Result<(), ClientError> {
        self.send_message(Message::listen()).inspect_err(|_| {
            tracing::warn!("not connected, listen ignored");
        })
    }

    /// Queue a message for the broker.
    pub fn send_message(&self, msg: Message) -> Result<(), ClientError> {
        let links = self.inner.links();
        let tx = links.outbound.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(Outbound::Message(msg))
            .map_err(|_| ClientError::NotConnected)
    }

    /// Next packet queued for `component`.
    pub fn poll_component(&self, component: u8) -> Option<Packet> {
        self.inner
            .links()
            .receivers
            .get(&component)
            .and_then(|r| r.inbox().pop())
    }

    /// Next packet that was not addressed to a local component.
    pub fn poll_overheard(&self) -> Option<Packet> {
        self.inner.overheard.pop()
    }

    /// Next packet from any local component or the overheard inbox.
    ///
    /// Sources are served round-robin in component order, the overheard inbox
    /// last, so steady traffic for one component cannot starve the rest.
    pub fn next_packet(&self) -> Option<Packet> {
        let mut links = self.inner.links();
        let mut ids: Vec<u8> = links.receivers.keys().copied().collect();
        ids.sort_unstable();
        let slots = ids.len() + 1;
        for step in 0..slots {
            let slot = (links.cursor + step) % slots;
            let packet = match ids.get(slot) {
                Some(id) => links.receivers.get(id).and_then(|r| r.inbox().pop()),
                None => self.inner.overheard.pop(),
            };
            if packet.is_some() {
                links.cursor = (slot + 1) % slots;
                return packet;
            }
        }
        None
    }

    /// Locally registered components, ascending.
    pub fn components(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.inner.links().receivers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Unregister every component and close the stream.
    ///
    /// One UNREGISTER goes out per component. CLOSE_CONNECTION follows only
    /// after the broker has confirmed each one and its receiver has stopped.
    /// If the drain exceeds the configured timeout the stream is closed
    /// anyway. A pending connect attempt is simply abandoned.
    pub async fn disconnect(&self) {
        let mut previous = ClientState::Idle;
        let generation = &self.inner.generation;
        self.inner.state.send_if_modified(|state| {
            previous = *state;
            match state {
                ClientState::Connected => {
                    *state = ClientState::Disconnecting;
                    true
                }
                ClientState::Connecting => {
                    generation.fetch_add(1, Ordering::AcqRel);
                    *state = ClientState::Idle;
                    true
                }
                _ => false,
            }
        });

        match previous {
            ClientState::Idle => return,
            ClientState::Connecting => {
                tracing::info!("connect attempt abandoned");
                return;
            }
            ClientState::Connected => self.inner.begin_drain(),
            ClientState::Disconnecting => {}
        }

        let mut rx = self.inner.state.subscribe();
        let drained = tokio::time::timeout(
            self.inner.options.disconnect_timeout,
            rx.wait_for(|s| *s == ClientState::Idle),
        )
        .await
        .is_ok();
        if !drained {
            tracing::warn!("broker did not confirm disconnect in time, closing");
            self.inner.force_close().await;
        }
    }
}

impl<D: Dialer> Inner<D> {
    fn links(&self) -> MutexGuard<'_, Links> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    async fn attempt(self: Arc<Self>, host: String, port: u16, generation: u64) {
        let dialed =
            tokio::time::timeout(self.options.connect_timeout, self.dialer.dial(&host, port)).await;
        let stream = match dialed {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::warn!(%host, port, error = %e, "connect failed");
                self.abandon(generation);
                return;
            }
            Err(_) => {
                tracing::warn!(%host, port, timeout = ?self.options.connect_timeout, "connect timed out");
                self.abandon(generation);
                return;
            }
        };

        let (reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut links = self.links();
        let promoted = self.state.send_if_modified(|state| {
            if *state == ClientState::Connecting && self.is_current(generation) {
                *state = ClientState::Connected;
                true
            } else {
                false
            }
        });
        if !promoted {
            tracing::debug!(%host, port, "connect attempt superseded, dropping stream");
            return;
        }

        self.runtime.spawn(async move {
            if let Err(e) = write_loop(writer, rx).await {
                tracing::warn!(error = %e, "broker write failed");
            }
        });
        let mut ids: Vec<u8> = links.receivers.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let _ = tx.send(Outbound::Message(Message::register(id)));
        }
        links.outbound = Some(tx);

        let reader_task = {
            let inner = self.clone();
            self.runtime
                .spawn(async move { inner.read_loop(BufReader::new(reader), generation).await })
        };
        links.reader = Some(reader_task.abort_handle());
        drop(links);
        tracing::info!(%host, port, "connected to broker");
    }

    /// Return to `Idle` after a failed attempt, unless a newer one started.
    fn abandon(&self, generation: u64) {
        self.state.send_if_modified(|state| {
            if *state == ClientState::Connecting && self.is_current(generation) {
                *state = ClientState::Idle;
                true
            } else {
                false
            }
        });
    }

    async fn read_loop<R>(self: Arc<Self>, mut reader: R, generation: u64)
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        loop {
            match read_message(&mut reader).await {
                Ok(Some(msg)) => self.handle_message(msg).await,
                Ok(None) => {
                    tracing::info!("broker closed the connection");
                    break;
                }
                Err(TransportError::Wire(e)) => {
                    tracing::warn!(error = %e, "malformed message from broker skipped");
                }
                Err(TransportError::Io(e)) => {
                    tracing::warn!(error = %e, "broker connection lost");
                    break;
                }
            }
        }
        self.connection_lost(generation).await;
    }

    async fn handle_message(&self, msg: Message) {
        match msg.kind {
            MessageKind::Data => self.route(msg.into_packet()),
            MessageKind::Unregister => self.confirm_unregister(msg.header.destination).await,
            MessageKind::Ping => tracing::debug!("ping from broker"),
            MessageKind::Error => tracing::warn!(header = %msg.header, "broker reported an error"),
            other => tracing::warn!(kind = ?other, "unexpected message from broker ignored"),
        }
    }

    /// DATA for a registered component goes to its receiver only; everything
    /// else is overheard.
    fn route(&self, packet: Packet) {
        let destination = packet.header.destination;
        let links = self.links();
        match links.receivers.get(&destination) {
            Some(receiver) if destination != EVENT_DESTINATION => {
                if !receiver.deliver(packet) {
                    tracing::warn!(component = destination, "receiver stopped, packet dropped");
                }
            }
            _ => self.overheard.push(packet),
        }
    }

    async fn confirm_unregister(&self, component: u8) {
        let (receiver, close) = {
            let mut links = self.links();
            let receiver = links.receivers.remove(&component);
            let close = self.closing.load(Ordering::Acquire) && links.receivers.is_empty();
            (receiver, close)
        };
        match receiver {
            Some(receiver) => {
                self.retire(receiver).await;
                tracing::info!(component, "component unregistered");
            }
            None => tracing::debug!(component, "unregister confirmation for unknown component"),
        }
        if close {
            self.send_close();
        }
    }

    fn begin_drain(&self) {
        self.closing.store(true, Ordering::Release);
        let links = self.links();
        if links.receivers.is_empty() {
            drop(links);
            self.send_close();
            return;
        }
        if let Some(tx) = &links.outbound {
            for id in links.receivers.keys() {
                let _ = tx.send(Outbound::Message(Message::unregister(*id)));
            }
        }
        tracing::debug!(components = links.receivers.len(), "draining components");
    }

    /// Send CLOSE_CONNECTION, then shut the write half.
    fn send_close(&self) {
        if let Some(tx) = &self.links().outbound {
            let _ = tx.send(Outbound::Message(Message::close_connection()));
            let _ = tx.send(Outbound::Close);
            tracing::debug!("close sent to broker");
        }
    }

    /// Stop a receiver and keep whatever it still held reachable through
    /// `next_packet`.
    async fn retire(&self, receiver: Receiver) {
        let component = receiver.component();
        let inbox = receiver.shutdown_command().await;
        let moved = inbox.drain_into(&self.overheard);
        if moved > 0 {
            tracing::debug!(component, moved, "queued packets kept after unregister");
        }
    }

    /// The broker stream ended. Components survive a plain loss and are
    /// registered again on the next connect; a loss during `disconnect`
    /// finishes the drain instead.
    async fn connection_lost(&self, generation: u64) {
        let retiring: Vec<Receiver> = {
            let mut links = self.links();
            if !self.is_current(generation) {
                return;
            }
            links.outbound = None;
            links.reader = None;
            if self.closing.load(Ordering::Acquire) {
                links.receivers.drain().map(|(_, r)| r).collect()
            } else {
                Vec::new()
            }
        };
        for receiver in retiring {
            self.retire(receiver).await;
        }
        if self.is_current(generation) {
            self.closing.store(false, Ordering::Release);
        }
        self.state.send_if_modified(|state| {
            if *state != ClientState::Idle && self.is_current(generation) {
                *state = ClientState::Idle;
                true
            } else {
                false
            }
        });
    }

    async fn force_close(&self) {
        let receivers: Vec<Receiver> = {
            let mut links = self.links();
            self.generation.fetch_add(1, Ordering::AcqRel);
            if let Some(tx) = links.outbound.take() {
                let _ = tx.send(Outbound::Close);
            }
            if let Some(reader) = links.reader.take() {
                reader.abort();
            }
            links.receivers.drain().map(|(_, r)| r).collect()
        };
        for receiver in receivers {
            self.retire(receiver).await;
        }
        self.closing.store(false, Ordering::Release);
        self.state.send_replace(ClientState::Idle);
    }
}
