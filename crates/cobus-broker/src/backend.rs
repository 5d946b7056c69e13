//! [`Backend`] over a broker [`Client`], for use with a polling dispatcher.

use std::time::Duration;

use tokio::time::Instant;

use cobus_core::backend::InboundSlot;
use cobus_core::config::ClientConfig;
use cobus_core::{Backend, BackendError, Header, Message, Packet, Payload, WireError};

use crate::client::{Client, ClientOptions, ClientState};
use crate::dial::{Dialer, TcpDialer};
use crate::error::ClientError;

pub struct TcpBackend<D: Dialer = TcpDialer> {
    client: Client<D>,
    target: Option<(String, u16)>,
    reconnect_interval: Option<Duration>,
    last_attempt: Option<Instant>,
    inbound: InboundSlot,
}

impl TcpBackend<TcpDialer> {
    /// TCP backend on the current runtime, reconnecting as configured.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = Client::new(ClientOptions::from(config))?;
        let interval = config.reconnect.then(|| config.reconnect_interval());
        Ok(Self::new(client, interval))
    }
}

impl<D: Dialer> TcpBackend<D> {
    /// `reconnect_interval` of `None` disables automatic reconnects.
    pub fn new(client: Client<D>, reconnect_interval: Option<Duration>) -> Self {
        Self {
            client,
            target: None,
            reconnect_interval,
            last_attempt: None,
            inbound: InboundSlot::default(),
        }
    }

    pub fn client(&self) -> &Client<D> {
        &self.client
    }

    pub fn add_component(&mut self, component: u8) -> Result<(), ClientError> {
        self.client.add_component(component)
    }

    /// Connect and wait for the outcome. The target is remembered for
    /// reconnects either way.
    pub async fn connect(&mut self, host: &str, port: u16) -> bool {
        self.target = Some((host.to_owned(), port));
        self.last_attempt = Some(Instant::now());
        if self.client.connect(host, port).is_err() {
            return false;
        }
        self.client.wait_connected().await
    }

    /// Unregister everything, close the stream and stop reconnecting.
    pub async fn disconnect(&mut self) {
        self.target = None;
        self.client.disconnect().await;
    }

    fn maybe_reconnect(&mut self) {
        let (Some(interval), Some((host, port))) = (self.reconnect_interval, &self.target) else {
            return;
        };
        if self.client.state() != ClientState::Idle {
            return;
        }
        if self.last_attempt.is_some_and(|t| t.elapsed() < interval) {
            return;
        }
        self.last_attempt = Some(Instant::now());
        tracing::debug!(%host, port, "reconnecting to broker");
        if let Err(e) = self.client.connect(host, *port) {
            tracing::debug!(error = %e, "reconnect not started");
        }
    }
}

impl<D: Dialer> Backend for TcpBackend<D> {
    fn send(&mut self, header: Header, payload: Payload) -> Result<(), BackendError> {
        let msg = Message::data(header, payload).map_err(|e| match e {
            WireError::PayloadTooLarge { len, max } => BackendError::PayloadTooLarge { len, max },
            other => BackendError::Wire(other),
        })?;
        self.client
            .send_message(msg)
            .map_err(|_| BackendError::NotConnected)
    }

    fn poll_inbound(&mut self) -> Option<Packet> {
        self.inbound.peek()
    }

    fn drop_inbound(&mut self) {
        self.inbound.clear();
    }

    fn update(&mut self) {
        self.maybe_reconnect();
        if self.inbound.is_empty() {
            if let Some(packet) = self.client.next_packet() {
                let _ = self.inbound.offer(packet);
            }
        }
    }
}
