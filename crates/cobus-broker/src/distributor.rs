//! Server-side delivery worker, one per registered remote component.
//!
//! A distributor owns its own queue and task, so a slow component never
//! holds up delivery to another. It delivers over the stream its component
//! registered on.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use cobus_core::Message;

use crate::connection::{Connection, Outbound};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributorState {
    Disconnected,
    Connecting,
    Connected,
}

pub struct Distributor {
    component: u8,
    connection_id: u64,
    peer: SocketAddr,
    queue: mpsc::UnboundedSender<Message>,
    state: Arc<watch::Sender<DistributorState>>,
    task: JoinHandle<()>,
}

impl Distributor {
    /// Start delivering to `component` over `connection`.
    pub fn spawn(component: u8, connection: &Connection) -> Self {
        let (queue, mut rx) = mpsc::unbounded_channel::<Message>();
        let (state, _) = watch::channel(DistributorState::Connecting);
        let state = Arc::new(state);
        let outbound = connection.outbound();
        let peer = connection.peer();

        let task = {
            let state = state.clone();
            tokio::spawn(async move {
                state.send_replace(DistributorState::Connected);
                tracing::debug!(component, %peer, "distributor running");
                while let Some(msg) = rx.recv().await {
                    if outbound.send(Outbound::Message(msg)).is_err() {
                        tracing::warn!(component, %peer, "connection gone, distributor stopping");
                        break;
                    }
                }
                drop(rx);
                state.send_replace(DistributorState::Disconnected);
            })
        };

        Self {
            component,
            connection_id: connection.id(),
            peer,
            queue,
            state,
            task,
        }
    }

    pub fn component(&self) -> u8 {
        self.component
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> DistributorState {
        *self.state.borrow()
    }

    /// Queue a message for the component. False once the worker has stopped.
    pub fn send_message(&self, msg: Message) -> bool {
        self.queue.send(msg).is_ok()
    }

    /// Stop the worker after it has forwarded everything already queued.
    /// Consumes the distributor, so it can only happen once.
    pub async fn disconnect(self) {
        let Self {
            component,
            queue,
            state,
            task,
            ..
        } = self;
        drop(queue);
        if let Err(e) = task.await {
            tracing::warn!(component, error = %e, "distributor task failed");
        }
        state.send_replace(DistributorState::Disconnected);
        tracing::debug!(component, "distributor stopped");
    }
}

impl std::fmt::Debug for Distributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Distributor")
            .field("component", &self.component)
            .field("connection_id", &self.connection_id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish()
    }
}
