//! Client-side delivery queue for one local component.
//!
//! A receiver owns no socket. The client's read loop feeds it over a channel
//! and its task appends to an inbox the component drains by polling.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use cobus_core::Packet;

#[derive(Debug)]
pub(crate) enum ReceiverCommand {
    Deliver(Packet),
    Shutdown,
}

/// Packets waiting for a component, oldest first.
#[derive(Debug, Clone, Default)]
pub struct Inbox {
    queue: Arc<Mutex<VecDeque<Packet>>>,
}

impl Inbox {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Packet>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, packet: Packet) {
        self.lock().push_back(packet);
    }

    pub fn pop(&self) -> Option<Packet> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Move every queued packet to the back of `other`, keeping their order.
    pub fn drain_into(&self, other: &Inbox) -> usize {
        let moved: Vec<Packet> = self.lock().drain(..).collect();
        let count = moved.len();
        other.lock().extend(moved);
        count
    }
}

pub struct Receiver {
    component: u8,
    commands: mpsc::UnboundedSender<ReceiverCommand>,
    inbox: Inbox,
    task: JoinHandle<()>,
}

impl Receiver {
    pub(crate) fn spawn(component: u8, runtime: &Handle) -> Self {
        let (commands, mut rx) = mpsc::unbounded_channel();
        let inbox = Inbox::default();
        let task = {
            let inbox = inbox.clone();
            runtime.spawn(async move {
                while let Some(cmd) = rx.recv().await {
                    match cmd {
                        ReceiverCommand::Deliver(packet) => {
                            tracing::trace!(component, header = %packet.header, "queued for component");
                            inbox.push(packet);
                        }
                        ReceiverCommand::Shutdown => break,
                    }
                }
                tracing::debug!(component, "receiver stopped");
            })
        };
        Self {
            component,
            commands,
            inbox,
            task,
        }
    }

    pub fn component(&self) -> u8 {
        self.component
    }

    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    /// Hand an inbound packet to the worker. False once it has stopped.
    pub(crate) fn deliver(&self, packet: Packet) -> bool {
        self.commands.send(ReceiverCommand::Deliver(packet)).is_ok()
    }

    /// Stop the worker and wait for it. Packets delivered before the call
    /// still land in the returned inbox.
    pub(crate) async fn shutdown_command(self) -> Inbox {
        let _ = self.commands.send(ReceiverCommand::Shutdown);
        if let Err(e) = self.task.await {
            tracing::warn!(component = self.component, error = %e, "receiver task failed");
        }
        self.inbox
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("component", &self.component)
            .field("queued", &self.inbox.len())
            .finish()
    }
}
