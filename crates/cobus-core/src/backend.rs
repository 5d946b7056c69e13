//! The contract every transport implements.

use crate::packet::{Header, Packet, Payload};
use crate::wire::WireError;

/// A transport seen from the polling side.
///
/// Nothing here blocks. The owner calls [`Backend::update`] regularly from its
/// loop; `update` fills at most one pending inbound slot. While that slot is
/// occupied further `update` calls leave it untouched, so an accepted packet
/// is never overwritten or lost. The link layer queues or drops whatever
/// arrives in the meantime.
pub trait Backend {
    /// Hand a packet to the link. Never blocks.
    fn send(&mut self, header: Header, payload: Payload) -> Result<(), BackendError>;

    /// The pending inbound packet, if any. Repeated polls return the same
    /// packet until [`Backend::drop_inbound`] releases it.
    fn poll_inbound(&mut self) -> Option<Packet>;

    /// Release the pending packet. A second call without a new packet in
    /// between is a no-op.
    fn drop_inbound(&mut self);

    /// Drive link-level progress.
    fn update(&mut self);
}

/// Why a send did not go out. Never fatal to the caller's loop.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("payload of {len} bytes does not fit the link (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("link is not connected")]
    NotConnected,

    #[error("link driver rejected the frame")]
    LinkRejected,

    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

/// Single pending-packet slot shared by backend implementations.
#[derive(Debug, Default)]
pub struct InboundSlot {
    pending: Option<Packet>,
}

impl InboundSlot {
    pub fn is_empty(&self) -> bool {
        self.pending.is_none()
    }

    /// Store `packet` if the slot is free. Returns it back otherwise.
    pub fn offer(&mut self, packet: Packet) -> Result<(), Packet> {
        match self.pending {
            Some(_) => Err(packet),
            None => {
                self.pending = Some(packet);
                Ok(())
            }
        }
    }

    pub fn peek(&self) -> Option<Packet> {
        self.pending.clone()
    }

    pub fn clear(&mut self) {
        self.pending.take();
    }
}
