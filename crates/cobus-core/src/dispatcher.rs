//! Routes inbound packets from one backend to one postman.

use crate::backend::{Backend, BackendError};
use crate::packet::{Header, Payload};
use crate::postman::{DeliverInfo, Postman};

/// Transport-agnostic pump connecting a [`Backend`] to a [`Postman`].
///
/// Each [`Dispatcher::update`] drains at most one packet. Delivery is
/// at-most-once: whatever the outcome, the inbound slot is dropped afterwards
/// and nothing is retried.
pub struct Dispatcher<B, P> {
    backend: B,
    postman: P,
}

impl<B: Backend, P: Postman> Dispatcher<B, P> {
    pub fn new(backend: B, postman: P) -> Self {
        Self { backend, postman }
    }

    /// Run one tick. Returns the delivery outcome if a packet was pending.
    pub fn update(&mut self) -> Option<DeliverInfo> {
        self.backend.update();
        let packet = self.backend.poll_inbound()?;
        let info = self.deliver(&packet.header, &packet.payload);
        self.backend.drop_inbound();
        Some(info)
    }

    fn deliver(&mut self, header: &Header, payload: &Payload) -> DeliverInfo {
        // Events have no single destination to look up.
        if !header.is_event() && !self.postman.is_component_available(header.destination) {
            tracing::warn!(component = header.destination, %header, "no such component, dropped");
            return DeliverInfo::NoComponent;
        }

        let info = self.postman.deliver_packet(header, payload);
        match info {
            DeliverInfo::Ok => tracing::trace!(%header, len = payload.size(), "delivered"),
            DeliverInfo::NoAction => {
                tracing::debug!(%header, "no handler for identifier, dropped")
            }
            DeliverInfo::NoComponent => {
                tracing::warn!(component = header.destination, %header, "no such component, dropped")
            }
        }
        info
    }

    /// Forward an outbound packet to the backend.
    pub fn send(&mut self, header: Header, payload: Payload) -> Result<(), BackendError> {
        self.backend.send(header, payload).inspect_err(|e| {
            tracing::warn!(%header, error = %e, "send failed");
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn postman(&self) -> &P {
        &self.postman
    }

    pub fn postman_mut(&mut self) -> &mut P {
        &mut self.postman
    }

    pub fn into_parts(self) -> (B, P) {
        (self.backend, self.postman)
    }
}
