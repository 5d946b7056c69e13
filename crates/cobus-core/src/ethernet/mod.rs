//! Backend over a raw Ethernet link: one packet per 64-byte frame, routing
//! carried in the link-layer addresses.

mod frame;
mod loopback;

use std::collections::HashMap;

pub use frame::{decode, encode, has_valid_preambles};
pub use loopback::LoopbackDriver;

use crate::backend::{Backend, BackendError, InboundSlot};
use crate::packet::{Header, Packet, Payload};
use crate::wire::{WireError, ETHERNET_FRAME_SIZE};

/// Container id reported for components with no known home.
pub const UNKNOWN_CONTAINER: u8 = 0xff;

/// Resolves which container hosts a component.
pub trait ContainerLookup {
    fn container_for(&self, component: u8) -> u8;
}

impl<F: Fn(u8) -> u8> ContainerLookup for F {
    fn container_for(&self, component: u8) -> u8 {
        self(component)
    }
}

/// Table-backed lookup. Unknown components map to [`UNKNOWN_CONTAINER`].
#[derive(Debug, Clone, Default)]
pub struct ContainerTable {
    entries: HashMap<u8, u8>,
}

impl ContainerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, component: u8, container: u8) -> Option<u8> {
        self.entries.insert(component, container)
    }
}

impl FromIterator<(u8, u8)> for ContainerTable {
    fn from_iter<I: IntoIterator<Item = (u8, u8)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl ContainerLookup for ContainerTable {
    fn container_for(&self, component: u8) -> u8 {
        self.entries
            .get(&component)
            .copied()
            .unwrap_or(UNKNOWN_CONTAINER)
    }
}

/// Byte-level driver for one physical Ethernet chip.
pub trait FrameDriver {
    /// Queue a frame for transmission. False if the chip refused it.
    fn send_frame(&mut self, frame: &[u8; ETHERNET_FRAME_SIZE]) -> bool;

    /// Next received frame and its length in bytes, if any.
    fn receive_frame(&mut self) -> Option<(usize, [u8; ETHERNET_FRAME_SIZE])>;
}

/// [`Backend`] over a [`FrameDriver`].
pub struct EthernetBackend<D, L> {
    driver: D,
    lookup: L,
    inbound: InboundSlot,
}

impl<D: FrameDriver, L: ContainerLookup> EthernetBackend<D, L> {
    pub fn new(driver: D, lookup: L) -> Self {
        Self {
            driver,
            lookup,
            inbound: InboundSlot::default(),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}

impl<D: FrameDriver, L: ContainerLookup> Backend for EthernetBackend<D, L> {
    fn send(&mut self, header: Header, payload: Payload) -> Result<(), BackendError> {
        let frame = encode(&header, &payload, &self.lookup).map_err(|e| match e {
            WireError::PayloadTooLarge { len, max } => BackendError::PayloadTooLarge { len, max },
            other => BackendError::Wire(other),
        })?;
        tracing::trace!(%header, frame = %hex::encode(frame), "ethernet tx");
        if !self.driver.send_frame(&frame) {
            return Err(BackendError::LinkRejected);
        }
        Ok(())
    }

    fn poll_inbound(&mut self) -> Option<Packet> {
        self.inbound.peek()
    }

    fn drop_inbound(&mut self) {
        self.inbound.clear();
    }

    fn update(&mut self) {
        // Leave frames in the driver while a packet is still pending.
        if !self.inbound.is_empty() {
            return;
        }
        let Some((len, buf)) = self.driver.receive_frame() else {
            return;
        };
        let received = &buf[..len.min(ETHERNET_FRAME_SIZE)];
        tracing::trace!(len, frame = %hex::encode(received), "ethernet rx");
        if let Some(packet) = decode(received) {
            tracing::debug!(header = %packet.header, "ethernet packet accepted");
            let _ = self.inbound.offer(packet);
        }
    }
}
