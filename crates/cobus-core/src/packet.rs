//! Packet model: the transport-independent unit exchanged between a
//! backend and a dispatcher.
//!
//! A packet is a small fixed header plus a reference-counted payload. The
//! payload is backed by `bytes::Bytes`: cloning a payload shares the storage,
//! and the last holder to drop it releases the buffer.

use std::fmt;

use bytes::Bytes;

use crate::wire::WireError;

/// Largest payload a packet can carry. Individual links carry less
/// (46 bytes on Ethernet, 252 bytes on the TCP broker).
pub const MAX_PAYLOAD: usize = 255;

/// Component id reserved for events. A packet addressed to it has no single
/// destination.
pub const EVENT_DESTINATION: u8 = 0;

// ── Header ────────────────────────────────────────────────────────────────────

/// Message class carried in every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PacketType {
    /// Action invocation, or an event when the destination is 0.
    #[default]
    Request = 0,
    Response = 1,
    NegativeResponse = 2,
}

impl TryFrom<u8> for PacketType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketType::Request),
            1 => Ok(PacketType::Response),
            2 => Ok(PacketType::NegativeResponse),
            other => Err(WireError::UnknownPacketType(other)),
        }
    }
}

impl From<PacketType> for u8 {
    fn from(t: PacketType) -> u8 {
        t as u8
    }
}

/// Routing header. Copied by value between layers and never modified after
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Header {
    pub packet_type: PacketType,
    pub is_acknowledge: bool,
    /// Destination component id. 0 marks an event.
    pub destination: u8,
    /// Source component id.
    pub source: u8,
    /// Action id for requests, correlation/event id otherwise.
    pub identifier: u8,
}

impl Header {
    pub const fn new(
        packet_type: PacketType,
        is_acknowledge: bool,
        destination: u8,
        source: u8,
        identifier: u8,
    ) -> Self {
        Self {
            packet_type,
            is_acknowledge,
            destination,
            source,
            identifier,
        }
    }

    /// An event published by `source`.
    pub const fn event(source: u8, identifier: u8) -> Self {
        Self::new(
            PacketType::Request,
            false,
            EVENT_DESTINATION,
            source,
            identifier,
        )
    }

    pub fn is_event(&self) -> bool {
        self.destination == EVENT_DESTINATION
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}{} {:#04x} -> {:#04x} id={:#04x}",
            self.packet_type,
            if self.is_acknowledge { " (ack)" } else { "" },
            self.source,
            self.destination,
            self.identifier
        )
    }
}

// ── Payload ───────────────────────────────────────────────────────────────────

/// Immutable payload buffer, 0–255 bytes.
///
/// Size is fixed at construction. Passing more than [`MAX_PAYLOAD`] bytes is a
/// caller bug and trips a debug assertion.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Payload(Bytes);

impl Payload {
    pub fn empty() -> Self {
        Self(Bytes::new())
    }

    /// Copy transient data; the caller keeps ownership of `data`.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        debug_assert!(data.len() <= MAX_PAYLOAD, "payload of {} bytes", data.len());
        Self(Bytes::copy_from_slice(data))
    }

    /// Adopt an owned buffer without copying.
    pub fn from_vec(data: Vec<u8>) -> Self {
        debug_assert!(data.len() <= MAX_PAYLOAD, "payload of {} bytes", data.len());
        Self(Bytes::from(data))
    }

    pub fn size(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.0
    }

    /// The shared buffer backing this payload.
    pub fn bytes(&self) -> &Bytes {
        &self.0
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        debug_assert!(bytes.len() <= MAX_PAYLOAD, "payload of {} bytes", bytes.len());
        Self(bytes)
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({} bytes: {})", self.0.len(), hex::encode(&self.0))
    }
}

// ── Packet ────────────────────────────────────────────────────────────────────

/// A header and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Payload,
}

impl Packet {
    pub fn new(header: Header, payload: Payload) -> Self {
        Self { header, payload }
    }
}
