//! cobus wire format: on-wire layouts for both links.
//!
//! These types ARE the protocol. Every field, every size and every reserved
//! byte is part of the wire format; changing anything here breaks every
//! deployed node.
//!
//! All fields are single bytes or byte arrays, so the `#[repr(C)]` layouts are
//! padding-free and zerocopy derives give allocation-free serialization with
//! no unsafe code.

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Ethernet framing ─────────────────────────────────────────────────────────

/// Size of every frame on the raw Ethernet link.
pub const ETHERNET_FRAME_SIZE: usize = 64;

/// Payload bytes that fit in one Ethernet frame after the 18 header bytes.
pub const MAX_ETHERNET_PAYLOAD: usize = 46;

/// Address preamble identifying the cobus address space. Bit 0 of the first
/// byte is the Ethernet group (multicast) bit and is set for events.
pub const ADDRESS_PREAMBLE: [u8; 3] = [0x8e, b'R', b'C'];

/// Group bit in the first preamble byte of the destination address.
pub const MULTICAST_BIT: u8 = 0x01;

/// Frame type tag separating cobus frames from ordinary Ethernet payloads.
pub const ETHER_TYPE: [u8; 2] = [0x82, 0x11];

/// One half of the link-layer address: preamble, container, component, and
/// the packet identifier (duplicated in both halves).
///
/// Wire size: 6 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct LinkAddress {
    pub preamble: [u8; 3],
    pub container: u8,
    pub component: u8,
    pub identifier: u8,
}

assert_eq_size!(LinkAddress, [u8; 6]);

/// A complete frame on the raw Ethernet link.
///
/// Wire size: 64 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct EthernetFrame {
    pub destination: LinkAddress,
    pub source: LinkAddress,
    pub ether_type: [u8; 2],
    /// `PacketType` as 0/1/2.
    pub packet_type: u8,
    /// 0 or 1.
    pub is_acknowledge: u8,
    /// Number of valid bytes in `payload`, 0..=46.
    pub length: u8,
    /// Must be zero.
    pub reserved: u8,
    /// Payload followed by zero padding.
    pub payload: [u8; MAX_ETHERNET_PAYLOAD],
}

assert_eq_size!(EthernetFrame, [u8; ETHERNET_FRAME_SIZE]);

// ── Broker stream framing ────────────────────────────────────────────────────

/// Payload bytes a single broker message may carry.
pub const MAX_MESSAGE_PAYLOAD: usize = 252;

/// Fixed header size of a broker message.
pub const MESSAGE_HEADER_SIZE: usize = std::mem::size_of::<MessageHeader>();

/// What a broker message asks the other end to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageKind {
    /// Declare a component living behind this connection.
    Register = 1,
    /// Retract a component; echoed back by the broker as confirmation.
    Unregister = 2,
    /// Last message on a connection before the socket is shut.
    CloseConnection = 3,
    /// Mirror every DATA message to this connection.
    Listen = 4,
    Ping = 5,
    /// Carries a packet.
    Data = 6,
    Error = 7,
}

impl TryFrom<u32> for MessageKind {
    type Error = WireError;

    fn try_from(value: u32) -> Result<Self, WireError> {
        match value {
            1 => Ok(MessageKind::Register),
            2 => Ok(MessageKind::Unregister),
            3 => Ok(MessageKind::CloseConnection),
            4 => Ok(MessageKind::Listen),
            5 => Ok(MessageKind::Ping),
            6 => Ok(MessageKind::Data),
            7 => Ok(MessageKind::Error),
            other => Err(WireError::UnknownMessageKind(other)),
        }
    }
}

impl From<MessageKind> for u32 {
    fn from(k: MessageKind) -> u32 {
        k as u32
    }
}

/// Fixed-size prefix of every broker message: a 4-byte little-endian kind
/// tag, the packet header, and the payload length that follows.
///
/// Wire size: 10 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct MessageHeader {
    pub kind: [u8; 4],
    pub packet_type: u8,
    pub is_acknowledge: u8,
    pub destination: u8,
    pub source: u8,
    pub identifier: u8,
    /// Payload bytes following this header, 0..=252.
    pub length: u8,
}

assert_eq_size!(MessageHeader, [u8; 10]);

impl MessageHeader {
    pub fn kind(&self) -> Result<MessageKind, WireError> {
        MessageKind::try_from(u32::from_le_bytes(self.kind))
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown packet type byte: 0x{0:02x}")]
    UnknownPacketType(u8),

    #[error("unknown message kind: {0}")]
    UnknownMessageKind(u32),

    #[error("payload length {len} exceeds maximum {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("truncated header: got {0} bytes, need {}", MESSAGE_HEADER_SIZE)]
    Truncated(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
