//! Broker messages: the unit exchanged over a broker stream.
//!
//! A message is `(kind, header, payload)`. It is encoded into one contiguous
//! byte run immediately before it is handed to the socket and discarded once
//! the write completes.

use bytes::{BufMut, Bytes, BytesMut};
use zerocopy::{AsBytes, FromBytes};

use crate::packet::{Header, Packet, PacketType, Payload};
use crate::wire::{
    MessageHeader, MessageKind, WireError, MAX_MESSAGE_PAYLOAD, MESSAGE_HEADER_SIZE,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub header: Header,
    pub payload: Payload,
}

impl Message {
    /// Any message kind. Fails if the payload does not fit one message.
    pub fn new(kind: MessageKind, header: Header, payload: Payload) -> Result<Self, WireError> {
        if payload.size() > MAX_MESSAGE_PAYLOAD {
            return Err(WireError::PayloadTooLarge {
                len: payload.size(),
                max: MAX_MESSAGE_PAYLOAD,
            });
        }
        Ok(Self {
            kind,
            header,
            payload,
        })
    }

    /// A DATA message carrying a packet.
    pub fn data(header: Header, payload: Payload) -> Result<Self, WireError> {
        Self::new(MessageKind::Data, header, payload)
    }

    /// A payload-less control message.
    pub fn control(kind: MessageKind, header: Header) -> Self {
        Self {
            kind,
            header,
            payload: Payload::empty(),
        }
    }

    /// REGISTER for a component on the sending side.
    pub fn register(component: u8) -> Self {
        Self::control(
            MessageKind::Register,
            Header {
                source: component,
                ..Header::default()
            },
        )
    }

    /// UNREGISTER for a component. The broker echoes it with both
    /// destination and source set to the component.
    pub fn unregister(component: u8) -> Self {
        Self::control(
            MessageKind::Unregister,
            Header {
                source: component,
                ..Header::default()
            },
        )
    }

    pub fn close_connection() -> Self {
        Self::control(MessageKind::CloseConnection, Header::default())
    }

    pub fn listen() -> Self {
        Self::control(MessageKind::Listen, Header::default())
    }

    pub fn into_packet(self) -> Packet {
        Packet::new(self.header, self.payload)
    }

    /// Encoded size: fixed header plus payload.
    pub fn encoded_len(&self) -> usize {
        MESSAGE_HEADER_SIZE + self.payload.size()
    }

    pub fn wire_header(&self) -> MessageHeader {
        MessageHeader {
            kind: u32::from(self.kind).to_le_bytes(),
            packet_type: self.header.packet_type.into(),
            is_acknowledge: self.header.is_acknowledge as u8,
            destination: self.header.destination,
            source: self.header.source,
            identifier: self.header.identifier,
            // Bounded by MAX_MESSAGE_PAYLOAD in every constructor.
            length: self.payload.size() as u8,
        }
    }

    /// Serialize into one contiguous buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(self.wire_header().as_bytes());
        buf.put_slice(self.payload.data());
        buf.freeze()
    }

    /// Parse the fixed header. The caller then reads `length` more bytes.
    pub fn decode_header(bytes: &[u8]) -> Result<MessageHeader, WireError> {
        MessageHeader::read_from_prefix(bytes).ok_or(WireError::Truncated(bytes.len()))
    }

    /// Build a message from a parsed header and its body.
    pub fn from_parts(header: &MessageHeader, body: Bytes) -> Result<Self, WireError> {
        let kind = header.kind()?;
        let packet_type = PacketType::try_from(header.packet_type)?;
        Self::new(
            kind,
            Header {
                packet_type,
                is_acknowledge: header.is_acknowledge != 0,
                destination: header.destination,
                source: header.source,
                identifier: header.identifier,
            },
            Payload::from(body),
        )
    }

    /// Decode one complete message from a contiguous buffer.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let header = Self::decode_header(bytes)?;
        let end = MESSAGE_HEADER_SIZE + header.length as usize;
        if bytes.len() < end {
            return Err(WireError::Truncated(bytes.len()));
        }
        Self::from_parts(
            &header,
            Bytes::copy_from_slice(&bytes[MESSAGE_HEADER_SIZE..end]),
        )
    }
}
