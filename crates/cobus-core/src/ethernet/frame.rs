//! Packet ↔ 64-byte frame conversion.
//!
//! Pure functions; no state is carried between calls.

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use super::ContainerLookup;
use crate::packet::{Header, Packet, PacketType, Payload};
use crate::wire::{
    EthernetFrame, LinkAddress, ADDRESS_PREAMBLE, ETHERNET_FRAME_SIZE, ETHER_TYPE,
    MAX_ETHERNET_PAYLOAD, MULTICAST_BIT, WireError,
};

/// Frame `header` and `payload` for the raw link.
///
/// Events (destination 0) carry the group bit in the destination preamble so
/// every node on the segment accepts them.
pub fn encode(
    header: &Header,
    payload: &Payload,
    lookup: &impl ContainerLookup,
) -> Result<[u8; ETHERNET_FRAME_SIZE], WireError> {
    let len = payload.size();
    if len > MAX_ETHERNET_PAYLOAD {
        return Err(WireError::PayloadTooLarge {
            len,
            max: MAX_ETHERNET_PAYLOAD,
        });
    }

    let mut frame = EthernetFrame::new_zeroed();
    frame.destination = LinkAddress {
        preamble: ADDRESS_PREAMBLE,
        container: lookup.container_for(header.destination),
        component: header.destination,
        identifier: header.identifier,
    };
    if header.is_event() {
        frame.destination.preamble[0] |= MULTICAST_BIT;
    }
    frame.source = LinkAddress {
        preamble: ADDRESS_PREAMBLE,
        container: lookup.container_for(header.source),
        component: header.source,
        identifier: header.identifier,
    };
    frame.ether_type = ETHER_TYPE;
    frame.packet_type = header.packet_type.into();
    frame.is_acknowledge = header.is_acknowledge as u8;
    frame.length = len as u8;
    frame.payload[..len].copy_from_slice(payload.data());

    let mut out = [0u8; ETHERNET_FRAME_SIZE];
    out.copy_from_slice(frame.as_bytes());
    Ok(out)
}

/// True if both address preambles carry the cobus magic. The group bit of the
/// destination preamble is ignored.
pub fn has_valid_preambles(frame: &EthernetFrame) -> bool {
    let dst = frame.destination.preamble;
    (dst[0] & !MULTICAST_BIT) == ADDRESS_PREAMBLE[0]
        && dst[1..] == ADDRESS_PREAMBLE[1..]
        && frame.source.preamble == ADDRESS_PREAMBLE
}

/// Parse a received frame. Anything that is not a well-formed cobus frame
/// yields `None`; foreign traffic of the same size is expected on the link.
pub fn decode(bytes: &[u8]) -> Option<Packet> {
    if bytes.len() != ETHERNET_FRAME_SIZE {
        tracing::trace!(len = bytes.len(), "frame of wrong size, dropped");
        return None;
    }
    let frame = EthernetFrame::read_from(bytes)?;
    if !has_valid_preambles(&frame) {
        tracing::debug!("frame preamble mismatch, dropped");
        return None;
    }

    let len = frame.length as usize;
    if len > MAX_ETHERNET_PAYLOAD {
        tracing::debug!(len, "frame length field out of range, dropped");
        return None;
    }
    let packet_type = match PacketType::try_from(frame.packet_type) {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!(error = %e, "frame dropped");
            return None;
        }
    };

    let header = Header::new(
        packet_type,
        frame.is_acknowledge != 0,
        frame.destination.component,
        frame.source.component,
        frame.destination.identifier,
    );
    Some(Packet::new(
        header,
        Payload::copy_from_slice(&frame.payload[..len]),
    ))
}
