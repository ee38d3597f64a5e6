//! Two-byte acknowledgement packets and the bodyless control packets.
//!
//! PUBACK, PUBREC, PUBREL and PUBCOMP share one wire shape (a packet
//! identifier and nothing else), so one serializer/deserializer pair covers
//! the whole QoS handshake. PINGREQ and DISCONNECT have no body at all.

use super::{encode_remaining_length, read_remaining_length, PacketType};
use crate::error::Error;

/// A decoded publish acknowledgement (PUBACK, PUBREC, PUBREL or PUBCOMP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Which acknowledgement this is.
    pub packet_type: PacketType,
    /// Whether this is a retransmission.
    pub dup: bool,
    /// Identifier of the publish flow being acknowledged.
    pub packet_id: u16,
}

/// Serialize an acknowledgement packet into `buf`.
///
/// `packet_type` must be one of the four publish acknowledgements.
pub fn serialize_ack(
    buf: &mut [u8],
    packet_type: PacketType,
    dup: bool,
    packet_id: u16,
) -> Result<usize, Error> {
    if buf.len() < 4 {
        return Err(Error::PacketTooLarge);
    }
    let mut header = (packet_type as u8) << 4;
    if packet_type == PacketType::Pubrel {
        // PUBREL carries the reserved flag bits 0b0010
        header |= 0x02;
    }
    if dup {
        header |= 0x08;
    }
    buf[0] = header;
    let mut cursor = 1 + encode_remaining_length(&mut buf[1..], 2)?;
    buf[cursor..cursor + 2].copy_from_slice(&packet_id.to_be_bytes());
    cursor += 2;
    Ok(cursor)
}

/// Deserialize an acknowledgement packet from `buf`.
pub fn deserialize_ack(buf: &[u8]) -> Result<Ack, Error> {
    let header = *buf.first().ok_or(Error::MalformedPacket)?;
    let packet_type = PacketType::from_header_byte(header)?;
    match packet_type {
        PacketType::Puback | PacketType::Pubrec | PacketType::Pubrel | PacketType::Pubcomp => {}
        _ => return Err(Error::MalformedPacket),
    }
    let mut cursor = 1;
    let remaining_len = read_remaining_length(buf, &mut cursor)?;
    if remaining_len < 2 {
        return Err(Error::MalformedPacket);
    }
    let packet_id = super::read_u16(buf, &mut cursor)?;
    Ok(Ack {
        packet_type,
        dup: header & 0x08 != 0,
        packet_id,
    })
}

/// Serialize a PINGREQ packet into `buf`.
pub fn serialize_pingreq(buf: &mut [u8]) -> Result<usize, Error> {
    if buf.len() < 2 {
        return Err(Error::PacketTooLarge);
    }
    buf[0] = (PacketType::Pingreq as u8) << 4;
    buf[1] = 0;
    Ok(2)
}

/// Serialize a DISCONNECT packet into `buf`.
pub fn serialize_disconnect(buf: &mut [u8]) -> Result<usize, Error> {
    if buf.len() < 2 {
        return Err(Error::PacketTooLarge);
    }
    buf[0] = (PacketType::Disconnect as u8) << 4;
    buf[1] = 0;
    Ok(2)
}
