//! SUBSCRIBE/SUBACK and UNSUBSCRIBE/UNSUBACK packets.
//!
//! Single-topic requests only: the blocking command facade subscribes to
//! one filter per round trip.

use super::{
    encode_remaining_length, read_remaining_length, remaining_length_size, write_u16,
    write_utf8_string, GrantedQoS, PacketType, QoS,
};
use crate::error::Error;

/// A decoded SUBACK packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Suback {
    /// Identifier echoed from the SUBSCRIBE request.
    pub packet_id: u16,
    /// The broker's verdict on the requested subscription.
    pub granted: GrantedQoS,
}

/// Serialize a single-topic SUBSCRIBE packet into `buf`.
pub fn serialize_subscribe(
    buf: &mut [u8],
    packet_id: u16,
    filter: &str,
    qos: QoS,
) -> Result<usize, Error> {
    let remaining_len = 2 + 2 + filter.len() + 1;
    let total = 1 + remaining_length_size(remaining_len) + remaining_len;
    if total > buf.len() {
        return Err(Error::PacketTooLarge);
    }

    // SUBSCRIBE requires the reserved flag bits 0b0010
    buf[0] = (PacketType::Subscribe as u8) << 4 | 0x02;
    let mut cursor = 1 + encode_remaining_length(&mut buf[1..], remaining_len)?;
    write_u16(buf, &mut cursor, packet_id);
    write_utf8_string(buf, &mut cursor, filter)?;
    buf[cursor] = qos as u8;
    Ok(cursor + 1)
}

/// Deserialize a single-topic SUBACK packet from `buf`.
pub fn deserialize_suback(buf: &[u8]) -> Result<Suback, Error> {
    let header = *buf.first().ok_or(Error::MalformedPacket)?;
    if PacketType::from_header_byte(header)? != PacketType::Suback {
        return Err(Error::MalformedPacket);
    }
    let mut cursor = 1;
    let remaining_len = read_remaining_length(buf, &mut cursor)?;
    if remaining_len < 3 || buf.len() < cursor + 3 {
        return Err(Error::MalformedPacket);
    }
    let packet_id = super::read_u16(buf, &mut cursor)?;
    Ok(Suback {
        packet_id,
        granted: GrantedQoS::from_byte(buf[cursor])?,
    })
}

/// Serialize a single-topic UNSUBSCRIBE packet into `buf`.
pub fn serialize_unsubscribe(buf: &mut [u8], packet_id: u16, filter: &str) -> Result<usize, Error> {
    let remaining_len = 2 + 2 + filter.len();
    let total = 1 + remaining_length_size(remaining_len) + remaining_len;
    if total > buf.len() {
        return Err(Error::PacketTooLarge);
    }

    buf[0] = (PacketType::Unsubscribe as u8) << 4 | 0x02;
    let mut cursor = 1 + encode_remaining_length(&mut buf[1..], remaining_len)?;
    write_u16(buf, &mut cursor, packet_id);
    write_utf8_string(buf, &mut cursor, filter)?;
    Ok(cursor)
}

/// Deserialize an UNSUBACK packet from `buf`, returning the echoed packet
/// identifier.
pub fn deserialize_unsuback(buf: &[u8]) -> Result<u16, Error> {
    let header = *buf.first().ok_or(Error::MalformedPacket)?;
    if PacketType::from_header_byte(header)? != PacketType::Unsuback {
        return Err(Error::MalformedPacket);
    }
    let mut cursor = 1;
    let remaining_len = read_remaining_length(buf, &mut cursor)?;
    if remaining_len < 2 {
        return Err(Error::MalformedPacket);
    }
    super::read_u16(buf, &mut cursor)
}
