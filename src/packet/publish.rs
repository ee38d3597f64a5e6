//! PUBLISH packets, inbound and outbound.

use super::{
    encode_remaining_length, read_remaining_length, read_utf8_string, remaining_length_size,
    write_u16, write_utf8_string, PacketType, QoS,
};
use crate::error::Error;

/// A decoded PUBLISH packet.
///
/// This is also the message view handed to subscription callbacks; the
/// topic and payload borrow from the client's receive buffer and are only
/// valid for the duration of the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publish<'a> {
    /// Whether this is a retransmission.
    pub dup: bool,
    /// Delivery QoS.
    pub qos: QoS,
    /// Whether the broker stored the message as retained.
    pub retained: bool,
    /// Packet identifier; 0 for QoS 0 messages, which carry none.
    pub packet_id: u16,
    /// The topic the message was published to.
    pub topic: &'a str,
    /// The message payload.
    pub payload: &'a [u8],
}

/// Serialize a PUBLISH packet into `buf`, returning the encoded length.
pub fn serialize_publish(
    buf: &mut [u8],
    dup: bool,
    qos: QoS,
    retained: bool,
    packet_id: u16,
    topic: &str,
    payload: &[u8],
) -> Result<usize, Error> {
    let mut remaining_len = 2 + topic.len() + payload.len();
    if qos != QoS::AtMostOnce {
        remaining_len += 2;
    }

    let total = 1 + remaining_length_size(remaining_len) + remaining_len;
    if total > buf.len() {
        return Err(Error::PacketTooLarge);
    }

    let mut header = (PacketType::Publish as u8) << 4 | (qos as u8) << 1;
    if dup {
        header |= 0x08;
    }
    if retained {
        header |= 0x01;
    }
    buf[0] = header;

    let mut cursor = 1 + encode_remaining_length(&mut buf[1..], remaining_len)?;
    write_utf8_string(buf, &mut cursor, topic)?;
    if qos != QoS::AtMostOnce {
        write_u16(buf, &mut cursor, packet_id);
    }
    buf[cursor..cursor + payload.len()].copy_from_slice(payload);
    Ok(cursor + payload.len())
}

/// Deserialize a PUBLISH packet from `buf`.
pub fn deserialize_publish(buf: &[u8]) -> Result<Publish<'_>, Error> {
    let header = *buf.first().ok_or(Error::MalformedPacket)?;
    if PacketType::from_header_byte(header)? != PacketType::Publish {
        return Err(Error::MalformedPacket);
    }
    let qos = QoS::from_bits((header >> 1) & 0x03)?;

    let mut cursor = 1;
    let remaining_len = read_remaining_length(buf, &mut cursor)?;
    let end = cursor + remaining_len;
    if end > buf.len() {
        return Err(Error::MalformedPacket);
    }

    let topic = read_utf8_string(buf, &mut cursor)?;
    let packet_id = if qos != QoS::AtMostOnce {
        super::read_u16(buf, &mut cursor)?
    } else {
        0
    };
    if cursor > end {
        return Err(Error::MalformedPacket);
    }

    Ok(Publish {
        dup: header & 0x08 != 0,
        qos,
        retained: header & 0x01 != 0,
        packet_id,
        topic,
        payload: &buf[cursor..end],
    })
}
