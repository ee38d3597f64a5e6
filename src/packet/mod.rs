//! MQTT 3.1.1 wire codec
//!
//! Serialization and deserialization of MQTT control packets, operating on
//! caller-supplied byte slices so the codec performs no allocation. The
//! client engine keeps one send and one receive buffer and points every
//! codec call at them; the functions here can equally be used standalone to
//! build or inspect packets.
//!
//! Serializers return the number of bytes written; deserializers return
//! borrowed views into the packet buffer.

use crate::error::Error;

mod ack;
mod connect;
mod publish;
mod subscribe;

pub use ack::{
    deserialize_ack, serialize_ack, serialize_disconnect, serialize_pingreq, Ack,
};
pub use connect::{deserialize_connack, serialize_connect, Connack, ConnectOptions, LastWill};
pub use publish::{deserialize_publish, serialize_publish, Publish};
pub use subscribe::{
    deserialize_suback, deserialize_unsuback, serialize_subscribe, serialize_unsubscribe, Suback,
};

/// Largest value representable by the remaining-length varint.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// MQTT control packet types, as carried in the high nibble of the fixed
/// header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PacketType {
    /// Client connection request.
    Connect = 1,
    /// Connection acknowledgement.
    Connack = 2,
    /// Application message.
    Publish = 3,
    /// QoS 1 publish acknowledgement.
    Puback = 4,
    /// QoS 2 publish received (step 1).
    Pubrec = 5,
    /// QoS 2 publish release (step 2).
    Pubrel = 6,
    /// QoS 2 publish complete (step 3).
    Pubcomp = 7,
    /// Subscription request.
    Subscribe = 8,
    /// Subscription acknowledgement.
    Suback = 9,
    /// Unsubscribe request.
    Unsubscribe = 10,
    /// Unsubscribe acknowledgement.
    Unsuback = 11,
    /// Keep-alive probe.
    Pingreq = 12,
    /// Keep-alive response.
    Pingresp = 13,
    /// Clean disconnect notification.
    Disconnect = 14,
}

impl PacketType {
    /// Extract the packet type from a fixed-header byte.
    pub fn from_header_byte(byte: u8) -> Result<Self, Error> {
        Ok(match byte >> 4 {
            1 => Self::Connect,
            2 => Self::Connack,
            3 => Self::Publish,
            4 => Self::Puback,
            5 => Self::Pubrec,
            6 => Self::Pubrel,
            7 => Self::Pubcomp,
            8 => Self::Subscribe,
            9 => Self::Suback,
            10 => Self::Unsubscribe,
            11 => Self::Unsuback,
            12 => Self::Pingreq,
            13 => Self::Pingresp,
            14 => Self::Disconnect,
            _ => return Err(Error::MalformedPacket),
        })
    }
}

/// Quality of Service levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    /// At most once delivery.
    AtMostOnce = 0,
    /// At least once delivery.
    AtLeastOnce = 1,
    /// Exactly once delivery.
    ExactlyOnce = 2,
}

impl QoS {
    pub(crate) fn from_bits(bits: u8) -> Result<Self, Error> {
        match bits {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            _ => Err(Error::MalformedPacket),
        }
    }
}

/// The QoS a broker granted in a SUBACK, or its refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GrantedQoS {
    /// Subscription granted at QoS 0.
    AtMostOnce,
    /// Subscription granted at QoS 1.
    AtLeastOnce,
    /// Subscription granted at QoS 2.
    ExactlyOnce,
    /// The broker refused the subscription (return code `0x80`).
    Failure,
}

impl GrantedQoS {
    pub(crate) fn from_byte(byte: u8) -> Result<Self, Error> {
        match byte {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            0x80 => Ok(Self::Failure),
            _ => Err(Error::MalformedPacket),
        }
    }
}

/// CONNACK return codes, per MQTT 3.1.1 §3.2.2.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReturnCode {
    /// The connection was accepted.
    Accepted,
    /// The broker does not support the requested protocol level.
    UnacceptableProtocolVersion,
    /// The client identifier is not allowed by the broker.
    IdentifierRejected,
    /// The MQTT service is unavailable.
    ServerUnavailable,
    /// The user name or password is malformed.
    BadUserNameOrPassword,
    /// The client is not authorized to connect.
    NotAuthorized,
    /// A return code outside the range reserved by MQTT 3.1.1.
    Other(u8),
}

impl From<u8> for ConnectReturnCode {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Accepted,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            other => Self::Other(other),
        }
    }
}

/// Encode `value` as a remaining-length varint at the start of `buf`,
/// returning the number of bytes written (1 to 4).
pub fn encode_remaining_length(buf: &mut [u8], mut value: usize) -> Result<usize, Error> {
    if value > MAX_REMAINING_LENGTH {
        return Err(Error::PacketTooLarge);
    }
    let mut written = 0;
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        *buf.get_mut(written).ok_or(Error::PacketTooLarge)? = byte;
        written += 1;
        if value == 0 {
            return Ok(written);
        }
    }
}

/// Decode a remaining-length varint, advancing `cursor` past it.
pub(crate) fn read_remaining_length(buf: &[u8], cursor: &mut usize) -> Result<usize, Error> {
    let mut multiplier = 1usize;
    let mut value = 0usize;
    for i in 0..4 {
        let byte = *buf.get(*cursor + i).ok_or(Error::MalformedPacket)?;
        value += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            *cursor += i + 1;
            return Ok(value);
        }
        multiplier *= 128;
    }
    // a fifth continuation byte is never valid
    Err(Error::MalformedPacket)
}

/// Number of varint bytes needed to encode `value`.
pub(crate) fn remaining_length_size(value: usize) -> usize {
    match value {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

pub(crate) fn write_u16(buf: &mut [u8], cursor: &mut usize, value: u16) {
    buf[*cursor..*cursor + 2].copy_from_slice(&value.to_be_bytes());
    *cursor += 2;
}

/// Write a length-prefixed UTF-8 string field.
pub(crate) fn write_utf8_string(buf: &mut [u8], cursor: &mut usize, s: &str) -> Result<(), Error> {
    write_binary_field(buf, cursor, s.as_bytes())
}

/// Write a length-prefixed binary field.
pub(crate) fn write_binary_field(
    buf: &mut [u8],
    cursor: &mut usize,
    bytes: &[u8],
) -> Result<(), Error> {
    if bytes.len() > u16::MAX as usize {
        return Err(Error::PacketTooLarge);
    }
    write_u16(buf, cursor, bytes.len() as u16);
    buf[*cursor..*cursor + bytes.len()].copy_from_slice(bytes);
    *cursor += bytes.len();
    Ok(())
}

pub(crate) fn read_u16(buf: &[u8], cursor: &mut usize) -> Result<u16, Error> {
    let bytes = buf
        .get(*cursor..*cursor + 2)
        .ok_or(Error::MalformedPacket)?;
    *cursor += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_utf8_string<'a>(buf: &'a [u8], cursor: &mut usize) -> Result<&'a str, Error> {
    let len = read_u16(buf, cursor)? as usize;
    let bytes = buf
        .get(*cursor..*cursor + len)
        .ok_or(Error::MalformedPacket)?;
    *cursor += len;
    core::str::from_utf8(bytes).map_err(|_| Error::MalformedPacket)
}
