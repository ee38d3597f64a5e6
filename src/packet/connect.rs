//! CONNECT and CONNACK packets.

use super::{
    encode_remaining_length, read_remaining_length, remaining_length_size, write_binary_field,
    write_u16, write_utf8_string, ConnectReturnCode, PacketType, QoS,
};
use crate::error::Error;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4; // MQTT 3.1.1

const FLAG_CLEAN_SESSION: u8 = 0x02;
const FLAG_WILL: u8 = 0x04;
const FLAG_WILL_RETAIN: u8 = 0x20;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_USERNAME: u8 = 0x80;

/// A will message registered with the broker at connect time.
///
/// The broker publishes it on the client's behalf if the session ends
/// without a DISCONNECT packet.
#[derive(Debug, Clone)]
pub struct LastWill<'a> {
    /// Topic the will is published to.
    pub topic: &'a str,
    /// Will message payload.
    pub payload: &'a [u8],
    /// QoS the will is published at.
    pub qos: QoS,
    /// Whether the will is retained by the broker.
    pub retained: bool,
}

/// Options for configuring the MQTT client connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions<'a> {
    /// The client identifier, must be unique within the broker.
    pub client_id: &'a str,
    /// The keep-alive time in seconds; 0 disables keep-alive.
    pub keep_alive_seconds: u16,
    /// Whether to start a clean session.
    ///
    /// With a persistent session (`false`), an unacknowledged QoS 1/2
    /// publish is retained across reconnects and replayed by
    /// [`connect`](crate::client::Client::connect).
    pub clean_session: bool,
    /// Optional user name credential.
    pub username: Option<&'a str>,
    /// Optional password credential.
    pub password: Option<&'a [u8]>,
    /// Optional will message.
    pub will: Option<LastWill<'a>>,
}

impl<'a> ConnectOptions<'a> {
    /// Options with the protocol defaults: 60 second keep-alive, clean
    /// session, no credentials, no will.
    pub fn new(client_id: &'a str) -> Self {
        Self {
            client_id,
            keep_alive_seconds: 60,
            clean_session: true,
            username: None,
            password: None,
            will: None,
        }
    }
}

/// A decoded CONNACK packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connack {
    /// Whether the broker resumed a stored session.
    pub session_present: bool,
    /// The broker's verdict on the connection request.
    pub return_code: ConnectReturnCode,
}

/// Serialize a CONNECT packet into `buf`, returning the encoded length.
pub fn serialize_connect(buf: &mut [u8], options: &ConnectOptions<'_>) -> Result<usize, Error> {
    // variable header: protocol name (6) + level (1) + flags (1) + keep-alive (2)
    let mut remaining_len = 10 + 2 + options.client_id.len();
    if let Some(will) = &options.will {
        remaining_len += 2 + will.topic.len() + 2 + will.payload.len();
    }
    if let Some(username) = options.username {
        remaining_len += 2 + username.len();
    }
    if let Some(password) = options.password {
        remaining_len += 2 + password.len();
    }

    let total = 1 + remaining_length_size(remaining_len) + remaining_len;
    if total > buf.len() {
        return Err(Error::PacketTooLarge);
    }

    let mut flags = 0u8;
    if options.clean_session {
        flags |= FLAG_CLEAN_SESSION;
    }
    if let Some(will) = &options.will {
        flags |= FLAG_WILL | (will.qos as u8) << 3;
        if will.retained {
            flags |= FLAG_WILL_RETAIN;
        }
    }
    if options.username.is_some() {
        flags |= FLAG_USERNAME;
    }
    if options.password.is_some() {
        flags |= FLAG_PASSWORD;
    }

    buf[0] = (PacketType::Connect as u8) << 4;
    let mut cursor = 1 + encode_remaining_length(&mut buf[1..], remaining_len)?;
    write_utf8_string(buf, &mut cursor, PROTOCOL_NAME)?;
    buf[cursor] = PROTOCOL_LEVEL;
    cursor += 1;
    buf[cursor] = flags;
    cursor += 1;
    write_u16(buf, &mut cursor, options.keep_alive_seconds);
    write_utf8_string(buf, &mut cursor, options.client_id)?;
    if let Some(will) = &options.will {
        write_utf8_string(buf, &mut cursor, will.topic)?;
        write_binary_field(buf, &mut cursor, will.payload)?;
    }
    if let Some(username) = options.username {
        write_utf8_string(buf, &mut cursor, username)?;
    }
    if let Some(password) = options.password {
        write_binary_field(buf, &mut cursor, password)?;
    }

    Ok(cursor)
}

/// Deserialize a CONNACK packet from `buf`.
pub fn deserialize_connack(buf: &[u8]) -> Result<Connack, Error> {
    let header = *buf.first().ok_or(Error::MalformedPacket)?;
    if PacketType::from_header_byte(header)? != PacketType::Connack {
        return Err(Error::MalformedPacket);
    }
    let mut cursor = 1;
    let remaining_len = read_remaining_length(buf, &mut cursor)?;
    if remaining_len < 2 || buf.len() < cursor + 2 {
        return Err(Error::MalformedPacket);
    }
    Ok(Connack {
        session_present: buf[cursor] & 0x01 != 0,
        return_code: ConnectReturnCode::from(buf[cursor + 1]),
    })
}
