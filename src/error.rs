//! Common error types for MQTT client operations
//!
//! This module defines the error type used throughout the client to provide
//! consistent error handling across the transport, codec, and engine layers.

/// A common error type for MQTT client operations.
///
/// This enum defines the set of failures that can occur while talking to a
/// broker. It is designed to be simple and portable for `no_std`
/// environments while providing enough detail for proper error handling.
///
/// Broker-level refusals (a CONNACK return code other than `Accepted`, or a
/// SUBACK granting `0x80`) are *not* errors; they are reported through the
/// ordinary return values of [`connect`](crate::client::Client::connect) and
/// [`subscribe`](crate::client::Client::subscribe).
///
/// # Examples
///
/// ```rust
/// use libmqtt::Error;
///
/// fn handle_error(error: Error) {
///     match error {
///         Error::Timeout => {
///             // the expected acknowledgement never arrived
///         }
///         Error::BufferOverflow => {
///             // an inbound packet was larger than the receive buffer
///         }
///         _ => {}
///     }
/// }
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// A command that requires an open session was issued while disconnected.
    NotConnected,

    /// `connect` was called on a client that is already connected.
    AlreadyConnected,

    /// A read failed, or a packet could not be read in full within its
    /// deadline.
    ///
    /// This covers transport-level read errors as well as short reads in the
    /// middle of a frame; in both cases the session must be torn down
    /// because the stream position can no longer be trusted.
    ReadError,

    /// A write failed, or a packet could not be written in full within its
    /// deadline.
    WriteError,

    /// A command's deadline expired before the expected acknowledgement
    /// arrived.
    Timeout,

    /// An inbound packet's remaining length exceeds the receive buffer.
    ///
    /// Fatal for the session: the packet bytes are left on the wire, so the
    /// transport must be discarded and re-established.
    BufferOverflow,

    /// An outbound packet does not fit in the send buffer.
    PacketTooLarge,

    /// An inbound packet violated the MQTT 3.1.1 wire format.
    MalformedPacket,

    /// No handler slot is available for a new subscription.
    HandlerTableFull,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::NotConnected => defmt::write!(f, "NotConnected"),
            Error::AlreadyConnected => defmt::write!(f, "AlreadyConnected"),
            Error::ReadError => defmt::write!(f, "ReadError"),
            Error::WriteError => defmt::write!(f, "WriteError"),
            Error::Timeout => defmt::write!(f, "Timeout"),
            Error::BufferOverflow => defmt::write!(f, "BufferOverflow"),
            Error::PacketTooLarge => defmt::write!(f, "PacketTooLarge"),
            Error::MalformedPacket => defmt::write!(f, "MalformedPacket"),
            Error::HandlerTableFull => defmt::write!(f, "HandlerTableFull"),
        }
    }
}
