//! Blocking MQTT 3.1.1 client engine.
//!
//! The [`Client`] owns one send and one receive buffer of equal, fixed
//! capacity and drives a half-duplex request/response discipline over a
//! [`Transport`]: each command serializes its packet into the send buffer,
//! writes it out, then spins the cycle engine until the matching
//! acknowledgement arrives or the command deadline expires. Between
//! commands, [`poll`](Client::poll) runs the same cycle engine to deliver
//! inbound PUBLISH packets to subscription handlers and to keep the
//! connection alive with PINGREQ probes.
//!
//! The client is strictly single threaded: handlers are invoked
//! synchronously from the cycle engine, which already holds both buffers,
//! so issuing commands from inside a handler is not supported.

use crate::error::Error;
use crate::packet::{self, ConnectOptions, ConnectReturnCode, GrantedQoS, PacketType, Publish, QoS};
use crate::time::Timer;
use crate::topic;
use crate::transport::Transport;

/// Callback invoked for an inbound PUBLISH matching a subscription.
///
/// The message borrows from the client's receive buffer and is only valid
/// for the duration of the call; copy out what must be kept.
pub type MessageHandler = fn(&Publish<'_>);

/// Longest subscription filter a handler slot can hold.
pub const MAX_FILTER_LEN: usize = 256;

// Sub-deadline for writing a PINGREQ from the keep-alive path.
const PING_DEADLINE_MS: u32 = 1000;

struct HandlerSlot {
    filter: heapless::String<MAX_FILTER_LEN>,
    handler: MessageHandler,
}

// Metadata for the single outbound publish whose handshake has not
// completed; the bytes themselves live in the inflight buffer.
#[derive(Debug, Clone, Copy)]
struct InflightState {
    id: u16,
    len: usize,
    qos: QoS,
    pubrel: bool,
}

/// A blocking MQTT 3.1.1 client.
///
/// # Type Parameters
///
/// * `T` - the byte transport
/// * `C` - the countdown timer implementation
/// * `N` - capacity of the send and receive buffers; every packet, inbound
///   or outbound, must fit
/// * `H` - number of subscription handler slots
/// * `Q` - capacity of the inbound QoS 2 deduplication set
///
/// # Examples
///
/// ```rust,no_run
/// use libmqtt::{Client, ConnectOptions, Publish, QoS, StdTimer, TcpTransport};
///
/// fn on_command(message: &Publish<'_>) {
///     // react to the payload
/// }
///
/// # fn main() -> Result<(), libmqtt::Error> {
/// let transport = TcpTransport::connect("test.mosquitto.org:1883").expect("broker unreachable");
/// let mut client = Client::<_, StdTimer, 512>::new(transport, 5000);
///
/// client.connect(&ConnectOptions::new("device-42"))?;
/// client.subscribe("commands/#", QoS::AtLeastOnce, on_command)?;
/// client.publish("status", b"online", QoS::AtMostOnce, false)?;
///
/// loop {
///     client.poll(1000)?;
/// }
/// # }
/// ```
pub struct Client<T, C, const N: usize, const H: usize = 5, const Q: usize = 10>
where
    T: Transport,
    C: Timer,
{
    transport: T,
    command_timeout_ms: u32,
    send_buf: [u8; N],
    recv_buf: [u8; N],
    keep_alive: u16,
    clean_session: bool,
    last_sent: C,
    last_received: C,
    ping_outstanding: bool,
    connected: bool,
    last_packet_id: u16,
    handlers: [Option<HandlerSlot>; H],
    default_handler: Option<MessageHandler>,
    inflight: Option<InflightState>,
    inflight_buf: [u8; N],
    qos2_rx: [u16; Q],
}

impl<T, C, const N: usize, const H: usize, const Q: usize> Client<T, C, N, H, Q>
where
    T: Transport,
    C: Timer,
{
    /// Create an idle client over an established transport.
    ///
    /// `command_timeout_ms` is the deadline applied to each blocking
    /// command (connect, subscribe, publish, ...).
    pub fn new(transport: T, command_timeout_ms: u32) -> Self {
        Self {
            transport,
            command_timeout_ms,
            send_buf: [0; N],
            recv_buf: [0; N],
            keep_alive: 0,
            clean_session: true,
            last_sent: C::new(),
            last_received: C::new(),
            ping_outstanding: false,
            connected: false,
            last_packet_id: 0,
            handlers: core::array::from_fn(|_| None),
            default_handler: None,
            inflight: None,
            inflight_buf: [0; N],
            qos2_rx: [0; Q],
        }
    }

    /// Whether a session is currently established.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Set the catch-all handler for PUBLISH packets whose topic matches no
    /// subscription slot.
    pub fn set_default_handler(&mut self, handler: MessageHandler) {
        self.default_handler = Some(handler);
    }

    /// Access the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the underlying transport, e.g. to re-establish the
    /// connection after a session failure before calling
    /// [`connect`](Client::connect) again.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Establish an MQTT session: send CONNECT and await the CONNACK.
    ///
    /// Returns the broker's CONNACK return code; a refusal
    /// (anything but [`ConnectReturnCode::Accepted`]) is an ordinary return
    /// value and leaves the client disconnected without error.
    ///
    /// With `clean_session` off, an inflight publish left over from a
    /// previous session is replayed before this call returns: a QoS 2
    /// publish that already received its PUBREC resumes at PUBREL,
    /// otherwise the stored publish bytes are resent and its
    /// acknowledgement awaited.
    pub fn connect(&mut self, options: &ConnectOptions<'_>) -> Result<ConnectReturnCode, Error> {
        if self.connected {
            return Err(Error::AlreadyConnected);
        }

        let mut deadline = C::new();
        deadline.countdown_ms(self.command_timeout_ms);

        self.keep_alive = options.keep_alive_seconds;
        self.clean_session = options.clean_session;
        self.ping_outstanding = false;

        let len = packet::serialize_connect(&mut self.send_buf, options)?;
        self.send_packet(len, &deadline)?;
        if self.keep_alive > 0 {
            self.last_received.countdown(self.keep_alive);
        }

        self.wait_for(PacketType::Connack, &deadline)?;
        let connack = packet::deserialize_connack(&self.recv_buf)?;
        if connack.return_code != ConnectReturnCode::Accepted {
            return Ok(connack.return_code);
        }

        if self.clean_session {
            self.inflight = None;
            self.qos2_rx = [0; Q];
        } else if let Some(inflight) = self.inflight {
            self.replay_inflight(inflight, &deadline)?;
        }

        self.connected = true;
        Ok(ConnectReturnCode::Accepted)
    }

    /// Subscribe to `filter` and register `handler` for matching messages.
    ///
    /// Returns the QoS granted by the broker, or
    /// [`GrantedQoS::Failure`] if the broker refused the subscription (in
    /// which case no handler is registered and the session stays up).
    ///
    /// The filter is copied into the handler slot, so the caller need not
    /// keep it alive. Subscribing again with the same filter replaces the
    /// slot's handler. A full handler table is reported before any wire
    /// traffic, so the broker never holds a subscription the client cannot
    /// dispatch.
    pub fn subscribe(
        &mut self,
        filter: &str,
        qos: QoS,
        handler: MessageHandler,
    ) -> Result<GrantedQoS, Error> {
        let result = self.do_subscribe(filter, qos, handler);
        self.seal(result)
    }

    /// Unsubscribe from `filter` and drop its local handler slot.
    pub fn unsubscribe(&mut self, filter: &str) -> Result<(), Error> {
        let result = self.do_unsubscribe(filter);
        self.seal(result)
    }

    /// Publish `payload` to `topic` at the given QoS.
    ///
    /// QoS 0 returns as soon as the packet is written. QoS 1 blocks until
    /// the PUBACK arrives; QoS 2 blocks until the PUBCOMP (the
    /// intermediate PUBREC/PUBREL exchange is carried out by the cycle
    /// engine while waiting).
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retained: bool,
    ) -> Result<(), Error> {
        self.publish_with_id(topic, payload, qos, retained).map(|_| ())
    }

    /// Like [`publish`](Client::publish), additionally returning the packet
    /// identifier allocated for the message (0 for QoS 0).
    pub fn publish_with_id(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retained: bool,
    ) -> Result<u16, Error> {
        let result = self.do_publish(topic, payload, qos, retained);
        self.seal(result)
    }

    /// Send a DISCONNECT packet and mark the session closed.
    ///
    /// The session is considered closed whether or not the packet could be
    /// written; tearing down the transport remains the caller's
    /// responsibility.
    pub fn disconnect(&mut self) -> Result<(), Error> {
        let mut deadline = C::new();
        deadline.countdown_ms(self.command_timeout_ms);
        let result = match packet::serialize_disconnect(&mut self.send_buf) {
            Ok(len) => self.send_packet(len, &deadline),
            Err(e) => Err(e),
        };
        self.connected = false;
        result
    }

    /// Run the cycle engine for `timeout_ms`.
    ///
    /// A call to this must be made within the keep-alive interval so the
    /// client can answer inbound traffic and emit PINGREQ probes; it also
    /// delivers messages to subscription handlers. An error means the
    /// session is down.
    pub fn poll(&mut self, timeout_ms: u32) -> Result<(), Error> {
        let mut deadline = C::new();
        deadline.countdown_ms(timeout_ms);
        while !deadline.expired() {
            if let Err(e) = self.cycle(&deadline) {
                self.connected = false;
                return Err(e);
            }
        }
        Ok(())
    }

    // Session-affecting failures mark the client disconnected; local
    // precondition failures leave the session alone.
    fn seal<R>(&mut self, result: Result<R, Error>) -> Result<R, Error> {
        if let Err(e) = &result {
            match e {
                Error::NotConnected
                | Error::AlreadyConnected
                | Error::HandlerTableFull
                | Error::PacketTooLarge => {}
                _ => self.connected = false,
            }
        }
        result
    }

    fn do_subscribe(
        &mut self,
        filter: &str,
        qos: QoS,
        handler: MessageHandler,
    ) -> Result<GrantedQoS, Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        let filter_copy: heapless::String<MAX_FILTER_LEN> =
            heapless::String::try_from(filter).map_err(|_| Error::PacketTooLarge)?;
        let slot = self.find_slot(filter)?;

        let mut deadline = C::new();
        deadline.countdown_ms(self.command_timeout_ms);
        let packet_id = self.next_packet_id();
        let len = packet::serialize_subscribe(&mut self.send_buf, packet_id, filter, qos)?;
        self.send_packet(len, &deadline)?;

        self.wait_for(PacketType::Suback, &deadline)?;
        let suback = packet::deserialize_suback(&self.recv_buf)?;
        if suback.granted == GrantedQoS::Failure {
            return Ok(GrantedQoS::Failure);
        }

        self.handlers[slot] = Some(HandlerSlot {
            filter: filter_copy,
            handler,
        });
        Ok(suback.granted)
    }

    // An existing slot with the same filter is reused; otherwise the first
    // free one.
    fn find_slot(&self, filter: &str) -> Result<usize, Error> {
        if let Some(index) = self
            .handlers
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.filter.as_str() == filter))
        {
            return Ok(index);
        }
        self.handlers
            .iter()
            .position(|s| s.is_none())
            .ok_or(Error::HandlerTableFull)
    }

    fn do_unsubscribe(&mut self, filter: &str) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        let mut deadline = C::new();
        deadline.countdown_ms(self.command_timeout_ms);
        let packet_id = self.next_packet_id();
        let len = packet::serialize_unsubscribe(&mut self.send_buf, packet_id, filter)?;
        self.send_packet(len, &deadline)?;

        self.wait_for(PacketType::Unsuback, &deadline)?;
        packet::deserialize_unsuback(&self.recv_buf)?;

        // the broker no longer routes the filter; a stale slot would keep
        // firing on wildcard overlap, so drop it as well
        for slot in self.handlers.iter_mut() {
            if slot.as_ref().is_some_and(|s| s.filter.as_str() == filter) {
                *slot = None;
            }
        }
        Ok(())
    }

    fn do_publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retained: bool,
    ) -> Result<u16, Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        let mut deadline = C::new();
        deadline.countdown_ms(self.command_timeout_ms);

        let packet_id = if qos == QoS::AtMostOnce {
            0
        } else {
            self.next_packet_id()
        };
        let len =
            packet::serialize_publish(&mut self.send_buf, false, qos, retained, packet_id, topic, payload)?;

        if !self.clean_session && qos != QoS::AtMostOnce {
            self.inflight_buf[..len].copy_from_slice(&self.send_buf[..len]);
            self.inflight = Some(InflightState {
                id: packet_id,
                len,
                qos,
                pubrel: false,
            });
        }

        self.send_packet(len, &deadline)?;
        self.finish_publish(qos, &deadline)?;
        Ok(packet_id)
    }

    fn finish_publish(&mut self, qos: QoS, deadline: &C) -> Result<(), Error> {
        match qos {
            QoS::AtMostOnce => Ok(()),
            QoS::AtLeastOnce => {
                self.wait_for(PacketType::Puback, deadline)?;
                self.complete_publish_ack()
            }
            // the PUBREC/PUBREL leg runs inside the cycle engine while we
            // wait; the blocking call only observes the terminal PUBCOMP
            QoS::ExactlyOnce => {
                self.wait_for(PacketType::Pubcomp, deadline)?;
                self.complete_publish_ack()
            }
        }
    }

    fn complete_publish_ack(&mut self) -> Result<(), Error> {
        let ack = packet::deserialize_ack(&self.recv_buf)?;
        if let Some(inflight) = self.inflight {
            if inflight.id == ack.packet_id {
                self.inflight = None;
            }
        }
        Ok(())
    }

    fn replay_inflight(&mut self, inflight: InflightState, deadline: &C) -> Result<(), Error> {
        if inflight.qos == QoS::ExactlyOnce && inflight.pubrel {
            // the broker already holds the message; resume at PUBREL
            let len =
                packet::serialize_ack(&mut self.send_buf, PacketType::Pubrel, false, inflight.id)?;
            self.send_packet(len, deadline)?;
            self.wait_for(PacketType::Pubcomp, deadline)?;
            self.complete_publish_ack()
        } else {
            self.send_buf[..inflight.len].copy_from_slice(&self.inflight_buf[..inflight.len]);
            self.send_packet(inflight.len, deadline)?;
            self.finish_publish(inflight.qos, deadline)
        }
    }

    fn next_packet_id(&mut self) -> u16 {
        self.last_packet_id = match self.last_packet_id {
            u16::MAX => 1,
            id => id + 1,
        };
        self.last_packet_id
    }

    /// One unit of work: read at most one packet, dispatch it, answer any
    /// acknowledgement it requires, then run the keep-alive check. Returns
    /// the type of the packet read, or `None` if the wire was silent.
    fn cycle(&mut self, deadline: &C) -> Result<Option<PacketType>, Error> {
        let packet_type = self.read_packet(deadline)?;
        match packet_type {
            Some(PacketType::Publish) => self.process_publish(deadline)?,
            Some(PacketType::Pubrec) => self.process_pubrec(deadline)?,
            Some(PacketType::Pubrel) => self.process_pubrel(deadline)?,
            Some(PacketType::Pingresp) => self.ping_outstanding = false,
            // CONNACK, PUBACK, SUBACK, UNSUBACK and PUBCOMP are consumed by
            // the wait_for of the command that expects them
            _ => {}
        }
        // a failed ping surfaces later as a dead session
        let _ = self.keepalive();
        Ok(packet_type)
    }

    fn wait_for(&mut self, expected: PacketType, deadline: &C) -> Result<(), Error> {
        loop {
            if deadline.expired() {
                return Err(Error::Timeout);
            }
            if self.cycle(deadline)? == Some(expected) {
                return Ok(());
            }
        }
    }

    fn process_publish(&mut self, deadline: &C) -> Result<(), Error> {
        let message = packet::deserialize_publish(&self.recv_buf)?;
        let (qos, packet_id) = (message.qos, message.packet_id);

        match qos {
            QoS::AtMostOnce | QoS::AtLeastOnce => self.deliver(&message),
            QoS::ExactlyOnce => {
                // deliver on the first sighting of this id only; the id
                // stays claimed until the broker's PUBREL releases it
                if self.qos2_rx.iter().all(|&id| id != packet_id) {
                    if let Some(slot) = self.qos2_rx.iter_mut().find(|id| **id == 0) {
                        *slot = packet_id;
                        self.deliver(&message);
                    } else {
                        #[cfg(feature = "defmt")]
                        defmt::warn!("incoming QoS 2 id set full, dropping delivery");
                    }
                }
            }
        }

        match qos {
            QoS::AtMostOnce => Ok(()),
            QoS::AtLeastOnce => {
                let len =
                    packet::serialize_ack(&mut self.send_buf, PacketType::Puback, false, packet_id)?;
                self.send_packet(len, deadline)
            }
            QoS::ExactlyOnce => {
                let len =
                    packet::serialize_ack(&mut self.send_buf, PacketType::Pubrec, false, packet_id)?;
                self.send_packet(len, deadline)
            }
        }
    }

    fn process_pubrec(&mut self, deadline: &C) -> Result<(), Error> {
        let id = packet::deserialize_ack(&self.recv_buf)?.packet_id;
        let len = packet::serialize_ack(&mut self.send_buf, PacketType::Pubrel, false, id)?;
        self.send_packet(len, deadline)?;
        if let Some(inflight) = self.inflight.as_mut() {
            if inflight.id == id {
                // a replay after reconnect can now resume at PUBREL
                inflight.pubrel = true;
            }
        }
        Ok(())
    }

    fn process_pubrel(&mut self, deadline: &C) -> Result<(), Error> {
        let id = packet::deserialize_ack(&self.recv_buf)?.packet_id;
        let len = packet::serialize_ack(&mut self.send_buf, PacketType::Pubcomp, false, id)?;
        self.send_packet(len, deadline)?;
        for slot in self.qos2_rx.iter_mut() {
            if *slot == id {
                *slot = 0;
            }
        }
        Ok(())
    }

    // Scan every occupied slot; all matches fire, in slot order. The
    // default handler only runs when nothing matched.
    fn deliver(&self, message: &Publish<'_>) {
        let mut delivered = false;
        for slot in self.handlers.iter().flatten() {
            if slot.filter.as_str() == message.topic
                || topic::matches(slot.filter.as_str(), message.topic)
            {
                (slot.handler)(message);
                delivered = true;
            }
        }
        if !delivered {
            if let Some(handler) = self.default_handler {
                handler(message);
            }
        }
    }

    fn keepalive(&mut self) -> Result<(), Error> {
        if self.keep_alive == 0 {
            return Ok(());
        }
        if (self.last_sent.expired() || self.last_received.expired()) && !self.ping_outstanding {
            let mut deadline = C::new();
            deadline.countdown_ms(PING_DEADLINE_MS);
            let len = packet::serialize_pingreq(&mut self.send_buf)?;
            self.send_packet(len, &deadline)?;
            self.ping_outstanding = true;
        }
        Ok(())
    }

    /// Read one framed packet into the receive buffer.
    ///
    /// Silence before the first header byte is not an error (`Ok(None)`);
    /// a short read inside a frame is, because the stream position is then
    /// unrecoverable.
    fn read_packet(&mut self, deadline: &C) -> Result<Option<PacketType>, Error> {
        match self.transport.read(&mut self.recv_buf[..1], deadline.left_ms()) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(_) => return Err(Error::ReadError),
        }
        let packet_type = PacketType::from_header_byte(self.recv_buf[0])?;

        let remaining_len = self.read_remaining_length(deadline)?;

        // re-encode the length after the header byte so the buffer holds a
        // contiguous wire-format packet for the deserializers
        let header_len = 1 + packet::encode_remaining_length(&mut self.recv_buf[1..], remaining_len)
            .map_err(|_| Error::BufferOverflow)?;
        if remaining_len + header_len > N {
            // fatal: the packet bytes are left on the wire, the session
            // must be torn down
            return Err(Error::BufferOverflow);
        }

        let mut read = 0;
        while read < remaining_len {
            if deadline.expired() {
                return Err(Error::ReadError);
            }
            let window = &mut self.recv_buf[header_len + read..header_len + remaining_len];
            match self.transport.read(window, deadline.left_ms()) {
                Ok(0) => {} // timed out this round; the deadline check above ends the loop
                Ok(n) => read += n,
                Err(_) => return Err(Error::ReadError),
            }
        }

        if self.keep_alive > 0 {
            self.last_received.countdown(self.keep_alive);
        }
        Ok(Some(packet_type))
    }

    // The remaining-length varint is read off the wire byte by byte; a
    // fifth continuation byte is malformed.
    fn read_remaining_length(&mut self, deadline: &C) -> Result<usize, Error> {
        let mut value = 0usize;
        let mut multiplier = 1usize;
        for i in 0.. {
            if i == 4 {
                return Err(Error::MalformedPacket);
            }
            let mut byte = [0u8; 1];
            match self.transport.read(&mut byte, deadline.left_ms()) {
                Ok(1) => {}
                Ok(_) | Err(_) => return Err(Error::ReadError),
            }
            value += (byte[0] & 0x7F) as usize * multiplier;
            multiplier *= 128;
            if byte[0] & 0x80 == 0 {
                break;
            }
        }
        Ok(value)
    }

    fn send_packet(&mut self, length: usize, deadline: &C) -> Result<(), Error> {
        let mut sent = 0;
        while sent < length && !deadline.expired() {
            match self.transport.write(&self.send_buf[sent..length], deadline.left_ms()) {
                Ok(n) => sent += n,
                Err(_) => return Err(Error::WriteError),
            }
        }
        if sent < length {
            return Err(Error::WriteError);
        }
        if self.keep_alive > 0 {
            self.last_sent.countdown(self.keep_alive);
        }
        Ok(())
    }
}
