//! Engine-level tests against an in-memory mock transport.
//!
//! The mock plays the broker side of the conversation: each test queues the
//! broker's frames into the read buffer up front (or between polls) and
//! asserts on the frames the client writes.

use libmqtt::packet::{self, PacketType};
use libmqtt::{Client, ConnectOptions, ConnectReturnCode, Error, GrantedQoS, Publish, QoS, StdTimer, Transport};

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

struct MockTransport {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    // largest read served in one call, to exercise reassembly loops
    read_chunk: usize,
}

impl MockTransport {
    fn new() -> Self {
        Self {
            rx: VecDeque::new(),
            tx: Vec::new(),
            read_chunk: usize::MAX,
        }
    }

    fn queue(&mut self, frame: &[u8]) {
        self.rx.extend(frame);
    }

    fn written(&self) -> &[u8] {
        &self.tx
    }

    fn clear_written(&mut self) {
        self.tx.clear();
    }
}

impl Transport for MockTransport {
    type Error = Error;

    fn read(&mut self, buf: &mut [u8], _timeout_ms: u32) -> Result<usize, Self::Error> {
        if self.rx.is_empty() {
            // pretend to block briefly so deadline-bound loops make progress
            std::thread::sleep(Duration::from_millis(1));
            return Ok(0);
        }
        let len = buf.len().min(self.rx.len()).min(self.read_chunk);
        for slot in buf[..len].iter_mut() {
            *slot = self.rx.pop_front().unwrap();
        }
        Ok(len)
    }

    fn write(&mut self, buf: &[u8], _timeout_ms: u32) -> Result<usize, Self::Error> {
        self.tx.extend_from_slice(buf);
        Ok(buf.len())
    }
}

type TestClient<const N: usize = 256, const H: usize = 5> =
    Client<MockTransport, StdTimer, N, H, 10>;

const CONNACK_ACCEPTED: [u8; 4] = [0x20, 2, 0, 0];

fn connack(return_code: u8) -> [u8; 4] {
    [0x20, 2, 0, return_code]
}

fn suback(packet_id: u16, granted: u8) -> [u8; 5] {
    let id = packet_id.to_be_bytes();
    [0x90, 3, id[0], id[1], granted]
}

fn ack(packet_type: PacketType, packet_id: u16) -> Vec<u8> {
    let mut buf = [0u8; 8];
    let len = packet::serialize_ack(&mut buf, packet_type, false, packet_id).unwrap();
    buf[..len].to_vec()
}

fn broker_publish(qos: QoS, packet_id: u16, topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut buf = [0u8; 512];
    let len = packet::serialize_publish(&mut buf, false, qos, false, packet_id, topic, payload)
        .unwrap();
    buf[..len].to_vec()
}

fn count_frames(haystack: &[u8], needle: &[u8]) -> usize {
    if needle.is_empty() || haystack.len() < needle.len() {
        return 0;
    }
    haystack.windows(needle.len()).filter(|w| w == &needle).count()
}

fn connected_client<const N: usize, const H: usize>(options: &ConnectOptions<'_>) -> TestClient<N, H> {
    let mut transport = MockTransport::new();
    transport.queue(&CONNACK_ACCEPTED);
    let mut client = Client::new(transport, 50);
    assert_eq!(client.connect(options), Ok(ConnectReturnCode::Accepted));
    assert!(client.is_connected());
    client
}

// ---------------------------------------------------------------------------
// basic pub/sub

static BASIC_MESSAGES: Mutex<Vec<(String, Vec<u8>)>> = Mutex::new(Vec::new());

fn basic_handler(message: &Publish<'_>) {
    BASIC_MESSAGES
        .lock()
        .unwrap()
        .push((message.topic.to_string(), message.payload.to_vec()));
}

#[test]
fn basic_publish_subscribe_round() {
    let mut client: TestClient =
        connected_client(&ConnectOptions::new("t-basic"));

    client.transport_mut().queue(&suback(1, 0));
    assert_eq!(
        client.subscribe("a/b", QoS::AtMostOnce, basic_handler),
        Ok(GrantedQoS::AtMostOnce)
    );

    client
        .transport_mut()
        .queue(&broker_publish(QoS::AtMostOnce, 0, "a/b", b"x"));
    client.poll(30).unwrap();

    let messages = BASIC_MESSAGES.lock().unwrap();
    assert_eq!(messages.as_slice(), &[("a/b".to_string(), b"x".to_vec())]);
    drop(messages);

    assert_eq!(client.disconnect(), Ok(()));
    assert!(!client.is_connected());
    // DISCONNECT is the last frame on the wire
    assert_eq!(&client.transport().written()[client.transport().written().len() - 2..], &[0xE0, 0]);
}

#[test]
fn inbound_frames_survive_fragmented_reads() {
    static MESSAGES: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());
    fn handler(message: &Publish<'_>) {
        MESSAGES.lock().unwrap().push(message.payload.to_vec());
    }

    let mut client: TestClient = connected_client(&ConnectOptions::new("t-frag"));
    client.set_default_handler(handler);

    client.transport_mut().read_chunk = 3;
    client.transport_mut().queue(&broker_publish(
        QoS::AtMostOnce,
        0,
        "frag/topic",
        b"a somewhat longer payload body",
    ));
    client.poll(30).unwrap();

    assert_eq!(
        MESSAGES.lock().unwrap().as_slice(),
        &[b"a somewhat longer payload body".to_vec()]
    );
}

// ---------------------------------------------------------------------------
// wildcard fan-out

static FANOUT_ORDER: Mutex<Vec<u8>> = Mutex::new(Vec::new());

fn fanout_first(_: &Publish<'_>) {
    FANOUT_ORDER.lock().unwrap().push(1);
}

fn fanout_second(_: &Publish<'_>) {
    FANOUT_ORDER.lock().unwrap().push(2);
}

#[test]
fn wildcard_fanout_fires_matching_slots_in_order() {
    let mut client: TestClient = connected_client(&ConnectOptions::new("t-fanout"));

    client.transport_mut().queue(&suback(1, 0));
    client
        .subscribe("sport/#", QoS::AtMostOnce, fanout_first)
        .unwrap();
    client.transport_mut().queue(&suback(2, 0));
    client
        .subscribe("sport/tennis/+", QoS::AtMostOnce, fanout_second)
        .unwrap();

    client
        .transport_mut()
        .queue(&broker_publish(QoS::AtMostOnce, 0, "sport/tennis/player1", b"40-15"));
    client.poll(30).unwrap();

    assert_eq!(FANOUT_ORDER.lock().unwrap().as_slice(), &[1, 2]);
}

// ---------------------------------------------------------------------------
// outbound QoS 1 and QoS 2

#[test]
fn qos1_publish_waits_for_matching_puback() {
    let mut client: TestClient = connected_client(&ConnectOptions::new("t-qos1"));

    client.transport_mut().queue(&ack(PacketType::Puback, 1));
    assert_eq!(
        client.publish_with_id("t", b"hello", QoS::AtLeastOnce, false),
        Ok(1)
    );

    client.transport_mut().queue(&ack(PacketType::Puback, 2));
    assert_eq!(
        client.publish_with_id("t", b"hello", QoS::AtLeastOnce, false),
        Ok(2)
    );
    assert!(client.is_connected());
}

#[test]
fn qos1_publish_without_puback_times_out_and_disconnects() {
    let mut client: TestClient = connected_client(&ConnectOptions::new("t-qos1-to"));

    assert_eq!(
        client.publish("t", b"hello", QoS::AtLeastOnce, false),
        Err(Error::Timeout)
    );
    assert!(!client.is_connected());
}

#[test]
fn qos2_publish_exchanges_pubrel_while_waiting_for_pubcomp() {
    let mut client: TestClient = connected_client(&ConnectOptions::new("t-qos2"));

    client.transport_mut().queue(&ack(PacketType::Pubrec, 1));
    client.transport_mut().queue(&ack(PacketType::Pubcomp, 1));
    assert_eq!(
        client.publish_with_id("t", b"exact", QoS::ExactlyOnce, false),
        Ok(1)
    );

    // the cycle engine answered the PUBREC on our behalf
    assert_eq!(count_frames(client.transport().written(), &[0x62, 2, 0, 1]), 1);
}

// ---------------------------------------------------------------------------
// inbound QoS flows

static DEDUP_COUNT: Mutex<Vec<u16>> = Mutex::new(Vec::new());

fn dedup_handler(message: &Publish<'_>) {
    DEDUP_COUNT.lock().unwrap().push(message.packet_id);
}

#[test]
fn qos2_inbound_retransmits_deliver_once() {
    let mut client: TestClient = connected_client(&ConnectOptions::new("t-dedup"));
    client.set_default_handler(dedup_handler);

    let frame = broker_publish(QoS::ExactlyOnce, 7, "exact/topic", b"p");
    client.transport_mut().queue(&frame);
    client.transport_mut().queue(&frame);
    client.poll(30).unwrap();

    // delivered once, acknowledged twice
    assert_eq!(DEDUP_COUNT.lock().unwrap().len(), 1);
    assert_eq!(count_frames(client.transport().written(), &[0x50, 2, 0, 7]), 2);

    client.transport_mut().queue(&ack(PacketType::Pubrel, 7));
    client.poll(30).unwrap();
    assert_eq!(count_frames(client.transport().written(), &[0x70, 2, 0, 7]), 1);

    // PUBREL released the id, so a fresh flow with the same id delivers again
    client.transport_mut().queue(&frame);
    client.poll(30).unwrap();
    assert_eq!(DEDUP_COUNT.lock().unwrap().as_slice(), &[7, 7]);
}

static QOS1_INBOUND: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());

fn qos1_inbound_handler(message: &Publish<'_>) {
    QOS1_INBOUND.lock().unwrap().push(message.payload.to_vec());
}

#[test]
fn qos1_inbound_is_delivered_then_acknowledged() {
    let mut client: TestClient = connected_client(&ConnectOptions::new("t-in1"));
    client.set_default_handler(qos1_inbound_handler);

    client
        .transport_mut()
        .queue(&broker_publish(QoS::AtLeastOnce, 9, "in/one", b"pay"));
    client.poll(30).unwrap();

    assert_eq!(QOS1_INBOUND.lock().unwrap().as_slice(), &[b"pay".to_vec()]);
    assert_eq!(count_frames(client.transport().written(), &[0x40, 2, 0, 9]), 1);
}

// ---------------------------------------------------------------------------
// keep-alive

#[test]
fn keepalive_pings_once_per_silence_window() {
    let mut transport = MockTransport::new();
    transport.queue(&CONNACK_ACCEPTED);
    let mut client: TestClient = Client::new(transport, 1000);

    let mut options = ConnectOptions::new("t-ping");
    options.keep_alive_seconds = 1;
    assert_eq!(client.connect(&options), Ok(ConnectReturnCode::Accepted));
    client.transport_mut().clear_written();

    // one silent keep-alive interval: exactly one PINGREQ goes out, and a
    // second one is withheld while the first is unanswered
    client.poll(1400).unwrap();
    assert_eq!(count_frames(client.transport().written(), &[0xC0, 0]), 1);

    // after the broker answers, the next silent interval pings again
    client.transport_mut().queue(&[0xD0, 0]);
    client.poll(1300).unwrap();
    assert_eq!(count_frames(client.transport().written(), &[0xC0, 0]), 2);
}

#[test]
fn keepalive_zero_never_pings() {
    let mut transport = MockTransport::new();
    transport.queue(&CONNACK_ACCEPTED);
    let mut client: TestClient = Client::new(transport, 1000);

    let mut options = ConnectOptions::new("t-noping");
    options.keep_alive_seconds = 0;
    assert_eq!(client.connect(&options), Ok(ConnectReturnCode::Accepted));
    client.transport_mut().clear_written();

    client.poll(300).unwrap();
    assert_eq!(count_frames(client.transport().written(), &[0xC0, 0]), 0);
}

// ---------------------------------------------------------------------------
// framing limits

static BOUNDARY_MESSAGES: Mutex<Vec<usize>> = Mutex::new(Vec::new());

fn boundary_handler(message: &Publish<'_>) {
    BOUNDARY_MESSAGES.lock().unwrap().push(message.payload.len());
}

#[test]
fn inbound_packet_filling_the_buffer_exactly_is_accepted() {
    let mut client: TestClient<32, 5> = connected_client(&ConnectOptions::new("t-fit"));
    client.set_default_handler(boundary_handler);

    // header (1) + length (1) + remaining 30 = exactly 32 bytes
    let frame = broker_publish(QoS::AtMostOnce, 0, "t", &[0xAB; 27]);
    assert_eq!(frame.len(), 32);
    client.transport_mut().queue(&frame);
    client.poll(30).unwrap();

    assert_eq!(BOUNDARY_MESSAGES.lock().unwrap().as_slice(), &[27]);
    assert!(client.is_connected());
}

#[test]
fn oversize_inbound_packet_is_fatal() {
    let mut client: TestClient<32, 5> = connected_client(&ConnectOptions::new("t-over"));

    // remaining length 31 exceeds the 30 bytes left after the header
    client.transport_mut().queue(&[0x30, 31]);
    assert_eq!(client.poll(30), Err(Error::BufferOverflow));
    assert!(!client.is_connected());
}

// ---------------------------------------------------------------------------
// session refusals and local limits

#[test]
fn broker_refusal_is_a_return_code_not_an_error() {
    let mut transport = MockTransport::new();
    transport.queue(&connack(5));
    let mut client: TestClient = Client::new(transport, 50);

    assert_eq!(
        client.connect(&ConnectOptions::new("t-refused")),
        Ok(ConnectReturnCode::NotAuthorized)
    );
    assert!(!client.is_connected());
}

fn ignored_handler(_: &Publish<'_>) {}

#[test]
fn suback_failure_keeps_session_and_registers_nothing() {
    let mut client: TestClient = connected_client(&ConnectOptions::new("t-subfail"));

    client.transport_mut().queue(&suback(1, 0x80));
    assert_eq!(
        client.subscribe("forbidden/#", QoS::AtMostOnce, ignored_handler),
        Ok(GrantedQoS::Failure)
    );
    assert!(client.is_connected());
}

#[test]
fn full_handler_table_is_reported_before_wire_traffic() {
    let mut client: TestClient<256, 1> = connected_client(&ConnectOptions::new("t-full"));

    client.transport_mut().queue(&suback(1, 1));
    assert_eq!(
        client.subscribe("a", QoS::AtLeastOnce, ignored_handler),
        Ok(GrantedQoS::AtLeastOnce)
    );

    assert_eq!(
        client.subscribe("b", QoS::AtLeastOnce, ignored_handler),
        Err(Error::HandlerTableFull)
    );
    assert!(client.is_connected());
    // only the first SUBSCRIBE ever reached the broker
    assert_eq!(count_frames(client.transport().written(), &[0x82]), 1);
}

#[test]
fn connect_twice_is_rejected() {
    let mut client: TestClient = connected_client(&ConnectOptions::new("t-twice"));
    assert_eq!(
        client.connect(&ConnectOptions::new("t-twice")),
        Err(Error::AlreadyConnected)
    );
    assert!(client.is_connected());
}

// ---------------------------------------------------------------------------
// unsubscribe

static UNSUB_MESSAGES: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());

fn unsub_handler(message: &Publish<'_>) {
    UNSUB_MESSAGES.lock().unwrap().push(message.payload.to_vec());
}

#[test]
fn unsubscribe_drops_the_local_handler_slot() {
    let mut client: TestClient = connected_client(&ConnectOptions::new("t-unsub"));

    client.transport_mut().queue(&suback(1, 0));
    client
        .subscribe("a/b", QoS::AtMostOnce, unsub_handler)
        .unwrap();

    client
        .transport_mut()
        .queue(&broker_publish(QoS::AtMostOnce, 0, "a/b", b"first"));
    client.poll(30).unwrap();
    assert_eq!(UNSUB_MESSAGES.lock().unwrap().len(), 1);

    client.transport_mut().queue(&[0xB0, 2, 0, 2]);
    assert_eq!(client.unsubscribe("a/b"), Ok(()));

    // a broker that still routes the topic no longer reaches the old slot
    client
        .transport_mut()
        .queue(&broker_publish(QoS::AtMostOnce, 0, "a/b", b"second"));
    client.poll(30).unwrap();
    assert_eq!(UNSUB_MESSAGES.lock().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// persistent-session replay

#[test]
fn qos1_inflight_publish_is_resent_after_reconnect() {
    let mut options = ConnectOptions::new("t-replay1");
    options.clean_session = false;
    let mut client: TestClient = connected_client(&options);

    assert_eq!(
        client.publish("state", b"v1", QoS::AtLeastOnce, false),
        Err(Error::Timeout)
    );
    assert!(!client.is_connected());

    let mut expected = [0u8; 64];
    let expected_len =
        packet::serialize_publish(&mut expected, false, QoS::AtLeastOnce, false, 1, "state", b"v1")
            .unwrap();

    client.transport_mut().clear_written();
    client.transport_mut().queue(&CONNACK_ACCEPTED);
    client.transport_mut().queue(&ack(PacketType::Puback, 1));
    assert_eq!(client.connect(&options), Ok(ConnectReturnCode::Accepted));
    assert!(client.is_connected());

    assert_eq!(
        count_frames(client.transport().written(), &expected[..expected_len]),
        1
    );
}

#[test]
fn qos2_inflight_past_pubrec_resumes_at_pubrel() {
    let mut options = ConnectOptions::new("t-replay2");
    options.clean_session = false;
    let mut client: TestClient = connected_client(&options);

    // the broker records the message (PUBREC) but never completes
    client.transport_mut().queue(&ack(PacketType::Pubrec, 1));
    assert_eq!(
        client.publish("state", b"v1", QoS::ExactlyOnce, false),
        Err(Error::Timeout)
    );
    assert!(!client.is_connected());

    client.transport_mut().clear_written();
    client.transport_mut().queue(&CONNACK_ACCEPTED);
    client.transport_mut().queue(&ack(PacketType::Pubcomp, 1));
    assert_eq!(client.connect(&options), Ok(ConnectReturnCode::Accepted));

    // replay resumes the handshake instead of resending the publish
    assert_eq!(count_frames(client.transport().written(), &[0x62, 2, 0, 1]), 1);
    assert_eq!(count_frames(client.transport().written(), &[0x30 | 0x04]), 0);
}

#[test]
fn clean_session_discards_inflight_state() {
    let mut options = ConnectOptions::new("t-clean");
    options.clean_session = false;
    let mut client: TestClient = connected_client(&options);

    assert_eq!(
        client.publish("state", b"v1", QoS::AtLeastOnce, false),
        Err(Error::Timeout)
    );

    client.transport_mut().clear_written();
    client.transport_mut().queue(&CONNACK_ACCEPTED);
    let mut clean = ConnectOptions::new("t-clean");
    clean.clean_session = true;
    assert_eq!(client.connect(&clean), Ok(ConnectReturnCode::Accepted));

    // no replay: nothing but the CONNECT itself was written
    assert_eq!(count_frames(client.transport().written(), &[0x32]), 0);
}
