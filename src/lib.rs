//! # libmqtt - blocking MQTT 3.1.1 client for embedded systems
//!
//! A lightweight, single-threaded MQTT 3.1.1 client designed for
//! resource-constrained endpoints and `no_std` environments. All state
//! lives in fixed-size buffers sized at compile time, so the client
//! performs no heap allocation.
//!
//! ## Features
//!
//! - MQTT 3.1.1 protocol compliance
//! - Quality of Service (QoS) levels 0, 1, and 2
//! - Clean session and persistent session support, with inflight publish
//!   replay across reconnects
//! - Wildcard-aware subscription dispatch (`+` and `#`)
//! - Configurable keep-alive with automatic PINGREQ probes
//! - Transport agnostic: works over anything implementing
//!   [`Transport`] (TCP, TLS, UART, ...)
//! - Fixed-size buffers for predictable memory usage
//!
//! ## Execution model
//!
//! The client is blocking and strictly single threaded. Each command
//! (connect, subscribe, publish, ...) serializes its packet, writes it to
//! the transport, and spins the internal cycle engine until the matching
//! acknowledgement arrives or the command deadline expires. Between
//! commands, the application calls [`Client::poll`] to deliver inbound
//! messages and keep the connection alive. Message handlers run
//! synchronously inside that loop, so they must not issue client commands
//! themselves.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use libmqtt::{Client, ConnectOptions, Publish, QoS, StdTimer, TcpTransport};
//!
//! fn on_reading(message: &Publish<'_>) {
//!     // message.topic and message.payload borrow the receive buffer
//! }
//!
//! # fn main() -> Result<(), libmqtt::Error> {
//! let transport = TcpTransport::connect("test.mosquitto.org:1883").expect("broker unreachable");
//! let mut client = Client::<_, StdTimer, 512>::new(transport, 5000);
//!
//! client.connect(&ConnectOptions::new("weather_station"))?;
//! client.subscribe("sensors/+/temperature", QoS::AtLeastOnce, on_reading)?;
//!
//! loop {
//!     client.poll(1000)?;
//! }
//! # }
//! ```
//!
//! ## Platform support
//!
//! The core is `no_std`; the `std` feature (enabled by default) adds a
//! TCP transport and an `Instant`-backed timer for hosted platforms. The
//! `defmt` feature enables logging support for embedded debugging.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

/// The blocking client engine: session state, the cycle engine, and the
/// command facade.
pub mod client;

/// Error types shared across the transport, codec, and engine layers.
pub mod error;

/// MQTT 3.1.1 wire-format serialization and deserialization.
pub mod packet;

/// Countdown timer abstraction used for deadlines and keep-alive.
pub mod time;

/// Topic-filter matching rules.
pub mod topic;

/// Byte-transport abstraction the client runs over.
pub mod transport;

// Re-export the types that make up the everyday API.
pub use client::{Client, MessageHandler};
pub use error::Error;
pub use packet::{ConnectOptions, ConnectReturnCode, GrantedQoS, LastWill, Publish, QoS};
pub use time::Timer;
pub use transport::Transport;

#[cfg(feature = "std")]
pub use time::StdTimer;
#[cfg(feature = "std")]
pub use transport::TcpTransport;
