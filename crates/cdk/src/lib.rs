// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # CDK - equipment client toolkit
//!
//! Client side of the link to road-side equipment: a message tree with a
//! binary codec, a self-healing TCP/TLS connection with request/response
//! correlation, bounded receive queues and UDP discovery.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cdk::{Connection, Element, Message, Result};
//! use std::time::Duration;
//!
//! fn main() -> Result<()> {
//!     let conn = Connection::new();
//!     conn.bind("192.168.1.10", 0, "")?;
//!     conn.wait_for_connection(Duration::from_secs(5));
//!
//!     let request = Message::with_root(Element::new("GetStatus")?);
//!     let reply = conn.send_request(&request, Duration::from_secs(2))?;
//!     println!("{:?}", reply.root().map(|r| r.name().to_string()));
//!
//!     while let Some(event) = conn.pop_message() {
//!         println!("event {:?}", event);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                          Application                                |
//! |   send_async / send_request         pop_message / callbacks         |
//! +---------------------------------------------------------------------+
//! |  Connection (state machine, reconnect, correlation)  |  Discoverer  |
//! +------------------------------------------------------+--------------+
//! |  MessageQueue (bounded FIFO, drop counter)           |              |
//! +------------------------------------------------------+   UDP        |
//! |  Codec (wire encoding, framing, streaming)           |   probe /    |
//! +------------------------------------------------------+   announce   |
//! |  Transport (TCP, rustls + certificate policy)        |              |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Element`] | Named node with attributes, content bytes and children |
//! | [`Message`] | Optional root element plus local metadata |
//! | [`SharedMessage`] | Published, read-only, reference-counted message |
//! | [`MessageQueue`] | Bounded FIFO shared between link worker and application |
//! | [`Connection`] | Bound link to one equipment |
//! | [`Discoverer`] | UDP prober collecting equipment announcements |
//!
//! ## Modules Overview
//!
//! - [`message`] - message tree and typed attributes
//! - [`codec`] - wire encoding, TCP framing, streaming import/export
//! - [`connection`] - connection engine and protocol detection
//! - [`transport`] - bind options, TCP/TLS streams, certificate policy
//! - [`trace`] - process-wide trace hook

/// Wire encoding, framing and streaming import/export.
pub mod codec;
/// Connection engine (bind, reconnect, correlation, protocol detection).
pub mod connection;
/// UDP discovery of equipment.
pub mod discover;
/// Error type and per-object last error.
pub mod error;
/// Interfaces to the external signature and fingerprint engines.
pub mod matcher;
/// Message tree.
pub mod message;
/// Bounded message queue.
pub mod queue;
/// Process-wide trace hook over the `log` facade.
pub mod trace;
/// Stream transports, bind options and TLS policy.
pub mod transport;

pub use connection::{Connection, ConnectionId, LinkState, Protocol, REQUEST_ID_ATTRIBUTE};
pub use discover::{DiscoverConfig, Discoverer, DEFAULT_DISCOVERY_PORT};
pub use error::{last_error, Error, LastError, Result};
pub use matcher::{
    compare_signatures, FingerprintEngine, PlateFingerprintMatcher, Signature, SignatureComparer,
};
pub use message::{str_to_bool, string_equal, Element, Message, SharedMessage, UserData};
pub use queue::{MessageQueue, QueueFull, DEFAULT_QUEUE_CAPACITY};
pub use trace::{set_trace_function, TraceLevel};
pub use transport::{BindOptions, SslErrors, DEFAULT_PORT, DEFAULT_TLS_PORT};

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Version with the wire format revision and TLS backend.
pub fn full_version() -> String {
    format!(
        "cdk {} (wire v{}, rustls/ring)",
        version(),
        codec::WIRE_VERSION
    )
}
