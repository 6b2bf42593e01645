// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Link worker: one thread per bound connection.
//!
//! ```text
//!   ┌──────────► connect ──► TLS handshake ──► greeting ──► read loop ─┐
//!   │              │ fail          │ fail                      │ error │
//!   │              ▼               ▼                           ▼       │
//!   └── pause(reconnect_delay) ◄───┴───────────────── link_down ◄──────┘
//! ```
//!
//! The worker exits as soon as the connection stops running.

use super::protocol::{self, Protocol};
use super::{deadline_after, LinkState, LinkTarget, Shared};
use crate::codec::FrameCodec;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::transport::tls::TlsConnector;
use crate::transport::{BoxedByteStream, ByteStream};
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Read timeout used to poll for unbind between frames.
const READ_POLL: Duration = Duration::from_millis(100);

/// Worker entry point.
pub(crate) fn run(shared: Arc<Shared>, target: LinkTarget) {
    let log_target = shared.log_target.as_str();
    log::debug!(target: log_target, "[link] worker started for {}", target.host);

    while shared.is_running() {
        match establish(&shared, &target) {
            Ok(link) => serve(&shared, &target, link),
            Err(e) => {
                log::warn!(target: log_target, "[link] connect to {} failed: {}", target.host, e);
                shared.last_error.record(&e);
                let mut status = shared.link.lock();
                if status.state == LinkState::Binding && shared.is_running() {
                    status.state = LinkState::Disconnected;
                    shared.link_changed.notify_all();
                }
            }
        }
        if shared.is_running() {
            shared.pause(target.options.reconnect_delay);
        }
    }

    log::debug!(target: log_target, "[link] worker stopped");
}

/// An established link before it is published.
struct Link {
    stream: BoxedByteStream,
    peer: SocketAddr,
    protocol: Protocol,
    first: Option<Message>,
    codec: FrameCodec,
}

fn establish(shared: &Shared, target: &LinkTarget) -> Result<Link> {
    let options = &target.options;
    let (tcp, peer) = connect_any(&target.addrs, options.connect_timeout)?;
    tcp.set_nodelay(options.nodelay)?;

    let mut stream: BoxedByteStream = match &target.tls {
        Some(settings) => {
            let ignore = shared.ignore_mask();
            let connector = TlsConnector::new(settings, ignore, Arc::clone(&shared.ssl_errors))?;
            match connector.connect(tcp, options.connect_timeout) {
                Ok(tls) => Box::new(tls),
                Err(e) if is_certificate_rejection(&e) => {
                    let bits = shared.observed_ssl_errors().unignored(ignore);
                    return Err(Error::CertificateRejected(bits));
                }
                Err(e) => return Err(Error::Tls(e.to_string())),
            }
        }
        None => Box::new(tcp),
    };
    stream.set_read_timeout(Some(READ_POLL))?;
    stream.set_write_timeout(Some(options.connect_timeout))?;

    let mut codec = FrameCodec::new(options.max_message_size);
    let (protocol, first) = await_greeting(shared, &mut stream, &mut codec, options.greeting_timeout)?;

    Ok(Link {
        stream,
        peer,
        protocol,
        first,
        codec,
    })
}

fn connect_any(addrs: &[SocketAddr], timeout: Duration) -> io::Result<(TcpStream, SocketAddr)> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(addr, timeout) {
            Ok(stream) => return Ok((stream, *addr)),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address to connect to")))
}

fn is_certificate_rejection(e: &io::Error) -> bool {
    e.get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(|inner| matches!(inner, rustls::Error::InvalidCertificate(_)))
}

/// Wait for the first frame and classify the peer.
///
/// Returns the protocol and, when the first message was not a greeting, that
/// message for normal delivery.
fn await_greeting(
    shared: &Shared,
    stream: &mut BoxedByteStream,
    codec: &mut FrameCodec,
    timeout: Duration,
) -> Result<(Protocol, Option<Message>)> {
    let deadline = deadline_after(timeout);
    while shared.is_running() && Instant::now() < deadline {
        let Some(payload) = codec.decode(stream)? else {
            continue;
        };
        let msg = match Message::import_from_slice(&payload) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!(
                    target: shared.log_target.as_str(),
                    "[link] undecodable first frame skipped, assuming {}: {}",
                    Protocol::default(),
                    e
                );
                return Ok((Protocol::default(), None));
            }
        };
        return Ok(match protocol::classify(&msg) {
            Some(protocol) => {
                log::debug!(target: shared.log_target.as_str(), "[link] greeting: {}", protocol);
                (protocol, None)
            }
            None => (Protocol::default(), Some(msg)),
        });
    }
    Ok((Protocol::default(), None))
}

/// Publish the link, pump frames until it fails, then tear it down.
fn serve(shared: &Shared, target: &LinkTarget, link: Link) {
    let log_target = shared.log_target.as_str();
    let Link {
        mut stream,
        peer,
        protocol,
        first,
        mut codec,
    } = link;

    let writer = match stream.try_clone_box() {
        Ok(writer) => writer,
        Err(e) => {
            log::warn!(target: log_target, "[link] cannot clone stream: {}", e);
            shared.last_error.record(&Error::Io(e));
            return;
        }
    };
    shared.link_up(writer, protocol, peer);
    if !shared.is_running() {
        // Unbound while connecting; unbind may have missed the new writer.
        shared.link_down();
        return;
    }
    log::info!(
        target: log_target,
        "[link] connected to {} ({}){}",
        peer,
        protocol,
        if stream.is_tls() { " over TLS" } else { "" }
    );

    if let Some(msg) = first {
        shared.dispatch(msg);
    }

    let reason = read_loop(shared, &mut stream, &mut codec);
    match reason {
        Some(e) if shared.is_running() => {
            log::warn!(target: log_target, "[link] link to {} lost: {}", target.host, e);
            shared.last_error.record(&e);
        }
        _ => log::debug!(target: log_target, "[link] link to {} closed", target.host),
    }
    shared.link_down();
    log::debug!(
        target: log_target,
        "[link] {} frame(s), {} byte(s) received",
        codec.frames_decoded(),
        codec.bytes_decoded()
    );
}

/// Returns the error that ended the link, `None` when unbound.
fn read_loop(shared: &Shared, stream: &mut BoxedByteStream, codec: &mut FrameCodec) -> Option<Error> {
    while shared.is_running() {
        match codec.decode(stream) {
            Ok(Some(payload)) => match Message::import_from_slice(&payload) {
                Ok(msg) => shared.dispatch(msg),
                Err(e) => {
                    log::warn!(target: shared.log_target.as_str(), "[link] undecodable frame skipped: {}", e);
                }
            },
            Ok(None) => {}
            Err(e) => return Some(Error::Io(e)),
        }
    }
    None
}
