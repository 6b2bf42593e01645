// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Simulated equipment shared by the link tests.

#![allow(dead_code)]

use cdk::codec::{FrameCodec, DEFAULT_MAX_MESSAGE_SIZE};
use cdk::{Element, Message, REQUEST_ID_ATTRIBUTE};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// Listen on an ephemeral loopback port and run `session` on its own thread
/// for each of the first `sessions` accepted links.
pub fn spawn_equipment<F>(sessions: usize, session: F) -> SocketAddr
where
    F: Fn(usize, TcpStream) + Send + Sync + 'static,
{
    let session = Arc::new(session);
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind equipment");
    let addr = listener.local_addr().expect("equipment addr");
    thread::Builder::new()
        .name("equipment".into())
        .spawn(move || {
            for index in 0..sessions {
                let Ok((stream, _)) = listener.accept() else {
                    return;
                };
                let session = Arc::clone(&session);
                thread::spawn(move || session(index, stream));
            }
        })
        .expect("spawn equipment");
    addr
}

pub fn send<W: Write>(stream: &mut W, msg: &Message) -> io::Result<()> {
    let frame = FrameCodec::new(DEFAULT_MAX_MESSAGE_SIZE)
        .encode_message(msg)
        .map_err(|e| io::Error::other(e.to_string()))?;
    stream.write_all(&frame)?;
    stream.flush()
}

pub fn recv<R: Read>(stream: &mut R) -> io::Result<Message> {
    let mut codec = FrameCodec::new(DEFAULT_MAX_MESSAGE_SIZE);
    loop {
        if let Some(payload) = codec.decode(stream)? {
            return Message::import_from_slice(&payload)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()));
        }
    }
}

pub fn hello(protocol: &str) -> Message {
    let mut root = Element::new("Hello").unwrap();
    root.set_attribute("protocol", protocol).unwrap();
    Message::with_root(root)
}

pub fn event(name: &str) -> Message {
    Message::with_root(Element::new(name).unwrap())
}

/// Answer every `Status` request with a `StatusReply` echoing its id.
/// Other messages are handed to `seen`. Returns at end of stream.
pub fn serve_requests<S: Read + Write>(stream: &mut S, mut seen: impl FnMut(Message)) {
    while let Ok(msg) = recv(stream) {
        let Some(root) = msg.root() else { continue };
        if root.is_named("Status") {
            let mut reply = Element::new("StatusReply").unwrap();
            reply.set_attribute("state", "ok").unwrap();
            if let Some(id) = root.attribute_u32(REQUEST_ID_ATTRIBUTE) {
                reply.set_attribute_u32(REQUEST_ID_ATTRIBUTE, id).unwrap();
            }
            if send(stream, &Message::with_root(reply)).is_err() {
                return;
            }
        } else {
            seen(msg);
        }
    }
}
