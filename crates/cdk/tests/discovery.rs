// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery against local UDP responders.

use cdk::discover::PROBE_ELEMENT;
use cdk::{DiscoverConfig, Discoverer, Element, Message};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Answers each probe with an announcement carrying `serial` and a counter.
struct Responder {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
}

impl Responder {
    fn spawn(serial: &'static str) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let addr = socket.local_addr().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        thread::spawn(move || {
            let mut buf = [0u8; 2048];
            let mut answered = 0u32;
            while !flag.load(Ordering::Relaxed) {
                let Ok((len, from)) = socket.recv_from(&mut buf) else {
                    continue;
                };
                let Ok(probe) = Message::import_from_slice(&buf[..len]) else {
                    continue;
                };
                if !probe.root().is_some_and(|r| r.is_named(PROBE_ELEMENT)) {
                    continue;
                }
                answered += 1;
                let mut root = Element::new("Device").unwrap();
                root.set_attribute("serial", serial).unwrap();
                root.set_attribute_u32("answer", answered).unwrap();
                let bytes = Message::with_root(root).export_to_vec().unwrap();
                let _ = socket.send_to(&bytes, from);
                // Noise that must be ignored.
                let _ = socket.send_to(b"garbage", from);
            }
        });
        Self { addr, stop }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn config(target: SocketAddr) -> DiscoverConfig {
    DiscoverConfig::default()
        .with_bind_addr("127.0.0.1:0".parse().unwrap())
        .with_probe_target(target)
        .with_probe_interval(Duration::from_millis(50))
        .with_poll_interval(Duration::from_millis(20))
}

fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[test]
fn test_collects_and_dedupes_by_source() {
    let responder = Responder::spawn("SN-001");
    let discoverer = Discoverer::with_config(config(responder.addr));
    discoverer.start().unwrap();

    // Several probes go out; the device still occupies one entry.
    assert!(wait_for(Duration::from_secs(5), || {
        discoverer
            .discovered()
            .first()
            .and_then(|m| m.root().and_then(|r| r.attribute_u32("answer")))
            .is_some_and(|n| n >= 3)
    }));
    assert_eq!(discoverer.discovered_count(), 1);

    let found = discoverer.discovered_with_source();
    assert_eq!(found[0].0, responder.addr);
    assert_eq!(found[0].1.root().unwrap().attribute("serial"), Some("SN-001"));

    discoverer.stop();
    assert!(!discoverer.is_running());
    // The snapshot outlives the collector.
    assert_eq!(discoverer.discovered_count(), 1);
}

#[test]
fn test_restart_clears_snapshot() {
    let responder = Responder::spawn("SN-A");
    let discoverer = Discoverer::with_config(config(responder.addr));
    discoverer.start().unwrap();
    assert!(wait_for(Duration::from_secs(5), || discoverer.discovered_count() == 1));
    discoverer.stop();
    assert_eq!(discoverer.discovered_count(), 1);

    drop(responder);
    thread::sleep(Duration::from_millis(150));
    discoverer.start().unwrap();
    assert_eq!(discoverer.discovered_count(), 0);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(discoverer.discovered_count(), 0);
}

#[test]
fn test_probe_reaches_target() {
    let target = UdpSocket::bind("127.0.0.1:0").unwrap();
    target
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let discoverer = Discoverer::with_config(config(target.local_addr().unwrap()));
    discoverer.start().unwrap();

    let mut buf = [0u8; 512];
    let (len, from) = target.recv_from(&mut buf).unwrap();
    assert_eq!(Some(from), discoverer.local_addr());
    let probe = Message::import_from_slice(&buf[..len]).unwrap();
    assert!(probe.root().unwrap().is_named(PROBE_ELEMENT));

    // Another client's probe is not an announcement.
    target.send_to(&buf[..len], from).unwrap();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(discoverer.discovered_count(), 0);
}

#[test]
fn test_invalid_config_refused() {
    let discoverer = Discoverer::with_config(
        DiscoverConfig::default().with_poll_interval(Duration::ZERO),
    );
    assert!(discoverer.start().is_err());
    assert!(!discoverer.is_running());
    assert!(cdk::last_error(&discoverer).unwrap().contains("poll_interval"));
}
