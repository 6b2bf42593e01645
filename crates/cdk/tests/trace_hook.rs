// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-wide trace hook. Kept in its own test binary: the hook is a
//! global `log` backend and can only be installed once per process.

use cdk::trace::{set_trace_function, set_trace_level, TraceLevel};
use cdk::{BindOptions, Connection, ConnectionId, Error};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

type Captured = Arc<Mutex<Vec<(Option<ConnectionId>, TraceLevel, String)>>>;

fn wait_for(records: &Captured, mut cond: impl FnMut(&(Option<ConnectionId>, TraceLevel, String)) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if records.lock().iter().any(&mut cond) {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_hook_receives_crate_records() {
    let records: Captured = Arc::new(Mutex::new(Vec::new()));
    {
        let records = Arc::clone(&records);
        set_trace_function(move |conn, level, text| {
            records.lock().push((conn, level, text.to_string()));
        })
        .unwrap();
    }
    assert!(matches!(
        set_trace_function(|_, _, _| {}),
        Err(Error::InvalidState(_))
    ));

    // Records from a connection carry its id.
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = closed.local_addr().unwrap().port();
    drop(closed);
    let conn = Connection::new();
    conn.bind_with_options(
        "127.0.0.1",
        port,
        BindOptions::default()
            .with_connect_timeout(Duration::from_millis(200))
            .with_reconnect_delay(Duration::from_millis(50)),
    )
    .unwrap();
    let id = conn.id();
    assert!(wait_for(&records, |(c, level, text)| {
        *c == Some(id) && *level == TraceLevel::Info && text.contains("binding to 127.0.0.1")
    }));
    assert!(wait_for(&records, |(c, level, text)| {
        *c == Some(id) && *level == TraceLevel::Warning && text.contains("connect to 127.0.0.1 failed")
    }));
    conn.unbind().unwrap();
    assert!(wait_for(&records, |(c, _, text)| *c == Some(id) && text.contains("unbound")));

    // Only this crate's records are forwarded.
    log::warn!(target: "some_other_crate", "not ours");
    log::warn!(target: "cdk", "plain crate record");
    assert!(wait_for(&records, |(c, level, text)| {
        c.is_none() && *level == TraceLevel::Warning && text == "plain crate record"
    }));
    assert!(!records.lock().iter().any(|(_, _, text)| text == "not ours"));

    // Narrowing the level drops the more verbose records.
    set_trace_level(TraceLevel::Warning);
    log::info!(target: "cdk", "filtered out");
    log::error!(target: "cdk", "still delivered");
    assert!(wait_for(&records, |(_, level, text)| {
        *level == TraceLevel::Error && text == "still delivered"
    }));
    assert!(!records.lock().iter().any(|(_, _, text)| text == "filtered out"));
}
