// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use cdk::codec::FrameCodec;
use cdk::Message;
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    // Small limit so oversized headers are exercised too.
    let mut codec = FrameCodec::new(64 * 1024);
    let mut reader = Cursor::new(data);
    while let Ok(Some(payload)) = codec.decode(&mut reader) {
        let _ = Message::import_from_slice(&payload);
    }
});
