// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use cdk::Message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(msg) = Message::import_from_slice(data) else {
        return;
    };

    // Whatever decodes must survive a re-encode.
    let bytes = msg.export_to_vec().expect("decoded message re-encodes");
    let again = Message::import_from_slice(&bytes).expect("re-encoded message decodes");
    assert!(again == msg);

    // Pull import in 7-byte steps agrees with the slice decoder.
    let mut offset = 0;
    let pulled = Message::import_with(|out| {
        let n = out.len().min(7).min(data.len() - offset);
        out[..n].copy_from_slice(&data[offset..offset + n]);
        offset += n;
        Some(n)
    })
    .expect("pull import agrees with slice import");
    assert!(pulled == msg);
});
