// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire codec: export/import paths agree with each other.

use cdk::codec::{FrameCodec, MAX_DEPTH};
use cdk::{Element, Error, Message};
use std::io::Cursor;

fn random_name(rng: &mut fastrand::Rng) -> String {
    let len = rng.usize(1..12);
    (0..len).map(|_| rng.alphanumeric()).collect()
}

fn random_element(rng: &mut fastrand::Rng, depth: usize) -> Element {
    let mut e = Element::new(random_name(rng)).unwrap();
    for _ in 0..rng.usize(0..5) {
        let value: String = (0..rng.usize(0..20)).map(|_| rng.char('a'..='z')).collect();
        e.set_attribute(&random_name(rng), value).unwrap();
    }
    if rng.bool() {
        let content: Vec<u8> = (0..rng.usize(0..300)).map(|_| rng.u8(..)).collect();
        e.set_content(&content);
    }
    if depth < 5 {
        for _ in 0..rng.usize(0..4) {
            e.add_child(random_element(rng, depth + 1));
        }
    }
    e
}

#[test]
fn test_random_trees_survive_every_path() {
    let mut rng = fastrand::Rng::with_seed(0xC0DE);
    for _ in 0..64 {
        let msg = Message::with_root(random_element(&mut rng, 0));
        let bytes = msg.export_to_vec().unwrap();
        assert_eq!(bytes.len(), msg.encoded_len());

        // Fixed buffer, exact size.
        let mut buf = vec![0u8; msg.encoded_len()];
        assert_eq!(msg.export_to_slice(&mut buf).unwrap(), bytes.len());
        assert_eq!(buf, bytes);

        // Chunked export concatenates to the same bytes.
        let mut chunked = Vec::new();
        msg.export_with(|chunk| {
            chunked.extend_from_slice(chunk);
            true
        })
        .unwrap();
        assert_eq!(chunked, bytes);

        // Pull import in small irregular reads.
        let mut offset = 0;
        let step = rng.usize(1..17);
        let pulled = Message::import_with(|out| {
            let n = step.min(out.len()).min(bytes.len() - offset);
            out[..n].copy_from_slice(&bytes[offset..offset + n]);
            offset += n;
            Some(n)
        })
        .unwrap();
        assert_eq!(pulled, msg);
        assert_eq!(Message::import_from_slice(&bytes).unwrap(), msg);
    }
}

#[test]
fn test_empty_message() {
    let msg = Message::new();
    let bytes = msg.export_to_vec().unwrap();
    let back = Message::import_from_slice(&bytes).unwrap();
    assert!(!back.has_root());
}

#[test]
fn test_buffer_too_small_writes_nothing() {
    let mut root = Element::new("Status").unwrap();
    root.set_content(&[7u8; 64]);
    let msg = Message::with_root(root);

    let mut buf = vec![0xAAu8; msg.encoded_len() - 1];
    match msg.export_to_slice(&mut buf) {
        Err(Error::BufferTooSmall { needed, available }) => {
            assert_eq!(needed, msg.encoded_len());
            assert_eq!(available, buf.len());
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(buf.iter().all(|b| *b == 0xAA));
    assert!(cdk::last_error(&msg).is_some());
}

#[test]
fn test_export_abort() {
    let msg = Message::with_root(Element::new("Status").unwrap());
    let mut calls = 0;
    let res = msg.export_with(|_| {
        calls += 1;
        false
    });
    assert!(matches!(res, Err(Error::ExportAborted)));
    assert_eq!(calls, 1);
}

#[test]
fn test_import_abort_and_truncation() {
    let msg = Message::with_root(Element::new("Status").unwrap());
    let bytes = msg.export_to_vec().unwrap();

    let res = Message::import_with(|_| None);
    assert!(matches!(res, Err(Error::ImportAborted)));

    let truncated = &bytes[..bytes.len() - 1];
    assert!(Message::import_from_slice(truncated).is_err());

    let mut trailing = bytes.clone();
    trailing.push(0);
    assert!(Message::import_from_slice(&trailing).is_err());
}

#[test]
fn test_reader_consumes_exactly_one_message() {
    let a = Message::with_root(Element::new("A").unwrap());
    let b = Message::with_root(Element::new("B").unwrap());
    let mut stream = a.export_to_vec().unwrap();
    stream.extend(b.export_to_vec().unwrap());

    let mut cursor = Cursor::new(stream);
    assert_eq!(Message::import_from_reader(&mut cursor).unwrap(), a);
    assert_eq!(Message::import_from_reader(&mut cursor).unwrap(), b);
}

#[test]
fn test_depth_limit() {
    let mut root = Element::new("n").unwrap();
    for _ in 0..MAX_DEPTH + 1 {
        let mut parent = Element::new("n").unwrap();
        parent.add_child(root);
        root = parent;
    }
    let msg = Message::with_root(root);
    match msg.export_to_vec() {
        // Encoding refuses too, or decoding does: either way no deep tree comes back.
        Err(_) => {}
        Ok(bytes) => assert!(matches!(Message::import_from_slice(&bytes), Err(Error::Decode(_)))),
    }
}

#[test]
fn test_frames_over_a_stream() {
    let codec = FrameCodec::new(1024);
    let msgs: Vec<Message> = ["Hello", "Status", "Event"]
        .iter()
        .map(|n| Message::with_root(Element::new(*n).unwrap()))
        .collect();
    let mut wire = Vec::new();
    for m in &msgs {
        wire.extend(codec.encode_message(m).unwrap());
    }

    let mut reader = Cursor::new(wire);
    let mut decoder = FrameCodec::new(1024);
    for m in &msgs {
        let payload = decoder.decode(&mut reader).unwrap().unwrap();
        assert_eq!(&Message::import_from_slice(&payload).unwrap(), m);
    }
    assert_eq!(decoder.frames_decoded(), 3);

    let mut big = Element::new("Big").unwrap();
    big.set_content(&[0u8; 2048]);
    assert!(matches!(
        codec.encode_message(&Message::with_root(big)),
        Err(Error::FrameTooLarge { .. })
    ));
}
