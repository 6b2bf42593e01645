// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Codec throughput benchmark.
//!
//! Encodes and decodes a passage-like message (a few attributes, an image
//! blob and a list of reads) through the fixed-buffer, chunked and framed
//! paths.

#![allow(clippy::uninlined_format_args)]

use cdk::codec::FrameCodec;
use cdk::{Element, Message};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::Cursor;

fn passage(image_size: usize) -> Message {
    let mut root = Element::new("Passage").unwrap();
    root.set_attribute_u32("lane", 2).unwrap();
    root.set_attribute_i64("timestamp", 1_700_000_000_000).unwrap();
    let plate = root.add_child(Element::new("Plate").unwrap());
    plate.set_attribute("country", "FR").unwrap();
    plate.set_content(b"AB-123-CD");
    for i in 0..16u32 {
        let read = root.add_child(Element::new("Read").unwrap());
        read.set_attribute_u32("index", i).unwrap();
        read.set_attribute_f64("confidence", 0.5 + f64::from(i) / 64.0).unwrap();
    }
    root.add_child(Element::new("Image").unwrap())
        .set_content(&vec![0x5Au8; image_size]);
    Message::with_root(root)
}

fn bench_export(c: &mut Criterion) {
    let mut group = c.benchmark_group("export");
    for size in [0usize, 4 * 1024, 256 * 1024] {
        let msg = passage(size);
        let mut buf = vec![0u8; msg.encoded_len()];
        group.throughput(Throughput::Bytes(msg.encoded_len() as u64));
        group.bench_with_input(BenchmarkId::new("slice", size), &msg, |b, msg| {
            b.iter(|| msg.export_to_slice(black_box(&mut buf)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("chunks", size), &msg, |b, msg| {
            b.iter(|| {
                let mut total = 0usize;
                msg.export_with(|chunk| {
                    total += chunk.len();
                    true
                })
                .unwrap();
                black_box(total)
            });
        });
    }
    group.finish();
}

fn bench_import(c: &mut Criterion) {
    let mut group = c.benchmark_group("import");
    for size in [0usize, 4 * 1024, 256 * 1024] {
        let bytes = passage(size).export_to_vec().unwrap();
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("slice", size), &bytes, |b, bytes| {
            b.iter(|| Message::import_from_slice(black_box(bytes)).unwrap());
        });
    }
    group.finish();
}

fn bench_framed(c: &mut Criterion) {
    let msg = passage(4 * 1024);
    let codec = FrameCodec::new(cdk::codec::DEFAULT_MAX_MESSAGE_SIZE);

    c.bench_function("framed_roundtrip_4k", |b| {
        b.iter(|| {
            let encoded = codec.encode_message(black_box(&msg)).unwrap();
            let mut decoder = FrameCodec::new(cdk::codec::DEFAULT_MAX_MESSAGE_SIZE);
            let payload = decoder.decode(&mut Cursor::new(&encoded)).unwrap().unwrap();
            black_box(Message::import_from_slice(&payload).unwrap())
        });
    });
}

criterion_group!(benches, bench_export, bench_import, bench_framed);
criterion_main!(benches);
