// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte-exact message encoding (format version 1).
//!
//! ```text
//! Message  := 'C' 'D' 'K' | version:u8 | flags:u8 | [Element]   (flags bit0 = root present)
//! Element  := name_len:u16 | name | attr_count:u16 | Attr*
//!             | content_len:u32 | content | child_count:u32 | Element*
//! Attr     := key_len:u16 | key | value_len:u32 | value
//! ```
//!
//! All integers are big-endian. Names, keys and values are UTF-8; content is
//! carried verbatim. Every length is explicit so encoded messages can be
//! concatenated and decoded back one by one.

use crate::error::{Error, Result};
use crate::message::{Element, Message};
use std::collections::HashSet;
use std::io::{self, Read};

/// Leading magic bytes.
pub const MAGIC: [u8; 3] = *b"CDK";

/// Format version written by this crate and the only one it accepts.
pub const WIRE_VERSION: u8 = 1;

/// Flag bit: a root element follows the preamble.
pub const FLAG_HAS_ROOT: u8 = 0x01;

/// Magic + version + flags.
pub const PREAMBLE_LEN: usize = 5;

/// Deepest accepted nesting (root = 1).
pub const MAX_DEPTH: usize = 64;

// ============================================================================
// Encoding
// ============================================================================

pub(crate) fn preamble(msg: &Message) -> [u8; PREAMBLE_LEN] {
    let flags = if msg.has_root() { FLAG_HAS_ROOT } else { 0 };
    [MAGIC[0], MAGIC[1], MAGIC[2], WIRE_VERSION, flags]
}

/// Reject trees the format cannot represent.
pub(crate) fn check_limits(el: &Element, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::InvalidArgument(format!(
            "tree deeper than {} levels",
            MAX_DEPTH
        )));
    }
    if el.name().len() > usize::from(u16::MAX) {
        return Err(Error::InvalidArgument(format!(
            "element name of {} bytes exceeds 65535",
            el.name().len()
        )));
    }
    if el.attribute_count() > usize::from(u16::MAX) {
        return Err(Error::InvalidArgument(format!(
            "element '{}' has more than 65535 attributes",
            el.name()
        )));
    }
    for (key, value) in el.attributes().iter() {
        if key.len() > usize::from(u16::MAX) || value.len() > u32::MAX as usize {
            return Err(Error::InvalidArgument(format!(
                "attribute '{}' too long to encode",
                key
            )));
        }
    }
    if el.content_size() > u32::MAX as usize || el.children().len() > u32::MAX as usize {
        return Err(Error::InvalidArgument(format!(
            "element '{}' too large to encode",
            el.name()
        )));
    }
    el.children()
        .iter()
        .try_for_each(|c| check_limits(c, depth + 1))
}

/// Name, attributes and content length: everything before the content bytes.
/// Assumes [`check_limits`] passed.
pub(crate) fn write_header(el: &Element, out: &mut Vec<u8>) {
    out.extend_from_slice(&(el.name().len() as u16).to_be_bytes());
    out.extend_from_slice(el.name().as_bytes());
    out.extend_from_slice(&(el.attribute_count() as u16).to_be_bytes());
    for (key, value) in el.attributes().iter() {
        out.extend_from_slice(&(key.len() as u16).to_be_bytes());
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(&(value.len() as u32).to_be_bytes());
        out.extend_from_slice(value.as_bytes());
    }
    out.extend_from_slice(&(el.content_size() as u32).to_be_bytes());
}

fn encode_element(el: &Element, out: &mut Vec<u8>) {
    write_header(el, out);
    out.extend_from_slice(el.content());
    out.extend_from_slice(&(el.children().len() as u32).to_be_bytes());
    for child in el.children() {
        encode_element(child, out);
    }
}

fn element_len(el: &Element) -> usize {
    let attrs: usize = el
        .attributes()
        .iter()
        .map(|(k, v)| 2 + k.len() + 4 + v.len())
        .sum();
    let children: usize = el.children().iter().map(element_len).sum();
    2 + el.name().len() + 2 + attrs + 4 + el.content_size() + 4 + children
}

pub(crate) fn encoded_len(msg: &Message) -> usize {
    PREAMBLE_LEN + msg.root().map_or(0, element_len)
}

/// Append the encoded message to `out`.
pub(crate) fn encode_into(msg: &Message, out: &mut Vec<u8>) -> Result<()> {
    if let Some(root) = msg.root() {
        check_limits(root, 1)?;
    }
    out.extend_from_slice(&preamble(msg));
    if let Some(root) = msg.root() {
        encode_element(root, out);
    }
    Ok(())
}

pub(crate) fn encode_to_slice(msg: &Message, buf: &mut [u8]) -> Result<usize> {
    let needed = encoded_len(msg);
    if needed > buf.len() {
        return Err(Error::BufferTooSmall {
            needed,
            available: buf.len(),
        });
    }
    let mut out = Vec::with_capacity(needed);
    encode_into(msg, &mut out)?;
    buf[..needed].copy_from_slice(&out);
    Ok(needed)
}

// ============================================================================
// Decoding
// ============================================================================

fn io_error(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::Decode("truncated input".into())
    } else {
        Error::Io(e)
    }
}

fn read_array<R: Read, const N: usize>(r: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf).map_err(io_error)?;
    Ok(buf)
}

fn read_u16<R: Read>(r: &mut R) -> Result<u16> {
    read_array(r).map(u16::from_be_bytes)
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    read_array(r).map(u32::from_be_bytes)
}

/// Grows with the data actually received, so a forged length cannot force a
/// huge allocation up front.
fn read_bytes<R: Read>(r: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    r.by_ref()
        .take(len as u64)
        .read_to_end(&mut buf)
        .map_err(io_error)?;
    if buf.len() != len {
        return Err(Error::Decode("truncated input".into()));
    }
    Ok(buf)
}

fn read_string<R: Read>(r: &mut R, len: usize, what: &str) -> Result<String> {
    String::from_utf8(read_bytes(r, len)?)
        .map_err(|_| Error::Decode(format!("{} is not valid UTF-8", what)))
}

fn decode_element<R: Read>(r: &mut R, depth: usize) -> Result<Element> {
    if depth > MAX_DEPTH {
        return Err(Error::Decode(format!(
            "nesting deeper than {} levels",
            MAX_DEPTH
        )));
    }

    let name_len = usize::from(read_u16(r)?);
    if name_len == 0 {
        return Err(Error::Decode("empty element name".into()));
    }
    let mut el = Element::named(read_string(r, name_len, "element name")?);

    let attr_count = read_u16(r)?;
    let mut seen = HashSet::new();
    for _ in 0..attr_count {
        let key_len = usize::from(read_u16(r)?);
        if key_len == 0 {
            return Err(Error::Decode("empty attribute key".into()));
        }
        let key = read_string(r, key_len, "attribute key")?;
        let value_len = read_u32(r)? as usize;
        let value = read_string(r, value_len, "attribute value")?;
        if !seen.insert(key.to_ascii_lowercase()) {
            return Err(Error::Decode(format!("duplicate attribute key '{}'", key)));
        }
        el.attributes_mut().push_unique(key, value);
    }

    let content_len = read_u32(r)? as usize;
    if content_len > 0 {
        let content = read_bytes(r, content_len)?;
        el.set_content(&content);
    }

    let child_count = read_u32(r)?;
    for _ in 0..child_count {
        el.add_child(decode_element(r, depth + 1)?);
    }
    Ok(el)
}

/// Decode one message, consuming exactly its bytes from `r`.
pub(crate) fn decode_from<R: Read>(r: &mut R) -> Result<Message> {
    let preamble: [u8; PREAMBLE_LEN] = read_array(r)?;
    if preamble[..3] != MAGIC {
        return Err(Error::Decode("bad magic".into()));
    }
    if preamble[3] != WIRE_VERSION {
        return Err(Error::Decode(format!(
            "unsupported wire version {}",
            preamble[3]
        )));
    }
    let flags = preamble[4];
    if flags & !FLAG_HAS_ROOT != 0 {
        return Err(Error::Decode(format!("unknown flags 0x{:02x}", flags)));
    }

    let mut msg = Message::new();
    if flags & FLAG_HAS_ROOT != 0 {
        msg.set_root(decode_element(r, 1)?);
    }
    Ok(msg)
}

/// Decode a message that occupies all of `bytes`.
pub(crate) fn decode(bytes: &[u8]) -> Result<Message> {
    let mut rest = bytes;
    let msg = decode_from(&mut rest)?;
    if !rest.is_empty() {
        return Err(Error::Decode(format!(
            "{} trailing bytes after message",
            rest.len()
        )));
    }
    Ok(msg)
}
