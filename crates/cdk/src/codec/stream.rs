// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Streaming export and import.
//!
//! Export is a lazy pre-order walk of the tree producing the same bytes as
//! the fixed-buffer encoder, chunk by chunk. Element content is yielded as a
//! borrowed slice, so large images are never copied. Import adapts a pull
//! callback into [`std::io::Read`] for the decoder.

use super::wire;
use crate::error::Result;
use crate::message::{Element, Message};
use std::borrow::Cow;
use std::io::{self, Read};
use std::slice;

/// Iterator over the encoded chunks of one message.
///
/// Finite and not restartable: create a new one to export again.
pub struct ExportChunks<'a> {
    preamble: Option<[u8; wire::PREAMBLE_LEN]>,
    next: Option<&'a Element>,
    content: Option<&'a [u8]>,
    tail: Option<[u8; 4]>,
    stack: Vec<slice::Iter<'a, Element>>,
}

impl<'a> ExportChunks<'a> {
    pub(crate) fn new(msg: &'a Message) -> Result<Self> {
        if let Some(root) = msg.root() {
            wire::check_limits(root, 1)?;
        }
        Ok(Self {
            preamble: Some(wire::preamble(msg)),
            next: msg.root(),
            content: None,
            tail: None,
            stack: Vec::new(),
        })
    }

    fn next_element(&mut self) -> Option<&'a Element> {
        if let Some(el) = self.next.take() {
            return Some(el);
        }
        loop {
            let top = self.stack.last_mut()?;
            match top.next() {
                Some(el) => return Some(el),
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

impl<'a> Iterator for ExportChunks<'a> {
    type Item = Cow<'a, [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(p) = self.preamble.take() {
            return Some(Cow::Owned(p.to_vec()));
        }
        if let Some(content) = self.content.take() {
            return Some(Cow::Borrowed(content));
        }
        if let Some(tail) = self.tail.take() {
            return Some(Cow::Owned(tail.to_vec()));
        }

        let el = self.next_element()?;
        let mut header = Vec::new();
        wire::write_header(el, &mut header);
        let child_count = (el.children().len() as u32).to_be_bytes();
        if el.content().is_empty() {
            header.extend_from_slice(&child_count);
        } else {
            self.content = Some(el.content());
            self.tail = Some(child_count);
        }
        self.stack.push(el.children().iter());
        Some(Cow::Owned(header))
    }
}

/// [`Read`] adapter over a pull callback.
///
/// The callback fills the buffer and returns the byte count, `Some(0)` at
/// end of input, or `None` to abort the import.
pub struct PullReader<F> {
    source: F,
    aborted: bool,
}

impl<F> PullReader<F>
where
    F: FnMut(&mut [u8]) -> Option<usize>,
{
    pub fn new(source: F) -> Self {
        Self {
            source,
            aborted: false,
        }
    }

    /// Whether the callback asked to abort.
    pub fn aborted(&self) -> bool {
        self.aborted
    }
}

impl<F> Read for PullReader<F>
where
    F: FnMut(&mut [u8]) -> Option<usize>,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.aborted {
            return Err(io::Error::other("import aborted by source"));
        }
        match (self.source)(buf) {
            Some(n) if n <= buf.len() => Ok(n),
            Some(n) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("source returned {} bytes for a {}-byte buffer", n, buf.len()),
            )),
            None => {
                self.aborted = true;
                Err(io::Error::other("import aborted by source"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Message {
        let mut root = Element::new("Event").unwrap();
        root.set_attribute("lane", "2").unwrap();
        let plate = root.add_child(Element::new("Plate").unwrap());
        plate.set_attribute("text", "AB123CD").unwrap();
        plate.add_child(Element::new("Image").unwrap())
            .set_content(&[0xFF, 0xD8, 0x00, 0xFF, 0xD9]);
        root.add_child(Element::new("Speed").unwrap())
            .set_content(b"88");
        Message::with_root(root)
    }

    #[test]
    fn test_chunks_match_fixed_encoding() {
        let msg = tree();
        let streamed: Vec<u8> = msg
            .export_chunks()
            .unwrap()
            .flat_map(|c| c.into_owned())
            .collect();
        assert_eq!(streamed, msg.export_to_vec().unwrap());
    }

    #[test]
    fn test_content_is_borrowed() {
        let msg = tree();
        let borrowed = msg
            .export_chunks()
            .unwrap()
            .filter(|c| matches!(c, Cow::Borrowed(_)))
            .count();
        assert_eq!(borrowed, 2);
    }

    #[test]
    fn test_pull_in_small_pieces() {
        let bytes = tree().export_to_vec().unwrap();
        let mut offset = 0;
        let msg = Message::import_with(|buf| {
            let n = buf.len().min(3).min(bytes.len() - offset);
            buf[..n].copy_from_slice(&bytes[offset..offset + n]);
            offset += n;
            Some(n)
        })
        .unwrap();
        assert_eq!(msg, tree());
        assert_eq!(offset, bytes.len());
    }

    #[test]
    fn test_pull_source_ends_early() {
        let bytes = tree().export_to_vec().unwrap();
        let mut sent = false;
        let res = Message::import_with(|buf| {
            if sent {
                return Some(0);
            }
            sent = true;
            let n = buf.len().min(8);
            buf[..n].copy_from_slice(&bytes[..n]);
            Some(n)
        });
        assert!(matches!(res, Err(crate::Error::Decode(_))));
    }
}
