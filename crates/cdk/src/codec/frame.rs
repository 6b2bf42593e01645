// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefix framing of messages over TCP.
//!
//! TCP is a stream protocol without message boundaries. Each encoded message
//! travels in one frame:
//!
//! ```text
//! +----------------+---------------------------+
//! | Length (4B BE) | Encoded message (wire.rs) |
//! +----------------+---------------------------+
//! ```
//!
//! The decoder keeps partial read state, so a read timeout in the middle of a
//! frame (`WouldBlock` / `TimedOut`) loses nothing: call `decode` again when
//! the stream may have more data.

use super::wire;
use crate::error::{Error, Result};
use crate::message::Message;
use std::io::{self, Read};

/// Bytes of the length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Default payload limit (16 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Length-prefix frame codec.
///
/// One codec per link direction: the decoder holds the partially read frame.
#[derive(Debug)]
pub struct FrameCodec {
    /// Header while `body_len` is `None`, payload afterwards.
    buf: Vec<u8>,
    /// Bytes of `buf` filled so far.
    filled: usize,
    body_len: Option<usize>,
    max_size: usize,
    frames_decoded: u64,
    bytes_decoded: u64,
}

fn is_retry(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

impl FrameCodec {
    pub fn new(max_size: usize) -> Self {
        Self {
            buf: vec![0u8; FRAME_HEADER_SIZE],
            filled: 0,
            body_len: None,
            max_size,
            frames_decoded: 0,
            bytes_decoded: 0,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Payload bytes, headers excluded.
    pub fn bytes_decoded(&self) -> u64 {
        self.bytes_decoded
    }

    /// Frame a raw payload: `[length: u32 BE][payload]`.
    pub fn encode(payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    /// Encode `msg` straight into a frame, without an intermediate buffer.
    pub fn encode_message(&self, msg: &Message) -> Result<Vec<u8>> {
        let len = msg.encoded_len();
        if len > self.max_size {
            return Err(Error::FrameTooLarge {
                len,
                max: self.max_size,
            });
        }
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + len);
        frame.extend_from_slice(&(len as u32).to_be_bytes());
        wire::encode_into(msg, &mut frame)?;
        Ok(frame)
    }

    /// Pull the next frame payload out of `reader`.
    ///
    /// `Ok(None)` means the reader timed out mid-way (`WouldBlock` or
    /// `TimedOut`); the bytes read so far are kept for the next call. End of
    /// stream and oversized frames are errors.
    pub fn decode<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<Option<Vec<u8>>> {
        loop {
            let want = self.body_len.unwrap_or(FRAME_HEADER_SIZE);
            if self.filled == want {
                match self.body_len {
                    None => self.start_body()?,
                    Some(len) => {
                        let payload =
                            std::mem::replace(&mut self.buf, vec![0u8; FRAME_HEADER_SIZE]);
                        self.filled = 0;
                        self.body_len = None;
                        self.frames_decoded += 1;
                        self.bytes_decoded += len as u64;
                        return Ok(Some(payload));
                    }
                }
                continue;
            }

            match reader.read(&mut self.buf[self.filled..want]) {
                Ok(0) => {
                    let what = match (self.body_len, self.filled) {
                        (None, 0) => "connection closed",
                        (None, _) => "incomplete frame header",
                        (Some(_), _) => "incomplete frame body",
                    };
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, what));
                }
                Ok(n) => self.filled += n,
                Err(e) if is_retry(e.kind()) => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Header complete: size the body buffer, or reject the frame.
    fn start_body(&mut self) -> io::Result<()> {
        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        self.filled = 0;
        if len > self.max_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {} bytes exceeds max_message_size {}", len, self.max_size),
            ));
        }
        self.buf.resize(len, 0);
        self.body_len = Some(len);
        Ok(())
    }

    /// A frame has been started but not finished.
    pub fn is_partial(&self) -> bool {
        self.filled > 0 || self.body_len.is_some()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Element;
    use std::collections::VecDeque;
    use std::io::Cursor;

    /// Hands out scripted reads, then `WouldBlock` until more is pushed.
    struct Trickle {
        steps: VecDeque<Vec<u8>>,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                Some(step) if step.is_empty() => {
                    Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"))
                }
                Some(step) => {
                    let n = step.len().min(buf.len());
                    buf[..n].copy_from_slice(&step[..n]);
                    if n < step.len() {
                        self.steps.push_front(step[n..].to_vec());
                    }
                    Ok(n)
                }
                None => Err(io::Error::new(io::ErrorKind::WouldBlock, "would block")),
            }
        }
    }

    #[test]
    fn test_encode_simple() {
        let frame = FrameCodec::encode(b"hello");
        assert_eq!(frame.len(), 4 + 5);
        assert_eq!(&frame[..4], &5u32.to_be_bytes());
        assert_eq!(&frame[4..], b"hello");
    }

    #[test]
    fn test_decode_multiple() {
        let mut codec = FrameCodec::new(1024);
        let mut buf = FrameCodec::encode(b"first");
        buf.extend(FrameCodec::encode(b""));
        buf.extend(FrameCodec::encode(b"third"));
        let mut cursor = Cursor::new(buf);

        assert_eq!(codec.decode(&mut cursor).unwrap(), Some(b"first".to_vec()));
        assert_eq!(codec.decode(&mut cursor).unwrap(), Some(Vec::new()));
        assert_eq!(codec.decode(&mut cursor).unwrap(), Some(b"third".to_vec()));
        assert_eq!(codec.frames_decoded(), 3);
        assert_eq!(codec.bytes_decoded(), 10);

        let err = codec.decode(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_resumes_after_timeout() {
        let frame = FrameCodec::encode(b"hello, world!");
        let mut reader = Trickle {
            steps: VecDeque::from(vec![
                frame[..2].to_vec(),
                Vec::new(),
                frame[2..7].to_vec(),
                Vec::new(),
                frame[7..].to_vec(),
            ]),
        };
        let mut codec = FrameCodec::new(1024);

        assert_eq!(codec.decode(&mut reader).unwrap(), None);
        assert!(codec.is_partial());
        assert_eq!(codec.decode(&mut reader).unwrap(), None);
        assert_eq!(
            codec.decode(&mut reader).unwrap(),
            Some(b"hello, world!".to_vec())
        );
        assert!(!codec.is_partial());
    }

    #[test]
    fn test_decode_too_large() {
        let mut codec = FrameCodec::new(10);
        let frame = FrameCodec::encode(b"this message is too long for the limit");
        let err = codec.decode(&mut Cursor::new(frame)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(!codec.is_partial());
    }

    #[test]
    fn test_partial_body_then_eof() {
        let mut codec = FrameCodec::new(1024);
        let frame = FrameCodec::encode(b"hello, world!");
        let err = codec.decode(&mut Cursor::new(&frame[..8])).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert!(codec.is_partial());
    }

    #[test]
    fn test_encode_message_frame() {
        let msg = Message::with_root(Element::new("Status").unwrap());
        let codec = FrameCodec::new(1024);
        let frame = codec.encode_message(&msg).unwrap();
        assert_eq!(&frame[..4], &(msg.encoded_len() as u32).to_be_bytes());
        assert_eq!(Message::import_from_slice(&frame[4..]).unwrap(), msg);

        let tiny = FrameCodec::new(4);
        assert!(matches!(
            tiny.encode_message(&msg),
            Err(Error::FrameTooLarge { .. })
        ));
    }
}
