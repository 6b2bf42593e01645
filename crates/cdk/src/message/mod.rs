// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Messages exchanged with the equipment.
//!
//! A [`Message`] owns at most one root [`Element`]. It is exclusively owned
//! and mutable until published with [`Message::into_shared`], after which it
//! becomes a reference-counted, read-only [`SharedMessage`].
//!
//! ```text
//!   Message (owned, mutable) ──into_shared()──► SharedMessage (Arc, read-only)
//!        ▲                                            │ add_ref() / release()
//!        └──────────── try_into_mutable() ────────────┘ (only when count == 1)
//! ```

mod attribute;
mod element;
mod merge;
mod shared;

pub use attribute::{str_to_bool, string_equal, Attributes};
pub use element::Element;
pub use merge::MergeOutcome;
pub use shared::SharedMessage;

use crate::codec::{stream, wire};
use crate::connection::ConnectionId;
use crate::error::{Error, ErrorSlot, LastError, Result};
use std::any::Any;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

/// Application data attached to a message. Never encoded.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// A message: an optional root element plus local metadata.
#[derive(Default)]
pub struct Message {
    root: Option<Element>,
    user_data: Option<UserData>,
    origin: Option<ConnectionId>,
    last_error: ErrorSlot,
}

impl Message {
    /// Create an empty (rootless) message.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: Element) -> Self {
        Self {
            root: Some(root),
            ..Self::default()
        }
    }

    /// Deep copy of the tree. User data and origin are not carried over.
    pub fn copy(&self) -> Self {
        Self {
            root: self.root.clone(),
            ..Self::default()
        }
    }

    // ========================================================================
    // Tree
    // ========================================================================

    pub fn root(&self) -> Option<&Element> {
        self.root.as_ref()
    }

    pub fn root_mut(&mut self) -> Option<&mut Element> {
        self.root.as_mut()
    }

    /// Install `root`, dropping the previous root if there was one.
    pub fn set_root(&mut self, root: Element) -> &mut Element {
        self.root.insert(root)
    }

    /// Take the root out; fails on a rootless message.
    pub fn detach_root(&mut self) -> Result<Element> {
        match self.root.take() {
            Some(root) => Ok(root),
            None => self.last_error.fail(Error::NoRoot),
        }
    }

    /// Drop the root element and its whole tree.
    pub fn clear(&mut self) {
        self.root = None;
    }

    pub fn has_root(&self) -> bool {
        self.root.is_some()
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    pub fn user_data(&self) -> Option<&UserData> {
        self.user_data.as_ref()
    }

    pub fn set_user_data(&mut self, data: Option<UserData>) {
        self.user_data = data;
    }

    /// Connection that received this message; `None` for local messages.
    pub fn origin(&self) -> Option<ConnectionId> {
        self.origin
    }

    pub(crate) fn set_origin(&mut self, origin: ConnectionId) {
        self.origin = Some(origin);
    }

    /// Always `false`: read-only messages are [`SharedMessage`]s.
    pub fn is_read_only(&self) -> bool {
        false
    }

    /// Publish as a read-only, reference-counted message (count = 1).
    pub fn into_shared(self) -> SharedMessage {
        SharedMessage::new(self)
    }

    // ========================================================================
    // Export
    // ========================================================================

    /// Size in bytes of the encoded message.
    pub fn encoded_len(&self) -> usize {
        wire::encoded_len(self)
    }

    /// Encode into `buf`, all or nothing. Returns the number of bytes written.
    pub fn export_to_slice(&self, buf: &mut [u8]) -> Result<usize> {
        wire::encode_to_slice(self, buf).or_else(|e| self.last_error.fail(e))
    }

    pub fn export_to_vec(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        match wire::encode_into(self, &mut out) {
            Ok(()) => Ok(out),
            Err(e) => self.last_error.fail(e),
        }
    }

    /// Lazy sequence of encoded chunks; element content is borrowed, not copied.
    pub fn export_chunks(&self) -> Result<stream::ExportChunks<'_>> {
        stream::ExportChunks::new(self).or_else(|e| self.last_error.fail(e))
    }

    /// Push encoded chunks to `sink`. Returning `false` from the sink aborts;
    /// chunks already delivered stay delivered.
    pub fn export_with<F>(&self, mut sink: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> bool,
    {
        for chunk in self.export_chunks()? {
            if !sink(&chunk) {
                return self.last_error.fail(Error::ExportAborted);
            }
        }
        Ok(())
    }

    // ========================================================================
    // Import
    // ========================================================================

    /// Decode one message occupying exactly `bytes`.
    pub fn import_from_slice(bytes: &[u8]) -> Result<Self> {
        wire::decode(bytes)
    }

    /// Decode one message pulled from `source`.
    ///
    /// The source fills the given buffer and returns the byte count, `Some(0)`
    /// at end of input, or `None` to abort. Pulling stops as soon as the
    /// message is complete.
    pub fn import_with<F>(source: F) -> Result<Self>
    where
        F: FnMut(&mut [u8]) -> Option<usize>,
    {
        let mut reader = stream::PullReader::new(source);
        let res = wire::decode_from(&mut reader);
        if reader.aborted() {
            return Err(Error::ImportAborted);
        }
        res
    }

    /// Decode one message from a byte stream, consuming exactly its bytes.
    pub fn import_from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        wire::decode_from(reader)
    }
}

/// Equality compares trees only.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("root", &self.root)
            .field("has_user_data", &self.user_data.is_some())
            .field("origin", &self.origin)
            .finish()
    }
}

impl From<Element> for Message {
    fn from(root: Element) -> Self {
        Self::with_root(root)
    }
}

impl LastError for Message {
    fn last_error(&self) -> Option<String> {
        self.last_error.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detach_root_twice() {
        let mut msg = Message::with_root(Element::new("Status").unwrap());
        let root = msg.detach_root().unwrap();
        assert_eq!(root.name(), "Status");
        assert!(matches!(msg.detach_root(), Err(Error::NoRoot)));
        assert!(msg.last_error().is_some());
    }

    #[test]
    fn test_set_root_replaces() {
        let mut msg = Message::new();
        msg.set_root(Element::new("a").unwrap());
        msg.set_root(Element::new("b").unwrap())
            .set_attribute("k", "v")
            .unwrap();
        assert_eq!(msg.root().unwrap().name(), "b");
        assert_eq!(msg.root().unwrap().attribute("k"), Some("v"));
        msg.clear();
        assert!(!msg.has_root());
    }

    #[test]
    fn test_copy_drops_metadata() {
        let mut msg = Message::with_root(Element::new("a").unwrap());
        msg.set_user_data(Some(Arc::new(42u32)));
        msg.set_origin(ConnectionId::from_raw(7));

        let copy = msg.copy();
        assert_eq!(copy, msg);
        assert!(copy.user_data().is_none());
        assert!(copy.origin().is_none());

        let data = msg.user_data().unwrap().downcast_ref::<u32>();
        assert_eq!(data, Some(&42));
    }

    #[test]
    fn test_export_with_abort_keeps_delivered_chunks() {
        let mut root = Element::new("Image").unwrap();
        root.set_content(&[1u8; 32]);
        let msg = Message::with_root(root);

        let mut delivered = Vec::new();
        let res = msg.export_with(|chunk| {
            delivered.push(chunk.to_vec());
            delivered.len() < 2
        });
        assert!(matches!(res, Err(Error::ExportAborted)));
        assert_eq!(delivered.len(), 2);
    }

    #[test]
    fn test_import_with_abort() {
        let res = Message::import_with(|_buf| None);
        assert!(matches!(res, Err(Error::ImportAborted)));
    }
}
