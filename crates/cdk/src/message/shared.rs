// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Read-only, reference-counted message.

use super::Message;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// A published message: immutable, kept alive by a reference count.
///
/// `add_ref` and `release` are safe from any thread; the last release frees
/// the tree. Dereferences to [`Message`] for read access only.
#[derive(Clone)]
pub struct SharedMessage {
    inner: Arc<Message>,
}

impl SharedMessage {
    pub(crate) fn new(message: Message) -> Self {
        Self {
            inner: Arc::new(message),
        }
    }

    /// Take one more reference.
    pub fn add_ref(&self) -> SharedMessage {
        self.clone()
    }

    /// Drop one reference. Returns `true` when this was the last one and the
    /// message was freed.
    pub fn release(self) -> bool {
        Arc::into_inner(self.inner).is_some()
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn is_read_only(&self) -> bool {
        true
    }

    /// Clear the read-only state. Only possible for the sole owner; otherwise
    /// the shared handle is returned unchanged.
    pub fn try_into_mutable(self) -> Result<Message, SharedMessage> {
        Arc::try_unwrap(self.inner).map_err(|inner| SharedMessage { inner })
    }

    /// Whether both handles refer to the same message.
    pub fn ptr_eq(&self, other: &SharedMessage) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Deref for SharedMessage {
    type Target = Message;

    fn deref(&self) -> &Message {
        &self.inner
    }
}

impl fmt::Debug for SharedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMessage")
            .field("refs", &self.ref_count())
            .field("message", &*self.inner)
            .finish()
    }
}
