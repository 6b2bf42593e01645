// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Correlation of synchronous requests with their responses.
//!
//! Each outstanding request owns a one-slot channel registered under its
//! request id. The link worker resolves the entry when a message carrying
//! the same id arrives; the requester removes it on timeout. Dropping every
//! sender (link loss, unbind) wakes all requesters with a disconnect.

use crate::message::Message;
use crossbeam::channel::{self, Receiver, Sender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// Root attribute carrying the correlation id (decimal, never 0).
pub const REQUEST_ID_ATTRIBUTE: &str = "requestId";

/// Correlation id stamped on `msg`, if any.
pub(crate) fn request_id(msg: &Message) -> Option<u32> {
    msg.root()?
        .attribute_u32(REQUEST_ID_ATTRIBUTE)
        .filter(|id| *id != 0)
}

/// Outstanding requests: request id -> response slot.
#[derive(Debug)]
pub(crate) struct PendingRequests {
    slots: DashMap<u32, Sender<Message>>,
    next_id: AtomicU32,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self {
            slots: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Allocate an id and its response slot.
    pub(crate) fn register(&self) -> (u32, Receiver<Message>) {
        let (tx, rx) = channel::bounded(1);
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id == 0 {
                continue;
            }
            if let Entry::Vacant(slot) = self.slots.entry(id) {
                slot.insert(tx);
                return (id, rx);
            }
        }
    }

    /// Hand `msg` to the requester waiting on `id`. Gives the message back
    /// when nobody waits for it.
    pub(crate) fn complete(&self, id: u32, msg: Message) -> Result<(), Message> {
        match self.slots.remove(&id) {
            Some((_, tx)) => tx.send(msg).map_err(|e| e.into_inner()),
            None => Err(msg),
        }
    }

    /// Remove the entry for `id`. `false` when it was already resolved.
    pub(crate) fn cancel(&self, id: u32) -> bool {
        self.slots.remove(&id).is_some()
    }

    /// Wake every requester with a disconnect.
    pub(crate) fn fail_all(&self) {
        self.slots.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}
