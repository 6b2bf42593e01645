// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded FIFO of received messages.
//!
//! The queue is the hand-off point between a connection's link worker and
//! the application threads. A push into a full queue is refused: the message
//! is handed back and the drop counter increments.
//!
//! # Notification
//!
//! The new-message callback fires once per empty to non-empty transition,
//! never for pushes into a queue that already holds messages. It runs on the
//! pushing thread with the queue lock released. Calling [`MessageQueue::pop`]
//! from inside the callback is a caller error.

use crate::error::{Error, ErrorSlot, LastError, Result};
use crate::message::Message;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default number of messages a queue holds.
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Callback fired when a queue becomes non-empty.
pub type NewMessageCallback = Arc<dyn Fn() + Send + Sync>;

/// Push refused because the queue is at capacity. Carries the message back.
#[derive(Debug)]
pub struct QueueFull(pub Message);

impl QueueFull {
    pub fn into_inner(self) -> Message {
        self.0
    }
}

impl fmt::Display for QueueFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message queue full")
    }
}

impl std::error::Error for QueueFull {}

struct QueueState {
    items: VecDeque<Message>,
    capacity: usize,
}

/// Thread-safe bounded message queue.
pub struct MessageQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    drops: AtomicU64,
    on_new_message: Mutex<Option<NewMessageCallback>>,
    /// Connections currently delivering into this queue.
    users: AtomicUsize,
    last_error: ErrorSlot,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// A zero capacity is raised to 1.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                capacity: capacity.max(1),
            }),
            not_empty: Condvar::new(),
            drops: AtomicU64::new(0),
            on_new_message: Mutex::new(None),
            users: AtomicUsize::new(0),
            last_error: ErrorSlot::default(),
        }
    }

    // ========================================================================
    // Push / pop
    // ========================================================================

    /// Append `msg`, or hand it back when the queue is full.
    pub fn push(&self, msg: Message) -> std::result::Result<(), QueueFull> {
        self.push_tracked(msg).map(|_| ())
    }

    /// Like [`push`](Self::push); `Ok(true)` reports an empty to non-empty
    /// transition.
    pub(crate) fn push_tracked(&self, msg: Message) -> std::result::Result<bool, QueueFull> {
        let became_non_empty = {
            let mut state = self.state.lock();
            if state.items.len() >= state.capacity {
                drop(state);
                self.drops.fetch_add(1, Ordering::Relaxed);
                return Err(QueueFull(msg));
            }
            let was_empty = state.items.is_empty();
            state.items.push_back(msg);
            if was_empty {
                self.not_empty.notify_all();
            }
            was_empty
        };

        if became_non_empty {
            let callback = self.on_new_message.lock().clone();
            if let Some(callback) = callback {
                callback();
            }
        }
        Ok(became_non_empty)
    }

    /// Oldest message, or `None` when empty.
    pub fn pop(&self) -> Option<Message> {
        self.state.lock().items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Drop every queued message.
    pub fn clear(&self) {
        self.state.lock().items.clear();
    }

    // ========================================================================
    // Capacity and drops
    // ========================================================================

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Cap future pushes. Messages already queued are kept even above the new
    /// capacity.
    pub fn set_capacity(&self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return self
                .last_error
                .fail(Error::InvalidArgument("queue capacity must be at least 1".into()));
        }
        self.state.lock().capacity = capacity;
        Ok(())
    }

    /// Number of messages refused since creation or the last reset.
    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    pub fn reset_drops(&self) {
        self.drops.store(0, Ordering::Relaxed);
    }

    // ========================================================================
    // Waiting and notification
    // ========================================================================

    /// Block until the queue holds a message or `timeout` elapses.
    ///
    /// Returns `true` immediately when the queue is already non-empty.
    pub fn wait_for_message(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            while state.items.is_empty() {
                self.not_empty.wait(&mut state);
            }
            return true;
        };
        while state.items.is_empty() {
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                return !state.items.is_empty();
            }
        }
        true
    }

    /// Install (or clear with `None`) the new-message callback.
    pub fn set_new_message_callback(&self, callback: Option<NewMessageCallback>) {
        *self.on_new_message.lock() = callback;
    }

    // ========================================================================
    // Lifetime
    // ========================================================================

    pub(crate) fn attach(&self) {
        self.users.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn detach(&self) {
        self.users.fetch_sub(1, Ordering::AcqRel);
    }

    /// Number of connections delivering into this queue.
    pub fn users(&self) -> usize {
        self.users.load(Ordering::Acquire)
    }

    /// Release this handle, refusing while a connection still delivers into
    /// the queue. On refusal the handle is returned and the error recorded.
    pub fn try_destroy(self: Arc<Self>) -> std::result::Result<(), Arc<Self>> {
        let users = self.users();
        if users > 0 {
            self.last_error.record(&Error::QueueInUse(users));
            return Err(self);
        }
        drop(self);
        Ok(())
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MessageQueue")
            .field("len", &state.items.len())
            .field("capacity", &state.capacity)
            .field("drops", &self.drops())
            .field("users", &self.users())
            .finish()
    }
}

impl LastError for MessageQueue {
    fn last_error(&self) -> Option<String> {
        self.last_error.get()
    }
}

// ============================================================================
// Tests
// ============================================================================
