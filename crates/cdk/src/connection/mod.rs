// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Link to one piece of equipment.
//!
//! # Architecture
//!
//! ```text
//! +---------------------------------------------------------------+
//! |                         Connection                            |
//! |                                                               |
//! |  app threads                         link worker ("cdk-link") |
//! |  ───────────                         ──────────────────────── |
//! |  send_async ──┐                      connect (+ TLS handshake)|
//! |  send_request ┴─► writer handle      greeting / protocol      |
//! |       ▲                              read frames ─► dispatch  |
//! |       │ one-slot channel                 │ requestId match?   |
//! |       └────────── pending requests ◄─────┤ yes                |
//! |                                          │ no                 |
//! |  pop_message ◄──── MessageQueue ◄────────┘                    |
//! +---------------------------------------------------------------+
//! ```
//!
//! # States
//!
//! `Unbound → Binding → Connected ⇄ Disconnected → Unbound`. While bound the
//! worker reconnects on its own after `reconnect_delay`. State callbacks fire
//! once per connected/disconnected transition.

mod pending;
pub mod protocol;
mod worker;

pub use pending::REQUEST_ID_ATTRIBUTE;
pub use protocol::Protocol;

use crate::codec::FrameCodec;
use crate::error::{Error, ErrorSlot, LastError, Result};
use crate::message::Message;
use crate::queue::{MessageQueue, NewMessageCallback};
use crate::transport::options::{BindOptions, DEFAULT_PORT, DEFAULT_TLS_PORT};
use crate::transport::tls::{SslErrors, TlsSettings};
use crate::transport::{BoxedByteStream, ByteStream};
use crossbeam::channel::RecvTimeoutError;
use parking_lot::{Condvar, Mutex, RwLock};
use pending::PendingRequests;
use std::fmt;
use std::io::Write;
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Log target prefix of records emitted on behalf of one connection.
pub(crate) const LOG_TARGET_PREFIX: &str = "cdk::connection#";

/// `now + timeout`, saturating far in the future.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(365 * 24 * 3600))
}

/// Connection state-change callback (`true` = connected).
pub type StateCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// State-change callback also receiving the accumulated SSL error bits.
pub type SslStateCallback = Arc<dyn Fn(bool, SslErrors) + Send + Sync>;

// ============================================================================
// Identity and state
// ============================================================================

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a [`Connection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn from_raw(raw: u64) -> Self {
        ConnectionId(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Link state of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LinkState {
    Unbound,
    /// Bound, first link not up yet.
    Binding,
    Connected,
    /// Bound, link lost; the worker is retrying.
    Disconnected,
}

#[derive(Debug)]
struct LinkStatus {
    state: LinkState,
    protocol: Option<Protocol>,
    peer: Option<SocketAddr>,
}

#[derive(Default, Clone)]
struct Callbacks {
    state: Option<StateCallback>,
    ssl_state: Option<SslStateCallback>,
    new_message: Option<NewMessageCallback>,
}

// ============================================================================
// Shared state (connection handle + link worker)
// ============================================================================

pub(crate) struct Shared {
    id: ConnectionId,
    log_target: String,
    queue: RwLock<Arc<MessageQueue>>,
    link: Mutex<LinkStatus>,
    link_changed: Condvar,
    writer: Mutex<Option<BoxedByteStream>>,
    running: AtomicBool,
    pending: PendingRequests,
    max_message_size: AtomicUsize,
    ssl_errors: Arc<AtomicU32>,
    ignore_ssl_errors: AtomicU32,
    callbacks: Mutex<Callbacks>,
    last_error: ErrorSlot,
}

impl Shared {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn state(&self) -> LinkState {
        self.link.lock().state
    }

    fn ignore_mask(&self) -> SslErrors {
        SslErrors::from_bits(self.ignore_ssl_errors.load(Ordering::Acquire))
    }

    fn observed_ssl_errors(&self) -> SslErrors {
        SslErrors::from_bits(self.ssl_errors.load(Ordering::Acquire))
    }

    fn set_state(&self, state: LinkState) {
        let mut link = self.link.lock();
        link.state = state;
        self.link_changed.notify_all();
    }

    /// Publish an established link. The writer handle is installed before
    /// the state flips so senders never see `Connected` without a writer.
    fn link_up(&self, writer: BoxedByteStream, protocol: Protocol, peer: SocketAddr) {
        *self.writer.lock() = Some(writer);
        let fire = {
            let mut link = self.link.lock();
            let was = link.state;
            link.state = LinkState::Connected;
            link.protocol = Some(protocol);
            link.peer = Some(peer);
            self.link_changed.notify_all();
            was != LinkState::Connected
        };
        if fire {
            self.fire_state(true);
        }
    }

    /// Tear down the current link and fail outstanding requests.
    fn link_down(&self) {
        if let Some(mut writer) = self.writer.lock().take() {
            let _ = writer.shutdown(Shutdown::Both);
        }
        self.pending.fail_all();
        let fire = {
            let mut link = self.link.lock();
            let was = link.state;
            if was == LinkState::Connected {
                link.state = LinkState::Disconnected;
            }
            link.peer = None;
            self.link_changed.notify_all();
            was == LinkState::Connected
        };
        if fire {
            self.fire_state(false);
        }
    }

    fn fire_state(&self, connected: bool) {
        let callbacks = self.callbacks.lock().clone();
        if let Some(cb) = callbacks.state {
            cb(connected);
        }
        if let Some(cb) = callbacks.ssl_state {
            cb(connected, self.observed_ssl_errors());
        }
    }

    /// Route one received message to its waiter or to the queue.
    pub(crate) fn dispatch(&self, mut msg: Message) {
        msg.set_origin(self.id);
        if let Some(id) = pending::request_id(&msg) {
            match self.pending.complete(id, msg) {
                Ok(()) => return,
                Err(unclaimed) => msg = unclaimed,
            }
        }

        let queue = self.queue.read().clone();
        match queue.push_tracked(msg) {
            Ok(true) => {
                let callback = self.callbacks.lock().new_message.clone();
                if let Some(cb) = callback {
                    cb();
                }
            }
            Ok(false) => {}
            Err(_) => {
                log::debug!(target: self.log_target.as_str(), "[connection] queue full, message dropped");
            }
        }
    }

    /// Sleep up to `delay`, returning early when the connection is unbound.
    fn pause(&self, delay: Duration) {
        let deadline = deadline_after(delay);
        let mut link = self.link.lock();
        while self.is_running() {
            if self.link_changed.wait_until(&mut link, deadline).timed_out() {
                break;
            }
        }
    }

    fn write_message(&self, msg: &Message) -> Result<()> {
        if self.state() != LinkState::Connected {
            return Err(Error::NotConnected);
        }
        let frame = FrameCodec::new(self.max_message_size.load(Ordering::Relaxed))
            .encode_message(msg)?;

        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(Error::NotConnected)?;
        let res = writer.write_all(&frame).and_then(|()| writer.flush());
        if let Err(e) = res {
            log::warn!(target: self.log_target.as_str(), "[connection] write failed: {}", e);
            // Wake the worker so it notices the broken link.
            let _ = writer.shutdown(Shutdown::Both);
            return Err(Error::Io(e));
        }
        Ok(())
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Where the worker connects to. Fixed for the lifetime of one bind.
pub(crate) struct LinkTarget {
    pub(crate) host: String,
    pub(crate) addrs: Vec<SocketAddr>,
    pub(crate) tls: Option<TlsSettings>,
    pub(crate) options: BindOptions,
}

struct Binding {
    host: String,
    port: u16,
    secure: bool,
    worker: Option<JoinHandle<()>>,
}

/// A managed link to one piece of equipment.
///
/// Every method takes `&self`; share the connection across threads with an
/// `Arc`. Dropping the connection unbinds it.
///
/// ```no_run
/// use cdk::{Connection, Element, Message};
/// use std::time::Duration;
///
/// let connection = Connection::new();
/// connection.bind("192.168.0.20", 0, "connect_timeout=2000")?;
/// if connection.wait_for_connection(Duration::from_secs(2)) {
///     let request = Message::with_root(Element::new("Status")?);
///     let reply = connection.send_request(&request, Duration::from_millis(500))?;
///     println!("{:?}", reply.root());
/// }
/// # Ok::<(), cdk::Error>(())
/// ```
pub struct Connection {
    shared: Arc<Shared>,
    binding: Mutex<Option<Binding>>,
}

impl Connection {
    /// New unbound connection with a private queue.
    pub fn new() -> Self {
        let id = ConnectionId::next();
        let queue = Arc::new(MessageQueue::new());
        queue.attach();
        Self {
            shared: Arc::new(Shared {
                id,
                log_target: format!("{}{}", LOG_TARGET_PREFIX, id),
                queue: RwLock::new(queue),
                link: Mutex::new(LinkStatus {
                    state: LinkState::Unbound,
                    protocol: None,
                    peer: None,
                }),
                link_changed: Condvar::new(),
                writer: Mutex::new(None),
                running: AtomicBool::new(false),
                pending: PendingRequests::new(),
                max_message_size: AtomicUsize::new(crate::codec::DEFAULT_MAX_MESSAGE_SIZE),
                ssl_errors: Arc::new(AtomicU32::new(0)),
                ignore_ssl_errors: AtomicU32::new(0),
                callbacks: Mutex::new(Callbacks::default()),
                last_error: ErrorSlot::default(),
            }),
            binding: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    // ========================================================================
    // Bind / unbind
    // ========================================================================

    /// Bind to `host:port` over plain TCP. Port 0 selects [`DEFAULT_PORT`].
    ///
    /// Returns once the worker is started; use
    /// [`wait_for_connection`](Self::wait_for_connection) to wait for the link.
    pub fn bind(&self, host: &str, port: u16, options: &str) -> Result<()> {
        let options = self.parse_options(options)?;
        self.bind_inner(host, port, options, false)
    }

    /// Bind over TLS. Port 0 selects [`DEFAULT_TLS_PORT`].
    pub fn bind_secure(&self, host: &str, port: u16, options: &str) -> Result<()> {
        let options = self.parse_options(options)?;
        self.bind_inner(host, port, options, true)
    }

    pub fn bind_with_options(&self, host: &str, port: u16, options: BindOptions) -> Result<()> {
        self.bind_inner(host, port, options, false)
    }

    pub fn bind_secure_with_options(
        &self,
        host: &str,
        port: u16,
        options: BindOptions,
    ) -> Result<()> {
        self.bind_inner(host, port, options, true)
    }

    fn parse_options(&self, options: &str) -> Result<BindOptions> {
        options.parse().or_else(|e| self.shared.last_error.fail(e))
    }

    fn bind_inner(&self, host: &str, port: u16, options: BindOptions, secure: bool) -> Result<()> {
        let mut binding = self.binding.lock();
        if binding.is_some() {
            return self.shared.last_error.fail(Error::AlreadyBound);
        }
        if host.is_empty() {
            return self
                .shared
                .last_error
                .fail(Error::InvalidArgument("empty host".into()));
        }
        if let Err(e) = options.validate() {
            return self
                .shared
                .last_error
                .fail(Error::InvalidArgument(e.to_string()));
        }

        let port = match port {
            0 if secure => DEFAULT_TLS_PORT,
            0 => DEFAULT_PORT,
            p => p,
        };
        let addrs: Vec<SocketAddr> = match (host, port).to_socket_addrs() {
            Ok(addrs) => addrs.collect(),
            Err(e) => {
                return self
                    .shared
                    .last_error
                    .fail(Error::AddressResolution(format!("{}: {}", host, e)))
            }
        };
        if addrs.is_empty() {
            return self
                .shared
                .last_error
                .fail(Error::AddressResolution(format!("{}: no address", host)));
        }

        let tls = if secure {
            match TlsSettings::from_options(&options, host) {
                Ok(settings) => Some(settings),
                Err(e) => return self.shared.last_error.fail(e),
            }
        } else {
            None
        };

        if let Some(mask) = options.ignore_ssl_errors {
            self.shared.ignore_ssl_errors.store(mask.bits(), Ordering::Release);
        }
        self.shared.ssl_errors.store(0, Ordering::Release);
        self.shared
            .max_message_size
            .store(options.max_message_size, Ordering::Relaxed);
        {
            let mut link = self.shared.link.lock();
            link.state = LinkState::Binding;
            link.protocol = None;
            link.peer = None;
        }
        self.shared.running.store(true, Ordering::Release);

        log::info!(
            target: self.shared.log_target.as_str(),
            "[connection] binding to {}:{}{}",
            host,
            port,
            if secure { " (TLS)" } else { "" }
        );

        let target = LinkTarget {
            host: host.to_string(),
            addrs,
            tls,
            options,
        };
        let shared = Arc::clone(&self.shared);
        let worker = thread::Builder::new()
            .name(format!("cdk-link-{}", self.shared.id))
            .spawn(move || worker::run(shared, target));
        let worker = match worker {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.set_state(LinkState::Unbound);
                return self.shared.last_error.fail(Error::Io(e));
            }
        };

        *binding = Some(Binding {
            host: host.to_string(),
            port,
            secure,
            worker: Some(worker),
        });
        Ok(())
    }

    /// Stop the link. Pending requests fail with [`Error::Disconnected`];
    /// queued messages stay queued.
    pub fn unbind(&self) -> Result<()> {
        let Some(mut binding) = self.binding.lock().take() else {
            return self.shared.last_error.fail(Error::NotBound);
        };

        self.shared.running.store(false, Ordering::Release);
        if let Some(writer) = self.shared.writer.lock().as_mut() {
            let _ = writer.shutdown(Shutdown::Both);
        }
        self.shared.link_changed.notify_all();

        if let Some(worker) = binding.worker.take() {
            if worker.join().is_err() {
                log::error!(target: self.shared.log_target.as_str(), "[connection] link worker panicked");
            }
        }

        self.shared.link_down();
        {
            let mut link = self.shared.link.lock();
            link.state = LinkState::Unbound;
            link.protocol = None;
            self.shared.link_changed.notify_all();
        }
        log::info!(
            target: self.shared.log_target.as_str(),
            "[connection] unbound from {}:{}",
            binding.host,
            binding.port
        );
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.binding.lock().is_some()
    }

    pub fn address(&self) -> Option<String> {
        self.binding.lock().as_ref().map(|b| b.host.clone())
    }

    pub fn port(&self) -> Option<u16> {
        self.binding.lock().as_ref().map(|b| b.port)
    }

    pub fn is_secure(&self) -> bool {
        self.binding.lock().as_ref().is_some_and(|b| b.secure)
    }

    // ========================================================================
    // Link state
    // ========================================================================

    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Peer address of the current link.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.link.lock().peer
    }

    /// Protocol family detected on the current (or last) link.
    pub fn detected_protocol(&self) -> Option<Protocol> {
        self.shared.link.lock().protocol
    }

    /// Block until the link is up or `timeout` elapses.
    pub fn wait_for_connection(&self, timeout: Duration) -> bool {
        let deadline = deadline_after(timeout);
        let mut link = self.shared.link.lock();
        loop {
            match link.state {
                LinkState::Connected => return true,
                LinkState::Unbound => return false,
                LinkState::Binding | LinkState::Disconnected => {}
            }
            if self
                .shared
                .link_changed
                .wait_until(&mut link, deadline)
                .timed_out()
            {
                return link.state == LinkState::Connected;
            }
        }
    }

    // ========================================================================
    // TLS
    // ========================================================================

    /// Certificate problems observed since the last bind.
    pub fn ssl_errors(&self) -> SslErrors {
        self.shared.observed_ssl_errors()
    }

    /// Problems to tolerate; applies from the next handshake.
    pub fn set_ignore_ssl_errors(&self, mask: SslErrors) {
        self.shared
            .ignore_ssl_errors
            .store(mask.bits(), Ordering::Release);
    }

    pub fn ignore_ssl_errors(&self) -> SslErrors {
        self.shared.ignore_mask()
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Send without waiting for an answer.
    pub fn send_async(&self, msg: &Message) -> Result<()> {
        self.shared
            .write_message(msg)
            .or_else(|e| self.shared.last_error.fail(e))
    }

    /// Send `request` and wait up to `timeout` for the correlated response.
    ///
    /// The request goes out as a copy stamped with a fresh
    /// [`REQUEST_ID_ATTRIBUTE`] on its root; the response must echo it.
    pub fn send_request(&self, request: &Message, timeout: Duration) -> Result<Message> {
        if !self.is_connected() {
            return self.shared.last_error.fail(Error::NotConnected);
        }

        let mut stamped = request.copy();
        let Some(root) = stamped.root_mut() else {
            return self.shared.last_error.fail(Error::NoRoot);
        };
        let (id, response) = self.shared.pending.register();
        if let Err(e) = root.set_attribute_u32(REQUEST_ID_ATTRIBUTE, id) {
            self.shared.pending.cancel(id);
            return self.shared.last_error.fail(e);
        }

        if let Err(e) = self.shared.write_message(&stamped) {
            self.shared.pending.cancel(id);
            return self.shared.last_error.fail(e);
        }

        match response.recv_timeout(timeout) {
            Ok(reply) => Ok(reply),
            Err(RecvTimeoutError::Timeout) => {
                if !self.shared.pending.cancel(id) {
                    // Resolved between the timeout and the cancel.
                    if let Ok(reply) = response.recv() {
                        return Ok(reply);
                    }
                }
                self.shared.last_error.fail(Error::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => self.shared.last_error.fail(Error::Disconnected),
        }
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    pub fn set_state_callback(&self, callback: Option<StateCallback>) {
        self.shared.callbacks.lock().state = callback;
    }

    pub fn set_ssl_state_callback(&self, callback: Option<SslStateCallback>) {
        self.shared.callbacks.lock().ssl_state = callback;
    }

    /// Fired on the worker thread when this connection's deliveries make the
    /// queue non-empty.
    pub fn set_new_message_callback(&self, callback: Option<NewMessageCallback>) {
        self.shared.callbacks.lock().new_message = callback;
    }

    // ========================================================================
    // Queue
    // ========================================================================

    pub fn queue(&self) -> Arc<MessageQueue> {
        self.shared.queue.read().clone()
    }

    /// Deliver into `queue` instead of the current one. Only while unbound.
    pub fn set_queue(&self, queue: Arc<MessageQueue>) -> Result<()> {
        let binding = self.binding.lock();
        if binding.is_some() {
            return self
                .shared
                .last_error
                .fail(Error::InvalidState("cannot change the queue while bound".into()));
        }
        queue.attach();
        let old = std::mem::replace(&mut *self.shared.queue.write(), queue);
        old.detach();
        Ok(())
    }

    pub fn message_drops(&self) -> u64 {
        self.queue().drops()
    }

    pub fn reset_message_drops(&self) {
        self.queue().reset_drops();
    }

    pub fn max_queue_size(&self) -> usize {
        self.queue().capacity()
    }

    pub fn set_max_queue_size(&self, size: usize) -> Result<()> {
        self.queue()
            .set_capacity(size)
            .or_else(|e| self.shared.last_error.fail(e))
    }

    pub fn queue_size(&self) -> usize {
        self.queue().len()
    }

    pub fn pop_message(&self) -> Option<Message> {
        self.queue().pop()
    }

    pub fn wait_for_new_message(&self, timeout: Duration) -> bool {
        self.queue().wait_for_message(timeout)
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.is_bound() {
            let _ = self.unbind();
        }
        self.shared.queue.read().detach();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let link = self.shared.link.lock();
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("address", &self.address())
            .field("port", &self.port())
            .field("state", &link.state)
            .field("protocol", &link.protocol)
            .finish()
    }
}

impl LastError for Connection {
    fn last_error(&self) -> Option<String> {
        self.shared.last_error.get()
    }
}
