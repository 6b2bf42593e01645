// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP discovery of equipment on the local network.
//!
//! The discoverer broadcasts a probe (an encoded message whose root is
//! `Discover`) at a fixed interval and collects every announcement that comes
//! back. Announcements are keyed by their source address: a device answering
//! several probes occupies a single entry holding its latest announcement.
//!
//! ```text
//!   Discoverer ──probe──► 255.255.255.255:10001
//!        ▲                        │
//!        └──── announcement ◄─────┘  (one encoded message per datagram)
//! ```
//!
//! The snapshot survives [`Discoverer::stop`] and is cleared by the next
//! [`Discoverer::start`].

use crate::connection::deadline_after;
use crate::error::{Error, ErrorSlot, LastError, Result};
use crate::message::{Element, Message};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Well-known UDP port equipment listens on for probes.
pub const DEFAULT_DISCOVERY_PORT: u16 = 10001;

/// Root element name of the discovery probe.
pub const PROBE_ELEMENT: &str = "Discover";

/// Largest datagram accepted.
const MAX_DATAGRAM: usize = 65_507;

// ============================================================================
// Configuration
// ============================================================================

/// Discovery settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoverConfig {
    /// Where probes are sent (broadcast by default).
    pub probe_target: SocketAddr,
    /// Local address the socket binds to.
    pub bind_addr: SocketAddr,
    /// Delay between two probes.
    pub probe_interval: Duration,
    /// Receive timeout; bounds how long `stop` waits for the collector.
    pub poll_interval: Duration,
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            probe_target: SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::BROADCAST,
                DEFAULT_DISCOVERY_PORT,
            )),
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
            probe_interval: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl DiscoverConfig {
    pub fn with_probe_target(mut self, target: SocketAddr) -> Self {
        self.probe_target = target;
        self
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), &'static str> {
        if self.probe_interval.is_zero() {
            return Err("probe_interval must be > 0");
        }
        if self.poll_interval.is_zero() {
            return Err("poll_interval must be > 0");
        }
        if self.probe_target.port() == 0 {
            return Err("probe_target port must be > 0");
        }
        if self.probe_target.is_ipv4() != self.bind_addr.is_ipv4() {
            return Err("probe_target and bind_addr must use the same address family");
        }
        Ok(())
    }
}

// ============================================================================
// Discoverer
// ============================================================================

/// Announcements collected since the last start, in first-seen order.
#[derive(Default)]
struct Snapshot {
    entries: Vec<(SocketAddr, Message)>,
}

impl Snapshot {
    /// Insert or replace the entry for `source`. Returns `true` for a new device.
    fn upsert(&mut self, source: SocketAddr, msg: Message) -> bool {
        match self.entries.iter_mut().find(|(addr, _)| *addr == source) {
            Some(entry) => {
                entry.1 = msg;
                false
            }
            None => {
                self.entries.push((source, msg));
                true
            }
        }
    }
}

/// Background UDP prober and announcement collector.
pub struct Discoverer {
    config: DiscoverConfig,
    snapshot: Arc<Mutex<Snapshot>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    last_error: ErrorSlot,
}

impl Discoverer {
    pub fn new() -> Self {
        Self::with_config(DiscoverConfig::default())
    }

    pub fn with_config(config: DiscoverConfig) -> Self {
        Self {
            config,
            snapshot: Arc::new(Mutex::new(Snapshot::default())),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            local_addr: Mutex::new(None),
            last_error: ErrorSlot::default(),
        }
    }

    pub fn config(&self) -> &DiscoverConfig {
        &self.config
    }

    /// Open the socket and start probing.
    ///
    /// Clears the previous snapshot. Fails when already running.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return self
                .last_error
                .fail(Error::InvalidState("discoverer already running".into()));
        }
        if let Err(reason) = self.config.validate() {
            return self.last_error.fail(Error::InvalidArgument(reason.into()));
        }

        let socket = match open_socket(&self.config) {
            Ok(socket) => socket,
            Err(e) => return self.last_error.fail(Error::Io(e)),
        };
        let probe = match probe_datagram() {
            Ok(probe) => probe,
            Err(e) => return self.last_error.fail(e),
        };
        *self.local_addr.lock() = socket.local_addr().ok();
        self.snapshot.lock().entries.clear();
        self.running.store(true, Ordering::Release);

        let collector = Collector {
            socket,
            probe,
            config: self.config.clone(),
            snapshot: Arc::clone(&self.snapshot),
            running: Arc::clone(&self.running),
        };
        let handle = thread::Builder::new()
            .name("cdk-discover".to_string())
            .spawn(move || collector.run());
        match handle {
            Ok(handle) => {
                *worker = Some(handle);
                log::debug!(
                    "[discover] started, probing {} every {:?}",
                    self.config.probe_target,
                    self.config.probe_interval
                );
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                *self.local_addr.lock() = None;
                self.last_error.fail(Error::Io(e))
            }
        }
    }

    /// Stop probing and close the socket. The snapshot stays readable.
    pub fn stop(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        self.running.store(false, Ordering::Release);
        if handle.join().is_err() {
            log::error!("[discover] collector thread panicked");
        }
        *self.local_addr.lock() = None;
        log::debug!("[discover] stopped, {} device(s) known", self.discovered_count());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Address of the bound socket while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Number of distinct devices that answered since the last start.
    pub fn discovered_count(&self) -> usize {
        self.snapshot.lock().entries.len()
    }

    /// Copies of the collected announcements. The caller owns the messages.
    pub fn discovered(&self) -> Vec<Message> {
        self.snapshot
            .lock()
            .entries
            .iter()
            .map(|(_, msg)| msg.copy())
            .collect()
    }

    /// Like [`Discoverer::discovered`], paired with each sender's address.
    pub fn discovered_with_source(&self) -> Vec<(SocketAddr, Message)> {
        self.snapshot
            .lock()
            .entries
            .iter()
            .map(|(addr, msg)| (*addr, msg.copy()))
            .collect()
    }
}

impl Default for Discoverer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Discoverer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Discoverer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Discoverer")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("discovered", &self.discovered_count())
            .finish()
    }
}

impl LastError for Discoverer {
    fn last_error(&self) -> Option<String> {
        self.last_error.get()
    }
}

// ============================================================================
// Collector thread
// ============================================================================

fn open_socket(config: &DiscoverConfig) -> io::Result<UdpSocket> {
    let domain = Domain::for_address(config.bind_addr);
    let socket2 = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket2.set_reuse_address(true)?;
    if config.bind_addr.is_ipv4() {
        socket2.set_broadcast(true)?;
    }
    socket2.bind(&config.bind_addr.into())?;

    let socket: UdpSocket = socket2.into();
    socket.set_read_timeout(Some(config.poll_interval))?;
    Ok(socket)
}

fn probe_datagram() -> Result<Vec<u8>> {
    Message::with_root(Element::named(PROBE_ELEMENT)).export_to_vec()
}

struct Collector {
    socket: UdpSocket,
    probe: Vec<u8>,
    config: DiscoverConfig,
    snapshot: Arc<Mutex<Snapshot>>,
    running: Arc<AtomicBool>,
}

impl Collector {
    fn run(self) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut next_probe = Instant::now();

        while self.running.load(Ordering::Acquire) {
            if Instant::now() >= next_probe {
                if let Err(e) = self.socket.send_to(&self.probe, self.config.probe_target) {
                    log::warn!("[discover] probe to {} failed: {}", self.config.probe_target, e);
                }
                next_probe = deadline_after(self.config.probe_interval);
            }

            match self.socket.recv_from(&mut buf) {
                Ok((len, source)) => self.handle(&buf[..len], source),
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
                Err(e) => {
                    log::warn!("[discover] receive failed: {}", e);
                    thread::sleep(self.config.poll_interval);
                }
            }
        }
    }

    fn handle(&self, datagram: &[u8], source: SocketAddr) {
        let msg = match Message::import_from_slice(datagram) {
            Ok(msg) => msg,
            Err(e) => {
                log::debug!("[discover] ignoring datagram from {}: {}", source, e);
                return;
            }
        };
        // Our own broadcast echo, or another client's probe.
        if msg.root().map_or(true, |root| root.is_named(PROBE_ELEMENT)) {
            return;
        }
        if self.snapshot.lock().upsert(source, msg) {
            log::info!("[discover] found device at {}", source);
        } else {
            log::trace!("[discover] refreshed device at {}", source);
        }
    }
}
