// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Blocking byte streams carrying an equipment link.
//!
//! The link worker reads while application threads write, so each stream
//! hands out a second handle on the same link via [`ByteStream::try_clone_box`].
//! Plain TCP clones the socket; TLS shares one session between handles.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

/// A link transport: plain TCP or TLS over TCP.
pub trait ByteStream: Read + Write + Send {
    /// Close the link. A reader blocked on another handle wakes with EOF or an error.
    fn shutdown(&mut self, how: Shutdown) -> io::Result<()>;

    fn peer_addr(&self) -> io::Result<SocketAddr>;

    fn set_nodelay(&self, nodelay: bool) -> io::Result<()>;

    /// Expiry surfaces as `WouldBlock` or `TimedOut` depending on the platform.
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()>;

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()>;

    /// Second handle on the same link.
    fn try_clone_box(&self) -> io::Result<BoxedByteStream>;

    /// Whether the link is encrypted. Only used for log lines.
    fn is_tls(&self) -> bool {
        false
    }
}

pub type BoxedByteStream = Box<dyn ByteStream>;

// ============================================================================
// Plain TCP
// ============================================================================

impl ByteStream for TcpStream {
    fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        TcpStream::shutdown(self, how)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        TcpStream::set_nodelay(self, nodelay)
    }

    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, dur)
    }

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, dur)
    }

    fn try_clone_box(&self) -> io::Result<BoxedByteStream> {
        Ok(Box::new(self.try_clone()?))
    }
}

impl ByteStream for BoxedByteStream {
    fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        (**self).shutdown(how)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        (**self).peer_addr()
    }

    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        (**self).set_nodelay(nodelay)
    }

    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        (**self).set_read_timeout(dur)
    }

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        (**self).set_write_timeout(dur)
    }

    fn try_clone_box(&self) -> io::Result<BoxedByteStream> {
        (**self).try_clone_box()
    }

    fn is_tls(&self) -> bool {
        (**self).is_tls()
    }
}

// ============================================================================
// Test mock stream
// ============================================================================
