// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by every public object of the toolkit.
//!
//! Failures are reported two ways: the operation returns `Err(Error)`, and
//! the object it was called on remembers the message so that it can be read
//! back later through [`LastError`] / [`last_error`].

use crate::transport::tls::SslErrors;
use parking_lot::Mutex;
use std::fmt;

/// Errors returned by message, queue, connection and discovery operations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Argument / contract errors
    // ========================================================================
    /// Empty name, empty key, malformed option or similar caller mistake.
    InvalidArgument(String),
    /// Index past the end of a child or attribute list.
    IndexOutOfRange { index: usize, len: usize },
    /// Operation not allowed in the object's current state.
    InvalidState(String),
    /// Message has no root element.
    NoRoot,

    // ========================================================================
    // Codec errors
    // ========================================================================
    /// Caller-supplied export buffer cannot hold the encoded message.
    BufferTooSmall { needed: usize, available: usize },
    /// Input bytes are not a valid encoded message.
    Decode(String),
    /// Export sink refused a chunk.
    ExportAborted,
    /// Import source reported a failure.
    ImportAborted,
    /// Frame header announced more bytes than allowed.
    FrameTooLarge { len: usize, max: usize },

    // ========================================================================
    // Connection errors
    // ========================================================================
    /// `bind` called on a connection that is already bound.
    AlreadyBound,
    /// Operation requires a bound connection.
    NotBound,
    /// Operation requires an established link.
    NotConnected,
    /// Link went down (or was unbound) while the call was waiting.
    Disconnected,
    /// Request or wait timed out.
    Timeout,
    /// Host name could not be resolved to a socket address.
    AddressResolution(String),
    /// TLS configuration or handshake failure.
    Tls(String),
    /// Certificate problems not covered by the ignore mask.
    CertificateRejected(SslErrors),

    // ========================================================================
    // Queue / matcher errors
    // ========================================================================
    /// Queue still referenced by at least one connection.
    QueueInUse(usize),
    /// Matcher already started.
    MatcherStarted,
    /// Matcher used before `start`.
    MatcherNotStarted,

    // ========================================================================
    // Transport
    // ========================================================================
    /// I/O error with underlying cause.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::IndexOutOfRange { index, len } => {
                write!(f, "Index {} out of range (len {})", index, len)
            }
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::NoRoot => write!(f, "Message has no root element"),
            Error::BufferTooSmall { needed, available } => write!(
                f,
                "Buffer too small: {} bytes needed, {} available",
                needed, available
            ),
            Error::Decode(msg) => write!(f, "Decode failed: {}", msg),
            Error::ExportAborted => write!(f, "Export aborted by sink"),
            Error::ImportAborted => write!(f, "Import aborted by source"),
            Error::FrameTooLarge { len, max } => {
                write!(f, "Frame too large: {} bytes (max {})", len, max)
            }
            Error::AlreadyBound => write!(f, "Connection already bound"),
            Error::NotBound => write!(f, "Connection not bound"),
            Error::NotConnected => write!(f, "Not connected"),
            Error::Disconnected => write!(f, "Disconnected while waiting"),
            Error::Timeout => write!(f, "Timed out"),
            Error::AddressResolution(msg) => write!(f, "Address resolution failed: {}", msg),
            Error::Tls(msg) => write!(f, "TLS error: {}", msg),
            Error::CertificateRejected(bits) => write!(f, "Certificate rejected: {}", bits),
            Error::QueueInUse(users) => {
                write!(f, "Queue still used by {} connection(s)", users)
            }
            Error::MatcherStarted => write!(f, "Matcher already started"),
            Error::MatcherNotStarted => write!(f, "Matcher not started"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Convenient alias for API results using the public `Error` type.
pub type Result<T> = core::result::Result<T, Error>;

// ============================================================================
// Per-object last error
// ============================================================================

/// Objects that remember the text of their most recent failure.
pub trait LastError {
    /// Text of the last failed operation on this object, if any.
    fn last_error(&self) -> Option<String>;
}

/// Generic accessor over every object type of the toolkit.
///
/// ```
/// use cdk::{last_error, Element};
///
/// let mut element = Element::new("Status").unwrap();
/// assert!(element.set_name("").is_err());
/// assert!(last_error(&element).unwrap().contains("name"));
/// ```
pub fn last_error<T: LastError + ?Sized>(object: &T) -> Option<String> {
    object.last_error()
}

/// Storage slot behind [`LastError`].
///
/// Cloning yields an empty slot: a copy does not inherit its source's failures.
#[derive(Debug, Default)]
pub(crate) struct ErrorSlot(Mutex<Option<String>>);

impl ErrorSlot {
    pub(crate) fn record(&self, err: &Error) {
        *self.0.lock() = Some(err.to_string());
    }

    /// Record `err` and hand it back as `Err`.
    pub(crate) fn fail<T>(&self, err: Error) -> Result<T> {
        self.record(&err);
        Err(err)
    }

    pub(crate) fn get(&self) -> Option<String> {
        self.0.lock().clone()
    }
}

impl Clone for ErrorSlot {
    fn clone(&self) -> Self {
        Self::default()
    }
}
