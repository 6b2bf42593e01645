// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream transports used by connections.
//!
//! - [`byte_stream`]: the blocking stream abstraction over TCP and TLS
//! - [`options`]: bind options and default ports
//! - [`tls`]: the rustls client and the certificate policy

pub mod byte_stream;
pub mod options;
pub mod tls;

pub use byte_stream::{BoxedByteStream, ByteStream};
pub use options::{BindOptions, DEFAULT_PORT, DEFAULT_TLS_PORT};
pub use tls::{SslErrors, TlsStream};
