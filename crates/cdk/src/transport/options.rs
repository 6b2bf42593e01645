// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bind options.
//!
//! Options travel as a freeform string at bind time and are parsed into
//! [`BindOptions`]:
//!
//! ```
//! use cdk::transport::BindOptions;
//! use std::time::Duration;
//!
//! let options: BindOptions = "connect_timeout=2000; nodelay=false, ignore_ssl_errors=0x40"
//!     .parse()
//!     .unwrap();
//! assert_eq!(options.connect_timeout, Duration::from_secs(2));
//! assert!(!options.nodelay);
//! ```
//!
//! Tokens are separated by `;`, `,` or whitespace and have the form
//! `key=value`. Keys are case-insensitive. Unknown keys are logged and
//! ignored.

use super::tls::SslErrors;
use crate::codec::DEFAULT_MAX_MESSAGE_SIZE;
use crate::error::{Error, Result};
use crate::message::str_to_bool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default plain TCP port of the equipment.
pub const DEFAULT_PORT: u16 = 10001;

/// Default TLS port of the equipment.
pub const DEFAULT_TLS_PORT: u16 = 12001;

/// Upper bound accepted for `max_message_size`.
const MAX_MESSAGE_SIZE_LIMIT: usize = 1024 * 1024 * 1024;

/// Link configuration for one bind.
#[derive(Clone, Debug, PartialEq)]
pub struct BindOptions {
    // === Connection ===
    /// Timeout of one TCP connect (and of the TLS handshake)
    pub connect_timeout: Duration,

    /// Pause between a lost link and the next attempt
    pub reconnect_delay: Duration,

    /// How long to wait for the equipment's greeting after connecting
    pub greeting_timeout: Duration,

    /// Set TCP_NODELAY on the socket
    pub nodelay: bool,

    /// Largest accepted frame payload
    pub max_message_size: usize,

    // === TLS ===
    /// PEM file of trust anchors (None = bundled web PKI roots)
    pub ca_file: Option<PathBuf>,

    /// DER or PEM CRL file; enables revocation checks
    pub crl_file: Option<PathBuf>,

    /// Name used for SNI and verification (None = the bound host)
    pub server_name: Option<String>,

    /// Ignore mask applied at bind (None = keep the connection's mask)
    pub ignore_ssl_errors: Option<SslErrors>,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(5000),
            reconnect_delay: Duration::from_millis(1000),
            greeting_timeout: Duration::from_millis(1000),
            nodelay: true,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            ca_file: None,
            crl_file: None,
            server_name: None,
            ignore_ssl_errors: None,
        }
    }
}

impl BindOptions {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_greeting_timeout(mut self, timeout: Duration) -> Self {
        self.greeting_timeout = timeout;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    pub fn with_crl_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.crl_file = Some(path.into());
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn with_ignore_ssl_errors(mut self, mask: SslErrors) -> Self {
        self.ignore_ssl_errors = Some(mask);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), &'static str> {
        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be > 0");
        }
        if self.connect_timeout > Duration::from_secs(3600) {
            return Err("connect_timeout too large (> 1 h)");
        }
        if self.reconnect_delay > Duration::from_secs(3600) {
            return Err("reconnect_delay too large (> 1 h)");
        }
        if self.greeting_timeout > Duration::from_secs(3600) {
            return Err("greeting_timeout too large (> 1 h)");
        }
        if self.max_message_size == 0 {
            return Err("max_message_size must be > 0");
        }
        if self.max_message_size > MAX_MESSAGE_SIZE_LIMIT {
            return Err("max_message_size too large (> 1 GB)");
        }
        if matches!(&self.server_name, Some(name) if name.is_empty()) {
            return Err("server_name must not be empty");
        }
        Ok(())
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key.to_ascii_lowercase().as_str() {
            "connect_timeout" => self.connect_timeout = parse_millis(key, value)?,
            "reconnect_delay" => self.reconnect_delay = parse_millis(key, value)?,
            "greeting_timeout" => self.greeting_timeout = parse_millis(key, value)?,
            "nodelay" => self.nodelay = str_to_bool(value),
            "max_message_size" => self.max_message_size = parse_number(key, value)?,
            "ca" => self.ca_file = Some(PathBuf::from(value)),
            "crl" => self.crl_file = Some(PathBuf::from(value)),
            "server_name" => self.server_name = Some(value.to_string()),
            "ignore_ssl_errors" => {
                self.ignore_ssl_errors = Some(SslErrors::from_bits(parse_mask(key, value)?))
            }
            _ => log::warn!("[options] ignoring unknown bind option '{}'", key),
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str) -> Error {
    Error::InvalidArgument(format!("bad value '{}' for option '{}'", value, key))
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| invalid(key, value))
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    parse_number::<u64>(key, value).map(Duration::from_millis)
}

fn parse_mask(key: &str, value: &str) -> Result<u32> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|_| invalid(key, value))
}

impl FromStr for BindOptions {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut options = BindOptions::default();
        for token in s
            .split(|c: char| c == ';' || c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            let (key, value) = token.split_once('=').ok_or_else(|| {
                Error::InvalidArgument(format!("option '{}' is not key=value", token))
            })?;
            if key.is_empty() {
                return Err(Error::InvalidArgument(format!("option '{}' has no key", token)));
            }
            options.apply(key, value)?;
        }
        options.validate().map_err(|e| Error::InvalidArgument(e.to_string()))?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_string_gives_defaults() {
        let options: BindOptions = "".parse().unwrap();
        assert_eq!(options, BindOptions::default());
        assert_eq!(options.connect_timeout, Duration::from_secs(5));
        assert!(options.nodelay);
    }

    #[test]
    fn test_parse_all_keys() {
        let options: BindOptions = "CONNECT_TIMEOUT=250;reconnect_delay=10 greeting_timeout=0,\
             nodelay=0;max_message_size=4096;ca=/etc/cdk/ca.pem;crl=/etc/cdk/ca.crl;\
             server_name=camera-7;ignore_ssl_errors=0x41"
            .parse()
            .unwrap();
        assert_eq!(options.connect_timeout, Duration::from_millis(250));
        assert_eq!(options.reconnect_delay, Duration::from_millis(10));
        assert_eq!(options.greeting_timeout, Duration::ZERO);
        assert!(!options.nodelay);
        assert_eq!(options.max_message_size, 4096);
        assert_eq!(options.ca_file, Some(PathBuf::from("/etc/cdk/ca.pem")));
        assert_eq!(options.crl_file, Some(PathBuf::from("/etc/cdk/ca.crl")));
        assert_eq!(options.server_name.as_deref(), Some("camera-7"));
        assert_eq!(
            options.ignore_ssl_errors,
            Some(SslErrors::INVALID_CA | SslErrors::UNABLE_TO_GET_CRL)
        );
    }

    #[test]
    fn test_decimal_mask_and_unknown_key() {
        let options: BindOptions = "ignore_ssl_errors=4294967295 colour=blue".parse().unwrap();
        assert_eq!(options.ignore_ssl_errors, Some(SslErrors::ALL));
    }

    #[test]
    fn test_malformed_values() {
        assert!("connect_timeout=soon".parse::<BindOptions>().is_err());
        assert!("connect_timeout=0".parse::<BindOptions>().is_err());
        assert!("nodelay".parse::<BindOptions>().is_err());
        assert!("=5".parse::<BindOptions>().is_err());
        assert!("ignore_ssl_errors=0xZZ".parse::<BindOptions>().is_err());
        assert!("max_message_size=0".parse::<BindOptions>().is_err());
    }
}
