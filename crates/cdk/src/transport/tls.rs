// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TLS client for secure equipment links.
//!
//! Built on rustls with the ring provider. Certificate checking is done by
//! [`PolicyVerifier`], which maps every problem found in the presented chain
//! onto one bit of [`SslErrors`] and lets the handshake through when all of
//! them are covered by the connection's ignore mask.
//!
//! ```text
//!   presented chain ──► x509 inspection ──┐
//!                        (validity, CRL,   ├──► observed bits ──► observed & !ignore == 0 ?
//!                         chain length)    │                        yes: handshake continues
//!   trust anchors ───► webpki path ────────┘                        no:  handshake rejected
//! ```
//!
//! Host name mismatches are not part of the policy and never fail a link.

use super::byte_stream::{BoxedByteStream, ByteStream};
use super::options::BindOptions;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use x509_parser::prelude::*;
use x509_parser::revocation_list::CertificateRevocationList;

/// Longest accepted chain (end entity included).
pub const MAX_CHAIN_DEPTH: usize = 3;

/// Read poll used while the handshake is in flight.
const HANDSHAKE_POLL: Duration = Duration::from_millis(100);

// ============================================================================
// SSL error bits
// ============================================================================

/// Certificate problems observed on a secure link, one bit per kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SslErrors(u32);

impl SslErrors {
    pub const UNABLE_TO_GET_CRL: SslErrors = SslErrors(0x01);
    pub const CERT_NOT_YET_VALID: SslErrors = SslErrors(0x02);
    pub const CERT_HAS_EXPIRED: SslErrors = SslErrors(0x04);
    pub const SELF_SIGNED_CERT_IN_CHAIN: SslErrors = SslErrors(0x08);
    pub const CERT_CHAIN_TOO_LONG: SslErrors = SslErrors(0x10);
    pub const CERT_REVOKED: SslErrors = SslErrors(0x20);
    pub const INVALID_CA: SslErrors = SslErrors(0x40);

    /// Ignore mask accepting every problem.
    pub const ALL: SslErrors = SslErrors(0xFFFF_FFFF);

    const NAMES: [(SslErrors, &'static str); 7] = [
        (Self::UNABLE_TO_GET_CRL, "UNABLE_TO_GET_CRL"),
        (Self::CERT_NOT_YET_VALID, "CERT_NOT_YET_VALID"),
        (Self::CERT_HAS_EXPIRED, "CERT_HAS_EXPIRED"),
        (Self::SELF_SIGNED_CERT_IN_CHAIN, "SELF_SIGNED_CERT_IN_CHAIN"),
        (Self::CERT_CHAIN_TOO_LONG, "CERT_CHAIN_TOO_LONG"),
        (Self::CERT_REVOKED, "CERT_REVOKED"),
        (Self::INVALID_CA, "INVALID_CA"),
    ];

    pub const fn empty() -> Self {
        SslErrors(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        SslErrors(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: SslErrors) -> bool {
        self.0 & other.0 == other.0
    }

    /// Bits of `self` not covered by `ignore`.
    pub const fn unignored(self, ignore: SslErrors) -> SslErrors {
        SslErrors(self.0 & !ignore.0)
    }
}

impl BitOr for SslErrors {
    type Output = SslErrors;
    fn bitor(self, rhs: SslErrors) -> SslErrors {
        SslErrors(self.0 | rhs.0)
    }
}

impl BitOrAssign for SslErrors {
    fn bitor_assign(&mut self, rhs: SslErrors) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for SslErrors {
    type Output = SslErrors;
    fn bitand(self, rhs: SslErrors) -> SslErrors {
        SslErrors(self.0 & rhs.0)
    }
}

impl Not for SslErrors {
    type Output = SslErrors;
    fn not(self) -> SslErrors {
        SslErrors(!self.0)
    }
}

impl fmt::Display for SslErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let mut first = true;
        let mut known = 0u32;
        for (bit, name) in Self::NAMES {
            if self.contains(bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
                known |= bit.0;
            }
        }
        let rest = self.0 & !known;
        if rest != 0 {
            if !first {
                write!(f, "|")?;
            }
            write!(f, "{:#x}", rest)?;
        }
        Ok(())
    }
}

// ============================================================================
// Trust material
// ============================================================================

/// Where revocation data comes from for one handshake.
#[derive(Debug, Clone)]
enum Revocation {
    /// No CRL configured.
    Disabled,
    /// CRL configured but unreadable.
    Unavailable,
    /// Raw serial numbers of revoked certificates.
    Serials(Vec<Vec<u8>>),
}

/// Trust anchors and names for one bound secure connection.
#[derive(Debug, Clone)]
pub(crate) struct TlsSettings {
    roots: Arc<RootCertStore>,
    crl_file: Option<PathBuf>,
    server_name: ServerName<'static>,
}

impl TlsSettings {
    /// Load trust anchors once at bind time. A CA file that cannot be read
    /// fails the bind.
    pub(crate) fn from_options(options: &BindOptions, host: &str) -> Result<Self> {
        let roots = match &options.ca_file {
            Some(path) => load_roots(path)?,
            None => {
                let mut store = RootCertStore::empty();
                store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                store
            }
        };

        let name = options.server_name.as_deref().unwrap_or(host).to_string();
        let server_name = ServerName::try_from(name.clone())
            .map_err(|e| Error::InvalidArgument(format!("server name '{}': {}", name, e)))?;

        Ok(Self {
            roots: Arc::new(roots),
            crl_file: options.crl_file.clone(),
            server_name,
        })
    }

    /// The CRL is re-read on every attempt so a refreshed file is picked up.
    fn revocation(&self) -> Revocation {
        match &self.crl_file {
            None => Revocation::Disabled,
            Some(path) => match load_crl_serials(path) {
                Ok(serials) => Revocation::Serials(serials),
                Err(e) => {
                    log::warn!("[tls] CRL {} unavailable: {}", path.display(), e);
                    Revocation::Unavailable
                }
            },
        }
    }
}

fn load_roots(path: &Path) -> Result<RootCertStore> {
    let file = File::open(path)
        .map_err(|e| Error::InvalidArgument(format!("CA file {}: {}", path.display(), e)))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| Error::InvalidArgument(format!("CA file {}: {}", path.display(), e)))?;

    let mut store = RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(certs);
    if ignored > 0 {
        log::warn!(
            "[tls] {} certificate(s) in {} could not be used as trust anchors",
            ignored,
            path.display()
        );
    }
    log::debug!("[tls] loaded {} trust anchor(s) from {}", added, path.display());
    Ok(store)
}

fn load_crl_serials(path: &Path) -> io::Result<Vec<Vec<u8>>> {
    let bytes = std::fs::read(path)?;
    let ders: Vec<Vec<u8>> = if bytes.starts_with(b"-----BEGIN") {
        rustls_pemfile::crls(&mut &bytes[..])
            .map(|crl| crl.map(|der| der.as_ref().to_vec()))
            .collect::<io::Result<_>>()?
    } else {
        vec![bytes]
    };
    if ders.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "no CRL found"));
    }

    let mut serials = Vec::new();
    for der in &ders {
        let (_, crl) = CertificateRevocationList::from_der(der)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("CRL parse failed: {}", e)))?;
        serials.extend(crl.iter_revoked_certificates().map(|r| r.raw_serial().to_vec()));
    }
    Ok(serials)
}

// ============================================================================
// Certificate policy
// ============================================================================

/// Server certificate verifier applying the ignore-mask policy.
#[derive(Debug)]
pub(crate) struct PolicyVerifier {
    webpki: Option<Arc<WebPkiServerVerifier>>,
    provider: Arc<CryptoProvider>,
    revocation: Revocation,
    ignore: SslErrors,
    observed: Arc<AtomicU32>,
}

impl PolicyVerifier {
    fn new(
        settings: &TlsSettings,
        provider: Arc<CryptoProvider>,
        ignore: SslErrors,
        observed: Arc<AtomicU32>,
    ) -> Self {
        let webpki = match WebPkiServerVerifier::builder_with_provider(
            Arc::clone(&settings.roots),
            Arc::clone(&provider),
        )
        .build()
        {
            Ok(v) => Some(v),
            Err(e) => {
                log::warn!("[tls] no usable trust anchors: {}", e);
                None
            }
        };
        Self {
            webpki,
            provider,
            revocation: settings.revocation(),
            ignore,
            observed,
        }
    }

    /// Problems visible in the chain itself.
    fn inspect_chain(&self, chain: &[&CertificateDer<'_>], now: i64) -> ChainReport {
        let mut report = ChainReport::default();
        let mut window: Option<(i64, i64)> = None;

        if chain.len() > MAX_CHAIN_DEPTH {
            report.found |= SslErrors::CERT_CHAIN_TOO_LONG;
        }
        if matches!(self.revocation, Revocation::Unavailable) {
            report.found |= SslErrors::UNABLE_TO_GET_CRL;
        }

        for (depth, der) in chain.iter().enumerate() {
            let cert = match X509Certificate::from_der(der.as_ref()) {
                Ok((_, cert)) => cert,
                Err(e) => {
                    log::debug!("[tls] certificate at depth {} unparsable: {}", depth, e);
                    report.found |= SslErrors::INVALID_CA;
                    continue;
                }
            };

            let validity = cert.validity();
            let (not_before, not_after) =
                (validity.not_before.timestamp(), validity.not_after.timestamp());
            if now < not_before {
                report.found |= SslErrors::CERT_NOT_YET_VALID;
            }
            if now > not_after {
                report.found |= SslErrors::CERT_HAS_EXPIRED;
            }
            window = Some(match window {
                None => (not_before, not_after),
                Some((start, end)) => (start.max(not_before), end.min(not_after)),
            });
            if depth == 0 {
                report.leaf_not_before = Some(not_before);
            }

            if depth > 0 && cert.issuer().to_string() == cert.subject().to_string() {
                report.self_signed_above_leaf = true;
            }

            if let Revocation::Serials(serials) = &self.revocation {
                let serial = cert.tbs_certificate.raw_serial();
                if serials.iter().any(|s| s.as_slice() == serial) {
                    report.found |= SslErrors::CERT_REVOKED;
                }
            }
        }
        report.common_window = window.filter(|(start, end)| start <= end);
        report
    }

    /// Web PKI verdict on the chain. When the dates are the problem, the
    /// chain is evaluated again at an instant where every certificate is
    /// valid, so trust is still judged.
    fn trust_errors(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
        report: &ChainReport,
    ) -> SslErrors {
        let Some(webpki) = &self.webpki else {
            return SslErrors::INVALID_CA;
        };
        let verify = |at: UnixTime| {
            match webpki.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, at) {
                Ok(_) => SslErrors::empty(),
                Err(e) => {
                    log::debug!("[tls] web PKI verification: {}", e);
                    classify(&e)
                }
            }
        };

        let dated = SslErrors::CERT_HAS_EXPIRED | SslErrors::CERT_NOT_YET_VALID;
        if (report.found & dated).is_empty() {
            return verify(now);
        }
        match report.valid_instant() {
            Some(at) => verify(at),
            None => verify(now),
        }
    }
}

/// Outcome of the x509 inspection of a presented chain.
#[derive(Debug, Default)]
struct ChainReport {
    found: SslErrors,
    /// A self-signed certificate sits above the end entity.
    self_signed_above_leaf: bool,
    /// Latest `not_before` and earliest `not_after`, when they overlap.
    common_window: Option<(i64, i64)>,
    leaf_not_before: Option<i64>,
}

impl ChainReport {
    /// An instant inside the validity of the whole chain, or of the leaf
    /// alone when the certificates never overlap.
    fn valid_instant(&self) -> Option<UnixTime> {
        let secs = match self.common_window {
            Some((start, end)) => start.saturating_add(1).min(end),
            None => self.leaf_not_before?.saturating_add(1),
        };
        let secs = u64::try_from(secs).unwrap_or(0);
        Some(UnixTime::since_unix_epoch(Duration::from_secs(secs)))
    }
}

/// Bits contributed by a web PKI verification failure.
fn classify(err: &rustls::Error) -> SslErrors {
    match err {
        rustls::Error::InvalidCertificate(cert_err) => match cert_err {
            CertificateError::UnknownIssuer
            | CertificateError::BadSignature
            | CertificateError::BadEncoding
            | CertificateError::InvalidPurpose
            | CertificateError::UnhandledCriticalExtension => SslErrors::INVALID_CA,
            CertificateError::Revoked => SslErrors::CERT_REVOKED,
            CertificateError::UnknownRevocationStatus => SslErrors::UNABLE_TO_GET_CRL,
            // Validity is taken from the x509 inspection; names are not policy.
            _ => SslErrors::empty(),
        },
        _ => SslErrors::empty(),
    }
}

impl ServerCertVerifier for PolicyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let chain: Vec<&CertificateDer<'_>> =
            std::iter::once(end_entity).chain(intermediates.iter()).collect();
        let report = self.inspect_chain(&chain, now.as_secs() as i64);
        let untrusted = self.trust_errors(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
            &report,
        );

        let mut found = report.found;
        if untrusted.contains(SslErrors::INVALID_CA) && report.self_signed_above_leaf {
            found |= (untrusted & !SslErrors::INVALID_CA) | SslErrors::SELF_SIGNED_CERT_IN_CHAIN;
        } else {
            found |= untrusted;
        }

        self.observed.fetch_or(found.bits(), Ordering::AcqRel);

        let rejected = found.unignored(self.ignore);
        if rejected.is_empty() {
            if !found.is_empty() {
                log::info!("[tls] accepting certificate with ignored problems: {}", found);
            }
            Ok(ServerCertVerified::assertion())
        } else {
            log::warn!("[tls] certificate rejected: {}", rejected);
            Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

// ============================================================================
// TLS Connector (client-side)
// ============================================================================

/// TLS connector for one connection attempt.
pub(crate) struct TlsConnector {
    config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
}

impl TlsConnector {
    /// Build a client configuration whose verifier records into `observed`.
    pub(crate) fn new(
        settings: &TlsSettings,
        ignore: SslErrors,
        observed: Arc<AtomicU32>,
    ) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = PolicyVerifier::new(settings, Arc::clone(&provider), ignore, observed);
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
            server_name: settings.server_name.clone(),
        })
    }

    /// Run the handshake over `tcp_stream`, giving up after `timeout`.
    pub(crate) fn connect(&self, mut tcp_stream: TcpStream, timeout: Duration) -> io::Result<TlsStream> {
        let mut conn = ClientConnection::new(Arc::clone(&self.config), self.server_name.clone())
            .map_err(io::Error::other)?;

        tcp_stream.set_read_timeout(Some(HANDSHAKE_POLL))?;
        tcp_stream.set_write_timeout(Some(timeout))?;
        let deadline = Instant::now() + timeout;

        while conn.is_handshaking() {
            if Instant::now() >= deadline {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"));
            }
            if let Err(e) = process_tls_io(&mut conn, &mut tcp_stream) {
                // Best effort: let the peer see our alert.
                let _ = conn.write_tls(&mut tcp_stream);
                return Err(e);
            }
        }
        flush_tls(&mut conn, &mut tcp_stream)?;

        Ok(TlsStream {
            session: Arc::new(Mutex::new(conn)),
            tcp_stream,
            scratch: vec![0u8; 4096],
        })
    }
}

impl fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConnector")
            .field("server_name", &self.server_name)
            .finish()
    }
}

fn is_retry(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// One handshake step: flush what rustls wants to send, then read a flight.
fn process_tls_io(conn: &mut ClientConnection, tcp: &mut TcpStream) -> io::Result<()> {
    flush_tls(conn, tcp)?;
    if conn.wants_read() {
        match conn.read_tls(tcp) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "TLS connection closed",
                ));
            }
            Ok(_) => {
                conn.process_new_packets()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            }
            Err(e) if is_retry(&e) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn flush_tls(conn: &mut ClientConnection, tcp: &mut TcpStream) -> io::Result<()> {
    while conn.wants_write() {
        if conn.write_tls(tcp)? == 0 {
            break;
        }
    }
    Ok(())
}

// ============================================================================
// TLS Stream
// ============================================================================

/// A TLS-encrypted TCP stream.
///
/// Handles created by `try_clone_box` share one rustls session. Socket reads
/// happen outside the session lock, so a reader waiting for data never
/// blocks a writer.
pub struct TlsStream {
    session: Arc<Mutex<ClientConnection>>,
    tcp_stream: TcpStream,
    scratch: Vec<u8>,
}

impl Read for TlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            {
                let mut conn = self.session.lock();
                match conn.reader().read(buf) {
                    Ok(n) => return Ok(n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e),
                }
            }

            let n = self.tcp_stream.read(&mut self.scratch)?;
            if n == 0 {
                return Ok(0);
            }

            let mut conn = self.session.lock();
            let mut pending = &self.scratch[..n];
            while !pending.is_empty() {
                if conn.read_tls(&mut pending)? == 0 {
                    break;
                }
                conn.process_new_packets()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            }
            flush_tls(&mut conn, &mut self.tcp_stream)?;
        }
    }
}

impl Write for TlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut conn = self.session.lock();
        let n = conn.writer().write(buf)?;
        flush_tls(&mut conn, &mut self.tcp_stream)?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut conn = self.session.lock();
        conn.writer().flush()?;
        flush_tls(&mut conn, &mut self.tcp_stream)?;
        self.tcp_stream.flush()
    }
}

impl ByteStream for TlsStream {
    fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        {
            let mut conn = self.session.lock();
            conn.send_close_notify();
            let _ = flush_tls(&mut conn, &mut self.tcp_stream);
        }
        self.tcp_stream.shutdown(how)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp_stream.peer_addr()
    }

    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        self.tcp_stream.set_nodelay(nodelay)
    }

    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        self.tcp_stream.set_read_timeout(dur)
    }

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        self.tcp_stream.set_write_timeout(dur)
    }

    fn try_clone_box(&self) -> io::Result<BoxedByteStream> {
        Ok(Box::new(TlsStream {
            session: Arc::clone(&self.session),
            tcp_stream: self.tcp_stream.try_clone()?,
            scratch: vec![0u8; self.scratch.len()],
        }))
    }

    fn is_tls(&self) -> bool {
        true
    }
}

impl fmt::Debug for TlsStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsStream")
            .field("local_addr", &self.tcp_stream.local_addr().ok())
            .field("peer_addr", &self.tcp_stream.peer_addr().ok())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
