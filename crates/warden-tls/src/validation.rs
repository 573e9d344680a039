//! Peer certificate validation policy
//!
//! Each configured filter (subject alternative names, certificate hashes, SPKI hashes)
//! is checked against the leaf certificate and passes when any one of its entries
//! matches. All non-empty filters must pass; an empty filter places no constraint.
//! Unless expired certificates are allowed, every certificate in the presented chain must
//! also be inside its validity window, and no certificate may appear in the configured
//! revocation list.

use rustls::pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};
use warden_core::{Error, Result};
use warden_secret::RevocationList;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::*;

/// Filters applied to the peer's certificate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationCriteria {
    subject_alt_names: Vec<String>,
    certificate_hashes: Vec<String>,
    spki_hashes: Vec<String>,
    allow_expired_certificate: bool,
}

impl VerificationCriteria {
    /// Build criteria; hashes are normalized to lowercase hex without separators
    pub fn new(
        subject_alt_names: Vec<String>,
        certificate_hashes: Vec<String>,
        spki_hashes: Vec<String>,
        allow_expired_certificate: bool,
    ) -> Result<Self> {
        if let Some(empty) = subject_alt_names.iter().find(|san| san.is_empty()) {
            return Err(Error::Config(format!(
                "Invalid subject alt name: '{empty}'"
            )));
        }

        Ok(Self {
            subject_alt_names,
            certificate_hashes: certificate_hashes
                .iter()
                .map(|hash| normalize_sha256_hex(hash))
                .collect::<Result<_>>()?,
            spki_hashes: spki_hashes
                .iter()
                .map(|hash| normalize_sha256_hex(hash))
                .collect::<Result<_>>()?,
            allow_expired_certificate,
        })
    }

    /// Accepted subject alternative names
    pub fn subject_alt_names(&self) -> &[String] {
        &self.subject_alt_names
    }

    /// Accepted SHA-256 certificate hashes
    pub fn certificate_hashes(&self) -> &[String] {
        &self.certificate_hashes
    }

    /// Accepted SHA-256 SPKI hashes
    pub fn spki_hashes(&self) -> &[String] {
        &self.spki_hashes
    }

    /// Whether validity windows are ignored
    pub fn allow_expired_certificate(&self) -> bool {
        self.allow_expired_certificate
    }
}

/// Normalize a SHA-256 digest given as hex, optionally with `:` separators
pub fn normalize_sha256_hex(hash: &str) -> Result<String> {
    let normalized: String = hash
        .chars()
        .filter(|c| *c != ':')
        .map(|c| c.to_ascii_lowercase())
        .collect();

    if normalized.len() != 64 || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::Config(format!(
            "Invalid SHA-256 hash '{hash}': expected 64 hex digits"
        )));
    }

    Ok(normalized)
}

/// Why a peer certificate was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationFailure {
    /// No certificate was presented
    #[error("peer presented no certificate")]
    NoPeerCertificate,

    /// A certificate in the chain could not be parsed
    #[error("peer certificate could not be parsed: {0}")]
    Malformed(String),

    /// A certificate in the chain is listed in the CRL
    #[error("peer certificate is revoked")]
    Revoked,

    /// A certificate in the chain is not valid yet
    #[error("peer certificate is not yet valid")]
    NotYetValid,

    /// A certificate in the chain has expired
    #[error("peer certificate has expired")]
    Expired,

    /// No configured subject alternative name matched the leaf
    #[error("no configured subject alternative name matched")]
    SubjectAltNameMismatch,

    /// The leaf's SHA-256 hash is not in the configured list
    #[error("certificate hash is not in the configured list")]
    CertificateHashMismatch,

    /// The leaf's SPKI SHA-256 hash is not in the configured list
    #[error("SPKI hash is not in the configured list")]
    SpkiHashMismatch,
}

impl VerificationFailure {
    /// Which check rejected the certificate
    pub fn check(&self) -> &'static str {
        match self {
            VerificationFailure::NoPeerCertificate | VerificationFailure::Malformed(_) => {
                "certificate"
            }
            VerificationFailure::Revoked => "crl",
            VerificationFailure::NotYetValid | VerificationFailure::Expired => "validity",
            VerificationFailure::SubjectAltNameMismatch => "subject_alt_name",
            VerificationFailure::CertificateHashMismatch => "certificate_hash",
            VerificationFailure::SpkiHashMismatch => "spki_hash",
        }
    }
}

/// Result of evaluating a peer chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// All checks passed
    Pass,
    /// A check failed
    Fail(VerificationFailure),
}

impl Verdict {
    /// Whether the peer was accepted
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

/// Evaluates peer certificates against [`VerificationCriteria`]
#[derive(Debug, Clone, Default)]
pub struct ValidationPolicy {
    criteria: VerificationCriteria,
}

impl ValidationPolicy {
    /// Create a policy
    pub fn new(criteria: VerificationCriteria) -> Self {
        Self { criteria }
    }

    /// Configured criteria
    pub fn criteria(&self) -> &VerificationCriteria {
        &self.criteria
    }

    /// Evaluate a chain (leaf first) at the current time
    pub fn evaluate(
        &self,
        chain: &[CertificateDer<'_>],
        revocation: Option<&RevocationList>,
    ) -> Verdict {
        self.evaluate_at(chain, revocation, SystemTime::now())
    }

    /// Evaluate a chain (leaf first) at the given time
    pub fn evaluate_at(
        &self,
        chain: &[CertificateDer<'_>],
        revocation: Option<&RevocationList>,
        now: SystemTime,
    ) -> Verdict {
        match self.check(chain, revocation, now) {
            Ok(()) => Verdict::Pass,
            Err(failure) => {
                tracing::debug!(check = failure.check(), reason = %failure, "Peer certificate rejected");
                Verdict::Fail(failure)
            }
        }
    }

    fn check(
        &self,
        chain: &[CertificateDer<'_>],
        revocation: Option<&RevocationList>,
        now: SystemTime,
    ) -> std::result::Result<(), VerificationFailure> {
        let leaf_der = chain.first().ok_or(VerificationFailure::NoPeerCertificate)?;

        let parsed = chain
            .iter()
            .map(|der| {
                X509Certificate::from_der(der.as_ref())
                    .map(|(_, cert)| cert)
                    .map_err(|e| VerificationFailure::Malformed(e.to_string()))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let leaf = &parsed[0];

        if let Some(crl) = revocation {
            if parsed.iter().any(|cert| crl.is_revoked(cert)) {
                return Err(VerificationFailure::Revoked);
            }
        }

        if !self.criteria.allow_expired_certificate {
            let now = unix_seconds(now);
            for cert in &parsed {
                let validity = cert.validity();
                if now < validity.not_before.timestamp() {
                    return Err(VerificationFailure::NotYetValid);
                }
                if now > validity.not_after.timestamp() {
                    return Err(VerificationFailure::Expired);
                }
            }
        }

        if !self.criteria.subject_alt_names.is_empty() {
            let names = peer_names(leaf)?;
            let matched = self
                .criteria
                .subject_alt_names
                .iter()
                .any(|pattern| names.iter().any(|name| name.matches(pattern)));
            if !matched {
                return Err(VerificationFailure::SubjectAltNameMismatch);
            }
        }

        if !self.criteria.certificate_hashes.is_empty() {
            let digest = hex::encode(Sha256::digest(leaf_der.as_ref()));
            if !self.criteria.certificate_hashes.contains(&digest) {
                return Err(VerificationFailure::CertificateHashMismatch);
            }
        }

        if !self.criteria.spki_hashes.is_empty() {
            let digest = hex::encode(Sha256::digest(leaf.public_key().raw));
            if !self.criteria.spki_hashes.contains(&digest) {
                return Err(VerificationFailure::SpkiHashMismatch);
            }
        }

        Ok(())
    }
}

fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(before) => -(before.duration().as_secs() as i64),
    }
}

/// Subject alternative name presented by a peer
#[derive(Debug, Clone, PartialEq, Eq)]
enum PeerName {
    Dns(String),
    Uri(String),
    Email(String),
    Ip(IpAddr),
}

impl PeerName {
    fn matches(&self, pattern: &str) -> bool {
        match self {
            PeerName::Dns(dns) => dns_name_matches(pattern, dns),
            PeerName::Uri(value) | PeerName::Email(value) => value == pattern,
            PeerName::Ip(ip) => pattern.parse::<IpAddr>().is_ok_and(|p| p == *ip),
        }
    }
}

fn peer_names(cert: &X509Certificate<'_>) -> std::result::Result<Vec<PeerName>, VerificationFailure> {
    let Some(san) = cert
        .subject_alternative_name()
        .map_err(|e| VerificationFailure::Malformed(e.to_string()))?
    else {
        return Ok(Vec::new());
    };

    Ok(san
        .value
        .general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some(PeerName::Dns(dns.to_string())),
            GeneralName::URI(uri) => Some(PeerName::Uri(uri.to_string())),
            GeneralName::RFC822Name(email) => Some(PeerName::Email(email.to_string())),
            GeneralName::IPAddress(bytes) => ip_from_bytes(bytes).map(PeerName::Ip),
            _ => None,
        })
        .collect())
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}

/// DNS name comparison with single-label wildcards on either side.
///
/// Matching is case-insensitive. `*.example.com` matches `a.example.com` but neither
/// `example.com` nor `a.b.example.com`.
pub fn dns_name_matches(pattern: &str, dns_name: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let dns_name = dns_name.to_ascii_lowercase();

    pattern == dns_name
        || wildcard_matches(&pattern, &dns_name)
        || wildcard_matches(&dns_name, &pattern)
}

fn wildcard_matches(wildcard: &str, name: &str) -> bool {
    let Some(suffix) = wildcard.strip_prefix("*.") else {
        return false;
    };
    match name.split_once('.') {
        Some((label, rest)) => !label.is_empty() && !label.contains('*') && rest == suffix,
        None => false,
    }
}
