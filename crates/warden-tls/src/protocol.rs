//! Protocol versions, cipher suites, curves and ALPN

use std::fmt;
use std::str::FromStr;
use warden_core::{Error, Result};

/// Cipher suites offered when none are configured
pub const DEFAULT_CIPHER_SUITES: &str = "[ECDHE-ECDSA-AES128-GCM-SHA256|ECDHE-ECDSA-CHACHA20-POLY1305]:\
[ECDHE-RSA-AES128-GCM-SHA256|ECDHE-RSA-CHACHA20-POLY1305]:\
ECDHE-ECDSA-AES128-SHA:ECDHE-RSA-AES128-SHA:AES128-GCM-SHA256:AES128-SHA:\
ECDHE-ECDSA-AES256-GCM-SHA384:ECDHE-RSA-AES256-GCM-SHA384:\
ECDHE-ECDSA-AES256-SHA:ECDHE-RSA-AES256-SHA:AES256-GCM-SHA384:AES256-SHA";

/// ECDH curves offered when none are configured
pub const DEFAULT_ECDH_CURVES: &str = "X25519:P-256";

/// TLS protocol version, ordered oldest to newest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsProtocolVersion {
    /// TLS 1.0
    Tls1_0,
    /// TLS 1.1
    Tls1_1,
    /// TLS 1.2
    Tls1_2,
    /// TLS 1.3
    Tls1_3,
}

impl TlsProtocolVersion {
    /// All versions, oldest first
    pub const ALL: [TlsProtocolVersion; 4] = [
        TlsProtocolVersion::Tls1_0,
        TlsProtocolVersion::Tls1_1,
        TlsProtocolVersion::Tls1_2,
        TlsProtocolVersion::Tls1_3,
    ];

    /// Get the rustls protocol version
    pub fn to_rustls(self) -> rustls::ProtocolVersion {
        match self {
            TlsProtocolVersion::Tls1_0 => rustls::ProtocolVersion::TLSv1_0,
            TlsProtocolVersion::Tls1_1 => rustls::ProtocolVersion::TLSv1_1,
            TlsProtocolVersion::Tls1_2 => rustls::ProtocolVersion::TLSv1_2,
            TlsProtocolVersion::Tls1_3 => rustls::ProtocolVersion::TLSv1_3,
        }
    }
}

impl fmt::Display for TlsProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsProtocolVersion::Tls1_0 => write!(f, "TLSv1.0"),
            TlsProtocolVersion::Tls1_1 => write!(f, "TLSv1.1"),
            TlsProtocolVersion::Tls1_2 => write!(f, "TLSv1.2"),
            TlsProtocolVersion::Tls1_3 => write!(f, "TLSv1.3"),
        }
    }
}

impl FromStr for TlsProtocolVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1.0" | "TLSv1.0" | "TLSv1_0" => Ok(TlsProtocolVersion::Tls1_0),
            "1.1" | "TLSv1.1" | "TLSv1_1" => Ok(TlsProtocolVersion::Tls1_1),
            "1.2" | "TLSv1.2" | "TLSv1_2" => Ok(TlsProtocolVersion::Tls1_2),
            "1.3" | "TLSv1.3" | "TLSv1_3" => Ok(TlsProtocolVersion::Tls1_3),
            _ => Err(Error::Config(format!(
                "Invalid TLS version: {s} (must be one of 1.0, 1.1, 1.2, 1.3)"
            ))),
        }
    }
}

/// Negotiation policy shared by client and server contexts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolPolicy {
    min_version: TlsProtocolVersion,
    max_version: TlsProtocolVersion,
    cipher_suites: String,
    ecdh_curves: String,
    alpn_protocols: Vec<String>,
    alt_alpn_protocols: Vec<String>,
}

impl ProtocolPolicy {
    /// Validate and build a policy
    pub fn new(
        min_version: TlsProtocolVersion,
        max_version: TlsProtocolVersion,
        cipher_suites: impl Into<String>,
        ecdh_curves: impl Into<String>,
        alpn_protocols: Vec<String>,
        alt_alpn_protocols: Vec<String>,
    ) -> Result<Self> {
        if min_version > max_version {
            return Err(Error::Config(format!(
                "Minimum TLS version {min_version} exceeds maximum {max_version}"
            )));
        }

        let cipher_suites = cipher_suites.into();
        validate_colon_list("cipher_suites", &cipher_suites)?;
        let ecdh_curves = ecdh_curves.into();
        validate_colon_list("ecdh_curves", &ecdh_curves)?;

        validate_alpn("alpn_protocols", &alpn_protocols)?;
        validate_alpn("alt_alpn_protocols", &alt_alpn_protocols)?;

        Ok(Self {
            min_version,
            max_version,
            cipher_suites,
            ecdh_curves,
            alpn_protocols,
            alt_alpn_protocols,
        })
    }

    /// Minimum version to negotiate
    pub fn min_version(&self) -> TlsProtocolVersion {
        self.min_version
    }

    /// Maximum version to negotiate
    pub fn max_version(&self) -> TlsProtocolVersion {
        self.max_version
    }

    /// Colon-delimited cipher suite list
    pub fn cipher_suites(&self) -> &str {
        &self.cipher_suites
    }

    /// Colon-delimited ECDH curve list
    pub fn ecdh_curves(&self) -> &str {
        &self.ecdh_curves
    }

    /// Primary ALPN protocols, in preference order
    pub fn alpn_protocols(&self) -> &[String] {
        &self.alpn_protocols
    }

    /// Alternate ALPN protocols
    pub fn alt_alpn_protocols(&self) -> &[String] {
        &self.alt_alpn_protocols
    }

    /// Primary ALPN protocols in the byte form rustls expects
    pub fn alpn_protocol_ids(&self) -> Vec<Vec<u8>> {
        self.alpn_protocols.iter().map(|p| p.as_bytes().to_vec()).collect()
    }

    /// Alternate ALPN protocols in the byte form rustls expects
    pub fn alt_alpn_protocol_ids(&self) -> Vec<Vec<u8>> {
        self.alt_alpn_protocols
            .iter()
            .map(|p| p.as_bytes().to_vec())
            .collect()
    }

    /// rustls-supported versions inside `[min, max]`
    pub fn rustls_versions(&self) -> Vec<&'static rustls::SupportedProtocolVersion> {
        let wanted: Vec<rustls::ProtocolVersion> = TlsProtocolVersion::ALL
            .into_iter()
            .filter(|v| (self.min_version..=self.max_version).contains(v))
            .map(TlsProtocolVersion::to_rustls)
            .collect();

        rustls::ALL_VERSIONS
            .iter()
            .copied()
            .filter(|supported| wanted.contains(&supported.version))
            .collect()
    }
}

fn validate_colon_list(field: &str, list: &str) -> Result<()> {
    if list.split(':').any(|entry| entry.trim().is_empty()) {
        return Err(Error::Config(format!(
            "{field} contains an empty entry: '{list}'"
        )));
    }
    Ok(())
}

fn validate_alpn(field: &str, protocols: &[String]) -> Result<()> {
    for protocol in protocols {
        if protocol.is_empty() || protocol.len() > 255 {
            return Err(Error::Config(format!(
                "Invalid ALPN protocol in {field}: '{protocol}' (must be 1-255 bytes)"
            )));
        }
    }
    Ok(())
}
