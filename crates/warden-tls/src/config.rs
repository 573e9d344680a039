//! TLS context settings

use crate::protocol::{ProtocolPolicy, DEFAULT_CIPHER_SUITES, DEFAULT_ECDH_CURVES};
use crate::session_ticket::{SessionTicketKey, SessionTicketKeyring};
use crate::validation::VerificationCriteria;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use warden_core::{DataSource, Error, Result};
use warden_secret::{SecretSource, SecretSources, TlsCertificateSecret, ValidationContextSecret};

/// Where a piece of material comes from: a file, or inline text or bytes
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DataSourceSettings {
    /// Path of a file holding the material
    pub filename: Option<PathBuf>,

    /// Material given inline as text
    pub inline_string: Option<String>,

    /// Material given inline as raw bytes
    pub inline_bytes: Option<Vec<u8>>,
}

impl DataSourceSettings {
    /// Material read from a file
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            filename: Some(path.into()),
            ..Default::default()
        }
    }

    /// Material given inline as text
    pub fn from_inline_string(value: impl Into<String>) -> Self {
        Self {
            inline_string: Some(value.into()),
            ..Default::default()
        }
    }

    /// Material given inline as raw bytes
    pub fn from_inline_bytes(value: impl Into<Vec<u8>>) -> Self {
        Self {
            inline_bytes: Some(value.into()),
            ..Default::default()
        }
    }

    /// Resolve into a [`DataSource`]; exactly one variant must be set
    pub fn resolve(&self, field: &str) -> Result<DataSource> {
        match (&self.filename, &self.inline_string, &self.inline_bytes) {
            (Some(path), None, None) => Ok(DataSource::filename(path)),
            (None, Some(value), None) => Ok(DataSource::inline(value.clone())),
            (None, None, Some(value)) => Ok(DataSource::inline(value.clone())),
            (None, None, None) => Err(Error::Config(format!("{field}: no data source set"))),
            _ => Err(Error::Config(format!(
                "{field}: filename, inline_string and inline_bytes are mutually exclusive"
            ))),
        }
    }
}

impl fmt::Debug for DataSourceSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceSettings")
            .field("filename", &self.filename)
            .field("inline_string", &self.inline_string.as_ref().map(|_| "<redacted>"))
            .field("inline_bytes", &self.inline_bytes.as_ref().map(Vec::len))
            .finish()
    }
}

/// Protocol negotiation parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TlsParamsSettings {
    /// Minimum TLS version (1.0, 1.1, 1.2 or 1.3)
    #[serde(default = "default_min_protocol_version")]
    pub min_protocol_version: String,

    /// Maximum TLS version
    #[serde(default = "default_max_protocol_version")]
    pub max_protocol_version: String,

    /// Colon-delimited cipher suites
    #[serde(default = "default_cipher_suites")]
    pub cipher_suites: String,

    /// Colon-delimited ECDH curves
    #[serde(default = "default_ecdh_curves")]
    pub ecdh_curves: String,
}

fn default_min_protocol_version() -> String {
    "1.2".to_string()
}

fn default_max_protocol_version() -> String {
    "1.3".to_string()
}

fn default_cipher_suites() -> String {
    DEFAULT_CIPHER_SUITES.to_string()
}

fn default_ecdh_curves() -> String {
    DEFAULT_ECDH_CURVES.to_string()
}

impl Default for TlsParamsSettings {
    fn default() -> Self {
        Self {
            min_protocol_version: default_min_protocol_version(),
            max_protocol_version: default_max_protocol_version(),
            cipher_suites: default_cipher_suites(),
            ecdh_curves: default_ecdh_curves(),
        }
    }
}

/// Certificate chain and private key supplied in configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TlsCertificateSettings {
    /// PEM certificate chain, leaf first
    pub certificate_chain: DataSourceSettings,

    /// PEM private key
    pub private_key: DataSourceSettings,
}

/// Peer validation settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidationContextSettings {
    /// CA bundle used to verify peers
    pub trusted_ca: Option<DataSourceSettings>,

    /// Certificate revocation list
    pub crl: Option<DataSourceSettings>,

    /// Accepted subject alternative names
    pub verify_subject_alt_name: Vec<String>,

    /// Accepted SHA-256 hashes of the peer certificate
    pub verify_certificate_hash: Vec<String>,

    /// Accepted SHA-256 hashes of the peer's SubjectPublicKeyInfo
    pub verify_certificate_spki: Vec<String>,

    /// Accept certificates outside their validity window
    pub allow_expired_certificate: bool,
}

/// Settings shared by client and server contexts
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommonTlsSettings {
    /// Protocol parameters
    pub tls_params: TlsParamsSettings,

    /// ALPN protocols, in preference order
    pub alpn_protocols: Vec<String>,

    /// Alternate ALPN protocols
    pub alt_alpn_protocols: Vec<String>,

    /// Static local identity
    pub tls_certificate: Option<TlsCertificateSettings>,

    /// Name of a provider-served certificate secret
    pub tls_certificate_sds_secret: Option<String>,

    /// Peer validation
    pub validation_context: ValidationContextSettings,

    /// Name of a provider-served validation context secret
    pub validation_context_sds_secret: Option<String>,
}

impl CommonTlsSettings {
    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        self.protocol_policy()?;
        self.verification_criteria()?;
        self.secret_sources()?;
        Ok(())
    }

    /// Build the negotiation policy
    pub fn protocol_policy(&self) -> Result<ProtocolPolicy> {
        let params = &self.tls_params;
        ProtocolPolicy::new(
            params.min_protocol_version.parse()?,
            params.max_protocol_version.parse()?,
            params.cipher_suites.clone(),
            params.ecdh_curves.clone(),
            self.alpn_protocols.clone(),
            self.alt_alpn_protocols.clone(),
        )
    }

    /// Build the peer verification criteria
    pub fn verification_criteria(&self) -> Result<VerificationCriteria> {
        let validation = &self.validation_context;

        if !self.has_trust_source() {
            if validation.crl.is_some() {
                return Err(Error::Config(
                    "crl requires a trusted CA".to_string(),
                ));
            }
            if !validation.verify_subject_alt_name.is_empty() {
                return Err(Error::Config(
                    "verify_subject_alt_name requires a trusted CA".to_string(),
                ));
            }
            if validation.allow_expired_certificate {
                return Err(Error::Config(
                    "allow_expired_certificate requires a trusted CA".to_string(),
                ));
            }
        }

        VerificationCriteria::new(
            validation.verify_subject_alt_name.clone(),
            validation.verify_certificate_hash.clone(),
            validation.verify_certificate_spki.clone(),
            validation.allow_expired_certificate,
        )
    }

    /// Resolve where certificate and trust material come from
    pub fn secret_sources(&self) -> Result<SecretSources> {
        let certificate = match (&self.tls_certificate, &self.tls_certificate_sds_secret) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "tls_certificate and tls_certificate_sds_secret are mutually exclusive"
                        .to_string(),
                ))
            }
            (Some(settings), None) => Some(SecretSource::Static(TlsCertificateSecret {
                certificate_chain: settings.certificate_chain.resolve("certificate_chain")?,
                private_key: settings.private_key.resolve("private_key")?,
            })),
            (None, Some(name)) => Some(SecretSource::Sds(sds_name(name)?)),
            (None, None) => None,
        };

        let validation = &self.validation_context;
        let validation_context = match (&validation.trusted_ca, &self.validation_context_sds_secret)
        {
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "trusted_ca and validation_context_sds_secret are mutually exclusive"
                        .to_string(),
                ))
            }
            (Some(trusted_ca), None) => Some(SecretSource::Static(ValidationContextSecret {
                trusted_ca: trusted_ca.resolve("trusted_ca")?,
                crl: validation
                    .crl
                    .as_ref()
                    .map(|crl| crl.resolve("crl"))
                    .transpose()?,
            })),
            (None, Some(name)) => {
                if validation.crl.is_some() {
                    return Err(Error::Config(
                        "crl must be delivered with validation_context_sds_secret".to_string(),
                    ));
                }
                Some(SecretSource::Sds(sds_name(name)?))
            }
            (None, None) => None,
        };

        Ok(SecretSources {
            certificate,
            validation_context,
        })
    }

    /// Whether a certificate source is configured
    pub fn has_certificate_source(&self) -> bool {
        self.tls_certificate.is_some() || self.tls_certificate_sds_secret.is_some()
    }

    /// Whether a trust source is configured
    pub fn has_trust_source(&self) -> bool {
        self.validation_context.trusted_ca.is_some()
            || self.validation_context_sds_secret.is_some()
    }
}

fn sds_name(name: &str) -> Result<String> {
    if name.trim().is_empty() {
        return Err(Error::Config("SDS secret name must not be empty".to_string()));
    }
    Ok(name.to_string())
}

/// Settings for contexts that originate connections
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientTlsSettings {
    /// Settings shared with servers
    #[serde(flatten)]
    pub common: CommonTlsSettings,

    /// Server name to send; empty sends none
    pub sni: String,

    /// Allow the server to renegotiate
    pub allow_renegotiation: bool,
}

impl ClientTlsSettings {
    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        self.common.validate()
    }
}

/// Settings for contexts that terminate connections
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerTlsSettings {
    /// Settings shared with clients
    #[serde(flatten)]
    pub common: CommonTlsSettings,

    /// Require clients to present a certificate (mutual TLS)
    pub require_client_certificate: bool,

    /// Session ticket keys, 80 bytes each; the first encrypts
    pub session_ticket_keys: Vec<DataSourceSettings>,
}

impl ServerTlsSettings {
    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        self.check_server_rules()?;
        self.common.validate()?;
        self.session_ticket_keyring()?;
        Ok(())
    }

    pub(crate) fn check_server_rules(&self) -> Result<()> {
        if !self.common.has_certificate_source() {
            return Err(Error::Config(
                "Server TLS requires tls_certificate or tls_certificate_sds_secret".to_string(),
            ));
        }
        if self.require_client_certificate && !self.common.has_trust_source() {
            return Err(Error::Config(
                "require_client_certificate requires a trusted CA".to_string(),
            ));
        }
        Ok(())
    }

    /// Read and parse the configured session ticket keys
    pub fn session_ticket_keyring(&self) -> Result<SessionTicketKeyring> {
        let keys = self
            .session_ticket_keys
            .iter()
            .enumerate()
            .map(|(i, settings)| {
                let field = format!("session_ticket_keys[{i}]");
                let bytes = settings
                    .resolve(&field)?
                    .read()
                    .map_err(|e| Error::Config(format!("{field}: {e}")))?;
                SessionTicketKey::from_bytes(&bytes)
                    .map_err(|e| Error::Config(format!("{field}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        SessionTicketKeyring::new(keys)
    }
}
