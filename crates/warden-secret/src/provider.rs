//! Core secret provider abstractions

use async_trait::async_trait;
use std::fmt;
use tokio::sync::broadcast;
use warden_core::{DataSource, Result};

/// Identity material: certificate chain plus private key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsCertificateSecret {
    /// PEM certificate chain, leaf first
    pub certificate_chain: DataSource,

    /// PEM private key matching the leaf
    pub private_key: DataSource,
}

/// Trust material: CA bundle plus optional revocation list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationContextSecret {
    /// PEM CA certificates used to validate peers
    pub trusted_ca: DataSource,

    /// PEM or DER certificate revocation list
    pub crl: Option<DataSource>,
}

/// Secret payload delivered by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Secret {
    /// Local identity
    TlsCertificate(TlsCertificateSecret),

    /// Peer validation trust anchors
    ValidationContext(ValidationContextSecret),
}

impl Secret {
    /// Short name of the payload kind, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Secret::TlsCertificate(_) => "tls_certificate",
            Secret::ValidationContext(_) => "validation_context",
        }
    }

    /// All data sources referenced by the secret
    pub fn data_sources(&self) -> Vec<&DataSource> {
        match self {
            Secret::TlsCertificate(cert) => vec![&cert.certificate_chain, &cert.private_key],
            Secret::ValidationContext(ctx) => {
                let mut sources = vec![&ctx.trusted_ca];
                sources.extend(ctx.crl.as_ref());
                sources
            }
        }
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Notification that a named secret changed at its source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretUpdate {
    /// Name of the changed secret
    pub name: String,
}

impl SecretUpdate {
    /// Create an update notification
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Source of named secrets, such as a control-plane stream or a watched directory.
///
/// Implementations own all I/O. Consumers only call [`SecretProvider::fetch`] from the
/// refresh path, never from handshake-time reads.
#[async_trait]
pub trait SecretProvider: Send + Sync + fmt::Debug {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Fetch the current payload of a named secret
    async fn fetch(&self, secret_name: &str) -> Result<Secret>;

    /// Subscribe to pushed change notifications
    fn watch(&self) -> broadcast::Receiver<SecretUpdate>;
}
