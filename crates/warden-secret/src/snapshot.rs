//! Resolved TLS material for one secret generation

use crate::loader::{
    load_certificates, load_private_key, load_revocation_list, read_source, RevocationList,
};
use crate::provider::{TlsCertificateSecret, ValidationContextSecret};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fmt;
use std::sync::Arc;
use warden_core::{Bytes, DataSource, Result};

/// Local identity: certificate chain and private key, parsed and ready for a handshake
#[derive(Clone)]
pub struct TlsCertificateConfig {
    certificate_chain: Bytes,
    chain_source: DataSource,
    private_key: Bytes,
    key_source: DataSource,
    certificates: Vec<CertificateDer<'static>>,
    key: Arc<PrivateKeyDer<'static>>,
}

impl TlsCertificateConfig {
    /// Read and parse the material referenced by a certificate secret
    pub fn load(secret_name: &str, secret: &TlsCertificateSecret) -> Result<Self> {
        let certificate_chain = read_source(secret_name, &secret.certificate_chain)?;
        let private_key = read_source(secret_name, &secret.private_key)?;

        let certificates = load_certificates(secret_name, &certificate_chain)?;
        let key = load_private_key(secret_name, &private_key)?;

        Ok(Self {
            certificate_chain,
            chain_source: secret.certificate_chain.clone(),
            private_key,
            key_source: secret.private_key.clone(),
            certificates,
            key: Arc::new(key),
        })
    }

    /// Raw PEM certificate chain
    pub fn certificate_chain(&self) -> &Bytes {
        &self.certificate_chain
    }

    /// Path of the chain, or `"<inline>"`
    pub fn certificate_chain_path(&self) -> String {
        self.chain_source.display_path()
    }

    /// Raw PEM private key
    pub fn private_key(&self) -> &Bytes {
        &self.private_key
    }

    /// Path of the private key, or `"<inline>"`
    pub fn private_key_path(&self) -> String {
        self.key_source.display_path()
    }

    /// DER certificates, leaf first
    pub fn certificates(&self) -> &[CertificateDer<'static>] {
        &self.certificates
    }

    /// DER private key
    pub fn private_key_der(&self) -> PrivateKeyDer<'static> {
        self.key.clone_key()
    }
}

impl fmt::Debug for TlsCertificateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsCertificateConfig")
            .field("certificate_chain_path", &self.certificate_chain_path())
            .field("private_key_path", &self.private_key_path())
            .field("certificates", &self.certificates.len())
            .finish_non_exhaustive()
    }
}

/// Trust anchors used to validate peers, with an optional revocation list
#[derive(Clone)]
pub struct TrustAnchor {
    ca_cert: Bytes,
    ca_source: DataSource,
    ca_certificates: Vec<CertificateDer<'static>>,
    crl: Option<Crl>,
}

#[derive(Clone)]
struct Crl {
    raw: Bytes,
    source: DataSource,
    revoked: Arc<RevocationList>,
}

impl TrustAnchor {
    /// Read and parse the material referenced by a validation context secret
    pub fn load(secret_name: &str, secret: &ValidationContextSecret) -> Result<Self> {
        let ca_cert = read_source(secret_name, &secret.trusted_ca)?;
        let ca_certificates = load_certificates(secret_name, &ca_cert)?;

        let crl = match &secret.crl {
            Some(source) => {
                let raw = read_source(secret_name, source)?;
                let revoked = load_revocation_list(secret_name, &raw)?;
                Some(Crl {
                    raw,
                    source: source.clone(),
                    revoked: Arc::new(revoked),
                })
            }
            None => None,
        };

        Ok(Self {
            ca_cert,
            ca_source: secret.trusted_ca.clone(),
            ca_certificates,
            crl,
        })
    }

    /// Raw PEM CA bundle
    pub fn ca_cert(&self) -> &Bytes {
        &self.ca_cert
    }

    /// Path of the CA bundle, or `"<inline>"`
    pub fn ca_cert_path(&self) -> String {
        self.ca_source.display_path()
    }

    /// DER CA certificates
    pub fn ca_certificates(&self) -> &[CertificateDer<'static>] {
        &self.ca_certificates
    }

    /// Raw CRL, if configured
    pub fn certificate_revocation_list(&self) -> Option<&Bytes> {
        self.crl.as_ref().map(|crl| &crl.raw)
    }

    /// Path of the CRL, or `"<inline>"`, if configured
    pub fn certificate_revocation_list_path(&self) -> Option<String> {
        self.crl.as_ref().map(|crl| crl.source.display_path())
    }

    /// Parsed revocation entries, if a CRL is configured
    pub fn revocation_list(&self) -> Option<&RevocationList> {
        self.crl.as_ref().map(|crl| crl.revoked.as_ref())
    }
}

impl fmt::Debug for TrustAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustAnchor")
            .field("ca_cert_path", &self.ca_cert_path())
            .field("ca_certificates", &self.ca_certificates.len())
            .field("crl_path", &self.certificate_revocation_list_path())
            .finish()
    }
}

/// One fully-resolved generation of certificate and trust material.
///
/// Snapshots are immutable; a rotation installs a new one wholesale.
#[derive(Debug, Clone)]
pub struct SecretSnapshot {
    generation: u64,
    certificate: Option<Arc<TlsCertificateConfig>>,
    trust: Option<Arc<TrustAnchor>>,
}

impl SecretSnapshot {
    /// Assemble a snapshot
    pub fn new(
        generation: u64,
        certificate: Option<Arc<TlsCertificateConfig>>,
        trust: Option<Arc<TrustAnchor>>,
    ) -> Self {
        Self {
            generation,
            certificate,
            trust,
        }
    }

    /// Install counter, starting at 1
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Local identity, if configured
    pub fn certificate(&self) -> Option<&Arc<TlsCertificateConfig>> {
        self.certificate.as_ref()
    }

    /// Peer trust anchors, if configured
    pub fn trust(&self) -> Option<&Arc<TrustAnchor>> {
        self.trust.as_ref()
    }
}
