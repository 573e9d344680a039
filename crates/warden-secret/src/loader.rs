//! Certificate, key and CRL parsing

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::{certs, crls, private_key};
use std::collections::HashSet;
use tracing::debug;
use warden_core::{Bytes, DataSource, Error, Result};
use x509_parser::prelude::*;

/// Read a data source on behalf of a named secret
pub fn read_source(secret_name: &str, source: &DataSource) -> Result<Bytes> {
    source.read().map_err(|e| {
        Error::secret_fetch(
            secret_name,
            format!("failed to read {}: {e}", source.display_path()),
        )
    })
}

/// Parse a PEM certificate bundle. Every block must be a well-formed X.509 certificate.
pub fn load_certificates(secret_name: &str, pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = pem;
    let certs = certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::secret_parse(secret_name, format!("failed to parse certificates: {e}")))?;

    if certs.is_empty() {
        return Err(Error::secret_parse(secret_name, "no certificates found"));
    }

    for cert in &certs {
        X509Certificate::from_der(cert.as_ref()).map_err(|e| {
            Error::secret_parse(secret_name, format!("invalid X.509 certificate: {e}"))
        })?;
    }

    debug!(secret = secret_name, count = certs.len(), "Parsed certificates");

    Ok(certs)
}

/// Parse the first private key in a PEM document
pub fn load_private_key(secret_name: &str, pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut reader = pem;
    private_key(&mut reader)
        .map_err(|e| Error::secret_parse(secret_name, format!("failed to parse private key: {e}")))?
        .ok_or_else(|| Error::secret_parse(secret_name, "no private key found"))
}

/// Parse one or more CRLs, given either as PEM blocks or as a single DER document
pub fn load_revocation_list(secret_name: &str, data: &[u8]) -> Result<RevocationList> {
    let mut reader = data;
    let pem_crls = crls(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::secret_parse(secret_name, format!("failed to parse CRL: {e}")))?;

    let ders: Vec<&[u8]> = if pem_crls.is_empty() {
        vec![data]
    } else {
        pem_crls.iter().map(|crl| crl.as_ref()).collect()
    };

    let mut issuers = Vec::with_capacity(ders.len());
    for der in ders {
        let (_, crl) = x509_parser::parse_x509_crl(der)
            .map_err(|e| Error::secret_parse(secret_name, format!("invalid CRL: {e}")))?;
        let serials = crl
            .iter_revoked_certificates()
            .map(|revoked| revoked.serial().to_bytes_be())
            .collect();
        issuers.push(RevokedByIssuer {
            issuer: crl.issuer().as_raw().to_vec(),
            serials,
        });
    }

    debug!(secret = secret_name, lists = issuers.len(), "Parsed revocation lists");

    Ok(RevocationList { issuers })
}

#[derive(Debug, Clone)]
struct RevokedByIssuer {
    issuer: Vec<u8>,
    serials: HashSet<Vec<u8>>,
}

/// Revoked serial numbers, grouped by issuing CA
#[derive(Debug, Clone)]
pub struct RevocationList {
    issuers: Vec<RevokedByIssuer>,
}

impl RevocationList {
    /// Whether the certificate appears in a CRL published by its issuer
    pub fn is_revoked(&self, cert: &X509Certificate<'_>) -> bool {
        let issuer = cert.issuer().as_raw();
        let serial = cert.tbs_certificate.serial.to_bytes_be();
        self.issuers
            .iter()
            .any(|list| list.issuer == issuer && list.serials.contains(&serial))
    }

    /// Total number of revoked entries across all lists
    pub fn len(&self) -> usize {
        self.issuers.iter().map(|list| list.serials.len()).sum()
    }

    /// Whether no certificate is revoked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
