//! Client and server TLS context configurations
//!
//! A [`ContextConfig`] combines the static negotiation and validation policy with a
//! [`SecretSubscription`] that keeps certificate and trust material current. The role
//! parameter carries what differs between the two sides.

use crate::config::{ClientTlsSettings, CommonTlsSettings, ServerTlsSettings};
use crate::protocol::{ProtocolPolicy, TlsProtocolVersion};
use crate::session_ticket::{SessionTicketKey, SessionTicketKeyring};
use crate::validation::{ValidationPolicy, Verdict};
use rustls::pki_types::CertificateDer;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use warden_core::{Bytes, Error, Result};
use warden_secret::{
    RefreshFailure, SecretCallbacks, SecretProvider, SecretSnapshot, SecretSubscription,
    SubscriptionEvent, TlsCertificateConfig,
};

/// Query surface the handshake layer reads a TLS context through
pub trait TlsContextConfig: Send + Sync {
    /// Primary ALPN protocols, in preference order
    fn alpn_protocols(&self) -> &[String];

    /// Alternate ALPN protocols
    fn alt_alpn_protocols(&self) -> &[String];

    /// Colon-delimited cipher suites
    fn cipher_suites(&self) -> &str;

    /// Colon-delimited ECDH curves
    fn ecdh_curves(&self) -> &str;

    /// Current secret snapshot, or [`Error::NotReady`].
    ///
    /// Material used by one handshake must be read from a single snapshot: the per-field
    /// accessors below each load the latest snapshot and may straddle a rotation.
    fn snapshot(&self) -> Result<Arc<SecretSnapshot>>;

    /// PEM CA bundle, if trust is configured
    fn ca_cert(&self) -> Result<Option<Bytes>>;

    /// CA bundle path, or `"<inline>"`
    fn ca_cert_path(&self) -> Result<Option<String>>;

    /// Certificate revocation list, if configured
    fn certificate_revocation_list(&self) -> Result<Option<Bytes>>;

    /// CRL path, or `"<inline>"`
    fn certificate_revocation_list_path(&self) -> Result<Option<String>>;

    /// Local identity from the current snapshot
    fn tls_certificate(&self) -> Result<Option<Arc<TlsCertificateConfig>>>;

    /// Accepted peer subject alternative names
    fn verify_subject_alt_name_list(&self) -> &[String];

    /// Accepted peer certificate hashes
    fn verify_certificate_hash_list(&self) -> &[String];

    /// Accepted peer SPKI hashes
    fn verify_certificate_spki_list(&self) -> &[String];

    /// Whether expired peer certificates are accepted
    fn allow_expired_certificate(&self) -> bool;

    /// Minimum version to negotiate
    fn min_protocol_version(&self) -> TlsProtocolVersion;

    /// Maximum version to negotiate
    fn max_protocol_version(&self) -> TlsProtocolVersion;

    /// Whether secret material has been installed. Handshakes must wait for this.
    fn is_ready(&self) -> bool;

    /// Register the callback run after each snapshot install, replacing any previous one
    fn set_secret_update_callback(&self, callback: Arc<dyn SecretCallbacks>);
}

/// Client-side settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRole {
    server_name_indication: String,
    allow_renegotiation: bool,
}

/// Server-side settings
#[derive(Debug)]
pub struct ServerRole {
    require_client_certificate: bool,
    session_ticket_keys: SessionTicketKeyring,
}

/// TLS context configuration for one listener or cluster
#[derive(Debug)]
pub struct ContextConfig<R> {
    protocol: ProtocolPolicy,
    validation: ValidationPolicy,
    subscription: SecretSubscription,
    role: R,
}

/// Configuration for contexts that originate connections
pub type ClientContextConfig = ContextConfig<ClientRole>;

/// Configuration for contexts that terminate connections
pub type ServerContextConfig = ContextConfig<ServerRole>;

impl<R> ContextConfig<R> {
    async fn build(
        common: &CommonTlsSettings,
        role: R,
        provider: Option<Arc<dyn SecretProvider>>,
    ) -> Result<Self> {
        let protocol = common.protocol_policy()?;
        let validation = ValidationPolicy::new(common.verification_criteria()?);
        let subscription = SecretSubscription::start(common.secret_sources()?, provider).await?;

        Ok(Self {
            protocol,
            validation,
            subscription,
            role,
        })
    }

    /// Evaluate a peer chain (leaf first) against the validation policy and the current CRL
    pub fn verify_peer(&self, chain: &[CertificateDer<'_>]) -> Result<Verdict> {
        let snapshot = self.subscription.snapshot().ok_or(Error::NotReady)?;
        let revocation = snapshot.trust().and_then(|trust| trust.revocation_list());
        Ok(self.validation.evaluate(chain, revocation))
    }

    /// Negotiation policy
    pub fn protocol_policy(&self) -> &ProtocolPolicy {
        self.assert_ready();
        &self.protocol
    }

    /// Peer validation policy
    pub fn validation_policy(&self) -> &ValidationPolicy {
        self.assert_ready();
        &self.validation
    }

    /// Latest secret refresh failure, kept until the next successful install
    pub fn last_refresh_failure(&self) -> Option<RefreshFailure> {
        self.subscription.last_refresh_failure()
    }

    /// Subscribe to secret refresh outcomes
    pub fn events(&self) -> broadcast::Receiver<SubscriptionEvent> {
        self.subscription.events()
    }

    /// Re-fetch provider-served secrets and install the result
    pub async fn refresh(&self) -> Result<u64> {
        self.subscription.refresh().await
    }

    fn assert_ready(&self) {
        debug_assert!(
            self.subscription.is_ready(),
            "TLS context accessed before secrets were installed"
        );
    }
}

impl ClientContextConfig {
    /// Build a client context, fetching any provider-served secrets
    pub async fn new(
        settings: &ClientTlsSettings,
        provider: Option<Arc<dyn SecretProvider>>,
    ) -> Result<Self> {
        let role = ClientRole {
            server_name_indication: settings.sni.clone(),
            allow_renegotiation: settings.allow_renegotiation,
        };
        let config = Self::build(&settings.common, role, provider).await?;

        info!(
            sni = %config.role.server_name_indication,
            ready = config.subscription.is_ready(),
            "Created client TLS context"
        );
        Ok(config)
    }

    /// Server name sent in the handshake; empty when none
    pub fn server_name_indication(&self) -> &str {
        self.assert_ready();
        &self.role.server_name_indication
    }

    /// Whether server-initiated renegotiation is allowed
    pub fn allow_renegotiation(&self) -> bool {
        self.assert_ready();
        self.role.allow_renegotiation
    }
}

impl ServerContextConfig {
    /// Build a server context, fetching any provider-served secrets
    pub async fn new(
        settings: &ServerTlsSettings,
        provider: Option<Arc<dyn SecretProvider>>,
    ) -> Result<Self> {
        settings.check_server_rules()?;
        let role = ServerRole {
            require_client_certificate: settings.require_client_certificate,
            session_ticket_keys: settings.session_ticket_keyring()?,
        };
        let config = Self::build(&settings.common, role, provider).await?;

        info!(
            require_client_certificate = config.role.require_client_certificate,
            session_ticket_keys = config.role.session_ticket_keys.len(),
            ready = config.subscription.is_ready(),
            "Created server TLS context"
        );
        Ok(config)
    }

    /// Whether clients must present a certificate
    pub fn require_client_certificate(&self) -> bool {
        self.assert_ready();
        self.role.require_client_certificate
    }

    /// Session ticket keys, encryption key first
    pub fn session_ticket_keys(&self) -> Arc<Vec<SessionTicketKey>> {
        self.assert_ready();
        self.role.session_ticket_keys.keys()
    }

    /// Session ticket keyring
    pub fn session_ticket_keyring(&self) -> &SessionTicketKeyring {
        self.assert_ready();
        &self.role.session_ticket_keys
    }

    /// Replace the session ticket keys
    pub fn rotate_session_ticket_keys(&self, keys: Vec<SessionTicketKey>) -> Result<()> {
        self.role.session_ticket_keys.rotate(keys)
    }
}

impl<R: Send + Sync> TlsContextConfig for ContextConfig<R> {
    fn snapshot(&self) -> Result<Arc<SecretSnapshot>> {
        self.subscription.snapshot().ok_or(Error::NotReady)
    }

    fn alpn_protocols(&self) -> &[String] {
        self.assert_ready();
        self.protocol.alpn_protocols()
    }

    fn alt_alpn_protocols(&self) -> &[String] {
        self.assert_ready();
        self.protocol.alt_alpn_protocols()
    }

    fn cipher_suites(&self) -> &str {
        self.assert_ready();
        self.protocol.cipher_suites()
    }

    fn ecdh_curves(&self) -> &str {
        self.assert_ready();
        self.protocol.ecdh_curves()
    }

    fn ca_cert(&self) -> Result<Option<Bytes>> {
        Ok(self.snapshot()?.trust().map(|trust| trust.ca_cert().clone()))
    }

    fn ca_cert_path(&self) -> Result<Option<String>> {
        Ok(self.snapshot()?.trust().map(|trust| trust.ca_cert_path()))
    }

    fn certificate_revocation_list(&self) -> Result<Option<Bytes>> {
        Ok(self
            .snapshot()?
            .trust()
            .and_then(|trust| trust.certificate_revocation_list().cloned()))
    }

    fn certificate_revocation_list_path(&self) -> Result<Option<String>> {
        Ok(self
            .snapshot()?
            .trust()
            .and_then(|trust| trust.certificate_revocation_list_path()))
    }

    fn tls_certificate(&self) -> Result<Option<Arc<TlsCertificateConfig>>> {
        Ok(self.snapshot()?.certificate().cloned())
    }

    fn verify_subject_alt_name_list(&self) -> &[String] {
        self.assert_ready();
        self.validation.criteria().subject_alt_names()
    }

    fn verify_certificate_hash_list(&self) -> &[String] {
        self.assert_ready();
        self.validation.criteria().certificate_hashes()
    }

    fn verify_certificate_spki_list(&self) -> &[String] {
        self.assert_ready();
        self.validation.criteria().spki_hashes()
    }

    fn allow_expired_certificate(&self) -> bool {
        self.assert_ready();
        self.validation.criteria().allow_expired_certificate()
    }

    fn min_protocol_version(&self) -> TlsProtocolVersion {
        self.assert_ready();
        self.protocol.min_version()
    }

    fn max_protocol_version(&self) -> TlsProtocolVersion {
        self.assert_ready();
        self.protocol.max_version()
    }

    fn is_ready(&self) -> bool {
        self.subscription.is_ready()
    }

    fn set_secret_update_callback(&self, callback: Arc<dyn SecretCallbacks>) {
        self.subscription.set_secret_update_callback(callback);
    }
}
