//! Secret subscription: builds and atomically installs snapshots as secrets rotate
//!
//! A subscription owns up to two secret slots (identity and trust). Each slot is either
//! static material parsed once at construction, or the name of a secret served by a
//! [`SecretProvider`]. Every refresh resolves all slots and installs a complete
//! [`SecretSnapshot`] or nothing at all; readers swap between generations through a single
//! [`ArcSwapOption`] and never see a mix of two generations.

use crate::provider::{
    Secret, SecretProvider, SecretUpdate, TlsCertificateSecret, ValidationContextSecret,
};
use crate::snapshot::{SecretSnapshot, TlsCertificateConfig, TrustAnchor};
use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_core::{Error, Result};

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Label used in errors about material supplied directly in configuration
const STATIC_CERTIFICATE: &str = "static tls_certificate";
const STATIC_VALIDATION_CONTEXT: &str = "static validation_context";

/// Receives a notification after each successful snapshot install
#[cfg_attr(test, mockall::automock)]
pub trait SecretCallbacks: Send + Sync {
    /// A new snapshot is now active
    fn on_add_or_update_secret(&self);
}

/// Where one slot of material comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource<T> {
    /// Material fixed in configuration
    Static(T),

    /// Named secret served by a provider
    Sds(String),
}

/// Slots a subscription resolves
#[derive(Debug, Clone, Default)]
pub struct SecretSources {
    /// Local identity
    pub certificate: Option<SecretSource<TlsCertificateSecret>>,

    /// Peer trust anchors
    pub validation_context: Option<SecretSource<ValidationContextSecret>>,
}

/// Outcome of a refresh, reported to the subscription owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// A new snapshot was installed
    Installed {
        /// Generation of the installed snapshot
        generation: u64,
    },

    /// A refresh failed; the previous snapshot, if any, remains active
    RefreshFailed {
        /// Secret that could not be resolved
        secret: String,
        /// Error description
        reason: String,
    },
}

/// Most recent refresh failure, kept until the next successful install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshFailure {
    /// Secret that could not be resolved
    pub secret: String,
    /// Error description
    pub reason: String,
}

#[derive(Debug)]
enum Slot<T> {
    Absent,
    Static(Arc<T>),
    Sds(String),
}

impl<T> Slot<T> {
    fn sds_name(&self) -> Option<&str> {
        match self {
            Slot::Sds(name) => Some(name),
            _ => None,
        }
    }
}

struct SubscriptionState {
    certificate: Slot<TlsCertificateConfig>,
    validation_context: Slot<TrustAnchor>,
    provider: Option<Arc<dyn SecretProvider>>,
    current: ArcSwapOption<SecretSnapshot>,
    generation: AtomicU64,
    refresh_lock: tokio::sync::Mutex<()>,
    callback: Mutex<Option<Arc<dyn SecretCallbacks>>>,
    // Held shared while a callback runs, exclusively while tearing down.
    callback_gate: RwLock<()>,
    // Generation of the latest install, observed by the callback dispatcher.
    installs: watch::Sender<u64>,
    last_failure: Mutex<Option<RefreshFailure>>,
    events: broadcast::Sender<SubscriptionEvent>,
    cancel: CancellationToken,
}

impl SubscriptionState {
    fn watches(&self, secret_name: &str) -> bool {
        self.certificate.sds_name() == Some(secret_name)
            || self.validation_context.sds_name() == Some(secret_name)
    }

    async fn fetch(&self, secret_name: &str) -> Result<Secret> {
        let provider = self.provider.as_ref().ok_or_else(|| {
            Error::Internal(format!("no provider for secret '{secret_name}'"))
        })?;
        provider.fetch(secret_name).await
    }

    async fn resolve_certificate(&self) -> Result<Option<Arc<TlsCertificateConfig>>> {
        match &self.certificate {
            Slot::Absent => Ok(None),
            Slot::Static(config) => Ok(Some(Arc::clone(config))),
            Slot::Sds(name) => match self.fetch(name).await? {
                Secret::TlsCertificate(secret) => {
                    Ok(Some(Arc::new(TlsCertificateConfig::load(name, &secret)?)))
                }
                other => Err(Error::secret_parse(
                    name.as_str(),
                    format!("expected a tls_certificate secret, got {other}"),
                )),
            },
        }
    }

    async fn resolve_trust(&self) -> Result<Option<Arc<TrustAnchor>>> {
        match &self.validation_context {
            Slot::Absent => Ok(None),
            Slot::Static(anchor) => Ok(Some(Arc::clone(anchor))),
            Slot::Sds(name) => match self.fetch(name).await? {
                Secret::ValidationContext(secret) => {
                    Ok(Some(Arc::new(TrustAnchor::load(name, &secret)?)))
                }
                other => Err(Error::secret_parse(
                    name.as_str(),
                    format!("expected a validation_context secret, got {other}"),
                )),
            },
        }
    }

    async fn refresh(&self) -> Result<u64> {
        let _serialized = self.refresh_lock.lock().await;

        let resolved = async {
            let certificate = self.resolve_certificate().await?;
            let trust = self.resolve_trust().await?;
            Ok::<_, Error>((certificate, trust))
        }
        .await;

        let (certificate, trust) = match resolved {
            Ok(parts) => parts,
            Err(e) => {
                self.report_failure(&e);
                return Err(e);
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.current
            .store(Some(Arc::new(SecretSnapshot::new(generation, certificate, trust))));
        self.last_failure.lock().take();

        info!(
            generation,
            certificate = self.certificate.sds_name().unwrap_or("static"),
            validation_context = self.validation_context.sds_name().unwrap_or("static"),
            "Installed secret snapshot"
        );

        self.installs.send_replace(generation);
        let _ = self.events.send(SubscriptionEvent::Installed { generation });

        Ok(generation)
    }

    fn report_failure(&self, error: &Error) {
        let secret = match error {
            Error::SecretFetch { name, .. } | Error::SecretParse { name, .. } => name.clone(),
            _ => String::new(),
        };

        warn!(
            secret = %secret,
            error = %error,
            ready = self.current.load().is_some(),
            "Secret refresh failed, keeping current snapshot"
        );

        let failure = RefreshFailure {
            secret,
            reason: error.to_string(),
        };
        *self.last_failure.lock() = Some(failure.clone());
        let _ = self.events.send(SubscriptionEvent::RefreshFailed {
            secret: failure.secret,
            reason: failure.reason,
        });
    }

    fn notify(&self) {
        let _gate = self.callback_gate.read();
        if self.cancel.is_cancelled() {
            debug!("Subscription torn down, skipping secret update callback");
            return;
        }

        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            debug!("Invoking secret update callback");
            callback.on_add_or_update_secret();
        }
    }

    fn teardown(&self) {
        self.cancel.cancel();
        // Waits for an in-flight callback to return.
        let _gate = self.callback_gate.write();
        self.callback.lock().take();
    }
}

impl fmt::Debug for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionState")
            .field("certificate", &self.certificate)
            .field("validation_context", &self.validation_context)
            .field("provider", &self.provider)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .field("has_callback", &self.callback.lock().is_some())
            .finish_non_exhaustive()
    }
}

/// Keeps a [`SecretSnapshot`] current for one TLS context.
///
/// Callbacks run one at a time on the blocking pool, after the snapshot is installed and
/// outside the refresh path. Dropping the subscription stops the background tasks, waits
/// for a callback already running, and guarantees the callback is not invoked afterwards.
/// A callback must therefore not drop its own subscription.
#[derive(Debug)]
pub struct SecretSubscription {
    state: Arc<SubscriptionState>,
}

impl SecretSubscription {
    /// Parse static material, perform the initial fetch and start watching the provider.
    ///
    /// Static material that fails to load is a configuration error. A failed initial fetch
    /// of provider-served secrets is not: the subscription starts without a snapshot and
    /// becomes ready on the first successful refresh; the failure is available from
    /// [`SecretSubscription::last_refresh_failure`].
    pub async fn start(
        sources: SecretSources,
        provider: Option<Arc<dyn SecretProvider>>,
    ) -> Result<Self> {
        let certificate = match sources.certificate {
            None => Slot::Absent,
            Some(SecretSource::Static(secret)) => Slot::Static(Arc::new(
                TlsCertificateConfig::load(STATIC_CERTIFICATE, &secret).map_err(into_config)?,
            )),
            Some(SecretSource::Sds(name)) => Slot::Sds(name),
        };

        let validation_context = match sources.validation_context {
            None => Slot::Absent,
            Some(SecretSource::Static(secret)) => Slot::Static(Arc::new(
                TrustAnchor::load(STATIC_VALIDATION_CONTEXT, &secret).map_err(into_config)?,
            )),
            Some(SecretSource::Sds(name)) => Slot::Sds(name),
        };

        let dynamic: Vec<String> = [certificate.sds_name(), validation_context.sds_name()]
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect();

        let provider = match provider {
            Some(provider) => Some(provider),
            None if dynamic.is_empty() => None,
            None => {
                return Err(Error::config(format!(
                    "Secrets {dynamic:?} require a secret provider"
                )))
            }
        };

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (installs, _) = watch::channel(0);
        let state = Arc::new(SubscriptionState {
            certificate,
            validation_context,
            provider,
            current: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
            refresh_lock: tokio::sync::Mutex::new(()),
            callback: Mutex::new(None),
            callback_gate: RwLock::new(()),
            installs,
            last_failure: Mutex::new(None),
            events,
            cancel: CancellationToken::new(),
        });

        match state.provider.as_ref().filter(|_| !dynamic.is_empty()) {
            Some(provider) => {
                // Subscribe before the initial fetch so no update falls in between.
                let updates = provider.watch();
                info!(provider = provider.name(), secrets = ?dynamic, "Subscribing to secrets");

                if state.refresh().await.is_err() {
                    warn!(secrets = ?dynamic, "Initial secret fetch failed, context not ready yet");
                }

                tokio::spawn(watch_updates(Arc::clone(&state), updates));
            }
            None => {
                state.refresh().await?;
            }
        }

        // Subscribed after the initial install; no callback can be registered before it.
        tokio::spawn(dispatch_callbacks(
            Arc::clone(&state),
            state.installs.subscribe(),
        ));

        Ok(Self { state })
    }

    /// Current snapshot, or `None` until the first successful install
    pub fn snapshot(&self) -> Option<Arc<SecretSnapshot>> {
        self.state.current.load_full()
    }

    /// Whether a snapshot has ever been installed. Never reverts to `false`.
    pub fn is_ready(&self) -> bool {
        self.state.current.load().is_some()
    }

    /// Resolve all slots again and install the result.
    ///
    /// On failure the previous snapshot stays in force and the error is also reported on
    /// [`SecretSubscription::events`]. The update callback runs afterwards on the blocking
    /// pool; this method does not wait for it.
    pub async fn refresh(&self) -> Result<u64> {
        self.state.refresh().await
    }

    /// Latest refresh failure, or `None` once a snapshot has been installed since.
    ///
    /// Covers failures that happened before anyone subscribed to
    /// [`SecretSubscription::events`], such as the initial fetch.
    pub fn last_refresh_failure(&self) -> Option<RefreshFailure> {
        self.state.last_failure.lock().clone()
    }

    /// Register the update callback, replacing any previous one
    pub fn set_secret_update_callback(&self, callback: Arc<dyn SecretCallbacks>) {
        if self.state.callback.lock().replace(callback).is_some() {
            debug!("Replaced secret update callback");
        }
    }

    /// Subscribe to refresh outcomes
    pub fn events(&self) -> broadcast::Receiver<SubscriptionEvent> {
        self.state.events.subscribe()
    }

    /// Names of provider-served secrets this subscription watches
    pub fn secret_names(&self) -> Vec<&str> {
        [
            self.state.certificate.sds_name(),
            self.state.validation_context.sds_name(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

impl Drop for SecretSubscription {
    fn drop(&mut self) {
        self.state.teardown();
        debug!("Secret subscription torn down");
    }
}

async fn watch_updates(
    state: Arc<SubscriptionState>,
    mut updates: broadcast::Receiver<SecretUpdate>,
) {
    loop {
        tokio::select! {
            biased;

            _ = state.cancel.cancelled() => break,

            update = updates.recv() => match update {
                Ok(update) if state.watches(&update.name) => {
                    debug!(secret = %update.name, "Secret changed, refreshing");
                    // Failures are reported through events and logs.
                    let _ = state.refresh().await;
                }
                Ok(update) => {
                    debug!(secret = %update.name, "Ignoring update for unrelated secret");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed secret updates, refreshing");
                    let _ = state.refresh().await;
                }
                Err(RecvError::Closed) => {
                    debug!("Secret provider closed its update channel");
                    break;
                }
            },
        }
    }
}

async fn dispatch_callbacks(state: Arc<SubscriptionState>, mut installs: watch::Receiver<u64>) {
    loop {
        tokio::select! {
            biased;

            _ = state.cancel.cancelled() => break,

            changed = installs.changed() => {
                if changed.is_err() {
                    break;
                }
                // Installs that land while a callback runs collapse into one more call.
                let generation = *installs.borrow_and_update();
                let notifier = Arc::clone(&state);
                if let Err(e) = tokio::task::spawn_blocking(move || notifier.notify()).await {
                    warn!(generation, error = %e, "Secret update callback panicked");
                }
            }
        }
    }
}

fn into_config(error: Error) -> Error {
    match error {
        Error::Config(_) => error,
        other => Error::Config(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySecretProvider;
    use std::time::Duration;
    use warden_core::DataSource;

    fn identity(dns_name: &str) -> TlsCertificateSecret {
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec![dns_name.to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        TlsCertificateSecret {
            certificate_chain: DataSource::inline(cert.pem()),
            private_key: DataSource::inline(key.serialize_pem()),
        }
    }

    fn trust() -> ValidationContextSecret {
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["ca.example.com".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        ValidationContextSecret {
            trusted_ca: DataSource::inline(cert.pem()),
            crl: None,
        }
    }

    fn sds_sources() -> SecretSources {
        SecretSources {
            certificate: Some(SecretSource::Sds("server-cert".to_string())),
            validation_context: Some(SecretSource::Sds("client-ca".to_string())),
        }
    }

    #[tokio::test]
    async fn test_static_sources_ready_immediately() {
        let subscription = SecretSubscription::start(
            SecretSources {
                certificate: Some(SecretSource::Static(identity("a.example.com"))),
                validation_context: None,
            },
            None,
        )
        .await
        .unwrap();

        assert!(subscription.is_ready());
        let snapshot = subscription.snapshot().unwrap();
        assert_eq!(snapshot.generation(), 1);
        assert!(snapshot.certificate().is_some());
        assert!(snapshot.trust().is_none());
    }

    #[tokio::test]
    async fn test_invalid_static_material_is_config_error() {
        let err = SecretSubscription::start(
            SecretSources {
                certificate: Some(SecretSource::Static(TlsCertificateSecret {
                    certificate_chain: DataSource::inline("garbage"),
                    private_key: DataSource::inline("garbage"),
                })),
                validation_context: None,
            },
            None,
        )
        .await
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_sds_without_provider_is_config_error() {
        let err = SecretSubscription::start(sds_sources(), None).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_not_ready_until_all_secrets_present() {
        let provider = Arc::new(InMemorySecretProvider::new());
        provider.set("server-cert", Secret::TlsCertificate(identity("a.example.com")));

        let subscription = SecretSubscription::start(sds_sources(), Some(provider.clone()))
            .await
            .unwrap();
        assert!(!subscription.is_ready());
        assert!(subscription.snapshot().is_none());

        // Still missing the CA.
        assert!(subscription.refresh().await.is_err());
        assert!(!subscription.is_ready());

        // The watch task may install first; either way a snapshot results.
        provider.set("client-ca", Secret::ValidationContext(trust()));
        assert!(subscription.refresh().await.is_ok());
        assert!(subscription.is_ready());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let provider = Arc::new(InMemorySecretProvider::new());
        provider.set("server-cert", Secret::TlsCertificate(identity("a.example.com")));
        provider.set("client-ca", Secret::ValidationContext(trust()));

        let subscription = SecretSubscription::start(sds_sources(), Some(provider.clone()))
            .await
            .unwrap();
        let before = subscription.snapshot().unwrap();
        let mut events = subscription.events();

        provider.set(
            "server-cert",
            Secret::TlsCertificate(TlsCertificateSecret {
                certificate_chain: DataSource::inline("garbage"),
                private_key: DataSource::inline("garbage"),
            }),
        );
        let err = subscription.refresh().await.unwrap_err();
        assert!(!err.is_fatal());

        assert!(subscription.is_ready());
        let after = subscription.snapshot().unwrap();
        assert!(Arc::ptr_eq(&before, &after));

        match events.recv().await.unwrap() {
            SubscriptionEvent::RefreshFailed { secret, .. } => assert_eq!(secret, "server-cert"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wrong_secret_kind_is_parse_error() {
        let provider = Arc::new(InMemorySecretProvider::new());
        provider.set("server-cert", Secret::ValidationContext(trust()));
        provider.set("client-ca", Secret::ValidationContext(trust()));

        let subscription = SecretSubscription::start(sds_sources(), Some(provider.clone()))
            .await
            .unwrap();
        let err = subscription.refresh().await.unwrap_err();
        assert!(matches!(err, Error::SecretParse { .. }));
    }

    #[tokio::test]
    async fn test_pushed_update_installs_new_generation() {
        let provider = Arc::new(InMemorySecretProvider::new());
        provider.set("server-cert", Secret::TlsCertificate(identity("a.example.com")));
        provider.set("client-ca", Secret::ValidationContext(trust()));

        let subscription = SecretSubscription::start(sds_sources(), Some(provider.clone()))
            .await
            .unwrap();
        let mut events = subscription.events();

        provider.set("server-cert", Secret::TlsCertificate(identity("b.example.com")));

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, SubscriptionEvent::Installed { generation: 2 });
        assert_eq!(subscription.snapshot().unwrap().generation(), 2);
    }

    #[tokio::test]
    async fn test_last_registered_callback_wins() {
        let provider = Arc::new(InMemorySecretProvider::new());
        provider.set("server-cert", Secret::TlsCertificate(identity("a.example.com")));
        provider.set("client-ca", Secret::ValidationContext(trust()));

        let subscription = SecretSubscription::start(sds_sources(), Some(provider.clone()))
            .await
            .unwrap();

        let (fired, mut calls) = tokio::sync::mpsc::unbounded_channel();
        let mut first = MockSecretCallbacks::new();
        first.expect_on_add_or_update_secret().times(0);
        let mut second = MockSecretCallbacks::new();
        second
            .expect_on_add_or_update_secret()
            .times(1)
            .returning(move || {
                let _ = fired.send(());
            });

        subscription.set_secret_update_callback(Arc::new(first));
        subscription.set_secret_update_callback(Arc::new(second));

        subscription.refresh().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), calls.recv())
            .await
            .unwrap()
            .unwrap();
    }

    struct BlockingCallback {
        entered: tokio::sync::mpsc::UnboundedSender<()>,
        release: std::sync::Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl SecretCallbacks for BlockingCallback {
        fn on_add_or_update_secret(&self) {
            let _ = self.entered.send(());
            let _ = self.release.lock().unwrap().recv();
        }
    }

    #[tokio::test]
    async fn test_blocked_callback_does_not_stall_refresh() {
        let provider = Arc::new(InMemorySecretProvider::new());
        provider.set("server-cert", Secret::TlsCertificate(identity("a.example.com")));
        provider.set("client-ca", Secret::ValidationContext(trust()));

        let subscription = SecretSubscription::start(sds_sources(), Some(provider.clone()))
            .await
            .unwrap();

        let (entered_tx, mut entered) = tokio::sync::mpsc::unbounded_channel();
        let (release, release_rx) = std::sync::mpsc::channel();
        subscription.set_secret_update_callback(Arc::new(BlockingCallback {
            entered: entered_tx,
            release: std::sync::Mutex::new(release_rx),
        }));

        provider.set("server-cert", Secret::TlsCertificate(identity("b.example.com")));
        tokio::time::timeout(Duration::from_secs(5), entered.recv())
            .await
            .unwrap()
            .unwrap();

        // The callback is still parked; later rotations must land anyway.
        let generation = tokio::time::timeout(Duration::from_secs(1), subscription.refresh())
            .await
            .unwrap()
            .unwrap();
        assert!(generation >= 3);
        assert_eq!(subscription.snapshot().unwrap().generation(), generation);

        release.send(()).unwrap();
        release.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_initial_failure_visible_to_owner() {
        let provider = Arc::new(InMemorySecretProvider::new());
        provider.set("server-cert", Secret::TlsCertificate(identity("a.example.com")));

        let subscription = SecretSubscription::start(sds_sources(), Some(provider.clone()))
            .await
            .unwrap();
        assert!(!subscription.is_ready());

        let failure = subscription.last_refresh_failure().unwrap();
        assert_eq!(failure.secret, "client-ca");
        assert!(failure.reason.contains("not found"));

        provider.set("client-ca", Secret::ValidationContext(trust()));
        subscription.refresh().await.unwrap();
        assert!(subscription.last_refresh_failure().is_none());
    }

    #[tokio::test]
    async fn test_failed_refresh_skips_callback() {
        let provider = Arc::new(InMemorySecretProvider::new());
        provider.set("server-cert", Secret::TlsCertificate(identity("a.example.com")));

        let subscription = SecretSubscription::start(sds_sources(), Some(provider.clone()))
            .await
            .unwrap();

        let mut callback = MockSecretCallbacks::new();
        callback.expect_on_add_or_update_secret().times(0);
        subscription.set_secret_update_callback(Arc::new(callback));

        assert!(subscription.refresh().await.is_err());
    }

    #[tokio::test]
    async fn test_no_callback_after_drop() {
        let provider = Arc::new(InMemorySecretProvider::new());
        provider.set("server-cert", Secret::TlsCertificate(identity("a.example.com")));
        provider.set("client-ca", Secret::ValidationContext(trust()));

        let subscription = SecretSubscription::start(sds_sources(), Some(provider.clone()))
            .await
            .unwrap();

        let mut callback = MockSecretCallbacks::new();
        callback.expect_on_add_or_update_secret().times(0);
        let state = Arc::clone(&subscription.state);
        subscription.set_secret_update_callback(Arc::new(callback));

        drop(subscription);
        assert!(state.cancel.is_cancelled());

        // A rebuild that was already in flight completes after teardown.
        state.refresh().await.unwrap();
        assert!(state.callback.lock().is_none());
    }
}
