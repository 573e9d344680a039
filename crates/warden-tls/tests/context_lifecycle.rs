//! Integration tests for TLS contexts backed by rotating secrets

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use warden_core::{DataSource, Error, Result};
use warden_secret::{
    InMemorySecretProvider, Secret, SecretCallbacks, SecretProvider, SecretUpdate,
    SubscriptionEvent, TlsCertificateSecret, ValidationContextSecret,
};
use warden_tls::{CommonTlsSettings, ServerContextConfig, ServerTlsSettings, TlsContextConfig};

#[derive(Default)]
struct CountingCallback {
    calls: AtomicUsize,
    fired: Notify,
}

impl CountingCallback {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn wait_for_call(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.fired.notified())
            .await
            .expect("timed out waiting for callback");
    }
}

impl SecretCallbacks for CountingCallback {
    fn on_add_or_update_secret(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.fired.notify_one();
    }
}

/// Serves secrets from memory but never pushes, so only explicit refreshes install
#[derive(Debug)]
struct ManualRefreshProvider {
    inner: InMemorySecretProvider,
    updates: broadcast::Sender<SecretUpdate>,
}

impl ManualRefreshProvider {
    fn new() -> Self {
        let (updates, _) = broadcast::channel(1);
        Self {
            inner: InMemorySecretProvider::new(),
            updates,
        }
    }
}

#[async_trait]
impl SecretProvider for ManualRefreshProvider {
    fn name(&self) -> &str {
        "manual"
    }

    async fn fetch(&self, secret_name: &str) -> Result<Secret> {
        self.inner.fetch(secret_name).await
    }

    fn watch(&self) -> broadcast::Receiver<SecretUpdate> {
        self.updates.subscribe()
    }
}

fn identity(dns_name: &str) -> Secret {
    let key = rcgen::KeyPair::generate().unwrap();
    let cert = rcgen::CertificateParams::new(vec![dns_name.to_string()])
        .unwrap()
        .self_signed(&key)
        .unwrap();
    Secret::TlsCertificate(TlsCertificateSecret {
        certificate_chain: DataSource::inline(cert.pem()),
        private_key: DataSource::inline(key.serialize_pem()),
    })
}

fn ca_pem() -> String {
    let key = rcgen::KeyPair::generate().unwrap();
    rcgen::CertificateParams::new(vec!["ca.example.com".to_string()])
        .unwrap()
        .self_signed(&key)
        .unwrap()
        .pem()
}

fn inline_trust() -> Secret {
    Secret::ValidationContext(ValidationContextSecret {
        trusted_ca: DataSource::inline(ca_pem()),
        crl: None,
    })
}

fn mtls_settings() -> ServerTlsSettings {
    ServerTlsSettings {
        common: CommonTlsSettings {
            alpn_protocols: vec!["h2".to_string(), "http/1.1".to_string()],
            tls_certificate_sds_secret: Some("server-cert".to_string()),
            validation_context_sds_secret: Some("client-ca".to_string()),
            ..Default::default()
        },
        require_client_certificate: true,
        ..Default::default()
    }
}

async fn wait_for_install(events: &mut tokio::sync::broadcast::Receiver<SubscriptionEvent>) -> u64 {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for snapshot install")
            .unwrap();
        if let SubscriptionEvent::Installed { generation } = event {
            return generation;
        }
    }
}

#[tokio::test]
async fn test_ready_after_all_secrets_arrive_and_stays_ready() {
    let provider = Arc::new(InMemorySecretProvider::new());
    let config = ServerContextConfig::new(&mtls_settings(), Some(provider.clone()))
        .await
        .unwrap();
    let mut events = config.events();

    assert!(!config.is_ready());
    assert!(matches!(config.ca_cert(), Err(Error::NotReady)));
    assert!(matches!(config.tls_certificate(), Err(Error::NotReady)));

    provider.set("server-cert", identity("a.example.com"));
    assert!(!config.is_ready());

    provider.set("client-ca", inline_trust());
    wait_for_install(&mut events).await;
    assert!(config.is_ready());

    provider.remove("client-ca");
    assert!(config.refresh().await.is_err());
    assert!(config.is_ready());
}

#[tokio::test]
async fn test_failed_refresh_leaves_accessors_unchanged() {
    let provider = Arc::new(InMemorySecretProvider::new());
    provider.set("server-cert", identity("a.example.com"));
    provider.set("client-ca", inline_trust());

    let config = ServerContextConfig::new(&mtls_settings(), Some(provider.clone()))
        .await
        .unwrap();
    assert!(config.is_ready());

    let ca_before = config.ca_cert().unwrap();
    let ca_path_before = config.ca_cert_path().unwrap();
    let chain_before = config.tls_certificate().unwrap().unwrap().certificate_chain().clone();
    let alpn_before = config.alpn_protocols().to_vec();
    let generation_before = config.snapshot().unwrap().generation();

    let mut events = config.events();
    provider.set(
        "server-cert",
        Secret::TlsCertificate(TlsCertificateSecret {
            certificate_chain: DataSource::inline("not a certificate"),
            private_key: DataSource::inline("not a key"),
        }),
    );

    let err = config.refresh().await.unwrap_err();
    assert!(!err.is_fatal());
    match events.recv().await.unwrap() {
        SubscriptionEvent::RefreshFailed { secret, .. } => assert_eq!(secret, "server-cert"),
        other => panic!("unexpected event: {other:?}"),
    }

    assert!(config.is_ready());
    assert_eq!(config.ca_cert().unwrap(), ca_before);
    assert_eq!(config.ca_cert_path().unwrap(), ca_path_before);
    assert_eq!(
        config.tls_certificate().unwrap().unwrap().certificate_chain(),
        &chain_before
    );
    assert_eq!(config.alpn_protocols(), alpn_before.as_slice());
    assert_eq!(config.snapshot().unwrap().generation(), generation_before);
}

#[tokio::test]
async fn test_last_registered_callback_wins() {
    let provider = Arc::new(InMemorySecretProvider::new());
    provider.set("server-cert", identity("a.example.com"));
    provider.set("client-ca", inline_trust());

    let config = ServerContextConfig::new(&mtls_settings(), Some(provider.clone()))
        .await
        .unwrap();

    let first = Arc::new(CountingCallback::default());
    let second = Arc::new(CountingCallback::default());
    config.set_secret_update_callback(first.clone());
    config.set_secret_update_callback(second.clone());

    config.refresh().await.unwrap();
    second.wait_for_call().await;

    assert_eq!(first.calls(), 0);
    assert_eq!(second.calls(), 1);
}

#[tokio::test]
async fn test_pushed_rotation_invokes_callback() {
    let provider = Arc::new(InMemorySecretProvider::new());
    provider.set("server-cert", identity("a.example.com"));
    provider.set("client-ca", inline_trust());

    let config = ServerContextConfig::new(&mtls_settings(), Some(provider.clone()))
        .await
        .unwrap();
    let callback = Arc::new(CountingCallback::default());
    config.set_secret_update_callback(callback.clone());
    let mut events = config.events();

    provider.set("server-cert", identity("b.example.com"));
    let generation = wait_for_install(&mut events).await;
    callback.wait_for_call().await;

    assert_eq!(generation, 2);
    assert_eq!(callback.calls(), 1);
}

#[tokio::test]
async fn test_no_callback_after_context_dropped() {
    let provider = Arc::new(InMemorySecretProvider::new());
    provider.set("server-cert", identity("a.example.com"));
    provider.set("client-ca", inline_trust());

    let config = ServerContextConfig::new(&mtls_settings(), Some(provider.clone()))
        .await
        .unwrap();
    let callback = Arc::new(CountingCallback::default());
    config.set_secret_update_callback(callback.clone());
    drop(config);

    provider.set("server-cert", identity("b.example.com"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(callback.calls(), 0);
    // The context no longer holds the callback.
    assert_eq!(Arc::strong_count(&callback), 1);
}

#[tokio::test]
async fn test_ca_cert_path_markers() {
    let provider = Arc::new(InMemorySecretProvider::new());
    provider.set("server-cert", identity("a.example.com"));
    provider.set("client-ca", inline_trust());

    let config = ServerContextConfig::new(&mtls_settings(), Some(provider.clone()))
        .await
        .unwrap();
    assert_eq!(config.ca_cert_path().unwrap().as_deref(), Some("<inline>"));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("client-ca.pem");
    std::fs::write(&path, ca_pem()).unwrap();

    let mut events = config.events();
    provider.set(
        "client-ca",
        Secret::ValidationContext(ValidationContextSecret {
            trusted_ca: DataSource::filename(&path),
            crl: None,
        }),
    );
    wait_for_install(&mut events).await;

    assert_eq!(
        config.ca_cert_path().unwrap(),
        Some(path.display().to_string())
    );
    assert!(config.certificate_revocation_list_path().unwrap().is_none());
}

#[tokio::test]
async fn test_initial_failure_reported_on_context() {
    let provider = Arc::new(InMemorySecretProvider::new());
    provider.set("server-cert", identity("a.example.com"));

    let config = ServerContextConfig::new(&mtls_settings(), Some(provider.clone()))
        .await
        .unwrap();
    assert!(!config.is_ready());

    let failure = config.last_refresh_failure().expect("initial failure is kept");
    assert_eq!(failure.secret, "client-ca");
    assert!(failure.reason.contains("not found"));

    let mut events = config.events();
    provider.set("client-ca", inline_trust());
    wait_for_install(&mut events).await;
    assert!(config.last_refresh_failure().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshot_pairs_certificate_and_trust_from_one_generation() {
    const PAIRS: usize = 4;
    const ROTATIONS: usize = 40;

    let identities: Vec<Secret> = (0..PAIRS)
        .map(|i| identity(&format!("gen-{i}.example.com")))
        .collect();
    let trusts: Vec<String> = (0..PAIRS).map(|_| ca_pem()).collect();
    let chain_of = |secret: &Secret| match secret {
        Secret::TlsCertificate(cert) => cert.certificate_chain.read().unwrap(),
        Secret::ValidationContext(_) => unreachable!(),
    };
    let chains: Arc<Vec<_>> = Arc::new(identities.iter().map(chain_of).collect());
    let trusts_bytes: Arc<Vec<Vec<u8>>> =
        Arc::new(trusts.iter().map(|pem| pem.as_bytes().to_vec()).collect());

    let provider = Arc::new(ManualRefreshProvider::new());
    provider.inner.set("server-cert", identities[0].clone());
    provider.inner.set(
        "client-ca",
        Secret::ValidationContext(ValidationContextSecret {
            trusted_ca: DataSource::inline(trusts[0].clone()),
            crl: None,
        }),
    );
    let server = Arc::new(
        ServerContextConfig::new(&mtls_settings(), Some(provider.clone()))
            .await
            .unwrap(),
    );
    let config: Arc<dyn TlsContextConfig> = server.clone();
    assert!(config.is_ready());

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let config = Arc::clone(&config);
            let done = Arc::clone(&done);
            let chains = Arc::clone(&chains);
            let trusts_bytes = Arc::clone(&trusts_bytes);
            tokio::spawn(async move {
                let mut last_generation = 0;
                let mut reads = 0usize;
                loop {
                    let snapshot = config.snapshot().unwrap();
                    let chain = snapshot.certificate().unwrap().certificate_chain();
                    let ca = snapshot.trust().unwrap().ca_cert();
                    let cert_index = chains.iter().position(|c| c == chain).unwrap();
                    let ca_index = trusts_bytes
                        .iter()
                        .position(|t| t.as_slice() == ca.as_ref())
                        .unwrap();

                    assert_eq!(cert_index, ca_index, "generation {}", snapshot.generation());
                    assert!(snapshot.generation() >= last_generation);
                    last_generation = snapshot.generation();
                    reads += 1;
                    if done.load(Ordering::SeqCst) {
                        break reads;
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for rotation in 1..=ROTATIONS {
        let i = rotation % PAIRS;
        provider.inner.set("server-cert", identities[i].clone());
        provider.inner.set(
            "client-ca",
            Secret::ValidationContext(ValidationContextSecret {
                trusted_ca: DataSource::inline(trusts[i].clone()),
                crl: None,
            }),
        );
        server.refresh().await.unwrap();
        tokio::task::yield_now().await;
    }
    done.store(true, Ordering::SeqCst);

    for reader in readers {
        assert!(reader.await.unwrap() > 0);
    }
}
