//! In-memory secret provider

use crate::provider::{Secret, SecretProvider, SecretUpdate};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;
use warden_core::{Error, Result};

const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// In-memory secret provider
///
/// Secrets are pushed by the embedding control plane with [`InMemorySecretProvider::set`];
/// every change is announced to watchers.
#[derive(Debug, Clone)]
pub struct InMemorySecretProvider {
    secrets: Arc<DashMap<String, Secret>>,
    updates: broadcast::Sender<SecretUpdate>,
}

impl InMemorySecretProvider {
    /// Create an empty provider
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            secrets: Arc::new(DashMap::new()),
            updates,
        }
    }

    /// Add or replace a secret and notify watchers
    pub fn set(&self, name: impl Into<String>, secret: Secret) {
        let name = name.into();
        debug!(secret = %name, kind = secret.kind(), "Secret updated");
        self.secrets.insert(name.clone(), secret);
        let _ = self.updates.send(SecretUpdate::new(name));
    }

    /// Remove a secret and notify watchers
    pub fn remove(&self, name: &str) -> Option<Secret> {
        let removed = self.secrets.remove(name).map(|(_, secret)| secret);
        if removed.is_some() {
            debug!(secret = name, "Secret removed");
            let _ = self.updates.send(SecretUpdate::new(name));
        }
        removed
    }

    /// Whether the secret is currently known
    pub fn contains(&self, name: &str) -> bool {
        self.secrets.contains_key(name)
    }
}

impl Default for InMemorySecretProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretProvider for InMemorySecretProvider {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn fetch(&self, secret_name: &str) -> Result<Secret> {
        self.secrets
            .get(secret_name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::secret_fetch(secret_name, "secret not found"))
    }

    fn watch(&self) -> broadcast::Receiver<SecretUpdate> {
        self.updates.subscribe()
    }
}
