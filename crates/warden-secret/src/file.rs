//! File-backed secret provider with modification-time polling

use crate::provider::{Secret, SecretProvider, SecretUpdate};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_core::{Error, Result};

const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Registered secret with the newest modification time seen across its files
#[derive(Debug)]
struct WatchedSecret {
    secret: Secret,
    last_modified: Option<SystemTime>,
}

/// Secret provider for material kept on local disk.
///
/// Secrets reference files through [`warden_core::DataSource::Filename`]. The provider
/// never reads file contents itself; it hands out the references and announces a change
/// whenever one of the referenced files gets a newer modification time.
#[derive(Debug)]
pub struct FileSecretProvider {
    secrets: DashMap<String, WatchedSecret>,
    updates: broadcast::Sender<SecretUpdate>,
    poll_interval: Duration,
}

impl FileSecretProvider {
    /// Create a provider polling at the given interval
    pub fn new(poll_interval: Duration) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            secrets: DashMap::new(),
            updates,
            poll_interval,
        }
    }

    /// Register a named secret. Every referenced file must exist.
    pub fn register(&self, name: impl Into<String>, secret: Secret) -> Result<()> {
        let name = name.into();
        let last_modified = latest_modification(&secret).map_err(|e| {
            Error::config(format!("Failed to read metadata for secret '{name}': {e}"))
        })?;

        info!(secret = %name, kind = secret.kind(), "Watching secret files");

        self.secrets.insert(
            name.clone(),
            WatchedSecret {
                secret,
                last_modified,
            },
        );
        let _ = self.updates.send(SecretUpdate::new(name));
        Ok(())
    }

    /// Compare modification times and announce every secret whose files changed.
    ///
    /// Any difference counts, so files swapped in with an older timestamp are picked up too.
    pub fn check_for_changes(&self) -> Vec<String> {
        // Stat outside the map so fetches are never held up by the filesystem.
        let watched: Vec<(String, Secret, Option<SystemTime>)> = self
            .secrets
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.secret.clone(),
                    entry.last_modified,
                )
            })
            .collect();

        let mut changed = Vec::new();
        for (name, secret, last_modified) in watched {
            let current = match latest_modification(&secret) {
                Ok(current) => current,
                Err(e) => {
                    // Mid-rotation writers may briefly remove files.
                    warn!(secret = %name, error = %e, "Failed to stat secret files");
                    continue;
                }
            };

            if current == last_modified {
                continue;
            }
            if let Some(mut entry) = self.secrets.get_mut(&name) {
                entry.last_modified = current;
                changed.push(name);
            }
        }

        for name in &changed {
            info!(secret = %name, "Secret files modified");
            let _ = self.updates.send(SecretUpdate::new(name.clone()));
        }

        changed
    }

    /// Start polling until the token is cancelled
    pub fn start_polling(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.poll_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Secret file polling stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        self.check_for_changes();
                    }
                }
            }
        })
    }
}

fn latest_modification(secret: &Secret) -> std::io::Result<Option<SystemTime>> {
    let mut latest = None;
    for path in secret.data_sources().into_iter().filter_map(|s| s.path()) {
        let modified = modified_at(path)?;
        latest = latest.max(Some(modified));
    }
    Ok(latest)
}

fn modified_at(path: &Path) -> std::io::Result<SystemTime> {
    std::fs::metadata(path)?.modified()
}

#[async_trait]
impl SecretProvider for FileSecretProvider {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch(&self, secret_name: &str) -> Result<Secret> {
        self.secrets
            .get(secret_name)
            .map(|entry| entry.secret.clone())
            .ok_or_else(|| Error::secret_fetch(secret_name, "secret is not registered"))
    }

    fn watch(&self) -> broadcast::Receiver<SecretUpdate> {
        self.updates.subscribe()
    }
}
