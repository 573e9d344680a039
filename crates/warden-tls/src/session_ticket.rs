//! Session ticket keys for server-side resumption

use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;
use tracing::info;
use warden_core::{Error, Result};

/// Length of the key name sent in each ticket
pub const KEY_NAME_LEN: usize = 16;
/// Length of the HMAC secret
pub const HMAC_SECRET_LEN: usize = 32;
/// Length of the AES key
pub const AES_KEY_LEN: usize = 32;
/// Length of a serialized key: name, HMAC secret, AES key
pub const SESSION_TICKET_KEY_LEN: usize = KEY_NAME_LEN + HMAC_SECRET_LEN + AES_KEY_LEN;

/// One session ticket key
#[derive(Clone, PartialEq, Eq)]
pub struct SessionTicketKey {
    name: [u8; KEY_NAME_LEN],
    hmac_key: [u8; HMAC_SECRET_LEN],
    aes_key: [u8; AES_KEY_LEN],
}

impl SessionTicketKey {
    /// Assemble a key from its parts
    pub fn new(
        name: [u8; KEY_NAME_LEN],
        hmac_key: [u8; HMAC_SECRET_LEN],
        aes_key: [u8; AES_KEY_LEN],
    ) -> Self {
        Self {
            name,
            hmac_key,
            aes_key,
        }
    }

    /// Parse an 80-byte key blob
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SESSION_TICKET_KEY_LEN {
            return Err(Error::Config(format!(
                "Session ticket key must be {SESSION_TICKET_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }

        let (name, rest) = bytes.split_at(KEY_NAME_LEN);
        let (hmac_key, aes_key) = rest.split_at(HMAC_SECRET_LEN);

        Ok(Self {
            name: to_array(name)?,
            hmac_key: to_array(hmac_key)?,
            aes_key: to_array(aes_key)?,
        })
    }

    /// Key name
    pub fn name(&self) -> &[u8; KEY_NAME_LEN] {
        &self.name
    }

    /// Key name as lowercase hex
    pub fn name_hex(&self) -> String {
        hex::encode(self.name)
    }

    /// HMAC secret
    pub fn hmac_key(&self) -> &[u8; HMAC_SECRET_LEN] {
        &self.hmac_key
    }

    /// AES key
    pub fn aes_key(&self) -> &[u8; AES_KEY_LEN] {
        &self.aes_key
    }
}

fn to_array<const N: usize>(slice: &[u8]) -> Result<[u8; N]> {
    slice
        .try_into()
        .map_err(|_| Error::Internal(format!("expected {N} bytes, got {}", slice.len())))
}

impl fmt::Debug for SessionTicketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTicketKey")
            .field("name", &self.name_hex())
            .finish_non_exhaustive()
    }
}

/// Ordered session ticket keys.
///
/// The first key encrypts new tickets; every key decrypts. Rotation replaces the whole set
/// atomically.
pub struct SessionTicketKeyring {
    keys: ArcSwap<Vec<SessionTicketKey>>,
    resumption_enabled: bool,
}

impl SessionTicketKeyring {
    /// Build a keyring. Resumption is enabled when at least one key is given.
    pub fn new(keys: Vec<SessionTicketKey>) -> Result<Self> {
        check_unique(&keys)?;
        Ok(Self {
            resumption_enabled: !keys.is_empty(),
            keys: ArcSwap::from_pointee(keys),
        })
    }

    /// Keyring with resumption disabled
    pub fn disabled() -> Self {
        Self {
            keys: ArcSwap::from_pointee(Vec::new()),
            resumption_enabled: false,
        }
    }

    /// Whether stateless resumption is enabled
    pub fn is_enabled(&self) -> bool {
        self.resumption_enabled
    }

    /// Current keys, encryption key first
    pub fn keys(&self) -> Arc<Vec<SessionTicketKey>> {
        self.keys.load_full()
    }

    /// Key used to encrypt new tickets
    pub fn encryption_key(&self) -> Option<SessionTicketKey> {
        self.keys.load().first().cloned()
    }

    /// Key able to decrypt a ticket carrying the given name
    pub fn decryption_key(&self, name: &[u8]) -> Option<SessionTicketKey> {
        self.keys
            .load()
            .iter()
            .find(|key| key.name.as_slice() == name)
            .cloned()
    }

    /// Replace all keys. An enabled keyring cannot be emptied.
    pub fn rotate(&self, keys: Vec<SessionTicketKey>) -> Result<()> {
        if self.resumption_enabled && keys.is_empty() {
            return Err(Error::Config(
                "Cannot rotate to an empty session ticket key set".to_string(),
            ));
        }
        if !self.resumption_enabled && !keys.is_empty() {
            return Err(Error::Config(
                "Session ticket resumption is disabled for this context".to_string(),
            ));
        }
        check_unique(&keys)?;

        let encryption_key = keys.first().map(SessionTicketKey::name_hex);
        let count = keys.len();
        self.keys.store(Arc::new(keys));

        info!(
            keys = count,
            encryption_key = encryption_key.as_deref().unwrap_or("none"),
            "Rotated session ticket keys"
        );
        Ok(())
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.keys.load().len()
    }

    /// Whether there are no keys
    pub fn is_empty(&self) -> bool {
        self.keys.load().is_empty()
    }
}

fn check_unique(keys: &[SessionTicketKey]) -> Result<()> {
    for (i, key) in keys.iter().enumerate() {
        if keys[..i].iter().any(|earlier| earlier.name == key.name) {
            return Err(Error::Config(format!(
                "Duplicate session ticket key name {}",
                key.name_hex()
            )));
        }
    }
    Ok(())
}

impl fmt::Debug for SessionTicketKeyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTicketKeyring")
            .field("keys", &self.keys.load())
            .field("resumption_enabled", &self.resumption_enabled)
            .finish()
    }
}
