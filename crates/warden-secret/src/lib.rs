//! Secret management for Warden TLS contexts
//!
//! This crate resolves certificate and trust material from static configuration or from
//! named secrets served by a [`SecretProvider`], and keeps a consistent
//! [`SecretSnapshot`] installed while those secrets rotate.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod file;
pub mod loader;
pub mod memory;
pub mod provider;
pub mod snapshot;
pub mod subscription;

pub use file::FileSecretProvider;
pub use loader::RevocationList;
pub use memory::InMemorySecretProvider;
pub use provider::{
    Secret, SecretProvider, SecretUpdate, TlsCertificateSecret, ValidationContextSecret,
};
pub use snapshot::{SecretSnapshot, TlsCertificateConfig, TrustAnchor};
pub use subscription::{
    RefreshFailure, SecretCallbacks, SecretSource, SecretSources, SecretSubscription,
    SubscriptionEvent,
};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::memory::InMemorySecretProvider;
    pub use crate::provider::{
        Secret, SecretProvider, TlsCertificateSecret, ValidationContextSecret,
    };
    pub use crate::snapshot::{SecretSnapshot, TlsCertificateConfig, TrustAnchor};
    pub use crate::subscription::{SecretCallbacks, SecretSource, SecretSources, SecretSubscription};
}
