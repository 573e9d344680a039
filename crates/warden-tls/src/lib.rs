//! TLS context configuration for Warden
//!
//! Assembles what the handshake layer needs to originate or terminate TLS:
//! - Protocol versions, cipher suites, curves and ALPN lists
//! - Peer validation by subject alternative name, certificate hash and SPKI hash
//! - Certificate and trust material kept current by a secret subscription
//! - Session ticket keys for server-side resumption
//!
//! # Readiness
//!
//! A context becomes ready once its secret material has been installed, and stays ready
//! for its lifetime. Handshakes must not be attempted on a context that is not ready.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod config;
pub mod context;
pub mod protocol;
pub mod session_ticket;
pub mod validation;

pub use config::{
    ClientTlsSettings, CommonTlsSettings, DataSourceSettings, ServerTlsSettings,
    TlsCertificateSettings, TlsParamsSettings, ValidationContextSettings,
};
pub use context::{
    ClientContextConfig, ClientRole, ContextConfig, ServerContextConfig, ServerRole,
    TlsContextConfig,
};
pub use protocol::{ProtocolPolicy, TlsProtocolVersion, DEFAULT_CIPHER_SUITES, DEFAULT_ECDH_CURVES};
pub use session_ticket::{SessionTicketKey, SessionTicketKeyring};
pub use validation::{ValidationPolicy, Verdict, VerificationCriteria, VerificationFailure};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ClientTlsSettings, ServerTlsSettings};
    pub use crate::context::{ClientContextConfig, ServerContextConfig, TlsContextConfig};
    pub use crate::protocol::TlsProtocolVersion;
    pub use crate::validation::{Verdict, VerificationFailure};
    pub use warden_core::prelude::*;
    pub use warden_secret::prelude::*;
}
