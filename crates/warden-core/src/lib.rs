//! # Warden Core
//!
//! Core types and error handling shared by the Warden crates:
//! - Error taxonomy (load-time configuration errors vs. runtime secret errors)
//! - Data sources for TLS material (inline bytes or files)

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{DataSource, INLINE_MARKER};

// Re-export commonly used byte buffer
pub use bytes::Bytes;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{DataSource, INLINE_MARKER};
}
