//! Error types for Warden

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for Warden
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration rejected at load time
    #[error("Configuration error: {0}")]
    Config(String),

    /// A named secret could not be obtained from its provider
    #[error("Failed to fetch secret '{name}': {message}")]
    SecretFetch {
        /// Secret name
        name: String,
        /// Error message
        message: String,
    },

    /// A named secret was delivered but its material did not parse
    #[error("Failed to parse secret '{name}': {message}")]
    SecretParse {
        /// Secret name
        name: String,
        /// Error message
        message: String,
    },

    /// Snapshot-backed accessor used before the first snapshot was installed
    #[error("TLS context is not ready: no secret snapshot has been installed")]
    NotReady,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (should not happen in production)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error makes the configuration unusable.
    ///
    /// Load-time validation failures are fatal. Fetch and parse failures during a
    /// refresh are not: the previously installed snapshot stays authoritative.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Internal(_))
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Create a secret fetch error
    pub fn secret_fetch(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::SecretFetch {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a secret parse error
    pub fn secret_parse(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::SecretParse {
            name: name.into(),
            message: message.into(),
        }
    }
}
