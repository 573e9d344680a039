//! Shared types

use bytes::Bytes;
use std::fmt;
use std::path::{Path, PathBuf};

/// Path marker reported for material that was supplied inline.
pub const INLINE_MARKER: &str = "<inline>";

/// Where a piece of TLS material comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum DataSource {
    /// Bytes supplied directly in configuration or by a secret provider
    Inline(Bytes),

    /// File read whenever the owning secret is (re)built
    Filename(PathBuf),
}

impl DataSource {
    /// Inline source from anything byte-like
    pub fn inline(bytes: impl Into<Bytes>) -> Self {
        DataSource::Inline(bytes.into())
    }

    /// File-backed source
    pub fn filename(path: impl Into<PathBuf>) -> Self {
        DataSource::Filename(path.into())
    }

    /// Whether the material is inline
    pub fn is_inline(&self) -> bool {
        matches!(self, DataSource::Inline(_))
    }

    /// Backing file, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            DataSource::Inline(_) => None,
            DataSource::Filename(path) => Some(path),
        }
    }

    /// `"<inline>"` for inline material, otherwise the configured path.
    pub fn display_path(&self) -> String {
        match self {
            DataSource::Inline(_) => INLINE_MARKER.to_string(),
            DataSource::Filename(path) => path.display().to_string(),
        }
    }

    /// Read the material. Inline sources never touch the filesystem.
    pub fn read(&self) -> std::io::Result<Bytes> {
        match self {
            DataSource::Inline(bytes) => Ok(bytes.clone()),
            DataSource::Filename(path) => std::fs::read(path).map(Bytes::from),
        }
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Inline material may be a private key.
        match self {
            DataSource::Inline(bytes) => write!(f, "Inline({} bytes)", bytes.len()),
            DataSource::Filename(path) => f.debug_tuple("Filename").field(path).finish(),
        }
    }
}
