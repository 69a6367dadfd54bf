#![forbid(unsafe_code)]
//! Error types for the pinning file cache.
//!
//! # Error Taxonomy
//!
//! Every crate in the workspace returns [`PfcError`]. The variants fall into
//! three groups:
//!
//! | Group | Variants | Surfaced by |
//! |-------|----------|-------------|
//! | Backing I/O | `Io`, `BackingIo` | `pin_files`, `delete_file`, `shutdown`, flusher logs |
//! | Size invariant | `SizeMismatch` | `pin_files` when a backing file is not one page long |
//! | Caller contract | `NotPinned`, `InvalidName`, `CapacityExceeded`, `InvalidConfig` | the offending call, before any state change |
//!
//! `SizeMismatch` is fatal for the affected file: the cache never admits it,
//! and retrying the pin returns the same error until the file is repaired
//! out of band.
//!
//! ## Design Constraints
//!
//! - `pfc-error` depends on nothing else in the workspace.
//! - All string payloads are owned so errors can cross the flusher thread
//!   boundary.

use thiserror::Error;

/// Backing-store operation that failed, carried by [`PfcError::BackingIo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Load,
    Store,
    Remove,
}

impl std::fmt::Display for StoreOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Load => "load",
            Self::Store => "store",
            Self::Remove => "remove",
        };
        f.write_str(name)
    }
}

/// Unified error type for all cache operations.
#[derive(Debug, Error)]
pub enum PfcError {
    /// Operating system I/O error without file context.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A backing-store operation on a named file failed.
    #[error("backing store {op} of {name:?} failed: {source}")]
    BackingIo {
        name: String,
        op: StoreOp,
        #[source]
        source: std::io::Error,
    },

    /// A backing file exists but is not exactly one page long.
    #[error("backing file {name:?} is {actual} bytes, expected {expected}")]
    SizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    /// Page access for a name the caller has not pinned.
    #[error("file {0:?} is not pinned")]
    NotPinned(String),

    /// The name cannot be used as a backing file name.
    #[error("invalid file name: {0}")]
    InvalidName(String),

    /// A pin request names more distinct files than the cache can ever hold.
    #[error("pin request needs {requested} entries, cache holds {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },

    /// Rejected cache configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PfcError {
    /// Wrap an I/O error with the file and operation it came from.
    #[must_use]
    pub fn backing(name: impl Into<String>, op: StoreOp, source: std::io::Error) -> Self {
        Self::BackingIo {
            name: name.into(),
            op,
            source,
        }
    }

    /// True for failures of the backing store itself (retryable by the flusher).
    #[must_use]
    pub fn is_backing_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::BackingIo { .. })
    }

    /// True for violations of the caller-side contract.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::NotPinned(_) | Self::InvalidName(_) | Self::CapacityExceeded { .. }
        )
    }
}

/// Result alias using `PfcError`.
pub type Result<T> = std::result::Result<T, PfcError>;
