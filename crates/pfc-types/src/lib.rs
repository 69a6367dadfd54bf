#![forbid(unsafe_code)]

use pfc_error::{PfcError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::time::Duration;

/// Size of every cached file, in bytes.
pub const PAGE_SIZE: usize = 10 * 1024;

/// `PAGE_SIZE` as a file length.
pub const PAGE_SIZE_U64: u64 = PAGE_SIZE as u64;

const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(10);
const MAX_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Validated backing file name.
///
/// Invariant: non-empty, contains neither `/` nor NUL, and is not `.` or `..`,
/// so it always names a single file directly inside the store root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileName(String);

impl FileName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(PfcError::InvalidName("empty name".to_owned()));
        }
        if name == "." || name == ".." {
            return Err(PfcError::InvalidName(format!("{name:?} is reserved")));
        }
        if name.contains(['/', '\0']) {
            return Err(PfcError::InvalidName(format!(
                "{name:?} contains a path separator or NUL"
            )));
        }
        Ok(Self(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FileName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for FileName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FileName {
    type Error = PfcError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for FileName {
    type Error = PfcError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<FileName> for String {
    fn from(value: FileName) -> Self {
        value.0
    }
}

/// Cache construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of resident entries. Must be > 0.
    /// Default: 64.
    pub max_cache_entries: usize,
    /// How long an entry may stay dirty and unpinned before the flusher
    /// writes it back. Default: 30s.
    pub dirty_time: Duration,
    /// Upper bound on the flusher's sleep between passes.
    /// Default: `dirty_time / 2`, clamped to 10ms..=1s.
    #[serde(default)]
    pub flush_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_entries: 64,
            dirty_time: Duration::from_secs(30),
            flush_interval: None,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn new(max_cache_entries: usize, dirty_time_secs: u64) -> Self {
        Self {
            max_cache_entries,
            dirty_time: Duration::from_secs(dirty_time_secs),
            flush_interval: None,
        }
    }

    #[must_use]
    pub fn with_dirty_time(mut self, dirty_time: Duration) -> Self {
        self.dirty_time = dirty_time;
        self
    }

    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    /// Flusher tick actually used.
    #[must_use]
    pub fn effective_flush_interval(&self) -> Duration {
        self.flush_interval.unwrap_or_else(|| {
            (self.dirty_time / 2).clamp(MIN_FLUSH_INTERVAL, MAX_FLUSH_INTERVAL)
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_cache_entries == 0 {
            return Err(PfcError::InvalidConfig(
                "max_cache_entries must be > 0".to_owned(),
            ));
        }
        if self.flush_interval.is_some_and(|d| d.is_zero()) {
            return Err(PfcError::InvalidConfig(
                "flush_interval must be non-zero".to_owned(),
            ));
        }
        Ok(())
    }
}
