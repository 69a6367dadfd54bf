#![forbid(unsafe_code)]
//! Pinning file cache public API facade.
//!
//! Re-exports the cache, its stores, and the shared types through one
//! stable crate for downstream consumers.

pub use pfc_cache::{CacheMetrics, FileCache, PageMut, PageRef};
pub use pfc_error::{PfcError, Result, StoreOp};
pub use pfc_store::{DirStore, FileStore, MemoryStore, Page, PageStore};
pub use pfc_types::{CacheConfig, FileName, PAGE_SIZE};
