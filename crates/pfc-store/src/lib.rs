#![forbid(unsafe_code)]
//! Backing storage for the pinning file cache.
//!
//! Two layers, mirroring a byte device under a block device:
//!
//! - [`FileStore`] is the raw byte-file namespace: whole-file reads and
//!   writes, lengths, and unlink. It knows nothing about pages.
//! - [`PageStore`] adapts a `FileStore` into fixed-size pages. It enforces
//!   the one-page file length, materializes missing files as zero pages on
//!   first load, and attaches file names to I/O errors.
//!
//! Neither layer caches or locks; callers serialize access per name.

mod dir;
mod memory;

pub use dir::DirStore;
pub use memory::MemoryStore;

use pfc_error::{PfcError, Result, StoreOp};
use pfc_types::{FileName, PAGE_SIZE, PAGE_SIZE_U64};
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{debug, error};

/// Owned page buffer.
///
/// Invariant: length == `PAGE_SIZE`.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    bytes: Box<[u8]>,
}

impl Page {
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            bytes: vec![0_u8; PAGE_SIZE].into_boxed_slice(),
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Deref for Page {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for Page {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nonzero = self.bytes.iter().filter(|b| **b != 0).count();
        f.debug_struct("Page")
            .field("len", &self.bytes.len())
            .field("nonzero_bytes", &nonzero)
            .finish()
    }
}

/// Raw byte-file namespace.
pub trait FileStore: Send + Sync {
    /// Length of `name` in bytes, or `None` when it does not exist.
    fn len(&self, name: &FileName) -> io::Result<Option<u64>>;

    /// Read exactly `buf.len()` bytes from the start of `name`.
    fn read(&self, name: &FileName, buf: &mut [u8]) -> io::Result<()>;

    /// Replace the whole contents of `name` with `data`, creating it if needed.
    ///
    /// Readers must never observe a partially written file.
    fn write(&self, name: &FileName, data: &[u8]) -> io::Result<()>;

    /// Remove `name`. Fails with `ErrorKind::NotFound` when absent.
    fn unlink(&self, name: &FileName) -> io::Result<()>;

    fn exists(&self, name: &FileName) -> io::Result<bool> {
        Ok(self.len(name)?.is_some())
    }
}

impl<S: FileStore + ?Sized> FileStore for Arc<S> {
    fn len(&self, name: &FileName) -> io::Result<Option<u64>> {
        (**self).len(name)
    }

    fn read(&self, name: &FileName, buf: &mut [u8]) -> io::Result<()> {
        (**self).read(name, buf)
    }

    fn write(&self, name: &FileName, data: &[u8]) -> io::Result<()> {
        (**self).write(name, data)
    }

    fn unlink(&self, name: &FileName) -> io::Result<()> {
        (**self).unlink(name)
    }

    fn exists(&self, name: &FileName) -> io::Result<bool> {
        (**self).exists(name)
    }
}

/// Page-addressed adapter over a [`FileStore`].
#[derive(Debug)]
pub struct PageStore<S: FileStore> {
    inner: S,
}

impl<S: FileStore> PageStore<S> {
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Read the page for `name`, creating a zero page when the file is absent.
    pub fn load(&self, name: &FileName) -> Result<Page> {
        let len = self
            .inner
            .len(name)
            .map_err(|e| PfcError::backing(name.as_str(), StoreOp::Load, e))?;

        match len {
            None => {
                let page = Page::zeroed();
                self.inner
                    .write(name, page.as_slice())
                    .map_err(|e| PfcError::backing(name.as_str(), StoreOp::Load, e))?;
                debug!(target: "pfc::store", name = %name, "store_created_zero_page");
                Ok(page)
            }
            Some(actual) if actual != PAGE_SIZE_U64 => {
                error!(
                    target: "pfc::store",
                    name = %name,
                    actual,
                    expected = PAGE_SIZE_U64,
                    "store_size_mismatch"
                );
                Err(PfcError::SizeMismatch {
                    name: name.as_str().to_owned(),
                    expected: PAGE_SIZE_U64,
                    actual,
                })
            }
            Some(_) => {
                let mut page = Page::zeroed();
                self.inner
                    .read(name, page.as_mut_slice())
                    .map_err(|e| PfcError::backing(name.as_str(), StoreOp::Load, e))?;
                Ok(page)
            }
        }
    }

    /// Overwrite the file for `name` with `data`. `data.len()` MUST equal `PAGE_SIZE`.
    pub fn store(&self, name: &FileName, data: &[u8]) -> Result<()> {
        if data.len() != PAGE_SIZE {
            return Err(PfcError::SizeMismatch {
                name: name.as_str().to_owned(),
                expected: PAGE_SIZE_U64,
                actual: u64::try_from(data.len()).unwrap_or(u64::MAX),
            });
        }
        self.inner
            .write(name, data)
            .map_err(|e| PfcError::backing(name.as_str(), StoreOp::Store, e))
    }

    /// Unlink `name`. Returns whether a file was removed; absence is not an error.
    pub fn remove(&self, name: &FileName) -> Result<bool> {
        match self.inner.unlink(name) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PfcError::backing(name.as_str(), StoreOp::Remove, e)),
        }
    }
}
