//! Borrowed views of a pinned page.
//!
//! A view keeps the page's reader/writer lock for as long as it lives, so it
//! must be dropped before the caller unpins the file. Any number of
//! [`PageRef`]s may coexist, and a new one is granted while any is alive even
//! if a writer is queued. A [`PageMut`] is exclusive: it waits for every other
//! view to drop, and asking for one while the same thread holds another view
//! of that page deadlocks.

use parking_lot::RawRwLock;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use pfc_store::Page;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Read-only view of a pinned file's `PAGE_SIZE` bytes.
pub struct PageRef {
    guard: ArcRwLockReadGuard<RawRwLock, Page>,
}

impl PageRef {
    pub(crate) fn new(guard: ArcRwLockReadGuard<RawRwLock, Page>) -> Self {
        Self { guard }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.guard.as_slice()
    }
}

impl Deref for PageRef {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.guard.as_slice()
    }
}

impl fmt::Debug for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PageRef").field(&*self.guard).finish()
    }
}

/// Writable view of a pinned file's `PAGE_SIZE` bytes.
///
/// Handing one out marks the entry dirty, whether or not it is written to.
pub struct PageMut {
    guard: ArcRwLockWriteGuard<RawRwLock, Page>,
}

impl PageMut {
    pub(crate) fn new(guard: ArcRwLockWriteGuard<RawRwLock, Page>) -> Self {
        Self { guard }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.guard.as_slice()
    }

    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.guard.as_mut_slice()
    }
}

impl Deref for PageMut {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.guard.as_slice()
    }
}

impl DerefMut for PageMut {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.guard.as_mut_slice()
    }
}

impl fmt::Debug for PageMut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PageMut").field(&*self.guard).finish()
    }
}
