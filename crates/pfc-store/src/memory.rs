use crate::FileStore;
use parking_lot::Mutex;
use pfc_types::FileName;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;

/// In-memory byte-file namespace.
///
/// Clones share the same files, so a test can keep a handle to inspect what
/// the cache wrote after handing a clone to it.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current contents of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().get(name).cloned()
    }

    pub fn insert(&self, name: &str, bytes: Vec<u8>) {
        self.files.lock().insert(name.to_owned(), bytes);
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    /// Sorted list of stored names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl FileStore for MemoryStore {
    fn len(&self, name: &FileName) -> io::Result<Option<u64>> {
        Ok(self
            .files
            .lock()
            .get(name.as_str())
            .map(|bytes| u64::try_from(bytes.len()).unwrap_or(u64::MAX)))
    }

    fn read(&self, name: &FileName, buf: &mut [u8]) -> io::Result<()> {
        let files = self.files.lock();
        let Some(bytes) = files.get(name.as_str()) else {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        };
        if bytes.len() < buf.len() {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        }
        buf.copy_from_slice(&bytes[..buf.len()]);
        drop(files);
        Ok(())
    }

    fn write(&self, name: &FileName, data: &[u8]) -> io::Result<()> {
        self.files
            .lock()
            .insert(name.as_str().to_owned(), data.to_vec());
        Ok(())
    }

    fn unlink(&self, name: &FileName) -> io::Result<()> {
        match self.files.lock().remove(name.as_str()) {
            Some(_) => Ok(()),
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }
}
