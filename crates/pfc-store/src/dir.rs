use crate::FileStore;
use pfc_error::{PfcError, Result};
use pfc_types::FileName;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

const STAGING_SUFFIX: &str = ".pfc-staging";

/// Filesystem-backed store: one regular file per name inside `root`.
///
/// Writes go to a staging file in the sibling directory
/// `<parent>/.<root name>.pfc-staging/` and are renamed over the target, so a
/// concurrent reader sees either the old or the new contents. Every entry of
/// `root` is a valid [`FileName`], which is why staging cannot live inside
/// it. Durability is left to the platform unless `with_fsync(true)`.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
    staging: PathBuf,
    fsync: bool,
}

impl DirStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        let root = fs::canonicalize(root.as_ref())?;
        if !fs::metadata(&root)?.is_dir() {
            return Err(PfcError::InvalidConfig(format!(
                "store root {} is not a directory",
                root.display()
            )));
        }
        let staging = staging_dir_for(&root)?;
        fs::create_dir_all(&staging)?;
        Ok(Self {
            root,
            staging,
            fsync: false,
        })
    }

    /// Sync file data (and the rename) before `write` returns.
    #[must_use]
    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn staging(&self) -> &Path {
        &self.staging
    }

    #[must_use]
    pub fn path_of(&self, name: &FileName) -> PathBuf {
        self.root.join(name.as_str())
    }
}

fn staging_dir_for(root: &Path) -> Result<PathBuf> {
    match (root.parent(), root.file_name()) {
        (Some(parent), Some(base)) => {
            let mut dir = OsString::from(".");
            dir.push(base);
            dir.push(STAGING_SUFFIX);
            Ok(parent.join(dir))
        }
        _ => Err(PfcError::InvalidConfig(format!(
            "store root {} has no parent to stage writes in",
            root.display()
        ))),
    }
}

impl FileStore for DirStore {
    fn len(&self, name: &FileName) -> io::Result<Option<u64>> {
        match fs::metadata(self.path_of(name)) {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{name} is not a regular file"),
            )),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn read(&self, name: &FileName, buf: &mut [u8]) -> io::Result<()> {
        let mut file = File::open(self.path_of(name))?;
        file.read_exact(buf)
    }

    fn write(&self, name: &FileName, data: &[u8]) -> io::Result<()> {
        let staged = self.staging.join(name.as_str());
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&staged)?;
        file.write_all(data)?;
        if self.fsync {
            file.sync_data()?;
        }
        drop(file);
        fs::rename(&staged, self.path_of(name))?;
        if self.fsync {
            File::open(&self.root)?.sync_all()?;
        }
        Ok(())
    }

    fn unlink(&self, name: &FileName) -> io::Result<()> {
        fs::remove_file(self.path_of(name))
    }
}
