//! Where transferred files come from and go to.
//!
//! The protocol engine only sees the [`Storage`] trait; [`DirStorage`] keeps
//! every file directly under one root directory.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::tftp::error::TransferError;

pub type Source = Box<dyn Read + Send>;
pub type Sink = Box<dyn Write + Send>;

pub trait Storage: Send + Sync {
    /// Opens `name` for reading, [`TransferError::NotFound`] if it is absent.
    fn open_for_read(&self, name: &str) -> Result<Source, TransferError>;

    /// Opens a writer whose bytes replace `name` once it is flushed.
    ///
    /// A sink dropped before its flush leaves whatever `name` held before
    /// untouched.
    fn open_for_write(&self, name: &str) -> Result<Sink, TransferError>;
}

#[derive(Debug, Clone)]
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    /// The root directory is created if it doesn't exist.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        Ok(DirStorage { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Storage for DirStorage {
    fn open_for_read(&self, name: &str) -> Result<Source, TransferError> {
        let path = self.path_of(name);
        if path.is_dir() {
            return Err(TransferError::Storage(io::Error::other(format!(
                "{} is a directory",
                name
            ))));
        }

        match File::open(&path) {
            Ok(fd) => Ok(Box::new(fd)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(TransferError::NotFound(name.to_string()))
            }
            Err(e) => Err(TransferError::Storage(e)),
        }
    }

    fn open_for_write(&self, name: &str) -> Result<Sink, TransferError> {
        let target = self.path_of(name);
        if target.is_dir() {
            return Err(TransferError::Storage(io::Error::other(format!(
                "{} is a directory",
                name
            ))));
        }

        Ok(Box::new(StagedFile::new(&self.root, name, target)))
    }
}

static STAGED: AtomicU64 = AtomicU64::new(0);

/// Writes into a hidden file next to the target and renames it over the
/// target on flush. Dropped unflushed, it removes its own file only.
struct StagedFile {
    staging: PathBuf,
    target: PathBuf,
    file: Option<File>,
    committed: bool,
}

impl StagedFile {
    fn new(root: &Path, name: &str, target: PathBuf) -> Self {
        let n = STAGED.fetch_add(1, Ordering::Relaxed);
        StagedFile {
            staging: root.join(format!(".{}.{}.{}.part", name, process::id(), n)),
            target,
            file: None,
            committed: false,
        }
    }

    fn file(&mut self) -> io::Result<&mut File> {
        if self.committed {
            return Err(io::Error::other(format!(
                "{} was already stored",
                self.target.display()
            )));
        }

        let file = match self.file.take() {
            Some(file) => file,
            None => File::create(&self.staging)?,
        };
        Ok(self.file.insert(file))
    }
}

impl Write for StagedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.committed {
            return Ok(());
        }

        let file = self.file()?;
        file.flush()?;
        file.sync_all()?;
        self.file = None;

        fs::rename(&self.staging, &self.target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        self.file = None;
        match fs::remove_file(&self.staging) {
            Ok(()) => log::debug!("Dropped unfinished {}", self.staging.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Could not remove {}: {}", self.staging.display(), e),
        }
    }
}
