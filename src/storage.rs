//! Root-confined file access.
//!
//! Every path a peer names is resolved against one root directory and must
//! stay inside it. Confinement is lexical: the requested name may not be
//! absolute and may not contain a parent component, so the joined path can
//! never escape even when the target does not exist yet.

use std::path::{Component, Path, PathBuf};

use tokio::fs::{File, OpenOptions};

use crate::error::{Error, Result};

/// File access bound to one root directory.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Creates the root directory if it does not exist yet.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a peer-supplied name inside the root, or refuse it.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let path = Path::new(name);
        if name.is_empty() || path.is_absolute() {
            return Err(Error::OutsideRoot { name: name.into() });
        }
        for component in path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(Error::OutsideRoot { name: name.into() }),
            }
        }
        Ok(self.root.join(path))
    }

    /// Open an existing plain file for reading; returns the handle and its
    /// size in bytes.
    pub async fn open_read(&self, name: &str) -> Result<(File, u64)> {
        let path = self.resolve(name)?;
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(_) => return Err(Error::NotFound { name: name.into() }),
        };
        if !metadata.is_file() {
            return Err(Error::NotFound { name: name.into() });
        }
        let file = File::open(&path).await?;
        Ok((file, metadata.len()))
    }

    /// Create a file that must not exist yet (passive write side).
    pub async fn create_new(&self, name: &str) -> Result<File> {
        let path = self.resolve(name)?;
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::FileExists { name: name.into() })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create or truncate a file (active download side overwrites).
    pub async fn create_truncate(&self, name: &str) -> Result<File> {
        let path = self.resolve(name)?;
        Ok(File::create(&path).await?)
    }

    pub async fn exists(&self, name: &str) -> bool {
        match self.resolve(name) {
            Ok(path) => tokio::fs::metadata(path).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Discard a partially written file. Best effort; the abort that led
    /// here is the error worth reporting.
    pub async fn remove(&self, name: &str) {
        if let Ok(path) = self.resolve(name) {
            let _ = tokio::fs::remove_file(path).await;
        }
    }
}

/// Fill `buf` from the file, tolerating short reads; only EOF ends a block
/// early. A short mid-file read must never masquerade as the final block.
pub async fn read_block(file: &mut File, buf: &mut [u8]) -> Result<usize> {
    use tokio::io::AsyncReadExt;

    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
