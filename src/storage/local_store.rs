//! Replica bytes on the local filesystem.
//!
//! One flat directory; every stored name maps to one file inside it.
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::error;

use crate::error::{Result, SdfsError};
use crate::storage_error;

#[derive(Clone, Debug)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Use `root` as the storage directory, creating it if missing
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|e| {
            storage_error!("Cannot create storage directory {}: {}", root.display(), e)
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject names that would escape the storage directory
    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\', '\0']);
        if !valid {
            return Err(storage_error!("Invalid file name: {:?}", name));
        }
        Ok(self.root.join(name))
    }

    fn io_error(&self, name: &str, op: &str, err: std::io::Error) -> SdfsError {
        if err.kind() == std::io::ErrorKind::NotFound {
            return SdfsError::NotFound(name.to_string());
        }
        error!("Local {} of {} failed: {}", op, name, err);
        storage_error!("{} {}: {}", op, name, err)
    }

    pub async fn len(&self, name: &str) -> Result<u64> {
        let path = self.path_for(name)?;
        let metadata = fs::metadata(path)
            .await
            .map_err(|e| self.io_error(name, "stat", e))?;
        Ok(metadata.len())
    }

    /// The `index`-th chunk; short for the final chunk, empty past the end
    pub async fn read_chunk(&self, name: &str, index: u64, chunk_size: usize) -> Result<Vec<u8>> {
        let path = self.path_for(name)?;
        let mut file = fs::File::open(path)
            .await
            .map_err(|e| self.io_error(name, "open", e))?;
        let offset = index.saturating_mul(chunk_size as u64);
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| self.io_error(name, "seek", e))?;

        let mut buf = Vec::with_capacity(chunk_size);
        (&mut file)
            .take(chunk_size as u64)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| self.io_error(name, "read", e))?;
        Ok(buf)
    }

    /// Append bytes, creating the file on first write
    pub async fn append(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(name)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| self.io_error(name, "open", e))?;
        file.write_all(data)
            .await
            .map_err(|e| self.io_error(name, "write", e))?;
        file.flush()
            .await
            .map_err(|e| self.io_error(name, "flush", e))
    }

    /// Replace the whole file
    pub async fn write_all(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(name)?;
        fs::write(path, data)
            .await
            .map_err(|e| self.io_error(name, "write", e))
    }

    pub async fn read_all(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(name)?;
        fs::read(path)
            .await
            .map_err(|e| self.io_error(name, "read", e))
    }

    /// Remove the file; returns false when it was not there
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.io_error(name, "delete", e)),
        }
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.root)
            .await
            .map_err(|e| storage_error!("Cannot list {}: {}", self.root.display(), e))?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| storage_error!("Cannot list {}: {}", self.root.display(), e))?
        {
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}
