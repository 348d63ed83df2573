//! src/services/blob_store.rs
//!
//! Blob storage for uploaded payloads. The `BlobStore` trait is what the
//! lifecycle engine and reclaimer depend on; `FsBlobStore` is the on-disk
//! implementation, sharded beneath `root/{shard}/{shard}/{name}`.
//!
//! Names are a single path component. Anything that could escape the root
//! (separators, `..`, control bytes) is rejected before a path is built.

use async_trait::async_trait;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncRead, AsyncWriteExt},
};
use tracing::debug;

const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid blob name")]
    InvalidName,
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error("blob `{0}` already exists")]
    AlreadyExists(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// An opened blob ready to be streamed out.
pub struct BlobReader {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub len: u64,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write a new blob. Never replaces an existing one.
    async fn put(&self, name: &str, bytes: &[u8]) -> BlobResult<()>;

    async fn exists(&self, name: &str) -> BlobResult<bool>;

    /// Open a blob for reading. `NotFound` if absent.
    async fn open(&self, name: &str) -> BlobResult<BlobReader>;

    /// Remove a blob. `NotFound` if it was already gone, which callers
    /// performing cleanup treat as success.
    async fn delete(&self, name: &str) -> BlobResult<()>;
}

/// Local-disk blob store.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject names that are not exactly one plain path component.
    fn ensure_name_safe(name: &str) -> BlobResult<()> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(BlobError::InvalidName);
        }
        if name == "." || name.starts_with('.') || name.contains("..") {
            return Err(BlobError::InvalidName);
        }
        if name
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'/' || b == b'\\' || b == b':')
        {
            return Err(BlobError::InvalidName);
        }
        Ok(())
    }

    /// Two-level shard directories from MD5(name), as lowercase hex bytes.
    fn shards(name: &str) -> (String, String) {
        let digest = md5::compute(name);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Resolve a validated name to its payload path under the root.
    fn blob_path(&self, name: &str) -> BlobResult<PathBuf> {
        Self::ensure_name_safe(name)?;
        let (shard_a, shard_b) = Self::shards(name);
        let mut path = self.root.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(name);
        debug_assert!(path.starts_with(&self.root));
        Ok(path)
    }

    /// Remove empty shard directories, walking up until `root`.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, name: &str, bytes: &[u8]) -> BlobResult<()> {
        let path = self.blob_path(name)?;
        let parent = path.parent().map(Path::to_path_buf).ok_or_else(|| {
            BlobError::Io(io::Error::new(
                ErrorKind::Other,
                "blob path missing parent directory",
            ))
        })?;

        // A concurrent delete may prune the shard directory between creating
        // it and opening the file, so recreate it once on NotFound.
        let mut retried = false;
        let mut file = loop {
            fs::create_dir_all(&parent).await?;
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => break file,
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    return Err(BlobError::AlreadyExists(name.to_string()));
                }
                Err(err) if err.kind() == ErrorKind::NotFound && !retried => retried = true,
                Err(err) => return Err(BlobError::Io(err)),
            }
        };

        let written = async {
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;

        if let Err(err) = written {
            drop(file);
            let _ = fs::remove_file(&path).await;
            return Err(BlobError::Io(err));
        }

        debug!("stored blob {} ({} bytes)", name, bytes.len());
        Ok(())
    }

    async fn exists(&self, name: &str) -> BlobResult<bool> {
        let path = match self.blob_path(name) {
            Ok(path) => path,
            Err(BlobError::InvalidName) => return Ok(false),
            Err(err) => return Err(err),
        };
        Ok(fs::try_exists(&path).await?)
    }

    async fn open(&self, name: &str) -> BlobResult<BlobReader> {
        let path = self.blob_path(name)?;
        let file = File::open(&path).await.map_err(|err| match err.kind() {
            ErrorKind::NotFound => BlobError::NotFound(name.to_string()),
            _ => BlobError::Io(err),
        })?;
        let len = file.metadata().await?.len();
        Ok(BlobReader {
            reader: Box::new(file),
            len,
        })
    }

    async fn delete(&self, name: &str) -> BlobResult<()> {
        let path = self.blob_path(name)?;
        match fs::remove_file(&path).await {
            Ok(_) => debug!("removed blob {}", name),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(BlobError::NotFound(name.to_string()));
            }
            Err(err) => return Err(BlobError::Io(err)),
        }

        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn store() -> (TempDir, FsBlobStore) {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn put_open_delete_cycle() {
        let (_dir, store) = store();
        store.put("a1b2c3d4.txt", b"hello").await.unwrap();
        assert!(store.exists("a1b2c3d4.txt").await.unwrap());

        let mut blob = store.open("a1b2c3d4.txt").await.unwrap();
        assert_eq!(blob.len, 5);
        let mut body = Vec::new();
        blob.reader.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"hello");
        drop(blob);

        store.delete("a1b2c3d4.txt").await.unwrap();
        assert!(!store.exists("a1b2c3d4.txt").await.unwrap());
    }

    #[tokio::test]
    async fn delete_missing_is_distinguishable() {
        let (_dir, store) = store();
        let err = store.delete("nothing-here").await.unwrap_err();
        assert!(matches!(err, BlobError::NotFound(name) if name == "nothing-here"));
    }

    #[tokio::test]
    async fn put_never_overwrites() {
        let (_dir, store) = store();
        store.put("dup", b"first").await.unwrap();
        let err = store.put("dup", b"second").await.unwrap_err();
        assert!(matches!(err, BlobError::AlreadyExists(_)));

        let mut blob = store.open("dup").await.unwrap();
        let mut body = Vec::new();
        blob.reader.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"first");
    }

    #[tokio::test]
    async fn delete_prunes_shard_directories() {
        let (dir, store) = store();
        store.put("lonely.bin", b"x").await.unwrap();
        store.delete("lonely.bin").await.unwrap();

        let mut entries = std::fs::read_dir(dir.path()).unwrap();
        assert!(entries.next().is_none(), "shard dirs should be pruned");
        assert!(dir.path().exists(), "root must survive pruning");
    }

    #[tokio::test]
    async fn traversal_names_are_rejected() {
        let (dir, store) = store();
        let crafted = [
            "",
            ".",
            "..",
            "../escape",
            "../../etc/passwd",
            "a/b",
            "a\\b",
            "/abs",
            "C:evil",
            ".hidden",
            "x..y",
            "nul\0byte",
            "line\nbreak",
        ];
        for name in crafted {
            assert!(
                matches!(store.put(name, b"x").await, Err(BlobError::InvalidName)),
                "{name:?} should be rejected"
            );
            assert!(matches!(store.delete(name).await, Err(BlobError::InvalidName)));
            assert!(matches!(store.open(name).await, Err(BlobError::InvalidName)));
            assert!(!store.exists(name).await.unwrap());
        }
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn resolved_paths_stay_under_root() {
        let store = FsBlobStore::new("/srv/uploads");
        for name in ["a1b2c3d4", "a1b2c3d4.png", "6f1e-77aa.tar"] {
            let path = store.blob_path(name).unwrap();
            assert!(path.starts_with("/srv/uploads"));
            assert_eq!(path.components().count(), Path::new("/srv/uploads").components().count() + 3);
            assert_eq!(path.file_name().unwrap(), name);
        }
    }
}
