//! Local asset storage, keyed by asset name.

use async_trait::async_trait;
use bytes::Bytes;
use campaign_core::digest::sha1_hex;
use campaign_core::CampaignError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[async_trait]
pub trait AssetStorage: Send + Sync {
    async fn exists(&self, name: &str) -> bool;

    async fn save(&self, name: &str, bytes: &[u8]) -> anyhow::Result<()>;

    /// Content digest used to verify downloads. Must agree with the digests
    /// the campaign server publishes.
    fn digest(&self, bytes: &[u8]) -> String {
        sha1_hex(bytes)
    }
}

/// Stores each asset as a file under a cache directory.
#[derive(Debug, Clone)]
pub struct FsAssetStorage {
    root: PathBuf,
}

impl FsAssetStorage {
    /// Opens (and creates if needed) the cache directory.
    pub async fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Asset names are flat file names; anything that could escape the
    /// cache directory is refused.
    fn path_for(&self, name: &str) -> Result<PathBuf, CampaignError> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(CampaignError::Storage(format!("invalid asset name {name:?}")));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl AssetStorage for FsAssetStorage {
    async fn exists(&self, name: &str) -> bool {
        match self.path_for(name) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn save(&self, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let path = self.path_for(name)?;
        // Write then rename so a partial file never shows up as present.
        let tmp = self.root.join(format!(".{name}.part"));
        let written = match tokio::fs::write(&tmp, bytes).await {
            Ok(()) => tokio::fs::rename(&tmp, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                debug!(path = %tmp.display(), error = %cleanup, "Could not remove partial asset");
            }
            return Err(e.into());
        }
        debug!(path = %path.display(), size = bytes.len(), "Asset saved");
        Ok(())
    }
}

/// Keeps assets in memory. Useful for hosts without a writable cache and
/// for tests.
#[derive(Default)]
pub struct MemoryAssetStorage {
    files: Mutex<HashMap<String, Bytes>>,
}

impl MemoryAssetStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, bytes: impl Into<Bytes>) {
        self.files.lock().insert(name.into(), bytes.into());
    }

    pub fn get(&self, name: &str) -> Option<Bytes> {
        self.files.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }
}

#[async_trait]
impl AssetStorage for MemoryAssetStorage {
    async fn exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    async fn save(&self, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
        self.files
            .lock()
            .insert(name.to_string(), Bytes::copy_from_slice(bytes));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_storage_save_and_exists() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsAssetStorage::open(dir.path().join("cache")).await.unwrap();

        assert!(!storage.exists("abc").await);
        storage.save("abc", b"hello").await.unwrap();
        assert!(storage.exists("abc").await);
        let saved = tokio::fs::read(storage.root().join("abc")).await.unwrap();
        assert_eq!(saved, b"hello");
        assert!(!storage.root().join(".abc.part").exists());
    }

    #[tokio::test]
    async fn test_fs_storage_rejects_path_names() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsAssetStorage::open(dir.path()).await.unwrap();

        assert!(storage.save("../escape", b"x").await.is_err());
        assert!(storage.save("a/b", b"x").await.is_err());
        assert!(storage.save("", b"x").await.is_err());
        assert!(!storage.exists("..").await);
    }

    #[tokio::test]
    async fn test_failed_rename_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsAssetStorage::open(dir.path()).await.unwrap();
        // A non-empty directory in the way makes the rename fail.
        tokio::fs::create_dir_all(dir.path().join("blocked/inner"))
            .await
            .unwrap();

        assert!(storage.save("blocked", b"data").await.is_err());
        assert!(!dir.path().join(".blocked.part").exists());
    }

    #[tokio::test]
    async fn test_memory_storage_and_digest() {
        let storage = MemoryAssetStorage::new();
        assert!(storage.is_empty());
        storage.save("n", b"abc").await.unwrap();
        assert!(storage.exists("n").await);
        assert_eq!(storage.get("n").unwrap().as_ref(), b"abc");
        assert_eq!(
            storage.digest(b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }
}
