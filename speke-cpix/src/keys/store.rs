use super::secret::safe_join;
use crate::{Error, Result, ServerConfig};
use parking_lot::Mutex;
use std::{collections::HashMap, fs, path::PathBuf, sync::Arc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("invalid object key {0}")]
    InvalidKey(String),
    #[error("{0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Write-only durable blob storage.
pub trait BlobStore: Send + Sync {
    /// Upsert `bytes` under `key`, a slash separated object path.
    fn put(&self, key: &str, bytes: &[u8]) -> std::result::Result<(), BlobStoreError>;
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys = self.blobs.lock().keys().cloned().collect::<Vec<_>>();
        keys.sort();
        keys
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> std::result::Result<(), BlobStoreError> {
        self.blobs.lock().insert(key.to_owned(), bytes.to_vec());
        Ok(())
    }
}

/// Objects stored as files in a directory tree.
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }
}

impl BlobStore for FileBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> std::result::Result<(), BlobStoreError> {
        let path =
            safe_join(&self.root, key).ok_or_else(|| BlobStoreError::InvalidKey(key.to_owned()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, bytes)?;
        Ok(())
    }
}

/// Durable `(content id, kid) -> key` mapping used for clear key delivery.
#[derive(Clone)]
pub struct KeyStore {
    url_prefix: String,
    blobs: Arc<dyn BlobStore>,
}

impl KeyStore {
    pub fn new(config: &ServerConfig, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            url_prefix: config.keystore_url().trim_end_matches('/').to_owned(),
            blobs,
        }
    }

    pub fn object_key(content_id: &str, kid: &str) -> String {
        format!("{}/{}", content_id, kid)
    }

    pub fn store(&self, content_id: &str, kid: &str, key: &[u8]) -> Result<()> {
        let path = Self::object_key(content_id, kid);
        self.blobs
            .put(&path, key)
            .map_err(|source| Error::StorageWrite { path, source })
    }

    /// Retrieval URL of a key. Does not check that the object exists.
    pub fn url(&self, content_id: &str, kid: &str) -> String {
        format!("{}/{}", self.url_prefix, Self::object_key(content_id, kid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig::builder()
            .keystore_url("https://keys.example.com/client/")
            .build()
            .unwrap()
    }

    #[test]
    fn test_url_is_pure() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let store = KeyStore::new(&config(), blobs.clone());

        assert_eq!(
            store.url("content-1", "6c5f5206-7d98-4808-84d8-94f132c1e9fe"),
            "https://keys.example.com/client/content-1/6c5f5206-7d98-4808-84d8-94f132c1e9fe"
        );
        assert!(blobs.keys().is_empty());
    }

    #[test]
    fn test_store_overwrites() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let store = KeyStore::new(&config(), blobs.clone());

        store.store("content-1", "kid", &[1; 16]).unwrap();
        store.store("content-1", "kid", &[2; 16]).unwrap();

        assert_eq!(blobs.keys(), vec!["content-1/kid"]);
        assert_eq!(blobs.get("content-1/kid"), Some(vec![2; 16]));
    }

    #[test]
    fn test_file_store_writes_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(&config(), Arc::new(FileBlobStore::new(dir.path())));

        store.store("content-1", "kid", &[7; 16]).unwrap();
        assert_eq!(
            fs::read(dir.path().join("content-1").join("kid")).unwrap(),
            vec![7; 16]
        );
    }

    #[test]
    fn test_store_failure_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(&config(), Arc::new(FileBlobStore::new(dir.path())));

        match store.store("..", "kid", &[0; 16]) {
            Err(Error::StorageWrite { path, source }) => {
                assert_eq!(path, "../kid");
                assert!(matches!(source, BlobStoreError::InvalidKey(_)));
            }
            _ => panic!("expected a storage error"),
        }
    }
}
