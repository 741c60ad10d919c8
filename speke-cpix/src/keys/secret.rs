use log::{debug, info};
use parking_lot::Mutex;
use rand::{Rng, distributions::Alphanumeric};
use std::{
    collections::HashMap,
    fs,
    io::{ErrorKind, Write},
    path::{Component, Path, PathBuf},
    sync::Arc,
};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Length of a generated per-content secret.
pub const SECRET_LENGTH: usize = 64;

#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("secret {0} not found")]
    NotFound(String),
    #[error("secret {0} already exists")]
    AlreadyExists(String),
    #[error("invalid secret name {0}")]
    InvalidName(String),
    #[error("secret {0} is corrupt")]
    Corrupt(String),
    #[error("{0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Durable secret storage.
///
/// `create` must be an atomic insert-if-absent: when another writer got there
/// first it fails with [`SecretStoreError::AlreadyExists`] and leaves the
/// stored value untouched.
pub trait SecretStore: Send + Sync {
    fn get(&self, name: &str) -> Result<String, SecretStoreError>;
    fn create(&self, name: &str, value: &str) -> Result<(), SecretStoreError>;
}

#[derive(Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.secrets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.lock().is_empty()
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, name: &str) -> Result<String, SecretStoreError> {
        self.secrets
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| SecretStoreError::NotFound(name.to_owned()))
    }

    fn create(&self, name: &str, value: &str) -> Result<(), SecretStoreError> {
        let mut secrets = self.secrets.lock();

        if secrets.contains_key(name) {
            return Err(SecretStoreError::AlreadyExists(name.to_owned()));
        }

        secrets.insert(name.to_owned(), value.to_owned());
        Ok(())
    }
}

/// One file per secret below a root directory.
pub struct FileSecretStore {
    root: PathBuf,
}

impl FileSecretStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, name: &str) -> Result<PathBuf, SecretStoreError> {
        safe_join(&self.root, name).ok_or_else(|| SecretStoreError::InvalidName(name.to_owned()))
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, name: &str) -> Result<String, SecretStoreError> {
        match fs::read_to_string(self.path(name)?) {
            Ok(x) => Ok(x.trim().to_owned()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(SecretStoreError::NotFound(name.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn create(&self, name: &str, value: &str) -> Result<(), SecretStoreError> {
        let path = self.path(name)?;
        let parent = path
            .parent()
            .ok_or_else(|| SecretStoreError::InvalidName(name.to_owned()))?;
        fs::create_dir_all(parent)?;

        // Readers only ever see a missing file or a complete one.
        let mut file = NamedTempFile::new_in(parent)?;
        file.write_all(value.as_bytes())?;
        file.as_file().sync_all()?;

        match file.persist_noclobber(&path) {
            Ok(_) => Ok(()),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                Err(SecretStoreError::AlreadyExists(name.to_owned()))
            }
            Err(e) => Err(e.error.into()),
        }
    }
}

/// Join a relative, slash separated name below `root`, refusing anything
/// that could escape it.
pub(crate) fn safe_join(root: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name);

    if name.is_empty()
        || !relative
            .components()
            .all(|x| matches!(x, Component::Normal(_)))
    {
        return None;
    }

    Some(root.join(relative))
}

/// Local cache in front of a [`SecretStore`].
///
/// The cache is never authoritative: it only remembers what the store
/// returned or accepted. Lookups for the same content id are serialized so a
/// process creates at most one secret per content id; creators in other
/// processes are arbitrated by the store.
pub struct SecretCache {
    store: Arc<dyn SecretStore>,
    entries: Mutex<HashMap<String, Arc<Mutex<Option<String>>>>>,
}

impl SecretCache {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Name under which the secret of `content_id` is stored.
    pub fn secret_name(content_id: &str) -> String {
        format!("speke/{}", content_id)
    }

    /// Secret for `content_id`, fetched or created on first use.
    pub fn secret(&self, content_id: &str) -> Result<String, SecretStoreError> {
        let handle = self
            .entries
            .lock()
            .entry(content_id.to_owned())
            .or_default()
            .clone();
        let mut entry = handle.lock();

        if let Some(secret) = entry.as_ref() {
            debug!("CACHED-SECRET {}", content_id);
            return Ok(secret.clone());
        }

        let name = Self::secret_name(content_id);
        let secret = match self.store.get(&name) {
            Ok(x) => {
                info!("RETRIEVE-SECRET {}", content_id);
                check_secret(&name, x)
            }
            Err(SecretStoreError::NotFound(_)) => self.create(content_id, &name),
            Err(e) => Err(e),
        };

        match secret {
            Ok(secret) => {
                *entry = Some(secret.clone());
                Ok(secret)
            }
            Err(e) => {
                drop(entry);
                self.forget_empty(content_id, &handle);
                Err(e)
            }
        }
    }

    /// Secret for `content_id` if one was ever created. Never creates one.
    pub fn lookup(&self, content_id: &str) -> Result<String, SecretStoreError> {
        let cached = self.entries.lock().get(content_id).cloned();

        if let Some(secret) = cached.and_then(|x| x.lock().clone()) {
            debug!("CACHED-SECRET {}", content_id);
            return Ok(secret);
        }

        let name = Self::secret_name(content_id);
        check_secret(&name, self.store.get(&name)?)
    }

    fn create(&self, content_id: &str, name: &str) -> Result<String, SecretStoreError> {
        let secret = generate_secret();

        match self.store.create(name, &secret) {
            Ok(()) => {
                info!("CREATE-SECRET {}", content_id);
                Ok(secret)
            }
            Err(SecretStoreError::AlreadyExists(_)) => {
                info!(
                    "CREATE-SECRET {} lost to a concurrent creator, using stored secret",
                    content_id
                );
                check_secret(name, self.store.get(name)?)
            }
            Err(e) => Err(e),
        }
    }

    /// Drop the entry of a failed lookup unless another caller is filling it.
    fn forget_empty(&self, content_id: &str, handle: &Arc<Mutex<Option<String>>>) {
        let mut entries = self.entries.lock();

        let unfilled = entries.get(content_id).is_some_and(|x| {
            Arc::ptr_eq(x, handle) && x.try_lock().is_some_and(|x| x.is_none())
        });

        if unfilled {
            entries.remove(content_id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Forget every cached secret. The store is not touched.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Stored secrets are exactly what [`generate_secret`] produces.
fn check_secret(name: &str, secret: String) -> Result<String, SecretStoreError> {
    if secret.len() == SECRET_LENGTH && secret.chars().all(|x| x.is_ascii_alphanumeric()) {
        Ok(secret)
    } else {
        Err(SecretStoreError::Corrupt(name.to_owned()))
    }
}

pub fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LENGTH)
        .map(char::from)
        .collect()
}
