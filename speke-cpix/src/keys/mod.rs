//! Content key derivation, per-content secrets and the key store.

mod derive;
mod secret;
mod store;

pub use derive::{
    KEY_SIZE, KeyDerivation, KeyDerivationMode, PBKDF2_ITERATIONS, derive, explicit_iv, legacy_key,
};
pub use secret::{
    FileSecretStore, MemorySecretStore, SECRET_LENGTH, SecretCache, SecretStore, SecretStoreError,
    generate_secret,
};
pub use store::{BlobStore, BlobStoreError, FileBlobStore, KeyStore, MemoryBlobStore};
