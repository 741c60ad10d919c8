use super::secret::{SecretCache, SecretStoreError};
use crate::{Error, Result, ServerConfig};
use blake2::{Blake2b, digest::consts::U16};
use md5::{Digest, Md5};
use sha2::Sha256;
use std::{fmt, str::FromStr, sync::Arc};

pub const KEY_SIZE: usize = 16;
pub const PBKDF2_ITERATIONS: u32 = 5000;

const IV_SEED: &str = "too much tuna!";

/// How content keys are computed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum KeyDerivationMode {
    /// PBKDF2-HMAC-SHA256 with the content secret as salt and the kid as password.
    #[default]
    Pbkdf2,
    /// MD5 of secret and kid.
    Md5,
    /// 16 byte BLAKE2b of secret and kid.
    Blake2b,
    /// MD5 of a shared key string, content id and kid. No per-content secret.
    Legacy,
}

impl fmt::Display for KeyDerivationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                KeyDerivationMode::Pbkdf2 => "pbkdf2",
                KeyDerivationMode::Md5 => "md5",
                KeyDerivationMode::Blake2b => "blake2b",
                KeyDerivationMode::Legacy => "legacy",
            }
        )
    }
}

impl FromStr for KeyDerivationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "pbkdf2" => Self::Pbkdf2,
            "md5" => Self::Md5,
            "blake2b" => Self::Blake2b,
            "legacy" => Self::Legacy,
            x => {
                return Err(Error::InvalidConfig(format!(
                    "unknown key derivation mode {}",
                    x
                )));
            }
        })
    }
}

/// Reproducible content keys from per-content secrets.
#[derive(Clone)]
pub struct KeyDerivation {
    config: Arc<ServerConfig>,
    secrets: Arc<SecretCache>,
}

impl KeyDerivation {
    pub fn new(config: Arc<ServerConfig>, secrets: Arc<SecretCache>) -> Self {
        Self { config, secrets }
    }

    /// Key of `kid` within `content_id`, creating the content secret on first use.
    pub fn key(&self, content_id: &str, kid: &str) -> Result<[u8; KEY_SIZE]> {
        match self.config.derivation() {
            KeyDerivationMode::Legacy => self.legacy_key(content_id, kid),
            mode => {
                let secret = self.secrets.secret(content_id)?;
                Ok(derive(mode, &secret, kid))
            }
        }
    }

    /// Key of `kid` within `content_id` without ever creating a content secret.
    pub fn existing_key(&self, content_id: &str, kid: &str) -> Result<[u8; KEY_SIZE]> {
        match self.config.derivation() {
            KeyDerivationMode::Legacy => self.legacy_key(content_id, kid),
            mode => match self.secrets.lookup(content_id) {
                Ok(secret) => Ok(derive(mode, &secret, kid)),
                Err(SecretStoreError::NotFound(_)) => {
                    Err(Error::UnknownContent(content_id.to_owned()))
                }
                Err(e) => Err(e.into()),
            },
        }
    }

    fn legacy_key(&self, content_id: &str, kid: &str) -> Result<[u8; KEY_SIZE]> {
        let key_string = self.config.key_string().ok_or_else(|| {
            Error::InvalidConfig("legacy key derivation needs a key string".to_owned())
        })?;
        Ok(legacy_key(key_string, content_id, kid))
    }
}

/// Key of `kid` under `secret`. `Legacy` treats `secret` as the key string
/// with an empty content id.
pub fn derive(mode: KeyDerivationMode, secret: &str, kid: &str) -> [u8; KEY_SIZE] {
    match mode {
        KeyDerivationMode::Pbkdf2 => {
            let mut key = [0; KEY_SIZE];
            pbkdf2::pbkdf2_hmac::<Sha256>(
                kid.as_bytes(),
                secret.as_bytes(),
                PBKDF2_ITERATIONS,
                &mut key,
            );
            key
        }
        KeyDerivationMode::Md5 => md5_digest(&[secret, kid]),
        KeyDerivationMode::Blake2b => {
            let mut hasher = Blake2b::<U16>::new();
            hasher.update(secret.as_bytes());
            hasher.update(kid.as_bytes());
            hasher.finalize().into()
        }
        KeyDerivationMode::Legacy => legacy_key(secret, "", kid),
    }
}

pub fn legacy_key(key_string: &str, content_id: &str, kid: &str) -> [u8; KEY_SIZE] {
    md5_digest(&[key_string, content_id, kid])
}

/// IV for the HLS SAMPLE-AES key of `kid`.
pub fn explicit_iv(content_id: &str, kid: &str) -> [u8; KEY_SIZE] {
    md5_digest(&[IV_SEED, content_id, kid])
}

fn md5_digest(parts: &[&str]) -> [u8; KEY_SIZE] {
    let mut hasher = Md5::new();

    for part in parts {
        hasher.update(part.as_bytes());
    }

    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{MemorySecretStore, SecretStore};

    const SECRET: &str = "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ01";
    const KID_1: &str = "6c5f5206-7d98-4808-84d8-94f132c1e9fe";
    const KID_2: &str = "e2201617-57c2-4d9b-adc5-cd87b7c01944";

    #[test]
    fn test_pbkdf2_vectors() {
        assert_eq!(
            hex::encode(derive(KeyDerivationMode::Pbkdf2, SECRET, KID_1)),
            "3e00c9923ad86fb9f251c3dfddd2b23a"
        );
        assert_eq!(
            hex::encode(derive(KeyDerivationMode::Pbkdf2, SECRET, KID_2)),
            "d7c81a31a76d06b1a338be8eed9217cb"
        );
    }

    #[test]
    fn test_digest_vectors() {
        assert_eq!(
            hex::encode(derive(KeyDerivationMode::Md5, SECRET, KID_1)),
            "7c590e96633b455b5e83c2224e81100d"
        );
        assert_eq!(
            hex::encode(derive(KeyDerivationMode::Blake2b, SECRET, KID_1)),
            "46c197c57fa9705822bd03cd1d4d6f25"
        );
        assert_eq!(
            hex::encode(derive(KeyDerivationMode::Blake2b, SECRET, KID_2)),
            "2a0185ff3c75f985cda9f2af5e4c79bb"
        );
    }

    #[test]
    fn test_keys_differ_per_kid() {
        for mode in [
            KeyDerivationMode::Pbkdf2,
            KeyDerivationMode::Md5,
            KeyDerivationMode::Blake2b,
            KeyDerivationMode::Legacy,
        ] {
            assert_eq!(derive(mode, SECRET, KID_1), derive(mode, SECRET, KID_1));
            assert_ne!(derive(mode, SECRET, KID_1), derive(mode, SECRET, KID_2));
        }
    }

    #[test]
    fn test_explicit_iv() {
        assert_eq!(
            hex::encode(explicit_iv("content-1", KID_1)),
            "defb9bbff4f8fd3e6d2002e568c34068"
        );
    }

    #[test]
    fn test_key_uses_cached_secret() {
        let config = Arc::new(
            ServerConfig::builder()
                .keystore_url("https://keys.example.com")
                .build()
                .unwrap(),
        );
        let store = Arc::new(MemorySecretStore::new());
        let derivation = KeyDerivation::new(config, Arc::new(SecretCache::new(store.clone())));

        let key = derivation.key("content-1", KID_1).unwrap();
        assert_eq!(derivation.key("content-1", KID_1).unwrap(), key);
        assert_eq!(store.len(), 1);

        let secret = store.get("speke/content-1").unwrap();
        assert_eq!(key, derive(KeyDerivationMode::Pbkdf2, &secret, KID_1));
    }

    #[test]
    fn test_existing_key_never_creates_secrets() {
        let config = Arc::new(
            ServerConfig::builder()
                .keystore_url("https://keys.example.com")
                .build()
                .unwrap(),
        );
        let store = Arc::new(MemorySecretStore::new());
        let derivation = KeyDerivation::new(config, Arc::new(SecretCache::new(store.clone())));

        for _ in 0..5 {
            assert!(matches!(
                derivation.existing_key("never-issued", KID_1),
                Err(Error::UnknownContent(_))
            ));
        }
        assert!(store.is_empty());

        let key = derivation.key("content-1", KID_1).unwrap();
        assert_eq!(derivation.existing_key("content-1", KID_1).unwrap(), key);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_legacy_key_skips_secrets() {
        let config = Arc::new(
            ServerConfig::builder()
                .keystore_url("https://keys.example.com")
                .derivation(KeyDerivationMode::Legacy)
                .key_string("shared")
                .build()
                .unwrap(),
        );
        let store = Arc::new(MemorySecretStore::new());
        let derivation = KeyDerivation::new(config, Arc::new(SecretCache::new(store.clone())));

        assert_eq!(
            derivation.key("content-1", KID_1).unwrap(),
            legacy_key("shared", "content-1", KID_1)
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!(
            "BLAKE2B".parse::<KeyDerivationMode>().unwrap(),
            KeyDerivationMode::Blake2b
        );
        assert!("sha1".parse::<KeyDerivationMode>().is_err());
    }
}
