//! Error types for CPIX request processing.

use crate::keys::{BlobStoreError, SecretStoreError};
use thiserror::Error;

/// Errors that can occur while building a CPIX response.
#[derive(Debug, Error)]
pub enum Error {
    /// Request is not well-formed XML or lacks a required element or attribute.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// A `DRMSystem` carries a system id with no registered profile.
    #[error("invalid systemId {0}")]
    UnsupportedSystemId(String),

    /// Secret store failed with something other than "not found".
    #[error("secret store failure: {0}")]
    SecretStore(#[from] SecretStoreError),

    /// Clear key requested for a content id no CPIX request ever issued.
    #[error("no keys were issued for content {0}")]
    UnknownContent(String),

    /// A MAC was requested before the envelope HMAC key was initialized.
    #[error("HMAC key is not initialized, cannot compute value MAC")]
    MissingHmacKey,

    /// Key store write failed.
    #[error("cannot store key {path}: {source}")]
    StorageWrite {
        path: String,
        #[source]
        source: BlobStoreError,
    },

    /// Key id is not a canonical UUID.
    #[error("invalid key id '{0}': expected a UUID")]
    InvalidKeyId(String),

    /// Recipient certificate could not be decoded or carries no RSA key.
    #[error("invalid delivery certificate: {0}")]
    Certificate(String),

    /// Symmetric or asymmetric primitive failed.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// Server configuration rejected at build time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Response document could not be written.
    #[error("cannot serialize response: {0}")]
    Serialize(String),

    /// Base64 text in a request or configuration value.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl Error {
    /// HTTP status class the transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::MalformedRequest(_)
            | Error::InvalidKeyId(_)
            | Error::Certificate(_)
            | Error::Base64(_) => 400,
            Error::UnknownContent(_) => 404,
            _ => 500,
        }
    }

    /// Returns true if the error was caused by the client's request.
    pub fn is_client_err(&self) -> bool {
        self.status_code() < 500
    }
}
