#![cfg_attr(docsrs, feature(doc_cfg))]

//! This crate turns CPIX key requests sent by SPEKE v1 and v2 encoders into
//! CPIX responses carrying content keys and DRM signaling.
//!
//! Content keys are never generated randomly. They are derived from a
//! per-content secret held in a [`keys::SecretStore`] and the key id, so the
//! same `(content id, kid)` pair always yields the same key. Derived keys are
//! also written to a [`keys::BlobStore`] for clear key delivery.
//!
//! Supported DRM systems:
//!
//! - **Widevine**: `PSSH` and DASH content protection data.
//! - **PlayReady**: `PSSH`, protection header and content protection data.
//! - **FairPlay**: HLS signaling with `skd://` URIs and explicit IVs.
//! - **HLS AES-128**: key URIs only, SPEKE v1.
//! - **Clear Key AES-128** and **Common PSSH**: SPEKE v2.
//!
//! # Example
//!
//! ```
//! use speke_cpix::{
//!     KeyServer, ServerConfig,
//!     keys::{MemoryBlobStore, MemorySecretStore},
//! };
//! use std::sync::Arc;
//!
//! let server = KeyServer::new(
//!     ServerConfig::builder()
//!         .keystore_url("https://keys.example.com/client")
//!         .build()
//!         .unwrap(),
//!     Arc::new(MemorySecretStore::new()),
//!     Arc::new(MemoryBlobStore::new()),
//! );
//!
//! let request = br#"<cpix:CPIX id="movie" xmlns:cpix="urn:dashif:org:cpix">
//!   <cpix:ContentKeyList>
//!     <cpix:ContentKey kid="6c5f5206-7d98-4808-84d8-94f132c1e9fe"/>
//!   </cpix:ContentKeyList>
//! </cpix:CPIX>"#;
//!
//! let response = server.handle(None, request);
//! assert_eq!(response.status, 200);
//! assert!(response.body_text().contains("PlainValue"));
//! ```

mod builder;
mod config;
mod envelope;
mod error;
mod fixup;
mod protocol;
mod reader;
mod response;
mod server;
mod system;

pub mod cpix;
pub mod keys;
pub mod pssh;
pub mod xml;

pub use builder::CpixResponseBuilder;
pub use config::{HlsSignaling, ServerConfig, ServerConfigBuilder};
pub use cpix::CpixDocument;
pub use envelope::{DOCUMENT_KEY_SIZE, EnvelopeEncryptor, HMAC_KEY_SIZE};
pub use error::Error;
pub use fixup::Field;
pub use protocol::{Protocol, SpekeVersion};
pub use pssh::PsshBox;
pub use response::{ClientKeyResponse, Response};
pub use server::KeyServer;
pub use system::DrmSystem;

/// A `Result` alias where the `Err` case is `speke_cpix::Error`.
pub type Result<T> = std::result::Result<T, Error>;
