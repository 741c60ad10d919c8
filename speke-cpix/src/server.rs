use crate::{
    ClientKeyResponse, CpixResponseBuilder, Protocol, Response, ServerConfig,
    keys::{BlobStore, KeyDerivation, KeyStore, SecretCache, SecretStore},
};
use log::{info, warn};
use std::sync::Arc;

/// Entry point of a key server process.
///
/// Holds everything that lives longer than a single request, most notably the
/// secret cache shared by all requests of the process.
///
/// # Example
///
/// ```
/// use speke_cpix::{
///     KeyServer, ServerConfig,
///     keys::{MemoryBlobStore, MemorySecretStore},
/// };
/// use std::sync::Arc;
///
/// let config = ServerConfig::builder()
///     .keystore_url("https://keys.example.com/client")
///     .build()
///     .unwrap();
/// let server = KeyServer::new(
///     config,
///     Arc::new(MemorySecretStore::new()),
///     Arc::new(MemoryBlobStore::new()),
/// );
///
/// let response = server.handle(Some("2.0"), b"<not-cpix/>");
/// assert_eq!(response.status, 400);
/// ```
#[derive(Clone)]
pub struct KeyServer {
    config: Arc<ServerConfig>,
    derivation: KeyDerivation,
    key_store: KeyStore,
}

impl KeyServer {
    pub fn new(
        config: ServerConfig,
        secrets: Arc<dyn SecretStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let config = Arc::new(config);
        let key_store = KeyStore::new(&config, blobs);
        let derivation = KeyDerivation::new(config.clone(), Arc::new(SecretCache::new(secrets)));

        info!(
            "key server ready (derivation: {}, keystore: {})",
            config.derivation(),
            config.keystore_url()
        );

        Self {
            config,
            derivation,
            key_store,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Response builder for the protocol selected by an `X-Speke-Version`
    /// header value.
    pub fn builder(&self, version_header: Option<&str>) -> CpixResponseBuilder {
        CpixResponseBuilder::new(
            Protocol::from_header(version_header),
            self.config.clone(),
            self.derivation.clone(),
            self.key_store.clone(),
        )
    }

    /// Handle a CPIX request body. Never fails, errors become error responses.
    pub fn handle(&self, version_header: Option<&str>, body: &[u8]) -> Response {
        self.builder(version_header).handle(body)
    }

    /// Clear key lookup behind the key store URLs. Only keys of content ids
    /// seen by [`KeyServer::handle`] (or already in the secret store) are
    /// served.
    pub fn client_key(&self, content_id: &str, kid: &str) -> Response {
        ClientKeyResponse::new(&self.derivation)
            .respond(content_id, kid)
            .unwrap_or_else(|e| {
                warn!("client key request for {}/{} failed: {}", content_id, kid, e);
                Response::error(&e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{MemoryBlobStore, MemorySecretStore};
    use base64::Engine;

    const KID: &str = "6c5f5206-7d98-4808-84d8-94f132c1e9fe";

    fn server(secrets: Arc<MemorySecretStore>) -> KeyServer {
        KeyServer::new(
            ServerConfig::builder()
                .keystore_url("https://keys.example.com")
                .build()
                .unwrap(),
            secrets,
            Arc::new(MemoryBlobStore::new()),
        )
    }

    fn request() -> String {
        format!(
            r#"<cpix:CPIX contentId="content-1" version="2.3" xmlns:cpix="urn:dashif:org:cpix">
  <cpix:ContentKeyList><cpix:ContentKey kid="{KID}" commonEncryptionScheme="cenc"/></cpix:ContentKeyList>
  <cpix:DRMSystemList>
    <cpix:DRMSystem kid="{KID}" systemId="edef8ba9-79d6-4ace-a3c8-27dcd51d21ed">
      <cpix:PSSH/>
      <cpix:ContentProtectionData/>
    </cpix:DRMSystem>
  </cpix:DRMSystemList>
  <cpix:ContentKeyUsageRuleList>
    <cpix:ContentKeyUsageRule kid="{KID}" intendedTrackType="VIDEO"><cpix:VideoFilter/></cpix:ContentKeyUsageRule>
  </cpix:ContentKeyUsageRuleList>
</cpix:CPIX>"#
        )
    }

    #[test]
    fn test_builder_follows_version_header() {
        let server = server(Arc::new(MemorySecretStore::new()));
        assert_eq!(server.builder(Some("2.0")).protocol(), Protocol::V2);
        assert_eq!(server.builder(None).protocol(), Protocol::V1);
    }

    #[test]
    fn test_requests_share_secrets() {
        let secrets = Arc::new(MemorySecretStore::new());
        let server = server(secrets.clone());

        let first = server.handle(Some("2.0"), request().as_bytes());
        let second = server.handle(Some("2.0"), request().as_bytes());

        assert_eq!(first.status, 200);
        assert_eq!(first.header("X-Speke-Version"), Some("2.0"));
        assert_eq!(first.body, second.body);
        assert_eq!(secrets.len(), 1);
    }

    #[test]
    fn test_client_key_of_unknown_content() {
        let secrets = Arc::new(MemorySecretStore::new());
        let server = server(secrets.clone());

        for i in 0..5 {
            let response = server.client_key(&format!("never-issued-{}", i), KID);
            assert_eq!(response.status, 404);
            assert!(!response.is_base64_encoded);
        }
        assert!(secrets.is_empty());
    }

    #[test]
    fn test_client_key_matches_response() {
        let server = server(Arc::new(MemorySecretStore::new()));
        let response = server.handle(Some("2.0"), request().as_bytes());
        let key = server.client_key("content-1", KID);

        assert!(key.is_base64_encoded);
        let encoded = key.body_text();
        let plain = format!("<pskc:PlainValue>{}</pskc:PlainValue>", encoded);
        assert!(response.body_text().contains(&plain));
        assert_eq!(
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .unwrap()
                .len(),
            16
        );
    }
}
