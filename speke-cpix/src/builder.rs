use crate::{
    CpixDocument, DrmSystem, Error, Protocol, Response, Result, ServerConfig,
    cpix::{CPIX, PSKC},
    envelope::EnvelopeEncryptor,
    fixup::FixupContext,
    keys::{KeyDerivation, KeyStore, explicit_iv},
    pssh::parse_kid,
    xml::Element,
};
use base64::Engine;
use log::{debug, info, warn};
use std::{collections::HashMap, sync::Arc};

/// Turns a CPIX request into a CPIX response in a single pass.
///
/// DRM systems are fixed up before content keys are filled, so keys can be
/// matched against the systems using them. When the request names delivery
/// recipients the envelope keys are wrapped first and every content key is
/// encrypted, otherwise keys are returned in the clear.
#[derive(Clone)]
pub struct CpixResponseBuilder {
    protocol: Protocol,
    config: Arc<ServerConfig>,
    derivation: KeyDerivation,
    key_store: KeyStore,
}

impl CpixResponseBuilder {
    pub fn new(
        protocol: Protocol,
        config: Arc<ServerConfig>,
        derivation: KeyDerivation,
        key_store: KeyStore,
    ) -> Self {
        Self {
            protocol,
            config,
            derivation,
            key_store,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Like [`Self::respond`], with errors turned into error responses.
    pub fn handle(&self, request: &[u8]) -> Response {
        self.respond(request).unwrap_or_else(|e| {
            warn!("SPEKE {} request failed: {}", self.protocol.version(), e);
            Response::error(&e)
        })
    }

    pub fn respond(&self, request: &[u8]) -> Result<Response> {
        let mut document = CpixDocument::parse(request)?;
        self.protocol.validate(&document)?;
        let content_id = document.content_id(self.protocol.content_id_attribute())?;
        debug!(
            "SPEKE {} request for content id {}",
            self.protocol.version(),
            content_id
        );

        let envelope = if document.has_delivery_data() {
            let envelope = EnvelopeEncryptor::generate();

            for delivery_data in document.delivery_data_mut() {
                envelope.wrap_for_recipient(delivery_data)?;
            }

            Some(envelope)
        } else {
            None
        };

        let systems = self.fixup_systems(&mut document, &content_id)?;
        self.fill_content_keys(&mut document, &content_id, &systems, envelope.as_ref())?;

        info!(
            "SPEKE {} response for content id {} ({} keys{})",
            self.protocol.version(),
            content_id,
            document.content_keys().count(),
            if envelope.is_some() { ", encrypted" } else { "" }
        );

        Ok(Response {
            status: 200,
            headers: self.protocol.headers(self.config.user_agent()),
            body: document.to_xml()?,
            is_base64_encoded: false,
        })
    }

    /// Fix up every `DRMSystem`, returning the systems each kid is used by.
    fn fixup_systems(
        &self,
        document: &mut CpixDocument,
        content_id: &str,
    ) -> Result<HashMap<String, Vec<DrmSystem>>> {
        let mut systems: HashMap<String, Vec<DrmSystem>> = HashMap::new();

        for node in document.drm_systems_mut() {
            let system_id = node.attr("systemId").unwrap_or_default().to_owned();
            let system = DrmSystem::from_system_id(&system_id)
                .ok_or_else(|| Error::UnsupportedSystemId(system_id.clone()))?;
            let kid = node.attr("kid").map(str::to_owned).ok_or_else(|| {
                Error::MalformedRequest("DRMSystem has no kid attribute".to_owned())
            })?;

            let context = FixupContext {
                config: &self.config,
                kid: parse_kid(&kid)?,
                key_url: self.key_store.url(content_id, &kid),
            };
            self.protocol.fixup(system, node, &context)?;
            debug!("fixed up {} for kid {}", system, kid);

            systems
                .entry(kid.to_ascii_lowercase())
                .or_default()
                .push(system);
        }

        Ok(systems)
    }

    fn fill_content_keys(
        &self,
        document: &mut CpixDocument,
        content_id: &str,
        systems: &HashMap<String, Vec<DrmSystem>>,
        envelope: Option<&EnvelopeEncryptor>,
    ) -> Result<()> {
        for content_key in document.content_keys_mut() {
            let kid = content_key.attr("kid").map(str::to_owned).ok_or_else(|| {
                Error::MalformedRequest("ContentKey has no kid attribute".to_owned())
            })?;

            let key = self.derivation.key(content_id, &kid)?;
            self.store(content_id, &kid, &key)?;

            let sample_aes = systems
                .get(&kid.to_ascii_lowercase())
                .is_some_and(|x| x.contains(&DrmSystem::FairPlay));

            if sample_aes && content_key.attr("explicitIV").is_none() {
                content_key.set_attr("explicitIV", encode(explicit_iv(content_id, &kid)));
            }

            let secret = match envelope {
                Some(envelope) => envelope.encrypt_content_key(&key)?,
                None => Element::new(PSKC, "Secret")
                    .with_child(Element::new(PSKC, "PlainValue").with_text(encode(key))),
            };

            content_key.remove_all(CPIX, "Data");
            content_key.push(Element::new(CPIX, "Data").with_child(secret));
        }

        Ok(())
    }

    fn store(&self, content_id: &str, kid: &str, key: &[u8]) -> Result<()> {
        match self.key_store.store(content_id, kid, key) {
            Ok(()) => Ok(()),
            Err(e) if self.config.abort_on_store_failure() => Err(e),
            Err(e) => {
                warn!("{}", e);
                Ok(())
            }
        }
    }
}

fn encode<T: AsRef<[u8]>>(data: T) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{
        BlobStore, BlobStoreError, MemoryBlobStore, MemorySecretStore, SecretCache,
    };

    const KID: &str = "6c5f5206-7d98-4808-84d8-94f132c1e9fe";

    struct FailingBlobStore;

    impl BlobStore for FailingBlobStore {
        fn put(&self, _: &str, _: &[u8]) -> std::result::Result<(), BlobStoreError> {
            Err(BlobStoreError::Backend("bucket is gone".to_owned()))
        }
    }

    fn builder(abort_on_store_failure: bool, blobs: Arc<dyn BlobStore>) -> CpixResponseBuilder {
        let config = Arc::new(
            ServerConfig::builder()
                .keystore_url("https://keys.example.com")
                .abort_on_store_failure(abort_on_store_failure)
                .build()
                .unwrap(),
        );
        let derivation = KeyDerivation::new(
            config.clone(),
            Arc::new(SecretCache::new(Arc::new(MemorySecretStore::new()))),
        );
        let key_store = KeyStore::new(&config, blobs);
        CpixResponseBuilder::new(Protocol::V1, config, derivation, key_store)
    }

    fn request(system_id: &str) -> String {
        format!(
            r#"<cpix:CPIX id="content-1" xmlns:cpix="urn:dashif:org:cpix" xmlns:pskc="urn:ietf:params:xml:ns:keyprov:pskc" xmlns:speke="urn:aws:amazon:com:speke">
  <cpix:ContentKeyList><cpix:ContentKey kid="{KID}"/></cpix:ContentKeyList>
  <cpix:DRMSystemList>
    <cpix:DRMSystem kid="{KID}" systemId="{system_id}">
      <cpix:ContentProtectionData/>
      <speke:KeyFormat/>
      <speke:KeyFormatVersions/>
      <speke:ProtectionHeader/>
      <cpix:PSSH/>
      <cpix:URIExtXKey/>
    </cpix:DRMSystem>
  </cpix:DRMSystemList>
</cpix:CPIX>"#
        )
    }

    #[test]
    fn test_sample_aes_key_gets_explicit_iv() {
        let builder = builder(false, Arc::new(MemoryBlobStore::new()));
        let response = builder
            .respond(request(DrmSystem::FairPlay.system_id()).as_bytes())
            .unwrap();
        let document = CpixDocument::parse(&response.body).unwrap();
        let key = document.content_keys().next().unwrap();

        assert_eq!(
            key.attr("explicitIV"),
            Some(encode(explicit_iv("content-1", KID)).as_str())
        );
    }

    #[test]
    fn test_other_keys_get_no_explicit_iv() {
        let builder = builder(false, Arc::new(MemoryBlobStore::new()));
        let response = builder
            .respond(request(DrmSystem::HlsAes128.system_id()).as_bytes())
            .unwrap();
        let document = CpixDocument::parse(&response.body).unwrap();

        assert_eq!(
            document.content_keys().next().unwrap().attr("explicitIV"),
            None
        );
    }

    #[test]
    fn test_store_failure_is_logged_by_default() {
        let builder = builder(false, Arc::new(FailingBlobStore));
        let response = builder
            .respond(request(DrmSystem::Widevine.system_id()).as_bytes())
            .unwrap();
        assert_eq!(response.status, 200);
    }

    #[test]
    fn test_store_failure_can_abort() {
        let builder = builder(true, Arc::new(FailingBlobStore));
        assert!(matches!(
            builder.respond(request(DrmSystem::Widevine.system_id()).as_bytes()),
            Err(Error::StorageWrite { .. })
        ));
    }

    #[test]
    fn test_keys_are_stored() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let builder = builder(false, blobs.clone());
        let response = builder
            .respond(request(DrmSystem::Widevine.system_id()).as_bytes())
            .unwrap();

        let document = CpixDocument::parse(&response.body).unwrap();
        let plain = document
            .content_keys()
            .next()
            .and_then(|x| x.find(CPIX, "Data"))
            .and_then(|x| x.find(PSKC, "Secret"))
            .and_then(|x| x.find(PSKC, "PlainValue"))
            .unwrap()
            .text();

        assert_eq!(
            blobs.get(&format!("content-1/{KID}")).map(encode),
            Some(plain)
        );
    }

    #[test]
    fn test_handle_maps_errors() {
        let builder = builder(false, Arc::new(MemoryBlobStore::new()));

        let response = builder.handle(b"not xml");
        assert_eq!(response.status, 400);

        let response = builder.handle(request("00000000-0000-0000-0000-000000000000").as_bytes());
        assert_eq!(response.status, 500);
        assert_eq!(
            response.body_text(),
            "invalid systemId 00000000-0000-0000-0000-000000000000"
        );
    }
}
