use crate::{Error, Result, keys::KeyDerivation};
use base64::Engine;

/// Transport independent response.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// `body` is base64 text standing for binary content.
    pub is_base64_encoded: bool,
}

impl Response {
    /// Plain text response for a failed request.
    pub fn error(error: &Error) -> Self {
        Self {
            status: error.status_code(),
            headers: vec![("Content-Type".to_owned(), "text/plain".to_owned())],
            body: error.to_string().into_bytes(),
            is_base64_encoded: false,
        }
    }

    /// Value of a header, ignoring name case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Returns the clear content key of a `(content id, kid)` pair, the
/// counterpart of the key store URL. Content ids without a secret are
/// answered with 404, a secret is never created here.
pub struct ClientKeyResponse<'a> {
    derivation: &'a KeyDerivation,
}

impl<'a> ClientKeyResponse<'a> {
    pub fn new(derivation: &'a KeyDerivation) -> Self {
        Self { derivation }
    }

    pub fn respond(&self, content_id: &str, kid: &str) -> Result<Response> {
        let key = self.derivation.existing_key(content_id, kid)?;

        Ok(Response {
            status: 200,
            headers: vec![(
                "Content-Type".to_owned(),
                "application/octet-stream".to_owned(),
            )],
            body: base64::engine::general_purpose::STANDARD
                .encode(key)
                .into_bytes(),
            is_base64_encoded: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ServerConfig,
        keys::{KeyDerivationMode, SecretCache, legacy_key},
    };
    use std::sync::Arc;

    #[test]
    fn test_error_response() {
        let response = Response::error(&Error::UnsupportedSystemId("abc".to_owned()));

        assert_eq!(response.status, 500);
        assert_eq!(response.header("content-type"), Some("text/plain"));
        assert_eq!(response.body_text(), "invalid systemId abc");

        let response = Response::error(&Error::MalformedRequest("bad".to_owned()));
        assert_eq!(response.status, 400);

        let response = Response::error(&Error::UnknownContent("movie-1".to_owned()));
        assert_eq!(response.status, 404);
    }

    #[test]
    fn test_client_key_response() {
        let config = Arc::new(
            ServerConfig::builder()
                .keystore_url("https://keys.example.com")
                .derivation(KeyDerivationMode::Legacy)
                .key_string("shared")
                .build()
                .unwrap(),
        );
        let derivation = KeyDerivation::new(
            config,
            Arc::new(SecretCache::new(Arc::new(
                crate::keys::MemorySecretStore::new(),
            ))),
        );

        let response = ClientKeyResponse::new(&derivation)
            .respond("content-1", "kid")
            .unwrap();

        assert_eq!(response.status, 200);
        assert!(response.is_base64_encoded);
        assert_eq!(
            response.header("Content-Type"),
            Some("application/octet-stream")
        );
        assert_eq!(
            base64::engine::general_purpose::STANDARD
                .decode(&response.body)
                .unwrap(),
            legacy_key("shared", "content-1", "kid")
        );
    }
}
