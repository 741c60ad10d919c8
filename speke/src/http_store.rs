use anyhow::{Result, bail};
use log::debug;
use reqwest::{
    Url,
    blocking::Client,
    header::{CONTENT_TYPE, HeaderValue},
};
use speke_cpix::keys::{BlobStore, BlobStoreError};

/// Key store writing objects with `PUT <endpoint>/<content id>/<kid>`.
pub struct HttpBlobStore {
    client: Client,
    endpoint: Url,
}

impl HttpBlobStore {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint)?;

        if endpoint.cannot_be_a_base() {
            bail!("'{}' cannot be used as a key store endpoint.", endpoint);
        }

        Ok(Self {
            client: Client::builder()
                .user_agent(concat!("speke/", env!("CARGO_PKG_VERSION")))
                .build()?,
            endpoint,
        })
    }

    fn url(&self, key: &str) -> std::result::Result<Url, BlobStoreError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| BlobStoreError::InvalidKey(key.to_owned()))?
            .pop_if_empty()
            .extend(key.split('/'));
        Ok(url)
    }
}

impl BlobStore for HttpBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> std::result::Result<(), BlobStoreError> {
        let url = self.url(key)?;
        debug!("PUT {}", url);

        let response = self
            .client
            .put(url.clone())
            .header(
                CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            )
            .body(bytes.to_vec())
            .send()
            .map_err(|x| BlobStoreError::Backend(x.to_string()))?;
        let status = response.status();

        if status.is_client_error() || status.is_server_error() {
            return Err(BlobStoreError::Backend(format!(
                "PUT {} failed ({})",
                url, status
            )));
        }

        Ok(())
    }
}
