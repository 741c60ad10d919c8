use crate::{DrmSystem, Error, PsshBox, Result, keys::KeyDerivationMode};

/// `#EXT-X-KEY` and `#EXT-X-SESSION-KEY` tag values, base64 encoded, used in
/// place of the generated ones.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HlsSignaling {
    pub media: String,
    pub master: String,
}

/// Static server configuration.
///
/// Built once at startup and shared by every component; nothing in this
/// crate reads the environment.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    keystore_url: String,
    widevine_pssh_box: Option<String>,
    playready_pssh_box: Option<String>,
    playready_protection_header: Option<String>,
    widevine_hls_signaling: Option<HlsSignaling>,
    playready_hls_signaling: Option<HlsSignaling>,
    key_string: Option<String>,
    derivation: KeyDerivationMode,
    user_agent: String,
    abort_on_store_failure: bool,
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    /// Prefix of clear key retrieval URLs, without trailing slash.
    pub fn keystore_url(&self) -> &str {
        &self.keystore_url
    }

    pub fn widevine_pssh_box(&self) -> Option<&str> {
        self.widevine_pssh_box.as_deref()
    }

    pub fn playready_pssh_box(&self) -> Option<&str> {
        self.playready_pssh_box.as_deref()
    }

    pub fn playready_protection_header(&self) -> Option<&str> {
        self.playready_protection_header.as_deref()
    }

    pub fn widevine_hls_signaling(&self) -> Option<&HlsSignaling> {
        self.widevine_hls_signaling.as_ref()
    }

    pub fn playready_hls_signaling(&self) -> Option<&HlsSignaling> {
        self.playready_hls_signaling.as_ref()
    }

    pub fn key_string(&self) -> Option<&str> {
        self.key_string.as_deref()
    }

    pub fn derivation(&self) -> KeyDerivationMode {
        self.derivation
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Fail the request when a key cannot be written to the key store.
    pub fn abort_on_store_failure(&self) -> bool {
        self.abort_on_store_failure
    }

    /// Configured `pssh` box of a system, base64 encoded.
    pub fn pssh_box(&self, system: DrmSystem) -> Option<&str> {
        match system {
            DrmSystem::Widevine => self.widevine_pssh_box(),
            DrmSystem::PlayReady => self.playready_pssh_box(),
            _ => None,
        }
    }
}

/// Builder for [`ServerConfig`].
///
/// # Example
///
/// ```
/// use speke_cpix::ServerConfig;
///
/// let config = ServerConfig::builder()
///     .keystore_url("https://keys.example.com/client")
///     .build()?;
/// assert_eq!(config.keystore_url(), "https://keys.example.com/client");
/// # Ok::<(), speke_cpix::Error>(())
/// ```
#[derive(Default)]
pub struct ServerConfigBuilder {
    keystore_url: Option<String>,
    widevine_pssh_box: Option<String>,
    playready_pssh_box: Option<String>,
    playready_protection_header: Option<String>,
    widevine_hls_signaling: Option<HlsSignaling>,
    playready_hls_signaling: Option<HlsSignaling>,
    key_string: Option<String>,
    derivation: KeyDerivationMode,
    user_agent: Option<String>,
    abort_on_store_failure: bool,
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keystore_url(mut self, url: impl Into<String>) -> Self {
        self.keystore_url = Some(url.into());
        self
    }

    pub fn widevine_pssh_box(mut self, pssh: impl Into<String>) -> Self {
        self.widevine_pssh_box = Some(pssh.into());
        self
    }

    pub fn playready_pssh_box(mut self, pssh: impl Into<String>) -> Self {
        self.playready_pssh_box = Some(pssh.into());
        self
    }

    pub fn playready_protection_header(mut self, header: impl Into<String>) -> Self {
        self.playready_protection_header = Some(header.into());
        self
    }

    pub fn widevine_hls_signaling(mut self, signaling: HlsSignaling) -> Self {
        self.widevine_hls_signaling = Some(signaling);
        self
    }

    pub fn playready_hls_signaling(mut self, signaling: HlsSignaling) -> Self {
        self.playready_hls_signaling = Some(signaling);
        self
    }

    pub fn key_string(mut self, key_string: impl Into<String>) -> Self {
        self.key_string = Some(key_string.into());
        self
    }

    pub fn derivation(mut self, mode: KeyDerivationMode) -> Self {
        self.derivation = mode;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn abort_on_store_failure(mut self, abort: bool) -> Self {
        self.abort_on_store_failure = abort;
        self
    }

    pub fn build(self) -> Result<ServerConfig> {
        let keystore_url = self
            .keystore_url
            .map(|x| x.trim().trim_end_matches('/').to_owned())
            .filter(|x| !x.is_empty())
            .ok_or_else(|| Error::InvalidConfig("keystore url is required".to_owned()))?;

        let widevine_pssh_box = self
            .widevine_pssh_box
            .map(|x| check_pssh_box(DrmSystem::Widevine, x))
            .transpose()?;
        let playready_pssh_box = self
            .playready_pssh_box
            .map(|x| check_pssh_box(DrmSystem::PlayReady, x))
            .transpose()?;

        if self.derivation == KeyDerivationMode::Legacy && self.key_string.is_none() {
            return Err(Error::InvalidConfig(
                "legacy key derivation needs a key string".to_owned(),
            ));
        }

        Ok(ServerConfig {
            keystore_url,
            widevine_pssh_box,
            playready_pssh_box,
            playready_protection_header: self.playready_protection_header,
            widevine_hls_signaling: self.widevine_hls_signaling,
            playready_hls_signaling: self.playready_hls_signaling,
            key_string: self.key_string,
            derivation: self.derivation,
            user_agent: self
                .user_agent
                .unwrap_or_else(|| concat!("speke/", env!("CARGO_PKG_VERSION")).to_owned()),
            abort_on_store_failure: self.abort_on_store_failure,
        })
    }
}

fn check_pssh_box(system: DrmSystem, pssh: String) -> Result<String> {
    let pssh = pssh.trim().to_owned();
    let parsed = PsshBox::from_base64(&pssh)
        .map_err(|x| Error::InvalidConfig(format!("{} pssh box: {}", system, x)))?;

    if parsed.system() != Some(system) {
        return Err(Error::InvalidConfig(format!(
            "{} pssh box carries system id {}",
            system,
            hex::encode(parsed.system_id)
        )));
    }

    Ok(pssh)
}
