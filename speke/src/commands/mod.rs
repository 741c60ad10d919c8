mod handle;
mod key;
mod pssh;
mod respond;

pub use handle::Handle;
pub use key::Key;
pub use pssh::Pssh;
pub use respond::Respond;

use crate::{
    http_store::HttpBlobStore,
    logger::{LogFormat, Logger},
};
use anyhow::Result;
use clap::{ColorChoice, Parser, Subcommand, ValueEnum};
use log::{LevelFilter, warn};
use speke_cpix::{
    HlsSignaling, KeyServer, ServerConfig,
    keys::{
        BlobStore, FileBlobStore, FileSecretStore, KeyDerivationMode, MemoryBlobStore,
        MemorySecretStore, SecretStore,
    },
};
use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
    sync::Arc,
};

/// SPEKE v1 and v2 key server for CPIX requests.
#[derive(Debug, Clone, Parser)]
#[command(version, author = "clitic <clitic21@gmail.com>", about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// When to output colored text.
    #[arg(long, global = true, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Maximum level of log messages written to stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Format of log messages.
    #[arg(long, global = true, env = "SPEKE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Args {
    pub fn init_logger(&self) -> Result<()> {
        match self.color {
            ColorChoice::Always => colored::control::set_override(true),
            ColorChoice::Never => colored::control::set_override(false),
            ColorChoice::Auto => (),
        }

        log::set_boxed_logger(Box::new(Logger::new(self.log_format)))?;
        log::set_max_level(self.log_level.into());
        Ok(())
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    Handle(Handle),
    Key(Key),
    Pssh(Pssh),
    Respond(Respond),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Key server configuration shared by every command that derives keys.
///
/// Each option can also be set through the environment variable named in
/// its help text.
#[derive(Debug, Clone, clap::Args)]
pub struct ServerArgs {
    /// URL prefix of clear key retrieval URLs.
    #[arg(long, env = "KEYSTORE_URL", help_heading = "Server Options")]
    keystore_url: String,

    /// Base64 Widevine pssh box returned instead of a generated one.
    #[arg(long, env = "CENC_PSSH_BOX", help_heading = "Server Options")]
    widevine_pssh_box: Option<String>,

    /// Widevine HLS signaling data (base64 media and master tags) returned
    /// instead of generated tags.
    #[arg(long, help_heading = "Server Options", num_args = 2, value_names = &["MEDIA", "MASTER"])]
    widevine_hls_signaling: Option<Vec<String>>,

    /// Base64 PlayReady pssh box returned instead of a generated one.
    #[arg(long, env = "PLAYREADY_PSSH_BOX", help_heading = "Server Options")]
    playready_pssh_box: Option<String>,

    /// Base64 PlayReady object returned instead of a generated one.
    #[arg(long, env = "PLAYREADY_PROTECTION_HEADER", help_heading = "Server Options")]
    playready_protection_header: Option<String>,

    /// PlayReady HLS signaling data (base64 media and master tags) returned
    /// instead of generated tags.
    #[arg(long, help_heading = "Server Options", num_args = 2, value_names = &["MEDIA", "MASTER"])]
    playready_hls_signaling: Option<Vec<String>>,

    /// Content key derivation.
    #[arg(long, env = "KEY_DERIVATION", help_heading = "Key Options", default_value_t = KeyDerivationMode::Pbkdf2)]
    derivation: KeyDerivationMode,

    /// Shared key string used by the legacy derivation.
    #[arg(long, env = "KEY_STRING", help_heading = "Key Options", hide_env_values = true)]
    key_string: Option<String>,

    /// Directory holding content secrets, one file per content id.
    /// Secrets only live as long as the process if not set.
    #[arg(long, env = "SECRETS_DIR", help_heading = "Key Options")]
    secrets_dir: Option<PathBuf>,

    /// Directory receiving derived keys as <CONTENT_ID>/<KID> files.
    #[arg(long, env = "KEYSTORE_BUCKET", help_heading = "Key Store Options", conflicts_with = "keystore_endpoint")]
    keystore_dir: Option<PathBuf>,

    /// HTTP endpoint receiving derived keys as PUT <ENDPOINT>/<CONTENT_ID>/<KID>.
    #[arg(long, env = "KEYSTORE_ENDPOINT", help_heading = "Key Store Options")]
    keystore_endpoint: Option<String>,

    /// Fail the request when a derived key cannot be stored.
    #[arg(long, help_heading = "Key Store Options")]
    abort_on_store_failure: bool,
}

impl ServerArgs {
    pub fn config(&self) -> Result<ServerConfig> {
        let mut builder = ServerConfig::builder()
            .keystore_url(&self.keystore_url)
            .derivation(self.derivation)
            .abort_on_store_failure(self.abort_on_store_failure);

        if let Some(pssh) = &self.widevine_pssh_box {
            builder = builder.widevine_pssh_box(pssh);
        }

        if let Some(signaling) = Self::signaling(&self.widevine_hls_signaling) {
            builder = builder.widevine_hls_signaling(signaling);
        }

        if let Some(pssh) = &self.playready_pssh_box {
            builder = builder.playready_pssh_box(pssh);
        }

        if let Some(header) = &self.playready_protection_header {
            builder = builder.playready_protection_header(header);
        }

        if let Some(signaling) = Self::signaling(&self.playready_hls_signaling) {
            builder = builder.playready_hls_signaling(signaling);
        }

        if let Some(key_string) = &self.key_string {
            builder = builder.key_string(key_string);
        }

        Ok(builder.build()?)
    }

    pub fn server(&self) -> Result<KeyServer> {
        let secrets: Arc<dyn SecretStore> = match &self.secrets_dir {
            Some(dir) => Arc::new(FileSecretStore::new(dir)),
            None => {
                if self.derivation != KeyDerivationMode::Legacy {
                    warn!("no --secrets-dir given, content secrets are not persisted");
                }
                Arc::new(MemorySecretStore::new())
            }
        };

        let blobs: Arc<dyn BlobStore> = match (&self.keystore_dir, &self.keystore_endpoint) {
            (Some(dir), _) => Arc::new(FileBlobStore::new(dir)),
            (None, Some(endpoint)) => Arc::new(HttpBlobStore::new(endpoint)?),
            (None, None) => Arc::new(MemoryBlobStore::new()),
        };

        Ok(KeyServer::new(self.config()?, secrets, blobs))
    }

    fn signaling(values: &Option<Vec<String>>) -> Option<HlsSignaling> {
        match values.as_deref() {
            Some([media, master]) => Some(HlsSignaling {
                media: media.to_owned(),
                master: master.to_owned(),
            }),
            _ => None,
        }
    }
}

/// File contents, or stdin for `-`.
fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut data = Vec::new();
        std::io::stdin().lock().read_to_end(&mut data)?;
        Ok(data)
    } else {
        Ok(fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_args() {
        let args = Args::try_parse_from([
            "speke",
            "key",
            "movie-1",
            "98ee5596-cd3e-a20d-163a-e382420c6eff",
            "--keystore-url",
            "https://keys.example.com/client/",
            "--derivation",
            "legacy",
            "--key-string",
            "shared",
            "--widevine-hls-signaling",
            "bWVkaWE=",
            "bWFzdGVy",
        ])
        .unwrap();

        let Commands::Key(key) = args.command else {
            panic!("expected key command");
        };

        let config = key.server.config().unwrap();
        assert_eq!(config.keystore_url(), "https://keys.example.com/client");
        assert_eq!(config.derivation(), KeyDerivationMode::Legacy);
        assert_eq!(config.key_string(), Some("shared"));
        assert_eq!(
            config.widevine_hls_signaling(),
            Some(&HlsSignaling {
                media: "bWVkaWE=".to_owned(),
                master: "bWFzdGVy".to_owned(),
            })
        );
    }

    #[test]
    fn test_keystore_options_conflict() {
        assert!(
            Args::try_parse_from([
                "speke",
                "key",
                "movie-1",
                "98ee5596-cd3e-a20d-163a-e382420c6eff",
                "--keystore-url",
                "https://keys.example.com",
                "--keystore-dir",
                "keys",
                "--keystore-endpoint",
                "https://bucket.example.com",
            ])
            .is_err()
        );
    }
}
