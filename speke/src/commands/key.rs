use super::ServerArgs;
use anyhow::{Result, bail};
use base64::Engine;
use clap::Args;
use colored::Colorize;

/// Print the clear content key of a content id and key id. Only content ids
/// whose secret exists in the secrets directory have keys.
#[derive(Debug, Clone, Args)]
pub struct Key {
    /// Content id the key was requested for.
    #[arg(required = true)]
    content_id: String,

    /// Key id in UUID form.
    #[arg(required = true)]
    kid: String,

    #[command(flatten)]
    pub server: ServerArgs,
}

impl Key {
    pub fn execute(self) -> Result<()> {
        let response = self
            .server
            .server()?
            .client_key(&self.content_id, &self.kid);

        if response.status != 200 {
            bail!("{} ({})", response.body_text(), response.status);
        }

        let key = base64::engine::general_purpose::STANDARD.decode(&response.body)?;
        println!("{} {}", "base64".green(), response.body_text());
        println!("{}    {}:{}", "hex".green(), self.kid.replace('-', ""), hex::encode(key));
        Ok(())
    }
}
