use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;
use speke_cpix::{
    PsshBox,
    pssh::{parse_kid, playready_object},
};

/// Build or inspect pssh boxes.
#[derive(Debug, Clone, Args)]
pub struct Pssh {
    /// Key id in UUID form, or a base64 pssh box with --inspect.
    #[arg(required = true, value_name = "KID|BASE64")]
    input: String,

    /// DRM system of the built box.
    #[arg(long, value_enum, default_value_t = PsshSystem::Common)]
    system: PsshSystem,

    /// Parse INPUT as a base64 pssh box and print its fields.
    #[arg(long)]
    inspect: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum PsshSystem {
    Common,
    Playready,
    Widevine,
}

impl Pssh {
    pub fn execute(self) -> Result<()> {
        if self.inspect {
            self.inspect()
        } else {
            let kid = parse_kid(&self.input)?;
            let pssh = match self.system {
                PsshSystem::Common => PsshBox::common(kid),
                PsshSystem::Playready => PsshBox::playready(playready_object(kid)),
                PsshSystem::Widevine => PsshBox::widevine(kid),
            };
            println!("{}", pssh.to_base64());
            Ok(())
        }
    }

    fn inspect(&self) -> Result<()> {
        let pssh = PsshBox::from_base64(self.input.trim())?;
        let system_id = hex::encode(pssh.system_id);

        let Some(system) = pssh.system() else {
            bail!("'{}' system id not supported.", system_id);
        };

        println!("{}    {} ({})", "system".green(), system, system.system_id());
        for kid in &pssh.key_ids {
            println!("{}       {}", "kid".green(), hex::encode(kid));
        }
        println!("{}   {}", "version".green(), pssh.version);
        println!("{}      {} bytes", "data".green(), pssh.data.len());
        Ok(())
    }
}
