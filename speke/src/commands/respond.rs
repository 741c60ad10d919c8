use super::ServerArgs;
use anyhow::{Result, bail};
use clap::Args;
use log::info;
use std::{fs, io::Write, path::PathBuf};

/// Answer a CPIX request document.
#[derive(Debug, Clone, Args)]
pub struct Respond {
    /// Path of the CPIX request, `-` reads stdin.
    #[arg(required = true)]
    input: PathBuf,

    /// Write the response document here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// SPEKE protocol version of the request.
    #[arg(long, default_value = "1.0", value_parser = ["1.0", "2.0"])]
    speke_version: String,

    #[command(flatten)]
    server: ServerArgs,
}

impl Respond {
    pub fn execute(self) -> Result<()> {
        let request = super::read_input(&self.input)?;
        let response = self
            .server
            .server()?
            .handle(Some(&self.speke_version), &request);

        if response.status != 200 {
            bail!("{} ({})", response.body_text(), response.status);
        }

        match &self.output {
            Some(path) => {
                fs::write(path, &response.body)?;
                info!("response written to {}", path.display());
            }
            None => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&response.body)?;
                writeln!(stdout)?;
            }
        }

        Ok(())
    }
}
