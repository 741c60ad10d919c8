mod commands;
mod http_store;
mod logger;

use clap::Parser;
use colored::Colorize;
use commands::{Args, Commands};
use std::process;

fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    args.init_logger()?;

    match args.command {
        Commands::Handle(args) => args.execute()?,
        Commands::Key(args) => args.execute()?,
        Commands::Pssh(args) => args.execute()?,
        Commands::Respond(args) => args.execute()?,
    }

    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{}: {}", "error".bold().red(), e);
        process::exit(1);
    }
}
