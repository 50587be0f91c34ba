use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use renlocalize::cli::{Cli, Commands};
use renlocalize::{commands, config};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Translate(args) => commands::translate::run(args)?,
        Commands::Scan(args) => commands::scan::run(args)?,
        Commands::Unpack(args) => commands::unpack::run(args)?,
        Commands::Repack(args) => commands::repack::run(args)?,
        Commands::Config(args) => config::commands::run(args)?,
    }

    Ok(())
}
