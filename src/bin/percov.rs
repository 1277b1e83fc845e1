use anyhow::Result;
use clap::Parser;

use percov::cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    percov::run(&cli)
}
