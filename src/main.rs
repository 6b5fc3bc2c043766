use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use audiodev::cli::Cli;
use audiodev::config::AudioConfig;
use audiodev::logging;

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Environment first, then command line options on top
    let config = AudioConfig::from_env()?;
    let config = cli.merge_into_config(config)?;

    logging::init(config.log_level);
    log::debug!("configuration: {:?}", config);

    cli.run(&config)
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("audiodev-cli: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
