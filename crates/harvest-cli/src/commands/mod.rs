pub mod checkpoint;
pub mod config;
pub mod run;
pub mod token;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Subcommand;
use harvest_core::config::HarvestConfig;

/// Exit status of a run stopped by rate limiting; resumable with `--resume`.
pub const EXIT_RATE_LIMITED: u8 = 3;

#[derive(Subcommand)]
pub enum Command {
    /// Harvest one platform: discover, score, fetch and count
    Run(run::RunArgs),
    /// Create, show and validate the configuration
    Config {
        #[command(subcommand)]
        action: config::ConfigAction,
    },
    /// Store access tokens in the OS keychain
    Token {
        #[command(subcommand)]
        action: token::TokenAction,
    },
    /// Inspect or discard the checkpoint of an interrupted run
    Checkpoint {
        #[command(subcommand)]
        action: checkpoint::CheckpointAction,
    },
}

pub async fn run(cmd: Command, config_path: Option<PathBuf>) -> anyhow::Result<ExitCode> {
    let path = config_path.as_deref();
    match cmd {
        Command::Run(args) => run::run(args, path).await,
        Command::Config { action } => config::run(action, path).map(|()| ExitCode::SUCCESS),
        Command::Token { action } => token::run(action).map(|()| ExitCode::SUCCESS),
        Command::Checkpoint { action } => checkpoint::run(action, path).map(|()| ExitCode::SUCCESS),
    }
}

/// Load the configuration from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<HarvestConfig> {
    let config = match path {
        Some(path) => HarvestConfig::load_from(path)?,
        None => HarvestConfig::load()?,
    };
    Ok(config)
}

/// Where the configuration is read from.
pub fn config_location(path: Option<&Path>) -> anyhow::Result<PathBuf> {
    match path {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(HarvestConfig::config_path()?),
    }
}
