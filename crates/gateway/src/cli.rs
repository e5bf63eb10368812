//! CLI surface for the `coda` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use coda_domain::config::Config;
use coda_domain::error::Result;

#[derive(Debug, Parser)]
#[command(name = "coda", about = "Headless session kernel for the Coda coding assistant")]
pub struct Cli {
    /// Path to the config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the control plane (default).
    Serve {
        /// Speak line-delimited JSON over stdin/stdout instead of HTTP.
        #[arg(long)]
        stdio: bool,
    },
    /// Validate the configuration and exit.
    ConfigCheck,
    /// Print the version and exit.
    Version,
}

/// Load the config: `--config` path, else `./coda.toml` when present,
/// else built-in defaults. Environment overrides apply in all cases.
pub fn load_config(cli: &Cli) -> Result<Config> {
    if let Some(path) = &cli.config {
        return Config::load(path);
    }
    let default_path = PathBuf::from("coda.toml");
    if default_path.exists() {
        return Config::load(&default_path);
    }
    let mut config = Config::default();
    config.server.apply_env();
    Ok(config)
}
