use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use coda_domain::config::{Config, ConfigSeverity};
use coda_gateway::api;
use coda_gateway::cli::{load_config, Cli, Command};
use coda_gateway::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve { stdio: false }) => {
            init_tracing(false);
            let config = load_and_validate(&cli)?;
            run(Arc::new(config), false).await
        }
        Some(Command::Serve { stdio: true }) => {
            // Stdout is the wire in stdio mode; logs go to stderr.
            init_tracing(true);
            let config = load_and_validate(&cli)?;
            run(Arc::new(config), true).await
        }
        Some(Command::ConfigCheck) => {
            let config = load_config(&cli)?;
            let issues = config.validate();
            for issue in &issues {
                eprintln!("{issue}");
            }
            if issues
                .iter()
                .any(|i| i.severity == ConfigSeverity::Error)
            {
                std::process::exit(1);
            }
            println!("config ok");
            Ok(())
        }
        Some(Command::Version) => {
            println!("coda {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing(stderr: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,coda_gateway=debug"));
    if stderr {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_and_validate(cli: &Cli) -> anyhow::Result<Config> {
    let config = load_config(cli)?;
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }
    Ok(config)
}

async fn run(config: Arc<Config>, stdio: bool) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "coda starting");

    // Extensions are compiled in; the stock binary ships none.
    let state = AppState::build(config, Vec::new()).await?;

    let result = if stdio {
        api::stdio::serve(state.clone()).await
    } else {
        api::http::serve(state.clone()).await
    };

    match result {
        Ok(()) => {
            tracing::info!("shutdown complete");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "fatal server error");
            std::process::exit(1);
        }
    }
}
