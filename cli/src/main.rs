//! Keyshelf CLI - command-line access to keyshelf databases.
//!
//! Each invocation opens the data directory, runs one command against the
//! configured database through a `DbService`, and prints the result as JSON.

mod commands;
mod config;
mod error;

use crate::commands::Cli;
use crate::config::Config;
use clap::Parser;
use keyshelf_engine::{DbService, Environment, StoreEngine};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keyshelf_cli=info,keyshelf_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> error::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?.with_overrides(cli.data_dir, cli.database);

    tracing::debug!(
        data_dir = %config.data_dir.display(),
        database = %config.database,
        "opening environment"
    );

    let env = Environment::open_dir(&config.data_dir).await?;
    let svc = DbService::new(StoreEngine::new(env), config.database);

    let output = commands::execute(&svc, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
