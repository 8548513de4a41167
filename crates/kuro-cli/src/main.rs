use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use serde::Serialize;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use kuro_cli::{Command, Config};
use kuro_core::{Engine, IndexRequest, Scope, TriggerResponse};
use kuro_db::{Database, IndexRepository};

/// Exit code of a process stopped by Ctrl-C.
const INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load environment variables from .env file
    dotenv().ok();

    // Parse command line arguments
    let config = Config::parse();

    // Setup logging (stderr to keep stdout clean for JSON output)
    let level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let (indexer_config, db_config) = config
        .resolve()
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    // Database connection
    info!("Connecting to database...");
    let db = Database::connect(&config.database_url, &db_config)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))
        .context("Failed to connect to database")?;

    let engine = Engine::new(IndexRepository::new(db.pool().clone()), indexer_config);

    // Execute command
    let code = tokio::select! {
        code = run(&engine, config.command) => code?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping");
            engine.ledger().interrupt_open("SIGINT");
            ExitCode::from(INTERRUPTED)
        }
    };

    db.close().await;
    Ok(code)
}

async fn run(engine: &Engine<IndexRepository>, command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Index {
            slug,
            dry_run,
            force,
        } => {
            let request = IndexRequest {
                scope: slug.map_or(Scope::All, Scope::Slug),
                force,
                dry_run,
            };
            let result = engine.index(&request).await;
            if let Err(e) = &result {
                eprintln!("{}", e.user_message());
            }
            let response = TriggerResponse::from_result(&result);
            print_json(&response)?;
            if response.is_error() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Health { force } => {
            let report = engine
                .health(force)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            print_json(report.as_ref())?;
        }
        Command::Runs { limit } => {
            print_json(&engine.history(limit))?;
        }
        Command::Stats => {
            let stats = engine
                .stats()
                .await
                .context("Failed to read database statistics")?;
            print_json(&stats)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}
