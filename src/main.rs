use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use askdb::config::{self, AppConfig};
use askdb::db::{SchemaDescriptor, Store};
use askdb::history::SessionStore;
use askdb::oracle::GroqClient;
use askdb::pipeline::PipelineController;
use askdb::prompts;
use askdb::server::{self, AppState};

/// Ask business questions about a SQLite dataset in plain English
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the config file (defaults to the platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the SQLite database (overrides the config file)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Address to listen on (overrides the config file)
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database = database;
    }
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }

    // Fail at startup, not on the first question, if the key is missing.
    let api_key = config::api_key_from_env()?;

    let store = Store::open(
        &config.database,
        Duration::from_secs(config.limits.query_timeout_secs),
        config.limits.max_rows,
    )?;
    let schema = {
        let conn = store.connect()?;
        Arc::new(SchemaDescriptor::load(&conn)?)
    };
    info!(
        database = %config.database.display(),
        tables = schema.tables.len(),
        "database opened"
    );

    let business_rules = match &config.business_rules {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read business rules file {}", path.display()))?,
        None => prompts::BUSINESS_RULES.to_string(),
    };

    let oracle = Arc::new(GroqClient::new(&config.oracle, api_key)?);
    let pipeline = PipelineController::new(
        oracle,
        store.clone(),
        schema,
        business_rules,
        config.limits.clone(),
    );
    let sessions = SessionStore::new(Some(config.history_dir()));

    let state = Arc::new(AppState {
        pipeline,
        sessions,
        store,
        oracle_configured: true,
    });
    server::serve(&config.listen, state).await
}
