// leaddesk entry point.
//
// Startup sequence:
// 1. Parse the command line
// 2. Initialize tracing (log to file, not terminal)
// 3. Load config
// 4. Open database
// 5. Run the command

mod commands;
mod render;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use leaddesk_core::config;
use leaddesk_core::db::Database;

use crate::commands::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Parse the command line
    let cli = Cli::parse();

    // 2. Initialize tracing (log to file, not terminal)
    init_tracing()?;
    info!("leaddesk starting up");

    // 3. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: {} buckets of {} over {}.{}",
        config.statistics.bucket_count,
        config.statistics.bucket_width,
        config.statistics.collection,
        config.statistics.field
    );

    // 4. Open database
    let db = Database::open(&config.database_path).context("failed to open database")?;
    info!("Database opened at {}", config.database_path);

    // 5. Run the command
    let result = commands::run(cli.command, config, Arc::new(db)).await;
    if let Err(e) = &result {
        tracing::error!("Command failed: {:#}", e);
    }
    info!("leaddesk shut down cleanly");
    result
}

/// Initialize tracing to log to a file, keeping stdout for command output.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = log_dir()?;
    let log_file = std::fs::File::create(log_dir.join("leaddesk.log"))
        .with_context(|| format!("failed to create log file in {}", log_dir.display()))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("leaddesk=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}

/// `logs/` under the working directory, or the platform data directory
/// when that cannot be created.
fn log_dir() -> anyhow::Result<PathBuf> {
    let local = std::env::current_dir()?.join("logs");
    if std::fs::create_dir_all(&local).is_ok() {
        return Ok(local);
    }

    let dirs = directories::ProjectDirs::from("", "", "leaddesk")
        .context("no home directory to place logs in")?;
    let fallback = dirs.data_local_dir().join("logs");
    std::fs::create_dir_all(&fallback)
        .with_context(|| format!("failed to create {}", fallback.display()))?;
    Ok(fallback)
}
