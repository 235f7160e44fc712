//! linkaudit - link and image audit scan orchestrator
//!
//! Main entry point for the linkaudit CLI and server.

mod cli;
mod cmd_scan;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use linkaudit_api::{ApiServer, ApiState};
use linkaudit_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig};
use linkaudit_scheduler::{
    ConfigFileSettings, CronTriggerAdapter, FixedIdentity, IdentityProvider, ScanSettings, SchedulerOptions,
    SchedulerSet, SettingsReader, SqliteOptionStore, SqliteScheduler, StaticSettings, SystemIdentity,
};

use crate::cli::{Cli, Commands};

/// Context passed to recurring re-registration at process start.
const STARTUP_CONTEXT: &str = "startup";

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(ConfigLoader::expand_path(&path.to_string_lossy()))
}

/// Initialize tracing with console and file output.
///
/// Log files rotate daily under the configured directory; 30 days are kept.
/// Console output goes to stderr so command output on stdout stays parseable.
fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let log_dir = expand(&config.dir);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("linkaudit")
        .filename_suffix("log")
        .max_log_files(30)
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Flushes the file writer on exit.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_ansi(true),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    Ok(())
}

fn validate_config(config: &Config) -> anyhow::Result<()> {
    let validation = ConfigValidator::validate(config)?;
    for warning in &validation.warnings {
        warn!("Config warning at {}: {}", warning.path, warning.message);
    }
    if !validation.is_valid() {
        let errors: Vec<String> = validation
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect();
        anyhow::bail!("invalid configuration: {}", errors.join("; "));
    }

    Ok(())
}

/// Open the shared database and build one scheduler per dataset.
async fn build_schedulers(cli: &Cli, config: &Config) -> anyhow::Result<Arc<SchedulerSet>> {
    let db_path = expand(&config.storage.db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }
    info!("Using database {}", db_path.display());

    let store = Arc::new(SqliteOptionStore::open(&db_path).await?);
    let substrate = Arc::new(SqliteScheduler::open(&db_path).await?);
    let dispatcher = Arc::new(CronTriggerAdapter::new(&config.dispatch)?);

    let fallback = ScanSettings::from_config(&config.scan)?;
    let settings: Arc<dyn SettingsReader> = if cli.config.exists() {
        Arc::new(ConfigFileSettings::new(cli.config.clone(), fallback))
    } else {
        Arc::new(StaticSettings(fallback))
    };

    let identity: Arc<dyn IdentityProvider> = match cli.actor {
        Some(actor) => Arc::new(FixedIdentity(actor)),
        None => Arc::new(SystemIdentity),
    };

    Ok(Arc::new(SchedulerSet::new(
        store,
        substrate,
        SchedulerOptions::from_config(&config.orchestrator),
        dispatcher,
        settings,
        identity,
    )))
}

async fn serve(
    mut config: Config,
    schedulers: Arc<SchedulerSet>,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    for (dataset, outcome) in schedulers.reschedule_all(STARTUP_CONTEXT).await? {
        if outcome.success {
            info!("[{}] {}", dataset, outcome.message);
        } else {
            warn!("[{}] Recurring scan not registered: {}", dataset, outcome.message);
        }
    }

    let state = Arc::new(ApiState::new(schedulers));
    let server = ApiServer::new(config.server, state);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutting down");
    };

    server
        .run(shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("server error: {}", e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::load_or_default(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    init_tracing(&config.logging)?;
    validate_config(&config)?;

    let schedulers = build_schedulers(&cli, &config).await?;
    let actor = cli.actor;

    match cli.command {
        None => serve(config, schedulers, None, None).await,
        Some(Commands::Serve { host, port }) => serve(config, schedulers, host, port).await,
        Some(command) => cmd_scan::handle_scan_command(command, schedulers, actor).await,
    }
}
