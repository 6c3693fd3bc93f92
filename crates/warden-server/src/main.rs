//! `warden` operations tool: schema provisioning, DDL export and a lock probe

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use warden_core::{CancellationToken, LockProviderExt, ResourceId, TimeToLive};
use warden_migration::{LockTableMigrator, Migrator, MigratorTrait};
use warden_persistence::{LockTableSchema, SqlDialect};
use warden_server::startup::logging::{LoggingConfig, init_logging};
use warden_server::startup::{self, build_provider, retry_policy};
use warden_server::{BackendKind, WardenConfig};

#[derive(Debug, Parser)]
#[command(name = "warden", version, about = "Distributed TTL lock administration")]
struct Cli {
    /// YAML configuration file
    #[arg(short = 'c', long = "config", env = "WARDEN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the lock table (or check the backend) if missing
    Provision,
    /// Apply the versioned migrations to the configured SQL database
    Migrate,
    /// Print the lock table DDL for a SQL dialect, at the configured table
    /// location when a configuration file is given
    Scripts {
        #[arg(long, default_value = "postgres")]
        dialect: String,
    },
    /// Acquire, extend and release a lock to verify the backend end to end
    Probe {
        #[arg(long, default_value = "warden-probe")]
        resource: String,
        #[arg(long, default_value_t = 5_000)]
        ttl_ms: u64,
    },
}

/// Token cancelled on Ctrl-C
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::Scripts { dialect } = &cli.command {
        let dialect: SqlDialect = dialect.parse()?;
        let table = match cli.config.as_deref() {
            Some(path) => startup::sql_options(&WardenConfig::load(Some(path))?.sql).table()?,
            None => LockTableSchema::default(),
        };
        for script in warden_migration::scripts_for(dialect, &table) {
            println!("-- {}\n{}", script.name, script.content);
        }
        return Ok(());
    }

    let config = WardenConfig::load(cli.config.as_deref())?;
    let logging = match cli.config {
        Some(_) => LoggingConfig::from_config(&config.logging),
        None => LoggingConfig::from_env(),
    };
    let _logging_guard = init_logging(&logging).map_err(|e| anyhow::anyhow!("{e}"))?;
    let cancel = ctrl_c_token();

    match cli.command {
        Command::Provision => {
            let provider = build_provider(&config).await?;
            provider.ensure_schema(&cancel).await?;
            tracing::info!("Lock storage is provisioned");
        }
        Command::Migrate => {
            anyhow::ensure!(
                config.backend == BackendKind::Sql,
                "migrations only apply to the sql backend"
            );
            let table = startup::sql_options(&config.sql).table()?;
            let db = startup::database_connection(&config.sql).await?;
            let applied = if table == LockTableSchema::default() {
                Migrator::up(&db, None).await
            } else {
                LockTableMigrator::new(table).up(&db).await
            };
            applied.context("failed to apply migrations")?;
            tracing::info!("Migrations applied");
        }
        Command::Probe { resource, ttl_ms } => {
            let provider = build_provider(&config).await?;
            let resource_id = ResourceId::new(resource)?;
            let ttl = TimeToLive::from_millis(ttl_ms)?;
            let policy = retry_policy(&config.retry);

            let handle = provider
                .acquire_with_retries(&resource_id, ttl, &policy, &cancel)
                .await?;
            tracing::info!(
                resource_id = %resource_id,
                lock_id = %handle.lock_id(),
                "Probe acquired lock"
            );
            provider.extend(&handle, ttl, &cancel).await?;
            provider.release(handle, &cancel).await?;
            tracing::info!(resource_id = %resource_id, "Probe released lock");
        }
        Command::Scripts { .. } => {}
    }

    Ok(())
}
