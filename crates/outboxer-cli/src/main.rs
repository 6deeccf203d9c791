//! outboxer - PostgreSQL の outbox テーブルを NATS JetStream へ流す CLI
//!
//! # コマンド
//! - `recover`: sweep を 1 回実行して終了
//! - `publish <ID>...`: 指定した行を publish して終了
//! - `run`: 起動時と一定間隔で sweep、Ctrl-C で graceful close

mod config;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use outboxer_core::app::ErrorStream;
use outboxer_core::{
    ErrorKind, OutboxError, OutboxId, Publisher, PublisherBuilder, PublisherStats, WorkerMode,
};
use outboxer_nats::JetStreamBus;
use outboxer_pg::{PgOutboxStore, PgStoreOptions, TableName};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};

use crate::config::{AppConfig, Overrides};

#[derive(Debug, Parser)]
#[command(name = "outboxer", version, about = "Transactional outbox publisher")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, default_value = "outboxer.toml")]
    config: PathBuf,

    #[arg(long, env = "OUTBOXER_DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, env = "OUTBOXER_NATS_URL")]
    nats_url: Option<String>,

    #[arg(long)]
    table: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Publish every unpublished row once, then exit.
    Recover,
    /// Publish the given rows, then exit.
    Publish {
        #[arg(required = true)]
        ids: Vec<u64>,
    },
    /// Sweep at startup and on an interval until Ctrl-C.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config)?;
    config.apply(Overrides {
        database_url: cli.database_url,
        nats_url: cli.nats_url,
        table: cli.table,
    });
    config.validate()?;
    logging::init(&config.log);

    let mut publisher = connect(&config).await?;
    let errors = publisher
        .take_errors()
        .map(|stream| tokio::spawn(log_errors("standing", stream)));

    let outcome = match cli.command {
        Command::Recover => sweep_once(&publisher).await,
        Command::Publish { ids } => publish_ids(&publisher, ids).await,
        Command::Run => run(&publisher, Duration::from_secs(config.sweep_interval_secs)).await,
    };

    let stats = publisher.close().await;
    if let Some(errors) = errors {
        // close 後に stream が閉じるので、ここで残りのログを出し切る
        let _ = errors.await;
    }
    outcome?;
    print_stats(&stats)
}

async fn connect(config: &AppConfig) -> Result<Publisher> {
    let table = TableName::parse(&config.table)?;
    let pool = PgPoolOptions::new()
        .max_connections(config.publisher.workers.concurrency() as u32 + 2)
        .connect(&config.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;
    let store = PgOutboxStore::with_options(
        pool,
        table,
        PgStoreOptions {
            lock_timeout: config.lock_timeout_ms.map(Duration::from_millis),
        },
    );
    if config.create_table {
        store.ensure_table().await.context("failed to create outbox table")?;
    }

    let bus = JetStreamBus::connect(&config.nats_url).await?;
    if !config.stream.is_empty() {
        bus.ensure_stream(&config.stream, &config.subjects).await?;
    }

    PublisherBuilder::new(Arc::new(store), Arc::new(bus))
        .config(config.publisher.clone())
        .build()
        .context("failed to start publisher")
}

async fn sweep_once(publisher: &Publisher) -> Result<()> {
    let mut sweep = publisher.recover_unpublished();
    let errors = sweep
        .take_errors()
        .map(|stream| tokio::spawn(log_errors("sweep", stream)));
    let report = sweep.wait().await?;
    if let Some(errors) = errors {
        let _ = errors.await;
    }
    info!(
        dispatched = report.dispatched,
        windows = report.windows,
        drained = report.drained,
        "sweep finished"
    );
    Ok(())
}

async fn publish_ids(publisher: &Publisher, ids: Vec<u64>) -> Result<()> {
    match publisher.config().workers {
        WorkerMode::Pooled { .. } => {
            for id in ids {
                publisher.enqueue(OutboxId::new(id)).await?;
            }
            Ok(())
        }
        WorkerMode::AdHoc { .. } => {
            // 常駐 worker がいないので、queue に積んでから sweep で流す
            for id in ids {
                if let Err(err) = publisher.try_enqueue(OutboxId::new(id)) {
                    warn!(error = %err, "queue full, remaining ids are left to the sweep");
                    break;
                }
            }
            sweep_once(publisher).await
        }
    }
}

async fn run(publisher: &Publisher, interval: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = sweep_once(publisher).await {
                    error!(error = %err, "sweep failed");
                }
            }
            _ = &mut shutdown => {
                info!("received shutdown signal, closing publisher");
                return Ok(());
            }
        }
    }
}

async fn log_errors(source: &'static str, mut stream: ErrorStream) {
    while let Some(err) = stream.recv().await {
        if !reported_here(&err) {
            continue;
        }
        warn!(
            source,
            kind = ?err.kind(),
            outbox_id = ?err.row_id(),
            error = %err,
            "row not published"
        );
    }
}

/// Confirmation anomalies are already logged at `error` by the worker.
fn reported_here(err: &OutboxError) -> bool {
    err.kind() != ErrorKind::ConfirmationAnomaly
}

fn print_stats(stats: &PublisherStats) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(stats)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use outboxer_core::ports::BusError;

    #[test]
    fn row_failures_are_reported_by_the_error_drain() {
        let id = OutboxId::new(3);
        assert!(reported_here(&OutboxError::Publish {
            id,
            source: BusError::Nack("no stream".to_string()),
        }));
        assert!(reported_here(&OutboxError::AckTimeout {
            id,
            after: Duration::from_secs(1),
        }));
    }

    #[test]
    fn anomalies_are_left_to_the_worker_log() {
        let err = OutboxError::ConfirmationAnomaly {
            id: OutboxId::new(3),
            affected: 0,
        };
        assert!(!reported_here(&err));
    }
}
