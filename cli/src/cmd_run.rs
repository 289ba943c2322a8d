//! `traceledger run`: replay a trace file through the pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{error, info, warn};
use traceledger_core::{
    AbiDef, ConnectionFactory, ConnectionPool, MemoryAbiRegistry, Pipeline, ShutdownReport,
};
use traceledger_storage::postgres::PostgresFactory;
use traceledger_storage::sqlite::SqliteFactory;
use traceledger_storage::{init_schema, BackendKind, MemoryFactory, MemoryStore};

use crate::config::CliConfig;
use crate::source::{replay, ReplayStats};

/// Where traces are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceInput {
    Stdin,
    File(PathBuf),
}

impl TraceInput {
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            TraceInput::Stdin
        } else {
            TraceInput::File(PathBuf::from(arg))
        }
    }

    async fn open(&self) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
        Ok(match self {
            TraceInput::Stdin => Box::new(BufReader::new(tokio::io::stdin())),
            TraceInput::File(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("open trace file '{}'", path.display()))?;
                Box::new(BufReader::new(file))
            }
        })
    }
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    /// `None` when the replay was interrupted.
    pub replay: Option<ReplayStats>,
    pub shutdown: ShutdownReport,
}

/// Build the ABI registry: the built-in token ABI for every token contract,
/// then any ABI files, which take precedence.
pub fn build_registry(config: &CliConfig) -> Result<MemoryAbiRegistry> {
    let registry = MemoryAbiRegistry::new();
    for account in &config.token_contracts {
        registry.set_abi(*account, AbiDef::token());
    }
    for source in &config.abis {
        registry
            .load_file(source.account, &source.path)
            .with_context(|| format!("load ABI for '{}'", source.account))?;
    }
    info!(contracts = registry.len(), "ABI registry ready");
    Ok(registry)
}

pub async fn run(config: CliConfig, input: TraceInput) -> Result<RunSummary> {
    config.storage.validate()?;
    let url = config.storage.url()?.to_string();
    match BackendKind::from_url(&url)? {
        BackendKind::Memory => {
            run_with(MemoryFactory::new(MemoryStore::new()), config, input).await
        }
        BackendKind::Sqlite => run_with(SqliteFactory::open(&url), config, input).await,
        BackendKind::Postgres => run_with(PostgresFactory::new(url), config, input).await,
    }
}

async fn run_with<F: ConnectionFactory>(
    factory: F,
    config: CliConfig,
    input: TraceInput,
) -> Result<RunSummary> {
    let pool = Arc::new(ConnectionPool::new(factory, config.storage.pool_config()));
    init_schema(&pool, config.storage.wipe_on_startup)
        .await
        .context("initialise schema")?;

    let registry = build_registry(&config)?;
    let pipeline = Pipeline::start(config.pipeline.clone(), Arc::new(registry), pool)
        .context("start pipeline")?;
    let intake = pipeline.intake();
    let reader = input.open().await?;

    let outcome = tokio::select! {
        stats = replay(reader, &intake) => Some(stats),
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, draining pipeline");
            None
        }
    };
    let (replayed, failure) = match outcome {
        Some(Ok(stats)) => {
            info!(
                lines = stats.lines,
                enqueued = stats.enqueued,
                invalid = stats.invalid,
                skipped = stats.skipped,
                "input exhausted"
            );
            (Some(stats), None)
        }
        Some(Err(e)) => {
            error!(error = %e, "trace input failed, draining pipeline");
            (None, Some(e))
        }
        None => (None, None),
    };

    // the drain runs whatever ended the replay
    let shutdown = pipeline.shutdown().await;
    if let Some(e) = failure {
        return Err(e.context(format!(
            "replay aborted after {} traces were processed",
            shutdown.traces_processed
        )));
    }
    Ok(RunSummary {
        replay: replayed,
        shutdown,
    })
}
