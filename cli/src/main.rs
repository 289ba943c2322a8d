//! TraceLedger CLI: replay transaction traces into a token ledger database.
//!
//! # Commands
//! ```text
//! traceledger run     --traces <file|-> [--config <file>] [--db-url <url>] [--abi account=path]...
//! traceledger schema  --db-url <url> [--wipe] [--print]
//! traceledger info
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use traceledger_core::{ConnectionFactory, ConnectionPool, Name, PipelineConfig};
use traceledger_storage::postgres::PostgresFactory;
use traceledger_storage::schema::{create_statements, drop_statements};
use traceledger_storage::sqlite::SqliteFactory;
use traceledger_storage::{init_schema, BackendKind, MemoryFactory, MemoryStore};

mod cmd_run;
mod config;
mod logging;
mod source;

use cmd_run::TraceInput;
use config::{AbiSource, CliConfig};
use logging::init_tracing;

#[derive(Parser)]
#[command(
    name = "traceledger",
    about = "Replay transaction traces into a token ledger database",
    long_about = "
TraceLedger reads transaction traces (one JSON object per line), extracts
token transfers and creations, and writes ledger rows, balances and
authorization records to Postgres or SQLite.

ENVIRONMENT VARIABLES:
  RUST_LOG   ignored; use --log-level or the `log` config section
",
    version
)]
struct Cli {
    /// Global log level (overrides the config file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StorageArgs {
    /// YAML or JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database URL: postgres://..., sqlite:path or memory:
    #[arg(long)]
    db_url: Option<String>,

    /// Drop and recreate all tables first
    #[arg(long)]
    wipe: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines trace file through the pipeline
    Run {
        #[command(flatten)]
        storage: StorageArgs,

        /// Trace file, or `-` for stdin
        #[arg(short, long)]
        traces: String,

        /// ABI file for a contract: ACCOUNT=PATH (repeatable)
        #[arg(long = "abi")]
        abis: Vec<AbiSource>,

        /// Contract decoded with the built-in token ABI (repeatable)
        #[arg(long = "token-contract")]
        token_contracts: Vec<Name>,

        /// Ignore traces until this block is reached
        #[arg(long)]
        start_block: Option<u64>,

        /// Ignore traces after this block
        #[arg(long)]
        end_block: Option<u64>,

        #[arg(long)]
        extraction_workers: Option<usize>,

        #[arg(long)]
        write_workers: Option<usize>,
    },

    /// Create the ledger tables
    Schema {
        #[command(flatten)]
        storage: StorageArgs,

        /// Print the DDL instead of executing it
        #[arg(long)]
        print: bool,
    },

    /// Show version, compiled backends and default settings
    Info,
}

impl StorageArgs {
    fn load(&self) -> Result<CliConfig> {
        let mut config = CliConfig::load_or_default(self.config.as_deref())?;
        if let Some(url) = &self.db_url {
            config.storage.url = Some(url.clone());
        }
        if self.wipe {
            config.storage.wipe_on_startup = true;
        }
        Ok(config)
    }
}

fn apply_log_flags(cli: &Cli, config: &mut CliConfig) {
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    if cli.log_json {
        config.log.json = true;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run {
            storage,
            traces,
            abis,
            token_contracts,
            start_block,
            end_block,
            extraction_workers,
            write_workers,
        } => {
            let mut config = storage.load()?;
            apply_log_flags(&cli, &mut config);
            config.abis.extend(abis.iter().cloned());
            if !token_contracts.is_empty() {
                config.token_contracts = token_contracts.clone();
            }
            let p = &mut config.pipeline;
            p.start_block = start_block.unwrap_or(p.start_block);
            p.end_block = end_block.unwrap_or(p.end_block);
            p.extraction_workers = extraction_workers.unwrap_or(p.extraction_workers);
            p.write_workers = write_workers.unwrap_or(p.write_workers);

            init_tracing(&config.log)?;
            let summary = cmd_run::run(config, TraceInput::from_arg(traces)).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.shutdown.tasks_failed > 0 {
                anyhow::bail!(
                    "{} pipeline tasks failed; some traces were not written",
                    summary.shutdown.tasks_failed
                );
            }
            Ok(())
        }

        Commands::Schema { storage, print } => {
            let mut config = storage.load()?;
            apply_log_flags(&cli, &mut config);
            if *print {
                if config.storage.wipe_on_startup {
                    for stmt in drop_statements() {
                        println!("{stmt};");
                    }
                }
                for stmt in create_statements() {
                    println!("{stmt};");
                }
                return Ok(());
            }
            init_tracing(&config.log)?;
            cmd_schema(&config).await
        }

        Commands::Info => cmd_info(),
    }
}

async fn cmd_schema(config: &CliConfig) -> Result<()> {
    config.storage.validate()?;
    let url = config.storage.url()?;
    let wipe = config.storage.wipe_on_startup;
    match BackendKind::from_url(url)? {
        BackendKind::Memory => {
            schema_with(MemoryFactory::new(MemoryStore::new()), config, wipe).await
        }
        BackendKind::Sqlite => schema_with(SqliteFactory::open(url), config, wipe).await,
        BackendKind::Postgres => schema_with(PostgresFactory::new(url), config, wipe).await,
    }
}

async fn schema_with<F: ConnectionFactory>(
    factory: F,
    config: &CliConfig,
    wipe: bool,
) -> Result<()> {
    let pool = ConnectionPool::new(factory, config.storage.pool_config());
    init_schema(&pool, wipe).await?;
    println!("schema ready");
    Ok(())
}

fn cmd_info() -> Result<()> {
    println!("traceledger {}", env!("CARGO_PKG_VERSION"));
    println!("backends: memory, sqlite, postgres");
    println!();
    println!("default pipeline settings:");
    print!("{}", serde_yaml::to_string(&PipelineConfig::default())?);
    Ok(())
}
