//! JSON-lines trace source.
//!
//! Each non-blank line is one transaction trace. Lines that are not UTF-8 or
//! fail to parse are logged and skipped; only an I/O error ends the replay
//! early.

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};
use traceledger_core::{Admission, IntakeHandle, TransactionTrace};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    pub lines: u64,
    pub invalid: u64,
    pub enqueued: u64,
    pub skipped: u64,
    /// The pipeline stopped accepting traces before the input ended.
    pub closed: bool,
}

pub fn parse_trace(line: &str) -> serde_json::Result<TransactionTrace> {
    serde_json::from_str(line)
}

/// Feed every trace from `reader` into the pipeline.
pub async fn replay<R>(reader: R, intake: &IntakeHandle) -> Result<ReplayStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = ReplayStats::default();
    let mut lines = reader.split(b'\n');
    while let Some(bytes) = lines.next_segment().await.context("read trace input")? {
        stats.lines += 1;
        let line = match String::from_utf8(bytes) {
            Ok(line) => line,
            Err(e) => {
                warn!(line = stats.lines, error = %e, "skipping undecodable trace line");
                stats.invalid += 1;
                continue;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let trace = match parse_trace(line) {
            Ok(trace) => trace,
            Err(e) => {
                warn!(line = stats.lines, error = %e, "skipping unparsable trace");
                stats.invalid += 1;
                continue;
            }
        };
        match intake.submit(trace).await {
            Admission::Enqueued => stats.enqueued += 1,
            Admission::Skipped(cause) => {
                debug!(line = stats.lines, ?cause, "trace not enqueued");
                stats.skipped += 1;
            }
            Admission::Closed => {
                stats.closed = true;
                break;
            }
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use traceledger_core::codec::encode_transfer;
    use traceledger_core::{
        AbiDef, ActionTrace, Asset, ConnectionPool, MemoryAbiRegistry, Name, PermissionLevel,
        Pipeline, PipelineConfig, PoolConfig,
    };
    use traceledger_storage::{MemoryFactory, MemoryStore};

    fn n(s: &'static str) -> Name {
        Name::from_static(s)
    }

    fn line(block: u64, seq: u64) -> String {
        let qty: Asset = "1.0000 TOK".parse().unwrap();
        let trace = TransactionTrace {
            id: format!("{seq:064x}"),
            block_number: block,
            block_time: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            action_traces: vec![ActionTrace {
                receiver: n("alice"),
                account: n("eosio.token"),
                name: n("transfer"),
                data: encode_transfer(n("alice"), n("bob"), &qty, ""),
                authorization: vec![PermissionLevel::new(n("alice"), n("active"))],
                global_sequence: seq,
                inline_traces: vec![],
            }],
        };
        serde_json::to_string(&trace).unwrap()
    }

    #[test]
    fn parses_wire_format() {
        let trace = parse_trace(&line(100, 7)).unwrap();
        assert_eq!(trace.block_number, 100);
        assert_eq!(trace.action_traces[0].global_sequence, 7);
        assert!(parse_trace("{\"id\": 1}").is_err());
    }

    fn start(store: &MemoryStore) -> Pipeline<MemoryFactory> {
        let factory = MemoryFactory::new(store.clone());
        let pool = Arc::new(ConnectionPool::new(factory, PoolConfig::default()));
        let registry = MemoryAbiRegistry::new();
        registry.set_abi(n("eosio.token"), AbiDef::token());
        Pipeline::start(PipelineConfig::default(), Arc::new(registry), pool).unwrap()
    }

    #[tokio::test]
    async fn replay_skips_bad_lines_and_feeds_pipeline() {
        let store = MemoryStore::new();
        let pipeline = start(&store);

        let input = format!(
            "{}\n\nnot json\n{}\n{}\n",
            line(100, 1),
            line(0, 2),
            line(101, 3)
        );
        let stats = replay(input.as_bytes(), &pipeline.intake()).await.unwrap();
        assert_eq!(
            stats,
            ReplayStats {
                lines: 5,
                invalid: 1,
                enqueued: 2,
                skipped: 1,
                closed: false,
            }
        );

        let report = pipeline.shutdown().await;
        assert_eq!(report.traces_processed, 2);
        assert_eq!(store.inserts_into("tokens").len(), 4);
    }

    #[tokio::test]
    async fn non_utf8_line_is_counted_and_skipped() {
        let store = MemoryStore::new();
        let pipeline = start(&store);

        let mut input = line(100, 1).into_bytes();
        input.extend_from_slice(b"\n\xff\xfe\n");
        input.extend_from_slice(line(101, 2).as_bytes());
        input.extend_from_slice(b"\r\n");

        let stats = replay(input.as_slice(), &pipeline.intake()).await.unwrap();
        assert_eq!(stats.lines, 3);
        assert_eq!(stats.invalid, 1);
        assert_eq!(stats.enqueued, 2);

        let report = pipeline.shutdown().await;
        assert_eq!(report.traces_processed, 2);
        assert_eq!(report.finalized.ledger_rows, 2);
    }
}
