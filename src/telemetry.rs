//! Structured per-transition telemetry: one JSON-line record per state
//! transition, appended to a controller-owned log file and mirrored through
//! `tracing` for live observability.

use std::path::Path;

use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::ledger::ResourceLedger;

#[derive(Debug, Serialize)]
pub struct TransitionRecord {
    pub ts: String,
    pub session: String,
    pub cycle: u64,
    pub state: String,
    pub event: String,
    pub resources: ResourceLedger,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct TelemetrySink {
    file: File,
}

impl TelemetrySink {
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        Ok(Self { file })
    }

    pub async fn record(&mut self, record: &TransitionRecord) -> std::io::Result<()> {
        tracing::info!(
            session = %record.session,
            cycle = record.cycle,
            state = %record.state,
            event = %record.event,
            error = ?record.error,
            "transition"
        );
        let mut line = serde_json::to_string(record).unwrap_or_else(|e| {
            format!("{{\"error\":\"telemetry serialization failed: {e}\"}}")
        });
        line.push('\n');
        self.file.write_all(line.as_bytes()).await
    }
}
