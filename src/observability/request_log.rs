//! Per-request audit records.
//!
//! # Responsibilities
//! - Define [`RequestRecord`], the one record written for every request
//! - Provide sinks: JSON lines file, tracing events, in-memory
//!
//! # Design Decisions
//! - `append` never blocks the request path and never fails visibly
//! - The file sink hands records to a writer task over an unbounded channel;
//!   records are not ordered, the timestamp is authoritative

use std::io;
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// How a request left the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Forwarded,
    Blocked,
    NoBackend,
    BadGateway,
    Rejected,
    /// The client went away before the pipeline finished.
    Cancelled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Forwarded => "forwarded",
            Outcome::Blocked => "blocked",
            Outcome::NoBackend => "no_backend",
            Outcome::BadGateway => "bad_gateway",
            Outcome::Rejected => "rejected",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/// Immutable snapshot of one handled request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub timestamp: DateTime<Utc>,
    pub id: Uuid,
    pub request_id: String,
    pub client_ip: IpAddr,
    pub method: String,
    pub path: String,
    pub backend: Option<String>,
    pub status_code: u16,
    /// Seconds.
    pub response_time: f64,
    pub outcome: Outcome,
    pub is_malicious: bool,
    pub prediction: String,
    pub confidence: f64,
    pub flag: String,
    pub hot: u8,
}

/// Destination for request records.
pub trait RequestLog: Send + Sync {
    /// Hand off one record. Must not block; failures are swallowed.
    fn append(&self, record: RequestRecord);
}

/// Appends one JSON object per line to a file.
#[derive(Debug, Clone)]
pub struct JsonLinesLog {
    tx: mpsc::UnboundedSender<RequestRecord>,
}

impl JsonLinesLog {
    /// Open `path` for appending and start the writer task.
    ///
    /// The task exits once every handle to the log is dropped.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<(Self, JoinHandle<()>)> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let (tx, mut rx) = mpsc::unbounded_channel::<RequestRecord>();
        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let mut line = match serde_json::to_vec(&record) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to encode request record");
                        continue;
                    }
                };
                line.push(b'\n');
                if let Err(e) = file.write_all(&line).await {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to write request record");
                    continue;
                }
                if let Err(e) = file.flush().await {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to flush request log");
                }
            }
            tracing::debug!(path = %path.display(), "Request log writer stopped");
        });

        Ok((Self { tx }, handle))
    }
}

impl RequestLog for JsonLinesLog {
    fn append(&self, record: RequestRecord) {
        if self.tx.send(record).is_err() {
            tracing::warn!("Request log writer is gone, dropping record");
        }
    }
}

/// Emits each record as a structured event under target `request_log`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl RequestLog for TracingLog {
    fn append(&self, record: RequestRecord) {
        tracing::info!(
            target: "request_log",
            id = %record.id,
            request_id = %record.request_id,
            client_ip = %record.client_ip,
            method = %record.method,
            path = %record.path,
            backend = record.backend.as_deref().unwrap_or("-"),
            status = record.status_code,
            response_time = record.response_time,
            outcome = record.outcome.as_str(),
            malicious = record.is_malicious,
            prediction = %record.prediction,
            confidence = record.confidence,
            flag = %record.flag,
            hot = record.hot,
            "request"
        );
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryLog {
    records: Mutex<Vec<RequestRecord>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RequestRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RequestLog for MemoryLog {
    fn append(&self, record: RequestRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}
