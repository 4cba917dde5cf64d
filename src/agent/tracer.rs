//! Passive run tracer
//!
//! The tracer records every emitted event, per-step timings and context
//! snapshots. Recording never waits: records go into a bounded channel with
//! `try_send`, and anything that does not fit is counted and dropped. A
//! [`TraceWorker`] drains the channel into a [`TraceSink`] on its own task;
//! sink failures are logged and swallowed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;

use super::context::ContextSnapshot;
use super::events::Event;

/// Timed phases of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    BuildPrompt,
    ModelCall,
    ToolDispatch,
    Turn,
}

/// One trace entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum TraceRecord {
    Event(Event),
    Step {
        run_id: String,
        turn_id: u32,
        step: StepKind,
        duration_ms: u64,
    },
    Context {
        run_id: String,
        turn_id: u32,
        snapshot: ContextSnapshot,
    },
}

/// Destination for trace records.
#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn write(&self, record: &TraceRecord) -> Result<()>;

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Sink that keeps records in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTraceSink {
    records: Arc<Mutex<Vec<TraceRecord>>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl TraceSink for MemoryTraceSink {
    async fn write(&self, record: &TraceRecord) -> Result<()> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}

/// Sink that appends one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonlTraceSink {
    path: PathBuf,
    file: Mutex<Option<tokio::fs::File>>,
}

impl JsonlTraceSink {
    /// The file (and its parent directories) are created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TraceSink for JsonlTraceSink {
    async fn write(&self, record: &TraceRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            *guard = Some(file);
        }
        if let Some(file) = guard.as_mut() {
            file.write_all(&line).await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        if let Some(file) = self.file.lock().await.as_mut() {
            file.flush().await?;
        }
        Ok(())
    }
}

/// Non-blocking handle for recording trace entries. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Tracer {
    tx: Option<mpsc::Sender<TraceRecord>>,
    dropped: Arc<AtomicU64>,
}

impl Tracer {
    /// A tracer that records nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Tracer plus the worker that drains it.
    pub fn channel(buffer: usize) -> (Tracer, TraceWorker) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Tracer {
                tx: Some(tx),
                dropped: Arc::new(AtomicU64::new(0)),
            },
            TraceWorker { rx },
        )
    }

    /// Tracer whose worker is already running on `sink`.
    ///
    /// The worker finishes once every clone of the tracer is dropped; the
    /// handle yields the number of records written.
    pub fn spawn(buffer: usize, sink: Arc<dyn TraceSink>) -> (Tracer, JoinHandle<u64>) {
        let (tracer, worker) = Self::channel(buffer);
        (tracer, tokio::spawn(worker.run(sink)))
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Records that could not be buffered.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn record(&self, record: TraceRecord) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.try_send(record) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!(dropped, "Trace buffer full; dropping record")
                }
                mpsc::error::TrySendError::Closed(_) => {
                    debug!(dropped, "Trace worker gone; dropping record")
                }
            }
        }
    }

    pub fn event(&self, event: &Event) {
        if self.is_enabled() {
            self.record(TraceRecord::Event(event.clone()));
        }
    }

    pub fn step(&self, run_id: &str, turn_id: u32, step: StepKind, duration: Duration) {
        self.record(TraceRecord::Step {
            run_id: run_id.to_string(),
            turn_id,
            step,
            duration_ms: duration.as_millis() as u64,
        });
    }

    pub fn context(&self, run_id: &str, turn_id: u32, snapshot: &ContextSnapshot) {
        if self.is_enabled() {
            self.record(TraceRecord::Context {
                run_id: run_id.to_string(),
                turn_id,
                snapshot: snapshot.clone(),
            });
        }
    }
}

/// Drains a tracer's channel into a sink.
#[derive(Debug)]
pub struct TraceWorker {
    rx: mpsc::Receiver<TraceRecord>,
}

impl TraceWorker {
    /// Write records until every tracer handle is dropped. Returns the
    /// number of records written successfully.
    pub async fn run(mut self, sink: Arc<dyn TraceSink>) -> u64 {
        let mut written = 0;
        while let Some(record) = self.rx.recv().await {
            match sink.write(&record).await {
                Ok(()) => written += 1,
                Err(e) => warn!(error = %e, "Trace sink write failed"),
            }
        }
        if let Err(e) = sink.flush().await {
            warn!(error = %e, "Trace sink flush failed");
        }
        debug!(written, "Trace worker finished");
        written
    }
}
