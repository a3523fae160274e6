//! Append-only audit trail of ranking and feedback calls.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::ranker::RankingMode;

/// One audit record. Serialised with a `kind` tag of `rank` or `feedback`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEvent {
    Rank {
        timestamp_ms: i64,
        train_step: u64,
        mode: RankingMode,
        tasks_in: usize,
        tasks_out: usize,
        top_id: Option<String>,
        alpha: f64,
        beta: f64,
    },
    Feedback {
        timestamp_ms: i64,
        train_step: u64,
        annotator_id: String,
        accepted: usize,
        rejected: usize,
        labels_used: usize,
        alpha: f64,
        beta: f64,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("failed to write trace: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode trace event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("trace writer has stopped")]
    Closed,
    #[error("trace writer panicked")]
    Panicked,
}

/// Receives one event per ranking call and per feedback batch. The service
/// treats a failed `record` as a warning, never as a failed call.
pub trait TraceSink: Send + Sync {
    fn record(&self, event: TraceEvent) -> Result<(), TraceError>;
}

/// Sends events to a background thread that appends them to a JSONL file.
/// Cheap to clone; every clone feeds the same file.
#[derive(Clone)]
pub struct JsonlTraceSink {
    events: mpsc::Sender<TraceEvent>,
}

/// Handle to the writer thread. Drop every sink (including the one held by
/// the service) before joining, or `join` waits forever.
pub struct TraceWorker {
    writer: Option<thread::JoinHandle<Result<usize, TraceError>>>,
}

impl TraceWorker {
    /// Wait for the writer to drain. Returns how many events were written.
    pub fn join(mut self) -> Result<usize, TraceError> {
        let Some(writer) = self.writer.take() else {
            return Ok(0);
        };
        writer.join().map_err(|_| TraceError::Panicked)?
    }
}

impl JsonlTraceSink {
    /// Open `path` for appending, so a restarted session extends the same
    /// audit file, and start the writer thread.
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, TraceWorker), TraceError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (events, inbox) = mpsc::channel();
        let writer = thread::spawn(move || append_events(file, inbox));
        Ok((Self { events }, TraceWorker { writer: Some(writer) }))
    }
}

impl TraceSink for JsonlTraceSink {
    fn record(&self, event: TraceEvent) -> Result<(), TraceError> {
        self.events.send(event).map_err(|_| TraceError::Closed)
    }
}

/// One line per event, flushed as it arrives so a crash loses at most the
/// event being written.
fn append_events(file: File, inbox: mpsc::Receiver<TraceEvent>) -> Result<usize, TraceError> {
    let mut out = BufWriter::new(file);
    let mut written = 0;
    for event in inbox {
        serde_json::to_writer(&mut out, &event)?;
        out.write_all(b"\n")?;
        out.flush()?;
        written += 1;
    }
    Ok(written)
}

/// Wall-clock milliseconds since the Unix epoch, 0 if the clock is before it.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
