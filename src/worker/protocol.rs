//! Wire protocol between the worker process and the progress relay.
//!
//! The worker appends one JSON event per line to a per-task log file; the
//! relay tails the file with a monotonically advancing byte cursor. The
//! worker's final result travels over its stdout, not the log; the log only
//! carries a terminal marker so the relay can react even if the return
//! channel is lost.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::pipeline::types::Segment;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "event")]
pub enum ProgressEvent {
    /// Fractional progress of the current worker phase, 0-100.
    Progress {
        percent: f32,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        download_speed: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eta: Option<String>,
    },
    /// Text the model produced mid-run (decoded segments as they land).
    Output { text: String },
    Debug { text: String },
    Error { text: String },
    /// Terminal marker. The result itself is returned over stdout.
    Complete { message: String },
}

/// Final result of one worker run, printed as a single JSON line on the
/// worker's stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOutput {
    pub success: bool,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerOutput {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            text: String::new(),
            segments: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Append-only writer side of the log. Only the worker process holds one.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, event: &ProgressEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(event)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

/// Reader side: remembers the byte offset of the last complete line it
/// consumed and never re-reads or skips past unfinished writes.
#[derive(Debug, Default)]
pub struct LogCursor {
    offset: u64,
}

impl LogCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Decodes every complete line appended since the last call. A missing
    /// file means the worker has not started writing yet. Malformed lines
    /// are logged and skipped, never fatal.
    pub fn read_new(&mut self, path: &Path) -> Result<Vec<ProgressEvent>> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        // only consume up to the last newline; a trailing partial line is
        // left for the next pass
        let complete = match buf.iter().rposition(|&b| b == b'\n') {
            Some(pos) => pos + 1,
            None => return Ok(Vec::new()),
        };

        let mut events = Vec::new();
        for line in buf[..complete].split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<ProgressEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(
                    "Skipping malformed progress line at offset {}: {}",
                    self.offset, e
                ),
            }
        }

        self.offset += complete as u64;
        Ok(events)
    }
}
