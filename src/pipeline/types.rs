use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which transcription method(s) the caller asked for.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    YouTube,
    Whisper,
    Both,
}

impl Method {
    pub fn wants_provider(&self) -> bool {
        matches!(self, Method::YouTube | Method::Both)
    }

    pub fn wants_whisper(&self) -> bool {
        matches!(self, Method::Whisper | Method::Both)
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    FetchingTranscript,
    Downloading,
    Transcribing,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A time-aligned piece of transcript text, seconds from stream start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// The registry's whole-record view of one task. Updates replace the whole
/// snapshot; progress only moves forward while the task is live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub state: TaskState,
    pub progress: f32,
    pub message: String,
    pub youtube_transcript: Option<String>,
    pub whisper_transcript: Option<String>,
    pub segments: Vec<Segment>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    pub fn new(id: String) -> Self {
        Self {
            id,
            state: TaskState::Pending,
            progress: 0.0,
            message: "Queued".to_string(),
            youtube_transcript: None,
            whisper_transcript: None,
            segments: Vec::new(),
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[derive(Debug)]
pub enum PipelineError {
    /// URL did not match any known YouTube form; fails before any resource
    /// is allocated.
    InvalidReference(String),
    /// Provider transcript missing; only fatal when it was the sole method.
    ProviderUnavailable(String),
    /// Download failed; partial artifacts have been removed.
    AcquisitionFailed(String),
    /// The worker process errored, exited abnormally or timed out.
    WorkerFailure(String),
    /// Sink delivery exhausted its retries. Never escalates to task failure.
    DeliveryFailure(String),
    /// Result could not be durably written or verified.
    PersistenceFailure(String),
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::InvalidReference(msg) => write!(f, "invalid reference: {}", msg),
            PipelineError::ProviderUnavailable(msg) => write!(f, "{}", msg),
            PipelineError::AcquisitionFailed(msg) => write!(f, "audio acquisition failed: {}", msg),
            PipelineError::WorkerFailure(msg) => write!(f, "transcription failed: {}", msg),
            PipelineError::DeliveryFailure(msg) => write!(f, "delivery failed: {}", msg),
            PipelineError::PersistenceFailure(msg) => write!(f, "failed to persist result: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}
