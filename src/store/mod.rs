//! Durable result persistence. One JSON file per completed task; the file
//! is verified readable and non-empty before the task may report success.

mod json;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use json::JsonResultStore;

use crate::pipeline::types::{Method, Segment};

/// The durable record of a completed transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResult {
    pub task_id: String,
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whisper_transcript: Option<String>,
    #[serde(default)]
    pub segments: Vec<Segment>,
    pub completed_at: DateTime<Utc>,
}

#[async_trait]
pub trait ResultStore: Send + Sync + 'static {
    /// Persists the result and verifies it landed on disk. A save that
    /// cannot be verified is an error; the caller fails the task.
    async fn save(&self, result: &StoredResult) -> Result<()>;

    async fn get(&self, task_id: &str) -> Result<Option<StoredResult>>;

    /// All stored results, newest first. Unreadable entries are skipped.
    async fn list_all(&self) -> Result<Vec<StoredResult>>;

    /// Removes every stored result, returning how many were deleted.
    async fn clear_all(&self) -> Result<usize>;
}
