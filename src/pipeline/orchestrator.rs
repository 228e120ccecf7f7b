use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info};
use uuid::Uuid;

use crate::acquire::{self, DownloadProgress};
use crate::relay::{Emitter, PhaseRange, ProgressRelay, ProgressSink, TaskUpdate};
use crate::resolver::{self, TranscriptProvider};
use crate::store::{ResultStore, StoredResult};
use crate::worker::{WorkerOutput, WorkerPool};
use crate::TEMP_PATH;

use super::types::{Method, PipelineError, Segment, TaskState};
use super::TaskRegistry;

/// A provider transcript frees the whisper path from the first 30% of the
/// bar: download then owns 30..60 and transcription 60..100. Without one,
/// download owns 0..30 and transcription 30..100. A file submission skips
/// both early phases and transcription owns the whole bar.
const DOWNLOAD_SPAN: f32 = 30.0;

const MAX_CONCURRENT_DOWNLOADS: usize = 4;

/// What the caller handed us: a YouTube reference to resolve and download,
/// or an already-uploaded audio file.
#[derive(Debug, Clone)]
pub enum SubmitSource {
    Url(String),
    File(PathBuf),
}

impl Display for SubmitSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitSource::Url(url) => write!(f, "{}", url),
            SubmitSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub source: SubmitSource,
    pub method: Method,
    pub model_name: String,
}

struct PipelineOutcome {
    youtube_transcript: Option<String>,
    whisper_transcript: Option<String>,
    segments: Vec<Segment>,
}

/// Drives each submitted task through its phases on a spawned tokio task.
/// The registry snapshot is kept current throughout; the sink only ever
/// sees a trail of updates ending in a duplicated terminal one.
pub struct Orchestrator {
    registry: Arc<TaskRegistry>,
    store: Arc<dyn ResultStore>,
    provider: Arc<dyn TranscriptProvider>,
    pool: Arc<WorkerPool>,
    sink: Arc<dyn ProgressSink>,
    io_permits: Semaphore,
    language: String,
    temp_root: PathBuf,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<TaskRegistry>,
        store: Arc<dyn ResultStore>,
        provider: Arc<dyn TranscriptProvider>,
        pool: Arc<WorkerPool>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            registry,
            store,
            provider,
            pool,
            sink,
            io_permits: Semaphore::new(MAX_CONCURRENT_DOWNLOADS),
            language: "en".to_string(),
            temp_root: TEMP_PATH.clone(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Where per-task working directories are created.
    pub fn with_temp_root(mut self, temp_root: impl Into<PathBuf>) -> Self {
        self.temp_root = temp_root.into();
        self
    }

    /// Registers a task and spawns its pipeline. Returns immediately with
    /// the new task id; outcome is observed via the registry, the sink or
    /// the store.
    pub async fn submit(self: Arc<Self>, req: SubmitRequest) -> String {
        let task_id = format!("task-{}", Uuid::new_v4());
        self.registry.create(&task_id).await;
        info!(
            "Submitted task {} for {} ({})",
            task_id, req.source, req.method
        );

        let this = self;
        let id = task_id.clone();
        tokio::spawn(async move {
            this.run_pipeline(id, req).await;
        });
        task_id
    }

    async fn run_pipeline(self: Arc<Self>, task_id: String, req: SubmitRequest) {
        let emitter = Emitter::new(
            task_id.clone(),
            self.sink.clone(),
            self.registry.clone(),
        );

        match self.execute(&task_id, &req, &emitter).await {
            Ok(outcome) => {
                let result = StoredResult {
                    task_id: task_id.clone(),
                    method: req.method,
                    youtube_transcript: outcome.youtube_transcript.clone(),
                    whisper_transcript: outcome.whisper_transcript.clone(),
                    segments: outcome.segments.clone(),
                    completed_at: Utc::now(),
                };
                // persistence comes before any success signal; an
                // unverified write fails the task
                if let Err(e) = self.store.save(&result).await {
                    error!("Failed to persist result for {}: {}", task_id, e);
                    let err = PipelineError::PersistenceFailure(e.to_string());
                    self.finish_failed(&task_id, &emitter, &err).await;
                    return;
                }
                self.finish_completed(&task_id, &emitter, outcome).await;
            }
            Err(e) => {
                error!("Task {} failed: {}", task_id, e);
                self.finish_failed(&task_id, &emitter, &e).await;
            }
        }
    }

    async fn execute(
        &self,
        task_id: &str,
        req: &SubmitRequest,
        emitter: &Emitter,
    ) -> Result<PipelineOutcome, PipelineError> {
        match &req.source {
            SubmitSource::Url(url) => self.execute_url(task_id, url, req, emitter).await,
            SubmitSource::File(path) => self.execute_file(task_id, path, req, emitter).await,
        }
    }

    async fn execute_url(
        &self,
        task_id: &str,
        url: &str,
        req: &SubmitRequest,
        emitter: &Emitter,
    ) -> Result<PipelineOutcome, PipelineError> {
        let video_id = resolver::extract_video_id(url)
            .ok_or_else(|| PipelineError::InvalidReference(url.to_string()))?
            .to_string();
        info!("Task {} resolved video id {}", task_id, video_id);

        let mut youtube_transcript = None;
        if req.method.wants_provider() {
            self.set_state(
                task_id,
                TaskState::FetchingTranscript,
                0.0,
                "Fetching YouTube transcript...",
            )
            .await;
            emitter
                .progress(0.0, "Fetching YouTube transcript...", None, None)
                .await;

            match self.provider.fetch(&video_id, &self.language).await {
                Ok(transcript) => {
                    youtube_transcript = Some(transcript.text);
                    if let Some(mut snapshot) = self.registry.get(task_id).await {
                        snapshot.youtube_transcript = youtube_transcript.clone();
                        self.registry.update(task_id, snapshot).await;
                    }
                }
                Err(e) => {
                    if req.method == Method::YouTube {
                        return Err(PipelineError::ProviderUnavailable(e.to_string()));
                    }
                    // degraded, not fatal: the whisper path still runs
                    emitter
                        .soft_error(&format!("YouTube transcript unavailable: {}", e))
                        .await;
                }
            }

            if req.method == Method::YouTube {
                return Ok(PipelineOutcome {
                    youtube_transcript,
                    whisper_transcript: None,
                    segments: Vec::new(),
                });
            }
        }

        let download_start: f32 = if youtube_transcript.is_some() {
            DOWNLOAD_SPAN
        } else {
            0.0
        };

        // owns audio.wav and progress.jsonl; dropped on every exit path,
        // so a failed task leaves nothing behind
        let workdir = self.workdir()?;
        let audio_path = workdir.path().join("audio.wav");
        let log_path = workdir.path().join("progress.jsonl");

        self.set_state(
            task_id,
            TaskState::Downloading,
            download_start,
            "Downloading audio...",
        )
        .await;
        {
            let _permit = self.io_permits.acquire().await.map_err(|_| {
                PipelineError::AcquisitionFailed("download slots closed".to_string())
            })?;

            let (tx, mut rx) = mpsc::unbounded_channel::<DownloadProgress>();
            let download = async {
                let sender = tx.clone();
                let result = acquire::acquire_audio(url, &audio_path, move |p| {
                    let _ = sender.send(p);
                })
                .await;
                drop(tx);
                result
            };
            let forward = async {
                while let Some(p) = rx.recv().await {
                    emitter
                        .progress(
                            download_start + p.percent * DOWNLOAD_SPAN / 100.0,
                            "Downloading audio...",
                            p.download_speed,
                            p.eta,
                        )
                        .await;
                }
            };
            let (downloaded, ()) = tokio::join!(download, forward);
            downloaded.map_err(|e| PipelineError::AcquisitionFailed(e.to_string()))?;
        }

        let phase = PhaseRange {
            start: download_start + DOWNLOAD_SPAN,
            end: 100.0,
        };
        let output = self
            .transcribe_phase(task_id, &req.model_name, emitter, &audio_path, &log_path, phase)
            .await?;

        Ok(PipelineOutcome {
            youtube_transcript,
            whisper_transcript: Some(output.text),
            segments: output.segments,
        })
    }

    /// Uploaded-audio path: no resolver, no provider, no download. The
    /// staged file moves into the task workdir so cleanup covers it, and
    /// transcription owns the full progress bar.
    async fn execute_file(
        &self,
        task_id: &str,
        path: &Path,
        req: &SubmitRequest,
        emitter: &Emitter,
    ) -> Result<PipelineOutcome, PipelineError> {
        let workdir = self.workdir()?;
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "audio.wav".into());
        let audio_path = workdir.path().join(file_name);
        stage_upload(path, &audio_path)?;
        let log_path = workdir.path().join("progress.jsonl");

        let phase = PhaseRange {
            start: 0.0,
            end: 100.0,
        };
        let output = self
            .transcribe_phase(task_id, &req.model_name, emitter, &audio_path, &log_path, phase)
            .await?;

        Ok(PipelineOutcome {
            youtube_transcript: None,
            whisper_transcript: Some(output.text),
            segments: output.segments,
        })
    }

    /// Runs the worker under a relay. The pool permit is acquired before
    /// the task is reported as Transcribing, so tasks queued behind a full
    /// pool keep their previous state until a slot frees.
    async fn transcribe_phase(
        &self,
        task_id: &str,
        model_name: &str,
        emitter: &Emitter,
        audio_path: &Path,
        log_path: &Path,
        phase: PhaseRange,
    ) -> Result<WorkerOutput, PipelineError> {
        let permit = self
            .pool
            .acquire()
            .await
            .map_err(|e| PipelineError::WorkerFailure(e.to_string()))?;

        self.set_state(
            task_id,
            TaskState::Transcribing,
            phase.start,
            "Transcribing audio...",
        )
        .await;
        emitter
            .progress(phase.start, "Transcribing audio...", None, None)
            .await;

        let mut relay = ProgressRelay::new();
        let worker = self
            .pool
            .transcribe_with_permit(permit, audio_path, model_name, log_path);
        let output = relay
            .pump(log_path, phase, emitter, worker)
            .await
            .map_err(|e| PipelineError::WorkerFailure(e.to_string()))?;
        if !output.success {
            let reason = output
                .error
                .unwrap_or_else(|| "worker reported failure".to_string());
            return Err(PipelineError::WorkerFailure(reason));
        }

        if let Some(mut snapshot) = self.registry.get(task_id).await {
            snapshot.whisper_transcript = Some(output.text.clone());
            snapshot.segments = output.segments.clone();
            self.registry.update(task_id, snapshot).await;
        }

        Ok(output)
    }

    fn workdir(&self) -> Result<tempfile::TempDir, PipelineError> {
        tempfile::Builder::new()
            .prefix("transcription-")
            .tempdir_in(&self.temp_root)
            .map_err(|e| {
                PipelineError::AcquisitionFailed(format!("failed to create temp dir: {}", e))
            })
    }

    async fn set_state(&self, task_id: &str, state: TaskState, progress: f32, message: &str) {
        if let Some(mut snapshot) = self.registry.get(task_id).await {
            snapshot.state = state;
            snapshot.progress = progress;
            snapshot.message = message.to_string();
            self.registry.update(task_id, snapshot).await;
        }
    }

    async fn finish_completed(&self, task_id: &str, emitter: &Emitter, outcome: PipelineOutcome) {
        if let Some(mut snapshot) = self.registry.get(task_id).await {
            snapshot.state = TaskState::Completed;
            snapshot.progress = 100.0;
            snapshot.message = "Transcription complete".to_string();
            snapshot.youtube_transcript = outcome.youtube_transcript.clone();
            snapshot.whisper_transcript = outcome.whisper_transcript.clone();
            snapshot.segments = outcome.segments.clone();
            snapshot.completed_at = Some(Utc::now());
            self.registry.update(task_id, snapshot).await;
        }

        emitter
            .terminal(TaskUpdate {
                task_id: task_id.to_string(),
                progress: 100.0,
                message: Some("Transcription complete".to_string()),
                complete: true,
                success: Some(true),
                youtube_transcript: outcome.youtube_transcript,
                whisper_transcript: outcome.whisper_transcript,
                segments: Some(outcome.segments),
                ..Default::default()
            })
            .await;
        info!("Task {} completed", task_id);
    }

    async fn finish_failed(&self, task_id: &str, emitter: &Emitter, err: &PipelineError) {
        let reason = err.to_string();
        if let Some(mut snapshot) = self.registry.get(task_id).await {
            snapshot.state = TaskState::Failed;
            snapshot.progress = 100.0;
            snapshot.message = "Transcription failed".to_string();
            snapshot.error = Some(reason.clone());
            snapshot.completed_at = Some(Utc::now());
            self.registry.update(task_id, snapshot).await;
        }

        emitter
            .terminal(TaskUpdate {
                task_id: task_id.to_string(),
                progress: 100.0,
                message: Some("Transcription failed".to_string()),
                complete: true,
                success: Some(false),
                error: Some(reason),
                ..Default::default()
            })
            .await;
    }
}

/// Moves an uploaded file into the task workdir, falling back to
/// copy-then-remove across filesystems.
fn stage_upload(src: &Path, dest: &Path) -> Result<(), PipelineError> {
    if std::fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    std::fs::copy(src, dest).map_err(|e| {
        PipelineError::AcquisitionFailed(format!("failed to stage uploaded file: {}", e))
    })?;
    let _ = std::fs::remove_file(src);
    Ok(())
}
