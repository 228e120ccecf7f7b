use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, info};

use super::protocol::WorkerOutput;

/// Default bound on a single worker run. Exceeding it kills the process
/// and fails the task with a timeout error.
pub const WORKER_TIMEOUT: Duration = Duration::from_secs(600);

/// Bounded pool of transcription worker processes. Deliberately tiny: the
/// model is memory-heavy and oversubscription causes OOM kills, not mere
/// slowdown. Tasks past capacity wait on the semaphore.
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    capacity: usize,
    worker_bin: PathBuf,
    timeout: Duration,
}

impl WorkerPool {
    pub fn new(capacity: usize, worker_bin: PathBuf) -> Self {
        let capacity = capacity.clamp(1, 2);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            worker_bin,
            timeout: WORKER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Waits for a free worker slot. Callers that track task state should
    /// acquire first so a queued task is not reported as running.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| anyhow!("worker pool closed"))
    }

    /// Runs one transcription in an isolated worker process, blocking on a
    /// pool permit first.
    pub async fn transcribe(
        &self,
        audio: &Path,
        model_name: &str,
        progress_log: &Path,
    ) -> Result<WorkerOutput> {
        let permit = self.acquire().await?;
        self.transcribe_with_permit(permit, audio, model_name, progress_log)
            .await
    }

    /// Runs one transcription under an already-held permit. The log at
    /// `progress_log` is appended to by the worker and tailed by the
    /// caller's relay while this future is pending.
    pub async fn transcribe_with_permit(
        &self,
        _permit: OwnedSemaphorePermit,
        audio: &Path,
        model_name: &str,
        progress_log: &Path,
    ) -> Result<WorkerOutput> {
        info!(
            "Starting worker {} for {} (model {})",
            self.worker_bin.display(),
            audio.display(),
            model_name
        );

        let mut child = Command::new(&self.worker_bin)
            .arg("--audio")
            .arg(audio)
            .arg("--model")
            .arg(model_name)
            .arg("--progress-log")
            .arg(progress_log)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to spawn worker {}", self.worker_bin.display()))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("worker stdout not captured"))?;

        let run = async {
            let mut buf = String::new();
            stdout.read_to_string(&mut buf).await?;
            let status = child.wait().await?;
            Ok::<(String, std::process::ExitStatus), anyhow::Error>((buf, status))
        };

        let (buf, status) = match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result?,
            Err(_) => {
                error!("Worker timed out after {:?}, killing it", self.timeout);
                child.start_kill().ok();
                child.wait().await.ok();
                bail!(
                    "transcription timed out after {} seconds",
                    self.timeout.as_secs()
                );
            }
        };

        // the result is the last line of stdout; anything before it is noise
        let last_line = buf.lines().rev().find(|line| !line.trim().is_empty());
        match last_line {
            Some(line) => serde_json::from_str::<WorkerOutput>(line)
                .with_context(|| format!("worker returned unparseable result: {}", line)),
            None if status.success() => bail!("worker exited without returning a result"),
            None => bail!("worker exited abnormally with {}", status),
        }
    }
}
