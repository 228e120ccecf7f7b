//! Progress relay: tails a worker's event log, rescales phase-local
//! progress into the task's overall range, throttles bursty updates and
//! pushes them to the caller's sink with retry. Terminal updates are
//! delivered twice on purpose; transports have been seen dropping the very
//! last message during teardown.

mod sink;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

pub use sink::{BroadcastSink, HttpSink, ProgressSink};

use crate::pipeline::types::{PipelineError, Segment, TaskSnapshot, TaskState};
use crate::pipeline::TaskRegistry;
use crate::worker::protocol::{LogCursor, ProgressEvent, WorkerOutput};

pub const ORDINARY_ATTEMPTS: u32 = 3;
pub const TERMINAL_ATTEMPTS: u32 = 5;

const DEFAULT_MIN_EMIT_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_TERMINAL_GAP: Duration = Duration::from_millis(500);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// One progress update as seen by a caller. Every update carries the task
/// id so multiplexed consumers can route it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub task_id: String,
    pub progress: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_speed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
    #[serde(default)]
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whisper_transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<Segment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A registry snapshot rendered as a wire update, so a late subscriber's
/// first frame has the same shape as everything that follows.
impl From<&TaskSnapshot> for TaskUpdate {
    fn from(snapshot: &TaskSnapshot) -> Self {
        TaskUpdate {
            task_id: snapshot.id.clone(),
            progress: snapshot.progress,
            message: Some(snapshot.message.clone()),
            download_speed: None,
            eta: None,
            complete: snapshot.is_terminal(),
            success: match snapshot.state {
                TaskState::Completed => Some(true),
                TaskState::Failed => Some(false),
                _ => None,
            },
            youtube_transcript: snapshot.youtube_transcript.clone(),
            whisper_transcript: snapshot.whisper_transcript.clone(),
            segments: if snapshot.segments.is_empty() {
                None
            } else {
                Some(snapshot.segments.clone())
            },
            error: snapshot.error.clone(),
        }
    }
}

/// The slice of the task's overall 0-100 progress a phase owns. Worker
/// percent is phase-local and gets rescaled into this range.
#[derive(Debug, Clone, Copy)]
pub struct PhaseRange {
    pub start: f32,
    pub end: f32,
}

impl PhaseRange {
    pub fn scale(&self, percent: f32) -> f32 {
        let percent = percent.clamp(0.0, 100.0);
        self.start + (self.end - self.start) * percent / 100.0
    }
}

/// Attempts `sink.send` with exponential backoff. Exhaustion is reported to
/// the caller for logging but never escalates: the registry stays the
/// authoritative record of the task.
pub async fn deliver(
    sink: &dyn ProgressSink,
    update: &TaskUpdate,
    attempts: u32,
    initial_backoff: Duration,
) -> Result<(), PipelineError> {
    let mut backoff = initial_backoff;
    let mut last_err = String::new();

    for attempt in 1..=attempts {
        match sink.send(update).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                last_err = e.to_string();
                if attempt < attempts {
                    debug!(
                        "Delivery attempt {}/{} for task {} failed: {}",
                        attempt, attempts, update.task_id, last_err
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    Err(PipelineError::DeliveryFailure(format!(
        "gave up after {} attempts: {}",
        attempts, last_err
    )))
}

/// Per-task emission state shared by the pipeline and the relay loop:
/// registry bookkeeping, sink delivery, throttling and terminal
/// duplication all live here.
pub struct Emitter {
    task_id: String,
    sink: Arc<dyn ProgressSink>,
    registry: Arc<TaskRegistry>,
    min_emit_interval: Duration,
    initial_backoff: Duration,
    terminal_gap: Duration,
    last_emit: Mutex<Option<Instant>>,
}

impl Emitter {
    pub fn new(task_id: String, sink: Arc<dyn ProgressSink>, registry: Arc<TaskRegistry>) -> Self {
        Self {
            task_id,
            sink,
            registry,
            min_emit_interval: DEFAULT_MIN_EMIT_INTERVAL,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            terminal_gap: DEFAULT_TERMINAL_GAP,
            last_emit: Mutex::new(None),
        }
    }

    #[cfg(test)]
    fn with_timing(
        mut self,
        min_emit_interval: Duration,
        initial_backoff: Duration,
        terminal_gap: Duration,
    ) -> Self {
        self.min_emit_interval = min_emit_interval;
        self.initial_backoff = initial_backoff;
        self.terminal_gap = terminal_gap;
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    fn base_update(&self, progress: f32) -> TaskUpdate {
        TaskUpdate {
            task_id: self.task_id.clone(),
            progress,
            ..Default::default()
        }
    }

    async fn current_progress(&self) -> f32 {
        self.registry
            .get(&self.task_id)
            .await
            .map(|s| s.progress)
            .unwrap_or(0.0)
    }

    /// Records overall progress in the registry and forwards it to the
    /// sink unless the previous emission was under the minimum interval
    /// ago. The registry is always updated; only sink traffic is bounded.
    /// The emitted value is clamped to the registry's high-water mark so
    /// the sink stream never moves backwards, even when a restarted source
    /// re-reports from zero.
    pub async fn progress(
        &self,
        progress: f32,
        message: &str,
        download_speed: Option<String>,
        eta: Option<String>,
    ) {
        let mut progress = progress;
        if let Some(mut snapshot) = self.registry.get(&self.task_id).await {
            progress = progress.max(snapshot.progress);
            snapshot.progress = progress;
            snapshot.message = message.to_string();
            self.registry.update(&self.task_id, snapshot).await;
        }

        {
            let mut last = self.last_emit.lock().await;
            if let Some(at) = *last {
                if at.elapsed() < self.min_emit_interval {
                    return;
                }
            }
            *last = Some(Instant::now());
        }

        let mut update = self.base_update(progress);
        update.message = Some(message.to_string());
        update.download_speed = download_speed;
        update.eta = eta;
        if let Err(e) = deliver(&*self.sink, &update, ORDINARY_ATTEMPTS, self.initial_backoff).await
        {
            warn!("Dropped progress update for task {}: {}", self.task_id, e);
        }
    }

    /// Debug/output lines: forwarded immediately, never throttled.
    pub async fn note(&self, text: &str) {
        let mut update = self.base_update(self.current_progress().await);
        update.message = Some(text.to_string());
        if let Err(e) = deliver(&*self.sink, &update, ORDINARY_ATTEMPTS, self.initial_backoff).await
        {
            warn!("Dropped note for task {}: {}", self.task_id, e);
        }
    }

    /// A non-fatal error surfaced mid-run (worker error event, degraded
    /// provider). Recorded on the snapshot and forwarded immediately; the
    /// task keeps running.
    pub async fn soft_error(&self, text: &str) {
        if let Some(mut snapshot) = self.registry.get(&self.task_id).await {
            snapshot.error = Some(text.to_string());
            self.registry.update(&self.task_id, snapshot).await;
        }

        let mut update = self.base_update(self.current_progress().await);
        update.error = Some(text.to_string());
        if let Err(e) = deliver(&*self.sink, &update, ORDINARY_ATTEMPTS, self.initial_backoff).await
        {
            warn!("Dropped error update for task {}: {}", self.task_id, e);
        }
    }

    /// Delivers a terminal update twice with a short gap. Receivers must
    /// treat the duplicate idempotently.
    pub async fn terminal(&self, update: TaskUpdate) {
        for round in 0..2 {
            if let Err(e) =
                deliver(&*self.sink, &update, TERMINAL_ATTEMPTS, self.initial_backoff).await
            {
                warn!(
                    "Terminal delivery round {} for task {} failed: {}",
                    round + 1,
                    self.task_id,
                    e
                );
            }
            if round == 0 {
                tokio::time::sleep(self.terminal_gap).await;
            }
        }
    }
}

/// Tails one task's event log while its worker runs, forwarding decoded
/// events through the emitter in file-append order.
pub struct ProgressRelay {
    cursor: LogCursor,
    poll_interval: Duration,
}

impl Default for ProgressRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressRelay {
    pub fn new() -> Self {
        Self {
            cursor: LogCursor::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Polls the log until the worker future resolves, then drains the
    /// tail. Returns the worker's result; terminal emission stays with the
    /// caller, which knows the task's full outcome.
    pub async fn pump<F>(
        &mut self,
        log_path: &Path,
        phase: PhaseRange,
        emitter: &Emitter,
        worker: F,
    ) -> Result<WorkerOutput>
    where
        F: std::future::Future<Output = Result<WorkerOutput>>,
    {
        tokio::pin!(worker);

        let result = loop {
            tokio::select! {
                result = &mut worker => break result,
                _ = tokio::time::sleep(self.poll_interval) => {
                    self.drain(log_path, phase, emitter).await;
                }
            }
        };

        // pick up whatever landed between the last poll and process exit
        self.drain(log_path, phase, emitter).await;
        result
    }

    async fn drain(&mut self, log_path: &Path, phase: PhaseRange, emitter: &Emitter) {
        let events = match self.cursor.read_new(log_path) {
            Ok(events) => events,
            Err(e) => {
                warn!("Failed to read progress log {}: {}", log_path.display(), e);
                return;
            }
        };

        for event in events {
            match event {
                ProgressEvent::Progress {
                    percent,
                    message,
                    download_speed,
                    eta,
                } => {
                    emitter
                        .progress(phase.scale(percent), &message, download_speed, eta)
                        .await;
                }
                ProgressEvent::Output { text } | ProgressEvent::Debug { text } => {
                    emitter.note(&text).await;
                }
                ProgressEvent::Error { text } => {
                    // not terminal by itself; the worker's returned result
                    // is the authoritative failure signal
                    emitter.soft_error(&text).await;
                }
                ProgressEvent::Complete { message } => {
                    debug!("Worker marked task {} complete: {}", emitter.task_id(), message);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::protocol::EventLog;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct CollectingSink {
        updates: StdMutex<Vec<TaskUpdate>>,
    }

    impl CollectingSink {
        fn collected(&self) -> Vec<TaskUpdate> {
            self.updates.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProgressSink for CollectingSink {
        async fn send(&self, update: &TaskUpdate) -> Result<()> {
            self.updates.lock().unwrap().push(update.clone());
            Ok(())
        }
    }

    struct FlakySink {
        fail_first: u32,
        attempts: AtomicU32,
        delivered: StdMutex<Vec<TaskUpdate>>,
    }

    impl FlakySink {
        fn new(fail_first: u32) -> Self {
            Self {
                fail_first,
                attempts: AtomicU32::new(0),
                delivered: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProgressSink for FlakySink {
        async fn send(&self, update: &TaskUpdate) -> Result<()> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                anyhow::bail!("transient failure {}", n);
            }
            self.delivered.lock().unwrap().push(update.clone());
            Ok(())
        }
    }

    fn fast_emitter(
        task_id: &str,
        sink: Arc<dyn ProgressSink>,
        registry: Arc<TaskRegistry>,
    ) -> Emitter {
        Emitter::new(task_id.to_string(), sink, registry).with_timing(
            Duration::from_millis(0),
            Duration::from_millis(5),
            Duration::from_millis(5),
        )
    }

    #[test]
    fn test_phase_scaling() {
        let phase = PhaseRange {
            start: 60.0,
            end: 100.0,
        };
        assert_eq!(phase.scale(0.0), 60.0);
        assert_eq!(phase.scale(50.0), 80.0);
        assert_eq!(phase.scale(100.0), 100.0);
        // out-of-range worker values are clamped
        assert_eq!(phase.scale(150.0), 100.0);
        assert_eq!(phase.scale(-5.0), 60.0);
    }

    #[tokio::test]
    async fn test_deliver_retries_then_succeeds() {
        let sink = FlakySink::new(2);
        let update = TaskUpdate {
            task_id: "t1".to_string(),
            ..Default::default()
        };
        deliver(&sink, &update, 3, Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deliver_gives_up_after_attempts() {
        let sink = FlakySink::new(u32::MAX);
        let update = TaskUpdate::default();
        let err = deliver(&sink, &update, 3, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DeliveryFailure(_)));
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_delivered_twice() {
        let sink = Arc::new(CollectingSink::default());
        let registry = Arc::new(TaskRegistry::new());
        let emitter = fast_emitter("t1", sink.clone(), registry);

        let update = TaskUpdate {
            task_id: "t1".to_string(),
            progress: 100.0,
            complete: true,
            success: Some(true),
            ..Default::default()
        };
        emitter.terminal(update).await;

        let collected = sink.collected();
        assert_eq!(collected.len(), 2);
        assert!(collected.iter().all(|u| u.complete));
    }

    #[tokio::test]
    async fn test_progress_throttled_but_registry_current() {
        let sink = Arc::new(CollectingSink::default());
        let registry = Arc::new(TaskRegistry::new());
        registry.create("t1").await;

        let emitter = Emitter::new("t1".to_string(), sink.clone(), registry.clone()).with_timing(
            Duration::from_secs(60),
            Duration::from_millis(5),
            Duration::from_millis(5),
        );

        emitter.progress(10.0, "Downloading audio...", None, None).await;
        emitter.progress(20.0, "Downloading audio...", None, None).await;
        emitter.progress(30.0, "Downloading audio...", None, None).await;

        // only the first emission got past the throttle
        assert_eq!(sink.collected().len(), 1);
        // the registry still carries the latest value
        assert_eq!(registry.get("t1").await.unwrap().progress, 30.0);
    }

    #[tokio::test]
    async fn test_emitted_progress_never_decreases() {
        let sink = Arc::new(CollectingSink::default());
        let registry = Arc::new(TaskRegistry::new());
        registry.create("t1").await;
        let emitter = fast_emitter("t1", sink.clone(), registry.clone());

        emitter.progress(50.0, "Downloading audio...", None, None).await;
        // a source restarting from zero must not drag the stream back
        emitter.progress(10.0, "Downloading audio...", None, None).await;

        let collected = sink.collected();
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0].progress, 50.0);
        assert_eq!(collected[1].progress, 50.0);
        assert_eq!(registry.get("t1").await.unwrap().progress, 50.0);
    }

    #[test]
    fn test_snapshot_maps_to_update_shape() {
        let mut snapshot = TaskSnapshot::new("t9".to_string());
        snapshot.state = TaskState::Failed;
        snapshot.progress = 100.0;
        snapshot.error = Some("worker exploded".to_string());

        let update = TaskUpdate::from(&snapshot);
        assert_eq!(update.task_id, "t9");
        assert_eq!(update.progress, 100.0);
        assert!(update.complete);
        assert_eq!(update.success, Some(false));
        assert_eq!(update.error.as_deref(), Some("worker exploded"));
        assert!(update.segments.is_none());
    }

    #[tokio::test]
    async fn test_notes_not_throttled() {
        let sink = Arc::new(CollectingSink::default());
        let registry = Arc::new(TaskRegistry::new());
        registry.create("t1").await;

        let emitter = Emitter::new("t1".to_string(), sink.clone(), registry).with_timing(
            Duration::from_secs(60),
            Duration::from_millis(5),
            Duration::from_millis(5),
        );

        emitter.note("loaded model").await;
        emitter.note("decoded audio").await;
        assert_eq!(sink.collected().len(), 2);
    }

    #[tokio::test]
    async fn test_pump_scales_and_orders_events() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("progress.jsonl");
        let log = EventLog::new(&log_path);

        let sink = Arc::new(CollectingSink::default());
        let registry = Arc::new(TaskRegistry::new());
        registry.create("t1").await;
        let emitter = fast_emitter("t1", sink.clone(), registry);

        log.append(&ProgressEvent::Debug {
            text: "starting".to_string(),
        })
        .unwrap();
        log.append(&ProgressEvent::Progress {
            percent: 50.0,
            message: "Transcribing audio...".to_string(),
            download_speed: None,
            eta: None,
        })
        .unwrap();

        let mut relay = ProgressRelay::new().with_poll_interval(Duration::from_millis(10));
        let phase = PhaseRange {
            start: 60.0,
            end: 100.0,
        };
        let worker = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(WorkerOutput {
                success: true,
                text: "done".to_string(),
                segments: vec![],
                error: None,
            })
        };

        let output = relay.pump(&log_path, phase, &emitter, worker).await.unwrap();
        assert!(output.success);

        let collected = sink.collected();
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0].message.as_deref(), Some("starting"));
        assert_eq!(collected[1].progress, 80.0);
    }

    #[tokio::test]
    async fn test_error_event_does_not_stop_pump() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("progress.jsonl");
        let log = EventLog::new(&log_path);

        let sink = Arc::new(CollectingSink::default());
        let registry = Arc::new(TaskRegistry::new());
        registry.create("t1").await;
        let emitter = fast_emitter("t1", sink.clone(), registry);

        log.append(&ProgressEvent::Error {
            text: "cuda hiccup".to_string(),
        })
        .unwrap();
        log.append(&ProgressEvent::Output {
            text: "hello".to_string(),
        })
        .unwrap();

        let mut relay = ProgressRelay::new().with_poll_interval(Duration::from_millis(10));
        let worker = async {
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok(WorkerOutput {
                success: true,
                text: "hello".to_string(),
                segments: vec![],
                error: None,
            })
        };

        let output = relay
            .pump(
                &log_path,
                PhaseRange {
                    start: 0.0,
                    end: 100.0,
                },
                &emitter,
                worker,
            )
            .await
            .unwrap();
        assert!(output.success);

        let collected = sink.collected();
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0].error.as_deref(), Some("cuda hiccup"));
        assert_eq!(collected[1].message.as_deref(), Some("hello"));
    }
}
