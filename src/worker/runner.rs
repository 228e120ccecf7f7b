//! In-process logic of the `scribe-worker` binary.
//!
//! Runs outside the orchestrator so a model crash or OOM cannot take the
//! service's address space down with it. Progress flows out through the
//! JSON-Lines event log; the final result goes back as one JSON line on
//! stdout. On any internal error both channels are populated: an
//! `Error` event in the log and a failure result on stdout.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use tracing::{error, info};
use whisper_rs::{
    FullParams, SamplingStrategy, SegmentCallbackData, WhisperContext, WhisperContextParameters,
};

use crate::audio::parse_audio_file;
use crate::model_path;
use crate::pipeline::types::Segment;
use crate::worker::protocol::{EventLog, ProgressEvent, WorkerOutput};

/// Loaded models, kept for the worker-process lifetime so a reused process
/// skips the load. Lives here, owned by the worker, not in the orchestrator.
static MODEL_CACHE: Lazy<Mutex<HashMap<String, Arc<WhisperContext>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

#[derive(Debug, Clone)]
pub struct WorkerArgs {
    pub audio: PathBuf,
    pub model: String,
    pub progress_log: PathBuf,
}

impl WorkerArgs {
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut audio = None;
        let mut model = None;
        let mut progress_log = None;

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--audio" => audio = iter.next().map(PathBuf::from),
                "--model" => model = iter.next().cloned(),
                "--progress-log" => progress_log = iter.next().map(PathBuf::from),
                other => return Err(anyhow!("unknown argument: {}", other)),
            }
        }

        Ok(Self {
            audio: audio.ok_or_else(|| anyhow!("missing --audio"))?,
            model: model.ok_or_else(|| anyhow!("missing --model"))?,
            progress_log: progress_log.ok_or_else(|| anyhow!("missing --progress-log"))?,
        })
    }
}

/// Entry point for the worker binary. Never panics outward; every failure
/// is reported as a failure result so the orchestrator sees a clean
/// protocol exchange even when the model blows up.
pub fn run(args: &WorkerArgs) -> WorkerOutput {
    let log = EventLog::new(&args.progress_log);

    match transcribe(args, &log) {
        Ok(output) => {
            if let Err(e) = log.append(&ProgressEvent::Complete {
                message: "Transcription complete".to_string(),
            }) {
                error!("Failed to append terminal marker: {}", e);
            }
            output
        }
        Err(e) => {
            let message = e.to_string();
            // log first: the relay must see the error even if the return
            // channel is lost to a timeout
            if let Err(log_err) = log.append(&ProgressEvent::Error {
                text: message.clone(),
            }) {
                error!("Failed to append error event: {}", log_err);
            }
            WorkerOutput::failure(message)
        }
    }
}

fn load_model(model_name: &str) -> Result<Arc<WhisperContext>> {
    let mut cache = MODEL_CACHE
        .lock()
        .map_err(|_| anyhow!("model cache poisoned"))?;

    if let Some(ctx) = cache.get(model_name) {
        return Ok(ctx.clone());
    }

    let path = model_path(model_name);
    info!("Loading whisper model {} from {}", model_name, path.display());
    let ctx = WhisperContext::new_with_params(
        path.to_str()
            .ok_or_else(|| anyhow!("model path is not valid UTF-8"))?,
        WhisperContextParameters::default(),
    )
    .map_err(|e| anyhow!("failed to open whisper model {}: {}", model_name, e))?;

    let ctx = Arc::new(ctx);
    cache.insert(model_name.to_string(), ctx.clone());
    Ok(ctx)
}

fn transcribe(args: &WorkerArgs, log: &EventLog) -> Result<WorkerOutput> {
    log.append(&ProgressEvent::Debug {
        text: format!("Loading model {}", args.model),
    })?;
    let ctx = load_model(&args.model)?;

    log.append(&ProgressEvent::Debug {
        text: format!("Decoding audio {}", args.audio.display()),
    })?;
    let samples = parse_audio_file(&args.audio)?;

    let mut state = ctx.create_state()?;
    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

    // deterministic decoding: same audio in, same transcript out
    params.set_temperature(0.0);
    params.set_no_context(true);

    params.set_translate(false);
    params.set_print_special(false);
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_suppress_blank(true);
    params.set_n_threads(
        std::thread::available_parallelism()
            .map(|n| n.get() as i32)
            .unwrap_or(4),
    );

    {
        let log = log.clone();
        params.set_progress_callback_safe(move |percent: i32| {
            let _ = log.append(&ProgressEvent::Progress {
                percent: percent as f32,
                message: "Transcribing audio...".to_string(),
                download_speed: None,
                eta: None,
            });
        });
    }
    {
        let log = log.clone();
        params.set_segment_callback_safe(move |data: SegmentCallbackData| {
            let _ = log.append(&ProgressEvent::Output {
                text: data.text.trim().to_string(),
            });
        });
    }

    state.full(params, &samples)?;

    let n_segments = state.full_n_segments()?;
    let mut segments = Vec::with_capacity(n_segments as usize);
    let mut text = String::new();
    for i in 0..n_segments {
        let segment_text = state.full_get_segment_text(i)?;
        let start = state.full_get_segment_t0(i)? as f64 / 100.0;
        let end = state.full_get_segment_t1(i)? as f64 / 100.0;

        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(segment_text.trim());
        segments.push(Segment {
            text: segment_text.trim().to_string(),
            start,
            end,
        });
    }

    info!("Transcribed {} segments", segments.len());
    Ok(WorkerOutput {
        success: true,
        text,
        segments,
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let args: Vec<String> = [
            "--audio",
            "/tmp/a.wav",
            "--model",
            "base",
            "--progress-log",
            "/tmp/p.jsonl",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let parsed = WorkerArgs::parse(&args).unwrap();
        assert_eq!(parsed.audio, PathBuf::from("/tmp/a.wav"));
        assert_eq!(parsed.model, "base");
        assert_eq!(parsed.progress_log, PathBuf::from("/tmp/p.jsonl"));
    }

    #[test]
    fn test_parse_args_missing_or_unknown() {
        let missing: Vec<String> = ["--audio", "/tmp/a.wav"].iter().map(|s| s.to_string()).collect();
        assert!(WorkerArgs::parse(&missing).is_err());

        let unknown: Vec<String> = ["--frobnicate"].iter().map(|s| s.to_string()).collect();
        assert!(WorkerArgs::parse(&unknown).is_err());
    }

    #[test]
    fn test_run_reports_failure_on_both_channels() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("progress.jsonl");
        let args = WorkerArgs {
            audio: dir.path().join("missing.wav"),
            model: "no-such-model".to_string(),
            progress_log: log_path.clone(),
        };

        let output = run(&args);
        assert!(!output.success);
        assert!(output.error.is_some());

        // the log carries the same failure for the relay side
        let mut cursor = crate::worker::protocol::LogCursor::new();
        let events = cursor.read_new(&log_path).unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, ProgressEvent::Error { .. })));
    }
}
