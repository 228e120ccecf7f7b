pub mod acquire;
pub mod audio;
pub mod pipeline;
pub mod relay;
pub mod resolver;
pub mod store;
pub mod utils;
pub mod web;
pub mod worker;

use std::sync::Arc;
use std::{env, path::PathBuf};

use once_cell::sync::Lazy;

use pipeline::Orchestrator;
use pipeline::TaskRegistry;
use relay::BroadcastSink;
use store::ResultStore;

pub struct AppContext {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<TaskRegistry>,
    pub store: Arc<dyn ResultStore>,
    pub events: BroadcastSink,
}

const SCRIBE_DATA_PATH: &str = "./scribe_data";
const SCRIBE_MODELS_PATH: &str = "./models";

fn env_or(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) => v,
        Err(_) => dotenv::var(key).unwrap_or_else(|_| default.to_string()),
    }
}

/// Root for durable state: results live under `<root>/results`,
/// per-task temp dirs under `<root>/tmp`.
pub static DATA_PATH: Lazy<PathBuf> =
    Lazy::new(|| PathBuf::from(env_or("SCRIBE_DATA_PATH", SCRIBE_DATA_PATH)));

pub static RESULTS_PATH: Lazy<PathBuf> = Lazy::new(|| DATA_PATH.join("results"));

pub static TEMP_PATH: Lazy<PathBuf> = Lazy::new(|| DATA_PATH.join("tmp"));

pub static MODELS_PATH: Lazy<PathBuf> =
    Lazy::new(|| PathBuf::from(env_or("SCRIBE_MODELS_PATH", SCRIBE_MODELS_PATH)));

/// Path to the `scribe-worker` binary. Defaults to a sibling of the
/// running executable so a plain `cargo build` layout works.
pub static WORKER_BIN: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(path) = env::var("SCRIBE_WORKER_BIN") {
        return PathBuf::from(path);
    }
    env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("scribe-worker")))
        .unwrap_or_else(|| PathBuf::from("scribe-worker"))
});

pub static YTDLP_BIN: Lazy<String> = Lazy::new(|| env_or("SCRIBE_YTDLP_BIN", "yt-dlp"));

pub fn init_env() {
    dotenv::dotenv().ok();

    for dir in [&*RESULTS_PATH, &*TEMP_PATH] {
        std::fs::create_dir_all(dir).unwrap_or_else(|e| {
            eprintln!("Failed to create data directory {:?}: {}", dir, e);
        });
    }
}

/// ggml model file for a short model name, e.g. "base" -> `<models>/ggml-base.bin`.
pub fn model_path(model_name: &str) -> PathBuf {
    MODELS_PATH.join(format!("ggml-{}.bin", model_name))
}
