#![allow(clippy::uninlined_format_args)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use scribe_rs::pipeline::{Orchestrator, TaskRegistry};
use scribe_rs::relay::BroadcastSink;
use scribe_rs::resolver::YouTubeTranscriptProvider;
use scribe_rs::store::JsonResultStore;
use scribe_rs::utils::logger;
use scribe_rs::web;
use scribe_rs::worker::WorkerPool;
use scribe_rs::{AppContext, RESULTS_PATH, WORKER_BIN};

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = logger::init("./logs".to_string())?;
    scribe_rs::init_env();

    info!("Starting transcription service ({})...", env!("GIT_HASH"));

    let registry = Arc::new(TaskRegistry::new());
    let store = Arc::new(JsonResultStore::new(&*RESULTS_PATH)?);
    let events = BroadcastSink::new(64);

    let concurrency = std::env::var("SCRIBE_WORKER_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);
    let pool = Arc::new(WorkerPool::new(concurrency, WORKER_BIN.clone()));
    info!(
        "Worker pool ready: {} slot(s), binary {}",
        pool.capacity(),
        WORKER_BIN.display()
    );

    let orchestrator = Arc::new(Orchestrator::new(
        registry.clone(),
        store.clone(),
        Arc::new(YouTubeTranscriptProvider::new()),
        pool,
        Arc::new(events.clone()),
    ));

    let ctx = Arc::new(AppContext {
        orchestrator,
        registry,
        store,
        events,
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], 7200));
    web::start_server(ctx, addr).await
}
