use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the tracing stack: stdout layer plus a daily-rolling file
/// under `log_dir`. The returned guard must be held for the process
/// lifetime or buffered file output is lost.
pub fn init(log_dir: String) -> Result<WorkerGuard> {
    let file_appender = tracing_appender::rolling::daily(log_dir, "scribe.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to init tracing: {}", e))?;

    Ok(guard)
}
