//! Isolated transcription worker. Spawned per task by the service; emits
//! progress to the shared event log and prints one final JSON result line
//! on stdout. Logging goes to stderr so stdout stays machine-readable.

use std::process::ExitCode;

use scribe_rs::worker::runner::{self, WorkerArgs};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = match WorkerArgs::parse(&args) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("usage: scribe-worker --audio <wav> --model <name> --progress-log <path>");
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let output = runner::run(&args);
    match serde_json::to_string(&output) {
        Ok(line) => println!("{}", line),
        Err(e) => {
            eprintln!("failed to encode worker output: {}", e);
            return ExitCode::FAILURE;
        }
    }

    if output.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
