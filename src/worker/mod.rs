pub mod pool;
pub mod protocol;
pub mod runner;

pub use pool::{WorkerPool, WORKER_TIMEOUT};
pub use protocol::{EventLog, LogCursor, ProgressEvent, WorkerOutput};
