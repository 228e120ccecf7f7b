//! Task lifecycle: registry of live snapshots plus the orchestrator that
//! drives each task through its phases.

mod orchestrator;
mod registry;
pub mod types;

pub use orchestrator::{Orchestrator, SubmitRequest, SubmitSource};
pub use registry::TaskRegistry;
pub use types::{Method, PipelineError, Segment, TaskSnapshot, TaskState};
