use axum::Router;
use std::sync::Arc;

use crate::AppContext;

pub mod progress;
pub mod queue;
pub mod transcribe;

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .merge(transcribe::transcribe_router(ctx.clone()))
        .merge(queue::queue_router(ctx.clone()))
        .merge(progress::progress_router(ctx))
}
