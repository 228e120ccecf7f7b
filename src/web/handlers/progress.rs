use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::AppContext;

pub fn progress_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/api/progress/:task_id", get(progress_ws))
        .with_state(ctx)
}

pub async fn progress_ws(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_progress(socket, ctx, task_id))
}

/// Pushes this task's updates over the socket until a terminal update has
/// been forwarded. A client connecting after completion gets the snapshot
/// and an immediate close.
async fn stream_progress(mut socket: WebSocket, ctx: Arc<AppContext>, task_id: String) {
    // subscribe before the snapshot read so no update can slip between
    let mut rx = ctx.events.subscribe();

    if let Some(snapshot) = ctx.registry.get(&task_id).await {
        // same wire shape as the live updates that follow
        let first = crate::relay::TaskUpdate::from(&snapshot);
        match serde_json::to_string(&first) {
            Ok(body) => {
                if socket.send(Message::Text(body)).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!("Failed to encode snapshot for {}: {}", task_id, e),
        }
        if snapshot.is_terminal() {
            let _ = socket.close().await;
            return;
        }
    }

    loop {
        match rx.recv().await {
            Ok(update) if update.task_id == task_id => {
                let terminal = update.complete;
                match serde_json::to_string(&update) {
                    Ok(body) => {
                        if socket.send(Message::Text(body)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to encode update for {}: {}", task_id, e);
                        continue;
                    }
                }
                if terminal {
                    break;
                }
            }
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                debug!("Progress stream for {} lagged, skipped {}", task_id, skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        }
    }

    let _ = socket.close().await;
}
