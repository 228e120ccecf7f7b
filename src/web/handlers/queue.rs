use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::pipeline::TaskSnapshot;
use crate::store::StoredResult;
use crate::utils::http::ApiResponse;
use crate::AppContext;

pub fn queue_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/api/queue/status", get(status))
        .route("/api/queue/result/:task_id", get(result))
        .route("/api/queue/clear", post(clear))
        .with_state(ctx)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueStatus {
    pub tasks: Vec<TaskSnapshot>,
    pub results: Vec<StoredResult>,
    pub counts: BTreeMap<String, usize>,
}

pub async fn status(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let mut tasks = ctx.registry.list_all().await;
    tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for task in &tasks {
        *counts.entry(task.state.to_string()).or_insert(0) += 1;
    }

    let results = match ctx.store.list_all().await {
        Ok(results) => results,
        Err(e) => {
            error!("Failed to list stored results: {}", e);
            let response = ApiResponse::<QueueStatus>::error(e.to_string());
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response();
        }
    };

    let response = ApiResponse::success(QueueStatus {
        tasks,
        results,
        counts,
    });
    (StatusCode::OK, Json(response)).into_response()
}

pub async fn result(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    match ctx.store.get(&task_id).await {
        Ok(Some(result)) => {
            Json(ApiResponse::<StoredResult>::success(result)).into_response()
        }
        Ok(None) => {
            // still live (or unknown); the registry snapshot is the answer
            if let Some(snapshot) = ctx.registry.get(&task_id).await {
                return Json(ApiResponse::<TaskSnapshot>::success(snapshot)).into_response();
            }
            let response = ApiResponse::<StoredResult>::error(format!("unknown task {}", task_id));
            (StatusCode::NOT_FOUND, Json(response)).into_response()
        }
        Err(e) => {
            error!("Failed to load result for {}: {}", task_id, e);
            let response = ApiResponse::<StoredResult>::error(e.to_string());
            (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearResponse {
    pub cleared_tasks: usize,
    pub cleared_results: usize,
}

pub async fn clear(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let cleared_tasks = ctx.registry.clear_terminal().await;
    let cleared_results = match ctx.store.clear_all().await {
        Ok(n) => n,
        Err(e) => {
            error!("Failed to clear results: {}", e);
            let response = ApiResponse::<ClearResponse>::error(e.to_string());
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response();
        }
    };

    info!(
        "Cleared {} finished tasks and {} stored results",
        cleared_tasks, cleared_results
    );
    let response = ApiResponse::success(ClearResponse {
        cleared_tasks,
        cleared_results,
    });
    (StatusCode::OK, Json(response)).into_response()
}
