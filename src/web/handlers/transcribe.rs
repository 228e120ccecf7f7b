use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::pipeline::{Method, SubmitRequest, SubmitSource};
use crate::utils::http::ApiResponse;
use crate::{AppContext, TEMP_PATH};

pub fn transcribe_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/api/transcribe", post(transcribe))
        .route("/api/transcribe-file", post(transcribe_file))
        .route("/api/queue/add", post(queue_add))
        .route("/api/queue/add-files", post(queue_add_files))
        .with_state(ctx)
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TranscribeRequest {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: Method,
    #[serde(default = "default_model")]
    pub model_name: String,
}

fn default_method() -> Method {
    Method::Both
}

fn default_model() -> String {
    "base".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranscribeResponse {
    pub task_id: String,
}

pub async fn transcribe(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<TranscribeRequest>,
) -> impl IntoResponse {
    if req.url.trim().is_empty() {
        let response = ApiResponse::<TranscribeResponse>::error("url is required");
        return (StatusCode::BAD_REQUEST, Json(response)).into_response();
    }

    let task_id = submit_one(&ctx, req).await;
    let response = ApiResponse::success(TranscribeResponse { task_id });
    (StatusCode::ACCEPTED, Json(response)).into_response()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct QueueAddRequest {
    pub items: Vec<TranscribeRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueAddResponse {
    pub task_ids: Vec<String>,
}

/// Batch submission; each entry carries its own method/model overrides.
pub async fn queue_add(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<QueueAddRequest>,
) -> impl IntoResponse {
    if req.items.is_empty() || req.items.iter().any(|i| i.url.trim().is_empty()) {
        let response =
            ApiResponse::<QueueAddResponse>::error("items must be non-empty and carry a url each");
        return (StatusCode::BAD_REQUEST, Json(response)).into_response();
    }

    let mut task_ids = Vec::with_capacity(req.items.len());
    for item in req.items {
        task_ids.push(submit_one(&ctx, item).await);
    }

    let response = ApiResponse::success(QueueAddResponse { task_ids });
    (StatusCode::ACCEPTED, Json(response)).into_response()
}

/// Uploaded-audio submission: transcription only, no resolver or download
/// phase. A single `file` part plus an optional `model_name` part.
pub async fn transcribe_file(
    State(ctx): State<Arc<AppContext>>,
    multipart: Multipart,
) -> impl IntoResponse {
    let (files, model_name) = match collect_uploads(multipart).await {
        Ok(collected) => collected,
        Err(e) => {
            error!("Rejected file upload: {}", e);
            let response = ApiResponse::<TranscribeResponse>::error(e.to_string());
            return (StatusCode::BAD_REQUEST, Json(response)).into_response();
        }
    };
    let Some(file) = files.into_iter().next() else {
        let response = ApiResponse::<TranscribeResponse>::error("a file part is required");
        return (StatusCode::BAD_REQUEST, Json(response)).into_response();
    };

    let task_id = submit_file(&ctx, file, model_name.clone()).await;
    let response = ApiResponse::success(TranscribeResponse { task_id });
    (StatusCode::ACCEPTED, Json(response)).into_response()
}

/// Batch of uploaded files, one task per `file` part.
pub async fn queue_add_files(
    State(ctx): State<Arc<AppContext>>,
    multipart: Multipart,
) -> impl IntoResponse {
    let (files, model_name) = match collect_uploads(multipart).await {
        Ok(collected) => collected,
        Err(e) => {
            error!("Rejected file uploads: {}", e);
            let response = ApiResponse::<QueueAddResponse>::error(e.to_string());
            return (StatusCode::BAD_REQUEST, Json(response)).into_response();
        }
    };
    if files.is_empty() {
        let response = ApiResponse::<QueueAddResponse>::error("at least one file part is required");
        return (StatusCode::BAD_REQUEST, Json(response)).into_response();
    }

    let mut task_ids = Vec::with_capacity(files.len());
    for file in files {
        task_ids.push(submit_file(&ctx, file, model_name.clone()).await);
    }

    let response = ApiResponse::success(QueueAddResponse { task_ids });
    (StatusCode::ACCEPTED, Json(response)).into_response()
}

/// Drains the multipart body: every `file` part is staged under the temp
/// root, a `model_name` part overrides the default model.
async fn collect_uploads(mut multipart: Multipart) -> Result<(Vec<PathBuf>, String)> {
    let mut files = Vec::new();
    let mut model_name = default_model();

    while let Some(field) = multipart
        .next_field()
        .await
        .context("malformed multipart body")?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") | Some("files") => {
                let extension = field
                    .file_name()
                    .and_then(|n| Path::new(n).extension())
                    .and_then(|e| e.to_str())
                    .unwrap_or("wav")
                    .to_string();
                let data = field.bytes().await.context("failed to read file part")?;
                if data.is_empty() {
                    anyhow::bail!("uploaded file is empty");
                }
                let path = TEMP_PATH.join(format!("upload-{}.{}", Uuid::new_v4(), extension));
                tokio::fs::write(&path, &data)
                    .await
                    .with_context(|| format!("failed to stage upload at {}", path.display()))?;
                files.push(path);
            }
            Some("model_name") => {
                model_name = field.text().await.context("failed to read model_name")?;
            }
            _ => {}
        }
    }

    Ok((files, model_name))
}

async fn submit_one(ctx: &AppContext, req: TranscribeRequest) -> String {
    let task_id = ctx
        .orchestrator
        .clone()
        .submit(SubmitRequest {
            source: SubmitSource::Url(req.url.clone()),
            method: req.method,
            model_name: req.model_name,
        })
        .await;
    info!("Accepted {} as task {}", req.url, task_id);
    task_id
}

async fn submit_file(ctx: &AppContext, file: PathBuf, model_name: String) -> String {
    let task_id = ctx
        .orchestrator
        .clone()
        .submit(SubmitRequest {
            source: SubmitSource::File(file.clone()),
            method: Method::Whisper,
            model_name,
        })
        .await;
    info!("Accepted upload {} as task {}", file.display(), task_id);
    task_id
}
