//! HTTP route handlers for jobs, artifacts, downloads and preview.

use axum::Router;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{Html, IntoResponse, Json, Redirect, Response};
use axum::routing::get;
use builder::core::types::{Job, JobId, JobStatus};
use builder::io::archive::ARCHIVE_FILE_NAME;
use builder::io::artifact_store::ArtifactEntry;
use builder::io::preview::PreviewOutcome;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::sse;
use crate::state::AppState;

/// Build the application router (state still to be supplied).
pub fn app_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/jobs", axum::routing::post(submit_job))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/result", get(get_job_result))
        .route("/artifacts", get(list_artifacts))
        .route("/artifacts/download", get(download_archive))
        .route(
            "/artifacts/{*path}",
            get(read_artifact)
                .put(update_artifact)
                .post(create_artifact)
                .delete(delete_artifact),
        )
        .route("/preview", get(preview_redirect))
        .route("/preview/", get(preview_entry))
        .route("/preview/{*path}", get(preview_file))
        .route("/preview-url", get(preview_url))
        .route("/events", get(sse::events_handler))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest {
    #[serde(default)]
    prompt: String,
    recursion_limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    job_id: JobId,
    status: JobStatus,
    message: String,
}

/// POST /jobs - validate and queue a generation.
async fn submit_job(
    State(state): State<AppState>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(request) = body?;
    let job_id = state
        .runner
        .submit(&request.prompt, request.recursion_limit)?;
    let job = state.jobs.get(&job_id)?;
    Ok(Json(SubmitResponse {
        job_id,
        status: JobStatus::Submitted,
        message: job.message,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobView {
    job_id: JobId,
    status: JobStatus,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            message: job.message,
            result: job.result,
            error: job.error,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

/// GET /jobs/{id} - current job record.
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let job = state.jobs.get(&JobId::from(id))?;
    Ok(Json(job.into()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobResultView {
    job_id: JobId,
    status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    completed_at: Option<DateTime<Utc>>,
}

/// GET /jobs/{id}/result - outcome of a finished job.
async fn get_job_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResultView>, ApiError> {
    let job = state.jobs.get(&JobId::from(id))?;
    if !job.status.is_terminal() {
        return Err(ApiError::NotFound(format!(
            "job {} has not finished (status: {})",
            job.id, job.status
        )));
    }
    Ok(Json(JobResultView {
        job_id: job.id,
        status: job.status,
        result: job.result,
        error: job.error,
        completed_at: job.completed_at,
    }))
}

#[derive(Debug, Serialize)]
struct ListResponse {
    files: Vec<ArtifactEntry>,
}

/// GET /artifacts - every generated file with its size.
async fn list_artifacts(State(state): State<AppState>) -> Result<Json<ListResponse>, ApiError> {
    let files = state.artifacts.list()?;
    Ok(Json(ListResponse { files }))
}

#[derive(Debug, Serialize)]
struct FileContent {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ContentBody {
    content: String,
}

#[derive(Debug, Serialize)]
struct FileMessage {
    path: String,
    message: &'static str,
}

/// GET /artifacts/{path} - file contents as UTF-8 text.
async fn read_artifact(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<FileContent>, ApiError> {
    let bytes = state.artifacts.read(&path)?;
    let content = String::from_utf8(bytes)
        .map_err(|_| ApiError::Validation(format!("file is not valid UTF-8 text: {path}")))?;
    Ok(Json(FileContent { path, content }))
}

/// PUT /artifacts/{path} - overwrite an existing file.
async fn update_artifact(
    State(state): State<AppState>,
    Path(path): Path<String>,
    body: Result<Json<ContentBody>, JsonRejection>,
) -> Result<Json<FileMessage>, ApiError> {
    let Json(body) = body?;
    let saved = state.artifacts.update(&path, body.content.as_bytes())?;
    info!(path = %saved, "artifact updated");
    Ok(Json(FileMessage {
        path: saved.to_string(),
        message: "File updated successfully",
    }))
}

/// POST /artifacts/{path} - create or overwrite a file.
async fn create_artifact(
    State(state): State<AppState>,
    Path(path): Path<String>,
    body: Result<Json<ContentBody>, JsonRejection>,
) -> Result<Json<FileMessage>, ApiError> {
    let Json(body) = body?;
    let saved = state.artifacts.write(&path, body.content.as_bytes())?;
    info!(path = %saved, "artifact saved");
    Ok(Json(FileMessage {
        path: saved.to_string(),
        message: "File saved successfully",
    }))
}

/// DELETE /artifacts/{path}
async fn delete_artifact(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<FileMessage>, ApiError> {
    let removed = state.artifacts.delete(&path)?;
    info!(path = %removed, "artifact deleted");
    Ok(Json(FileMessage {
        path: removed.to_string(),
        message: "File deleted successfully",
    }))
}

/// GET /artifacts/download - stream a zip of the whole project.
///
/// The scratch archive lives as long as the response body; a client that
/// disconnects early drops the body and with it the file.
async fn download_archive(State(state): State<AppState>) -> Result<Response, ApiError> {
    let archive = state.archive.clone();
    let handle = tokio::task::spawn_blocking(move || archive.build())
        .await
        .map_err(|err| ApiError::Internal(format!("archive task failed: {err}")))??;
    let file = handle.reopen()?;
    let len = handle.len();
    debug!(bytes = len, entries = handle.entries(), "streaming archive");

    let stream = async_stream::stream! {
        let _handle = handle;
        let mut chunks = ReaderStream::new(tokio::fs::File::from_std(file));
        while let Some(chunk) = chunks.next().await {
            yield chunk;
        }
    };

    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{ARCHIVE_FILE_NAME}\""))
            .map_err(|err| ApiError::Internal(err.to_string()))?,
    );
    Ok(response)
}

/// GET /preview - redirect so relative links in previewed pages resolve.
async fn preview_redirect() -> Redirect {
    Redirect::permanent("/preview/")
}

/// GET /preview/ - entry document or the fallback listing.
async fn preview_entry(State(state): State<AppState>) -> Result<Response, ApiError> {
    preview(&state, "")
}

/// GET /preview/{path}
async fn preview_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    preview(&state, &path)
}

fn preview(state: &AppState, path: &str) -> Result<Response, ApiError> {
    match state.preview.resolve(path)? {
        PreviewOutcome::File {
            bytes,
            content_type,
        } => Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response()),
        PreviewOutcome::Fallback { html } => Ok(Html(html).into_response()),
        PreviewOutcome::NotFound => Err(ApiError::NotFound(format!("file not found: {path}"))),
    }
}

#[derive(Debug, Serialize)]
struct PreviewUrl {
    url: String,
    message: &'static str,
}

/// GET /preview-url - absolute URL of the preview entry point.
async fn preview_url(State(state): State<AppState>, headers: HeaderMap) -> Json<PreviewUrl> {
    let base = match &state.public_base_url {
        Some(base) => base.trim_end_matches('/').to_string(),
        None => headers
            .get(header::HOST)
            .and_then(|host| host.to_str().ok())
            .map(|host| format!("http://{host}"))
            .unwrap_or_default(),
    };
    Json(PreviewUrl {
        url: format!("{base}/preview/"),
        message: "Open this URL to preview the generated project",
    })
}
