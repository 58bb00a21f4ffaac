use super::AppState;
use crate::error::QueueError;
use crate::job::JobState;
use crate::manager::{parse_job_id, JobOutcome};
use crate::wire::{
    BatchStatusEntry, BatchStatusRequest, BatchStatusResponse, BatchSubmitEntry,
    BatchSubmitResponse, ErrorResponse, FailedResponse, HealthResponse, PendingResponse,
    ResultResponse, StatusResponse, SubmitResponse, TooLargeResponse, NOT_READY_MESSAGE,
};
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;

const NOT_FOUND: &str = "Job not found";

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}

fn too_large(state: &AppState) -> Response {
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        Json(TooLargeResponse {
            error: "File too large".into(),
            max_size_mb: state.max_upload_mb,
        }),
    )
        .into_response()
}

fn queue_error(e: QueueError) -> Response {
    match e {
        QueueError::InvalidSubmission(msg) => error(StatusCode::BAD_REQUEST, msg),
        QueueError::JobNotFound(_) => error(StatusCode::NOT_FOUND, NOT_FOUND),
        QueueError::ShuttingDown => error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        other => {
            tracing::error!(error = %other, "request failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

fn multipart_error(state: &AppState, e: MultipartError) -> Response {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large(state)
    } else {
        error(StatusCode::BAD_REQUEST, format!("Malformed upload: {}", e.body_text()))
    }
}

/// Reduce a client-supplied name to a safe basename: directory parts are
/// dropped and every character outside `[A-Za-z0-9._-]` becomes `_`.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}

fn is_pdf_name(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".pdf")
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

pub async fn stats(State(state): State<AppState>) -> Json<crate::wire::StatsResponse> {
    Json(state.manager.stats())
}

struct Upload {
    filename: String,
    data: Bytes,
}

/// `POST /submit`: a single `file` part, or a batch of `files[]` parts.
#[tracing::instrument(skip_all)]
pub async fn submit(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut multipart = match multipart {
        Ok(m) => m,
        Err(e) => return error(StatusCode::BAD_REQUEST, e.body_text()),
    };

    let mut single: Option<Upload> = None;
    let mut batch: Vec<Upload> = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return multipart_error(&state, e),
        };
        let name = field.name().unwrap_or_default().to_string();
        if name != "file" && name != "files[]" && name != "files" {
            tracing::debug!(field = %name, "ignoring unexpected form field");
            continue;
        }
        let filename = sanitize_filename(field.file_name().unwrap_or_default());
        let data = match field.bytes().await {
            Ok(data) => data,
            Err(e) => return multipart_error(&state, e),
        };
        let upload = Upload { filename, data };
        if name == "file" {
            single = Some(upload);
        } else {
            batch.push(upload);
        }
    }

    if state.manager.is_shutting_down() {
        return queue_error(QueueError::ShuttingDown);
    }

    match (single, batch.is_empty()) {
        (Some(upload), true) => submit_single(&state, upload),
        (_, false) => submit_batch(&state, batch),
        (None, true) => error(StatusCode::BAD_REQUEST, "No file provided"),
    }
}

fn submit_single(state: &AppState, upload: Upload) -> Response {
    if upload.filename.is_empty() {
        return error(StatusCode::BAD_REQUEST, "No file selected");
    }
    if !is_pdf_name(&upload.filename) {
        return error(StatusCode::BAD_REQUEST, "Only PDF files are accepted");
    }
    if upload.data.len() > state.max_upload_bytes() {
        return too_large(state);
    }
    match state.manager.submit(upload.data, &upload.filename) {
        Ok(id) => Json(SubmitResponse {
            job_id: id.to_string(),
            filename: upload.filename,
            status: JobState::Queued,
        })
        .into_response(),
        Err(e) => queue_error(e),
    }
}

fn submit_batch(state: &AppState, uploads: Vec<Upload>) -> Response {
    let mut jobs = Vec::with_capacity(uploads.len());
    for upload in uploads {
        let Upload { filename, data } = upload;
        let entry = if filename.is_empty() {
            BatchSubmitEntry::rejected(filename, "No file selected")
        } else if !is_pdf_name(&filename) {
            BatchSubmitEntry::rejected(filename, "Only PDF files are accepted")
        } else if data.len() > state.max_upload_bytes() {
            BatchSubmitEntry::rejected(filename, "File too large")
        } else {
            match state.manager.submit(data, &filename) {
                Ok(id) => BatchSubmitEntry::queued(id.to_string(), filename),
                Err(QueueError::ShuttingDown) => return queue_error(QueueError::ShuttingDown),
                Err(e) => BatchSubmitEntry::rejected(filename, e.to_string()),
            }
        };
        jobs.push(entry);
    }
    tracing::info!(
        submitted = jobs.iter().filter(|j| j.job_id.is_some()).count(),
        total = jobs.len(),
        "batch submission"
    );
    Json(BatchSubmitResponse { jobs }).into_response()
}

/// `GET /status/{job_id}`
pub async fn status(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match parse_job_id(&job_id).and_then(|id| state.manager.status(&id)) {
        Ok(record) => Json(StatusResponse::from(&record)).into_response(),
        Err(e) => queue_error(e),
    }
}

/// `GET /result/{job_id}`: 200 ready, 202 pending, 422 failed, 404 unknown.
pub async fn result(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    let id = match parse_job_id(&job_id) {
        Ok(id) => id,
        Err(e) => return queue_error(e),
    };
    let outcome = match state.manager.result(&id) {
        Ok(outcome) => outcome,
        Err(e) => return queue_error(e),
    };

    // Terminal records never change again; the second lookup only fails if
    // the job was evicted in between.
    match outcome {
        JobOutcome::Pending(current) => (
            StatusCode::ACCEPTED,
            Json(PendingResponse {
                job_id,
                status: current,
                message: NOT_READY_MESSAGE.into(),
            }),
        )
            .into_response(),
        JobOutcome::Ready(doc) => match state.manager.status(&id) {
            Ok(record) => Json(ResultResponse {
                job_id,
                filename: record.filename().to_string(),
                image_count: doc.image_count(),
                markdown: doc.markdown.clone(),
                completed_at: record.completed_at(),
            })
            .into_response(),
            Err(e) => queue_error(e),
        },
        JobOutcome::Failed(cause) => match state.manager.status(&id) {
            Ok(record) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(FailedResponse {
                    job_id,
                    filename: record.filename().to_string(),
                    status: JobState::Failed,
                    error: cause,
                }),
            )
                .into_response(),
            Err(e) => queue_error(e),
        },
    }
}

/// `POST /batch/status`
pub async fn batch_status(
    State(state): State<AppState>,
    body: Result<Json<BatchStatusRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(e) => return error(StatusCode::BAD_REQUEST, e.body_text()),
    };
    let results = state
        .manager
        .batch_status(&request.job_ids)
        .into_iter()
        .map(|(job_id, record)| match record {
            Some(record) => BatchStatusEntry::Found(StatusResponse::from(&record)),
            None => BatchStatusEntry::Missing {
                job_id,
                error: NOT_FOUND.into(),
            },
        })
        .collect();
    Json(BatchStatusResponse { results }).into_response()
}
