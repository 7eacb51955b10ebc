//! Handlers for the durable progress API.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use learn_core::model::{QuizCompletion, UserId};
use learn_core::wire::{
    CompletionQuery, CompletionResponse, MergeProgressRequest, ProgressQuery, ProgressResponse,
    ResetProgressRequest, USER_HEADER,
};
use serde_json::{Value, json};
use storage::repository::Storage;
use tracing::{debug, info};

use crate::error::ApiError;

pub fn progress_routes(storage: Storage) -> Router {
    Router::new()
        .route("/progress", get(get_progress).post(merge_progress))
        .route("/progress/reset", post(reset_progress))
        .route(
            "/quiz-completions",
            get(get_completion).post(record_completion),
        )
        .with_state(storage)
}

pub fn health_routes() -> Router {
    Router::new().route("/health", get(health))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn user_from_headers(headers: &HeaderMap) -> Result<UserId, ApiError> {
    let raw = headers
        .get(USER_HEADER)
        .ok_or_else(|| ApiError::bad_request(format!("missing {USER_HEADER} header")))?;
    raw.to_str()
        .ok()
        .and_then(|value| value.parse::<UserId>().ok())
        .ok_or_else(|| ApiError::bad_request(format!("invalid {USER_HEADER} header")))
}

async fn get_progress(
    State(storage): State<Storage>,
    headers: HeaderMap,
    Query(query): Query<ProgressQuery>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let user = user_from_headers(&headers)?;
    let record = storage
        .progress
        .fetch_progress(user, query.module_id)
        .await?;
    Ok(Json(ProgressResponse::from_record(
        query.module_id,
        record.as_ref(),
    )))
}

async fn merge_progress(
    State(storage): State<Storage>,
    headers: HeaderMap,
    Json(request): Json<MergeProgressRequest>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let user = user_from_headers(&headers)?;
    let merged = storage
        .progress
        .merge_progress(user, request.module_id, &request.delta)
        .await?;
    debug!(%user, module = %request.module_id, section_max = merged.section_max(), "progress merged");
    Ok(Json(ProgressResponse::from_record(
        request.module_id,
        Some(&merged),
    )))
}

async fn reset_progress(
    State(storage): State<Storage>,
    headers: HeaderMap,
    Json(request): Json<ResetProgressRequest>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let user = user_from_headers(&headers)?;
    let reset = storage
        .progress
        .reset_progress(user, request.module_id)
        .await?;
    info!(%user, module = %request.module_id, "progress reset");
    Ok(Json(ProgressResponse::from_record(
        request.module_id,
        Some(&reset),
    )))
}

async fn get_completion(
    State(storage): State<Storage>,
    headers: HeaderMap,
    Query(query): Query<CompletionQuery>,
) -> Result<Json<QuizCompletion>, ApiError> {
    let user = user_from_headers(&headers)?;
    storage
        .completions
        .get_completion(user, query.quiz_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no completion for quiz {}", query.quiz_id)))
}

/// Retry-safe: a duplicate answers 200 with the completion already stored.
async fn record_completion(
    State(storage): State<Storage>,
    headers: HeaderMap,
    Json(completion): Json<QuizCompletion>,
) -> Result<(StatusCode, Json<CompletionResponse>), ApiError> {
    let user = user_from_headers(&headers)?;
    let write = storage
        .completions
        .record_completion(user, &completion)
        .await?;
    let created = write.is_created();
    let status = if created {
        info!(%user, quiz = %completion.quiz_id(), "quiz completion recorded");
        StatusCode::CREATED
    } else {
        debug!(%user, quiz = %completion.quiz_id(), "duplicate completion, returning original");
        StatusCode::OK
    };
    Ok((
        status,
        Json(CompletionResponse {
            created,
            completion: write.into_completion(),
        }),
    ))
}
