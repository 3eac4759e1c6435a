//! Routes and Handlers
//!
//! The six ingress operations plus the administrative supplements, wired
//! onto an axum router. Handlers extract the principal, run the pipeline
//! operation, and wrap the result in the `_metadata` envelope.

use crate::auth::principal_from_headers;
use crate::error::ApiError;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use edplan_pipeline::{GenerateIepRequest, PipelineOrchestrator, UploadAssessmentRequest};
use edplan_types::CorrelationId;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PipelineOrchestrator>,
}

/// Wrap a payload in the standard success envelope
fn envelope<T: Serialize>(data: T, correlation: &CorrelationId) -> Json<serde_json::Value> {
    Json(json!({
        "data": data,
        "_metadata": {
            "timestamp": Utc::now(),
            "correlation_id": correlation.as_str(),
        }
    }))
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/assessments", post(upload_assessment))
        .route("/assessments/:id/extract", post(extract_and_quantify))
        .route("/assessments/:id/reset", post(reset_assessment))
        .route("/ieps/generate", post(generate_iep))
        .route("/ieps/:id", get(get_iep))
        .route("/ieps/:id/approve", post(approve_iep))
        .route("/ieps/:id/archive", post(archive_iep))
        .route("/students/:id/ieps", get(list_ieps))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn upload_assessment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UploadAssessmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal_from_headers(&headers)?;
    let correlation = CorrelationId::new();
    let document = state.orchestrator.upload_assessment(request).await?;
    Ok(envelope(
        json!({
            "id": document.id,
            "processing_status": document.processing_status,
        }),
        &correlation,
    ))
}

async fn extract_and_quantify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    principal_from_headers(&headers)?;
    let correlation = CorrelationId::new();
    let summary = state
        .orchestrator
        .extract_and_quantify(id, &correlation)
        .await?;
    Ok(envelope(summary, &correlation))
}

async fn generate_iep(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<GenerateIepRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal_from_headers(&headers)?;
    let correlation = CorrelationId::new();
    let generated = state
        .orchestrator
        .generate_iep(request, &principal, &correlation)
        .await?;
    Ok(envelope(generated, &correlation))
}

async fn get_iep(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    principal_from_headers(&headers)?;
    let correlation = CorrelationId::new();
    let iep = state.orchestrator.get_iep(id).await?;
    Ok(envelope(iep, &correlation))
}

async fn list_ieps(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    principal_from_headers(&headers)?;
    let correlation = CorrelationId::new();
    let ieps = state.orchestrator.list_ieps(id).await?;
    Ok(envelope(ieps, &correlation))
}

async fn approve_iep(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal_from_headers(&headers)?;
    let correlation = CorrelationId::new();
    let iep = state.orchestrator.approve_iep(id, &principal).await?;
    Ok(envelope(iep, &correlation))
}

async fn archive_iep(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal_from_headers(&headers)?;
    let correlation = CorrelationId::new();
    let iep = state.orchestrator.archive_iep(id, &principal).await?;
    Ok(envelope(iep, &correlation))
}

async fn reset_assessment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal_from_headers(&headers)?;
    let correlation = CorrelationId::new();
    let document = state.orchestrator.reset_assessment(id, &principal).await?;
    Ok(envelope(
        json!({
            "id": document.id,
            "processing_status": document.processing_status,
        }),
        &correlation,
    ))
}
