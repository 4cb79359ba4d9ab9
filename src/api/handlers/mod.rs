use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::adapters::{Adapter, PlatformInfo};
use crate::enforcement::{AccountCheck, EnforcementError};
use crate::models::*;
use crate::repository::EnforcementStore;

// ============================================================
// Error Handling
// ============================================================

/// Log an internal error and return a sanitized response to the client.
fn internal_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    tracing::error!("Internal error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

/// Map engine errors onto statuses. Lookup and policy errors are safe to
/// expose; storage errors are not.
fn engine_error(e: EnforcementError) -> (StatusCode, String) {
    match e {
        EnforcementError::ChildNotFound(_)
        | EnforcementError::JobNotFound(_)
        | EnforcementError::AccountNotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
        EnforcementError::NoActivePolicy { .. } => {
            tracing::warn!("Validation error: {}", e);
            (StatusCode::CONFLICT, e.to_string())
        }
        EnforcementError::UnknownPlatform(_) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
        EnforcementError::Interrupted(_) | EnforcementError::Storage(_) => internal_error(e),
    }
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Platforms
// ============================================================

/// Platform metadata plus its capability table.
#[derive(Debug, Serialize)]
pub struct PlatformView {
    #[serde(flatten)]
    pub info: PlatformInfo,
    pub capabilities: Vec<Capability>,
    pub supports_webhooks: bool,
}

impl PlatformView {
    fn of(adapter: &dyn Adapter) -> Self {
        Self {
            info: adapter.info().clone(),
            capabilities: adapter.capabilities().to_vec(),
            supports_webhooks: adapter.supports_webhooks(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PlatformFilter {
    pub category: Option<String>,
    pub min_support: Option<String>,
}

pub async fn list_platforms(
    State(state): State<AppState>,
    Query(filter): Query<PlatformFilter>,
) -> Result<Json<Vec<PlatformView>>, (StatusCode, String)> {
    let registry = state.registry();

    let adapters = match filter.category {
        Some(category) => {
            let minimum = match filter.min_support.as_deref() {
                None => SupportLevel::Partial,
                Some(level) => SupportLevel::from_str(level).ok_or((
                    StatusCode::BAD_REQUEST,
                    format!("Unknown support level: {}", level),
                ))?,
            };
            registry.supporting(&RuleCategory::parse(&category), minimum)
        }
        None => registry.list(),
    };

    Ok(Json(
        adapters.iter().map(|a| PlatformView::of(a.as_ref())).collect(),
    ))
}

pub async fn get_platform(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PlatformView>, (StatusCode, String)> {
    state
        .registry()
        .get(&id)
        .map(|a| Json(PlatformView::of(a.as_ref())))
        .ok_or((StatusCode::NOT_FOUND, "Platform not found".to_string()))
}

// ============================================================
// Enforcement
// ============================================================

#[derive(Debug, Deserialize)]
pub struct EnforceRequest {
    #[serde(default = "default_trigger")]
    pub trigger: TriggerType,
}

fn default_trigger() -> TriggerType {
    TriggerType::Manual
}

pub async fn enforce_child(
    State(state): State<AppState>,
    Path(child_id): Path<Uuid>,
    Json(input): Json<EnforceRequest>,
) -> Result<(StatusCode, Json<EnforcementJob>), (StatusCode, String)> {
    let handle = state
        .engine
        .start(child_id, input.trigger)
        .map_err(engine_error)?;
    Ok((StatusCode::ACCEPTED, Json(handle.detach())))
}

pub async fn list_child_jobs(
    State(state): State<AppState>,
    Path(child_id): Path<Uuid>,
) -> Result<Json<Vec<EnforcementJob>>, (StatusCode, String)> {
    state
        .db
        .jobs_for_child(child_id)
        .map(Json)
        .map_err(internal_error)
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobReport>, (StatusCode, String)> {
    state
        .db
        .job_report(id)
        .map_err(internal_error)?
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "Job not found".to_string()))
}

pub async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<EnforcementJob>), (StatusCode, String)> {
    let handle = state.engine.retry(id).map_err(engine_error)?;
    Ok((StatusCode::ACCEPTED, Json(handle.detach())))
}

pub async fn get_compiled_policy(
    State(state): State<AppState>,
    Path(child_id): Path<Uuid>,
) -> Result<Json<CompiledPolicy>, (StatusCode, String)> {
    state
        .engine
        .compiled_policy(child_id, Utc::now())
        .map(Json)
        .map_err(engine_error)
}

// ============================================================
// Linked accounts
// ============================================================

pub async fn verify_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AccountCheck>, (StatusCode, String)> {
    state
        .engine
        .verify_account(id)
        .await
        .map(Json)
        .map_err(engine_error)
}

pub async fn unlink_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .engine
        .unlink_account(id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(engine_error)
}
