// crates/crucible-server/src/server.rs
// ============================================================================
// Module: Submission API Server
// Description: Route table, shared state, and error envelope for the API.
// Purpose: Serve the v1 submission surface over axum.
// Dependencies: axum, crucible-core, crucible-orchestrator, serde_json
// ============================================================================

//! ## Overview
//! The HTTP surface of the backbone. Routes are registered in both
//! trailing-slash spellings; bodies are JSON; errors render as
//! `{message, fields?}` with the validator's per-field reason map.
//! Authorization failures are 401 without existence disclosure; unknown
//! and cross-tenant resources are 404, never 403.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::MethodRouter;
use axum::routing::get;
use axum::routing::patch;
use axum::routing::post;
use crucible_core::AuditSink;
use crucible_core::BlobStore;
use crucible_core::FieldErrors;
use crucible_core::Orchestrator;
use crucible_core::StoreError;
use crucible_core::SubmissionStore;
use crucible_core::Timestamp;
use crucible_orchestrator::JobRenderer;
use serde_json::json;

use crate::handlers;

// ============================================================================
// SECTION: State
// ============================================================================

/// Shared state behind every handler.
pub struct ServerState {
    /// Relational store.
    pub store: Arc<dyn SubmissionStore>,
    /// Blob store for incoming submission payloads.
    pub submissions: Arc<dyn BlobStore>,
    /// Long-term artifact archive.
    pub archive: Arc<dyn BlobStore>,
    /// Orchestrator API client.
    pub orchestrator: Arc<dyn Orchestrator>,
    /// Evaluation Job renderer.
    pub renderer: JobRenderer,
    /// Audit sink.
    pub audit: Arc<dyn AuditSink>,
    /// Round identifier stamped onto audit events.
    pub round_id: String,
    /// Boot instant reported by `/status/`.
    pub started_at: Timestamp,
}

// ============================================================================
// SECTION: Error Envelope
// ============================================================================

/// API error mapped onto the response contract.
#[derive(Debug)]
pub enum ApiError {
    /// 401 without detail.
    Unauthorized,
    /// 404 for unknown or cross-tenant resources.
    NotFound,
    /// 400 with an optional per-field reason map.
    Validation {
        /// Human-readable summary.
        message: String,
        /// Per-field reasons, when a validator produced them.
        fields: Option<FieldErrors>,
    },
    /// 500 after retry exhaustion.
    Internal(String),
}

impl ApiError {
    /// Builds a validation error with a field map.
    #[must_use]
    pub fn validation(message: impl Into<String>, fields: FieldErrors) -> Self {
        Self::Validation {
            message: message.into(),
            fields: Some(fields),
        }
    }

    /// Builds a validation error with only a message.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            fields: None,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound => Self::NotFound,
            StoreError::Conflict(message) | StoreError::Invalid(message) => Self::Validation {
                message,
                fields: None,
            },
            StoreError::Backend(message) => Self::Internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({"message": "unauthorized"})),
            )
                .into_response(),
            Self::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({"message": "not found"}))).into_response()
            }
            Self::Validation {
                message,
                fields,
            } => {
                let body = match fields {
                    Some(fields) if !fields.is_empty() => {
                        json!({"message": message, "fields": fields})
                    }
                    _ => json!({"message": message}),
                };
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            Self::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"message": "internal error"})),
            )
                .into_response(),
        }
    }
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the full API router.
#[must_use]
pub fn api_router(state: Arc<ServerState>) -> Router {
    let mut router = Router::new();
    let routes: Vec<(&str, MethodRouter<Arc<ServerState>>)> = vec![
        ("/health", get(handle_health)),
        ("/status", get(handle_status)),
        ("/v1/task/{task_id}/pov", post(handlers::create_pov)),
        ("/v1/task/{task_id}/pov/{pov_id}", get(handlers::get_pov)),
        ("/v1/task/{task_id}/patch", post(handlers::create_patch)),
        ("/v1/task/{task_id}/patch/{patch_id}", get(handlers::get_patch)),
        ("/v1/task/{task_id}/submitted-sarif", post(handlers::create_sarif)),
        (
            "/v1/task/{task_id}/broadcast-sarif-assessment/{broadcast_sarif_id}",
            post(handlers::create_assessment),
        ),
        ("/v1/task/{task_id}/bundle", post(handlers::create_bundle)),
        (
            "/v1/task/{task_id}/bundle/{bundle_id}",
            patch(handlers::update_bundle)
                .get(handlers::get_bundle)
                .delete(handlers::delete_bundle),
        ),
        ("/v1/task/{task_id}/freeform", post(handlers::create_freeform)),
    ];
    for (path, method_router) in routes {
        // Register both trailing-slash spellings.
        router = router
            .route(path, method_router.clone())
            .route(&format!("{path}/"), method_router);
    }
    router.with_state(state)
}

// ============================================================================
// SECTION: Health / Status
// ============================================================================

/// Liveness probe.
async fn handle_health() -> StatusCode {
    StatusCode::OK
}

/// Readiness and round-state summary.
async fn handle_status(State(state): State<Arc<ServerState>>) -> Result<Response, ApiError> {
    let counts = state.store.status_counts().map_err(ApiError::from)?;
    let body = json!({
        "ready": true,
        "version": env!("CARGO_PKG_VERSION"),
        "since": state.started_at.as_unix_millis(),
        "state": {"tasks": counts},
    });
    Ok(Json(body).into_response())
}

#[cfg(test)]
mod tests;
