// crates/crucible-server/src/handlers.rs
// ============================================================================
// Module: Submission Handlers
// Description: Create and status endpoints for every submission kind.
// Purpose: Enforce the uniform validate / deadline / archive / dispatch flow.
// Dependencies: axum, crucible-core, crucible-orchestrator, serde_json
// ============================================================================

//! ## Overview
//! Every create follows the same contract: authenticate the caller with
//! the `crs` permission, resolve the task, validate the typed payload,
//! then either persist `deadline_exceeded` immediately (closed task, no
//! archival, no dispatch) or archive the payload under a content-addressed
//! key, persist `accepted`, audit, and — for POV and patch — dispatch an
//! evaluation Job sized from the task's budgets. Dispatch is
//! fire-and-forget: a failure is audited and the submission stays
//! `accepted` for the controller or a later sweep to resolve.
//!
//! Submissions are never deduplicated: an identical payload gets a fresh
//! id and an independent row.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use axum::Json;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use crucible_core::AuditDetail;
use crucible_core::AuditEvent;
use crucible_core::Bundle;
use crucible_core::BundleId;
use crucible_core::FieldErrors;
use crucible_core::FreeformId;
use crucible_core::FreeformSubmission;
use crucible_core::MAX_DESCRIPTION_BYTES;
use crucible_core::MAX_NAME_BYTES;
use crucible_core::MAX_PATCH_BYTES;
use crucible_core::MAX_TESTCASE_BYTES;
use crucible_core::PatchId;
use crucible_core::PatchSubmission;
use crucible_core::PovId;
use crucible_core::PovSubmission;
use crucible_core::SarifAssessment;
use crucible_core::SarifAssessmentId;
use crucible_core::SarifBroadcastId;
use crucible_core::SarifSubmission;
use crucible_core::SarifSubmissionId;
use crucible_core::StoreError;
use crucible_core::SubmissionEntity;
use crucible_core::SubmissionStatus;
use crucible_core::Task;
use crucible_core::TaskId;
use crucible_core::Timestamp;
use crucible_core::check_text_field;
use crucible_core::decode_base64_field;
use crucible_core::status::Assessment;
use crucible_core::with_retries;
use crucible_orchestrator::EvalJob;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

use crate::archive::content_address;
use crate::auth::AuthContext;
use crate::auth::authenticate;
use crate::bundle::BundlePayload;
use crate::bundle::ParsedBundle;
use crate::server::ApiError;
use crate::server::ServerState;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Message returned for mutations against a closed task.
const DEADLINE_PASSED: &str = "deadline to modify submission passed";

// ============================================================================
// SECTION: Shared Steps
// ============================================================================

/// Authenticates the caller and requires the `crs` permission.
fn authorize_crs(state: &ServerState, headers: &HeaderMap) -> Result<AuthContext, ApiError> {
    let auth = authenticate(state.store.as_ref(), headers).map_err(|_| ApiError::Unauthorized)?;
    if !auth.is_crs() {
        return Err(ApiError::Unauthorized);
    }
    Ok(auth)
}

/// Resolves a path task id; malformed and unknown ids both read as 404.
fn resolve_task(state: &ServerState, raw: &str) -> Result<Task, ApiError> {
    let task_id = TaskId::parse(raw).map_err(|_| ApiError::NotFound)?;
    match state.store.get_task(task_id) {
        Ok(task) => Ok(task),
        Err(StoreError::NotFound) => Err(ApiError::NotFound),
        Err(err) => Err(err.into()),
    }
}

/// Deserializes a typed payload from the request body.
fn parse_payload<T: for<'de> Deserialize<'de>>(body: Value) -> Result<T, ApiError> {
    serde_json::from_value(body)
        .map_err(|err| ApiError::message(format!("invalid payload: {err}")))
}

/// Archives a decoded payload under its content-addressed key, with the
/// standard retry policy.
async fn archive_payload(state: &ServerState, bytes: Vec<u8>) -> Result<String, ApiError> {
    let key = content_address(&bytes);
    let submissions = Arc::clone(&state.submissions);
    let stored_key = key.clone();
    with_retries(
        move || {
            let submissions = Arc::clone(&submissions);
            let key = stored_key.clone();
            let bytes = bytes.clone();
            async move { submissions.put(&key, bytes, Some("application/octet-stream")).await }
        },
        |_err| true,
    )
    .await
    .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(key)
}

/// Emits the submission-accepted audit event.
fn audit_accepted(
    state: &ServerState,
    entity: SubmissionEntity,
    id: &str,
    task: &Task,
    auth: &AuthContext,
    status: SubmissionStatus,
) {
    state.audit.record(
        &AuditEvent::new(
            "submission_accepted",
            state.round_id.clone(),
            AuditDetail::SubmissionAccepted {
                status,
            },
        )
        .with_team(auth.team_id)
        .with_task(task.id)
        .with_submission(entity, id),
    );
}

/// Dispatches an evaluation Job, fire-and-forget.
fn dispatch_eval(state: &Arc<ServerState>, entity: SubmissionEntity, id: String, task: Task, auth: &AuthContext) {
    let job = EvalJob {
        entity,
        object_id: id,
        team_id: auth.team_id,
        task,
    };
    let name = job.name();
    let manifest = state.renderer.render_eval(&job);
    let state = Arc::clone(state);
    tokio::spawn(async move {
        let orchestrator = Arc::clone(&state.orchestrator);
        let create_name = name.clone();
        let result = with_retries(
            move || {
                let orchestrator = Arc::clone(&orchestrator);
                let name = create_name.clone();
                let manifest = manifest.clone();
                async move { orchestrator.create_job(&name, manifest).await }
            },
            |err| !matches!(err, crucible_core::OrchestratorError::AlreadyExists(_)),
        )
        .await;
        let event = match result {
            Ok(()) => AuditEvent::new(
                "job_created",
                state.round_id.clone(),
                AuditDetail::JobCreated {
                    job_name: name,
                },
            ),
            // Deterministic names make duplicate creates benign.
            Err(crucible_core::OrchestratorError::AlreadyExists(_)) => return,
            Err(err) => AuditEvent::new(
                "job_create_failed",
                state.round_id.clone(),
                AuditDetail::JobCreateFailed {
                    reason: err.to_string(),
                },
            ),
        };
        state.audit.record(&event.with_submission(job.entity, job.object_id));
    });
}

// ============================================================================
// SECTION: POV
// ============================================================================

/// POV create payload.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PovPayload {
    /// Base64 testcase bytes.
    testcase: String,
    /// Harness name.
    fuzzer_name: String,
    /// Sanitizer expected to fire.
    sanitizer: String,
    /// Target architecture.
    architecture: String,
    /// Fuzzing engine.
    engine: String,
}

/// `POST /v1/task/{task_id}/pov/`
pub async fn create_pov(
    State(state): State<Arc<ServerState>>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let auth = authorize_crs(&state, &headers)?;
    let task = resolve_task(&state, &task_id)?;
    let payload: PovPayload = parse_payload(body)?;

    let mut errors = FieldErrors::new();
    let testcase =
        decode_base64_field("testcase", &payload.testcase, MAX_TESTCASE_BYTES, &mut errors);
    check_text_field("fuzzer_name", &payload.fuzzer_name, MAX_NAME_BYTES, &mut errors);
    check_text_field("sanitizer", &payload.sanitizer, MAX_NAME_BYTES, &mut errors);
    if payload.architecture != "x86_64" {
        errors.push("architecture", "must be \"x86_64\"");
    }
    if payload.engine != "libfuzzer" {
        errors.push("engine", "must be \"libfuzzer\"");
    }
    let Some(testcase) = testcase else {
        return Err(ApiError::validation("invalid submission", errors));
    };
    if !errors.is_empty() {
        return Err(ApiError::validation("invalid submission", errors));
    }

    let now = Timestamp::now();
    let pov_id = PovId::generate(now);
    let mut row = PovSubmission {
        id: pov_id,
        team_id: auth.team_id,
        task_id: task.id,
        testcase_path: String::new(),
        fuzzer_name: payload.fuzzer_name,
        sanitizer: payload.sanitizer,
        architecture: payload.architecture,
        engine: payload.engine,
        status: SubmissionStatus::DeadlineExceeded,
    };
    if !task.is_open(now) {
        state.store.insert_pov(&row)?;
        audit_accepted(&state, SubmissionEntity::Pov, &pov_id.to_string(), &task, &auth, row.status);
        return Ok(pov_response(&row));
    }

    row.testcase_path = archive_payload(&state, testcase).await?;
    row.status = SubmissionStatus::Accepted;
    state.store.insert_pov(&row)?;
    audit_accepted(&state, SubmissionEntity::Pov, &pov_id.to_string(), &task, &auth, row.status);
    dispatch_eval(&state, SubmissionEntity::Pov, pov_id.to_string(), task, &auth);
    Ok(pov_response(&row))
}

/// `GET /v1/task/{task_id}/pov/{pov_id}/`
pub async fn get_pov(
    State(state): State<Arc<ServerState>>,
    Path((task_id, pov_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let auth = authorize_crs(&state, &headers)?;
    let task = resolve_task(&state, &task_id)?;
    let pov_id = PovId::parse(&pov_id).map_err(|_| ApiError::NotFound)?;
    let row = state.store.get_pov(pov_id, task.id, auth.team_id)?;
    Ok(pov_response(&row))
}

/// Renders the POV response body.
fn pov_response(row: &PovSubmission) -> Response {
    Json(json!({"pov_id": row.id, "status": row.status})).into_response()
}

// ============================================================================
// SECTION: Patch
// ============================================================================

/// Patch create payload.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PatchPayload {
    /// Base64 patch bytes.
    patch: String,
}

/// `POST /v1/task/{task_id}/patch/`
pub async fn create_patch(
    State(state): State<Arc<ServerState>>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let auth = authorize_crs(&state, &headers)?;
    let task = resolve_task(&state, &task_id)?;
    let payload: PatchPayload = parse_payload(body)?;

    let mut errors = FieldErrors::new();
    let patch = decode_base64_field("patch", &payload.patch, MAX_PATCH_BYTES, &mut errors);
    let Some(patch) = patch else {
        return Err(ApiError::validation("invalid submission", errors));
    };

    let now = Timestamp::now();
    let patch_id = PatchId::generate(now);
    let mut row = PatchSubmission {
        id: patch_id,
        team_id: auth.team_id,
        task_id: task.id,
        patch_path: String::new(),
        status: SubmissionStatus::DeadlineExceeded,
        functionality_tests_passing: None,
    };
    if !task.is_open(now) {
        state.store.insert_patch(&row)?;
        audit_accepted(
            &state,
            SubmissionEntity::Patch,
            &patch_id.to_string(),
            &task,
            &auth,
            row.status,
        );
        return Ok(patch_response(&row));
    }

    row.patch_path = archive_payload(&state, patch).await?;
    row.status = SubmissionStatus::Accepted;
    state.store.insert_patch(&row)?;
    audit_accepted(
        &state,
        SubmissionEntity::Patch,
        &patch_id.to_string(),
        &task,
        &auth,
        row.status,
    );
    dispatch_eval(&state, SubmissionEntity::Patch, patch_id.to_string(), task, &auth);
    Ok(patch_response(&row))
}

/// `GET /v1/task/{task_id}/patch/{patch_id}/`
pub async fn get_patch(
    State(state): State<Arc<ServerState>>,
    Path((task_id, patch_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let auth = authorize_crs(&state, &headers)?;
    let task = resolve_task(&state, &task_id)?;
    let patch_id = PatchId::parse(&patch_id).map_err(|_| ApiError::NotFound)?;
    let row = state.store.get_patch(patch_id, task.id, auth.team_id)?;
    Ok(patch_response(&row))
}

/// Renders the patch response body.
fn patch_response(row: &PatchSubmission) -> Response {
    Json(json!({
        "patch_id": row.id,
        "status": row.status,
        "functionality_tests_passing": row.functionality_tests_passing,
    }))
    .into_response()
}

// ============================================================================
// SECTION: SARIF
// ============================================================================

/// Team-authored SARIF payload.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SarifPayload {
    /// SARIF document.
    sarif: Value,
}

/// Checks the structural SARIF invariants. Full 2.1.0 schema validation
/// is an external collaborator.
fn check_sarif(document: &Value, errors: &mut FieldErrors) {
    if !document.is_object() {
        errors.push("sarif", "must be an object");
        return;
    }
    if document["version"].as_str() != Some("2.1.0") {
        errors.push("sarif", "version must be \"2.1.0\"");
    }
    if !document["runs"].is_array() {
        errors.push("sarif", "runs must be an array");
    }
}

/// `POST /v1/task/{task_id}/submitted-sarif/`
pub async fn create_sarif(
    State(state): State<Arc<ServerState>>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let auth = authorize_crs(&state, &headers)?;
    let task = resolve_task(&state, &task_id)?;
    let payload: SarifPayload = parse_payload(body)?;

    let mut errors = FieldErrors::new();
    check_sarif(&payload.sarif, &mut errors);
    if !errors.is_empty() {
        return Err(ApiError::validation("invalid submission", errors));
    }

    let now = Timestamp::now();
    let id = SarifSubmissionId::generate(now);
    let status = if task.is_open(now) {
        SubmissionStatus::Accepted
    } else {
        SubmissionStatus::DeadlineExceeded
    };
    let row = SarifSubmission {
        id,
        team_id: auth.team_id,
        task_id: task.id,
        sarif: payload.sarif,
        status,
    };
    state.store.insert_sarif_submission(&row)?;
    state.audit.record(
        &AuditEvent::new(
            "submission_accepted",
            state.round_id.clone(),
            AuditDetail::SubmissionAccepted {
                status,
            },
        )
        .with_team(auth.team_id)
        .with_task(task.id),
    );
    Ok(Json(json!({"submitted_sarif_id": id, "status": status})).into_response())
}

// ============================================================================
// SECTION: SARIF Assessment
// ============================================================================

/// Broadcast assessment payload.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AssessmentPayload {
    /// Verdict on the broadcast.
    assessment: String,
    /// Supporting rationale.
    description: String,
}

/// `POST /v1/task/{task_id}/broadcast-sarif-assessment/{broadcast_sarif_id}/`
pub async fn create_assessment(
    State(state): State<Arc<ServerState>>,
    Path((task_id, broadcast_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let auth = authorize_crs(&state, &headers)?;
    let task = resolve_task(&state, &task_id)?;
    let broadcast_id = SarifBroadcastId::parse(&broadcast_id).map_err(|_| ApiError::NotFound)?;
    // The broadcast must exist for this task before it can be assessed.
    state.store.get_sarif_broadcast(broadcast_id, task.id)?;
    let payload: AssessmentPayload = parse_payload(body)?;

    let mut errors = FieldErrors::new();
    let assessment = match payload.assessment.as_str() {
        "correct" => Some(Assessment::Correct),
        "incorrect" => Some(Assessment::Incorrect),
        _ => {
            errors.push("assessment", "must be \"correct\" or \"incorrect\"");
            None
        }
    };
    check_text_field("description", &payload.description, MAX_DESCRIPTION_BYTES, &mut errors);
    let Some(assessment) = assessment else {
        return Err(ApiError::validation("invalid submission", errors));
    };
    if !errors.is_empty() {
        return Err(ApiError::validation("invalid submission", errors));
    }

    let now = Timestamp::now();
    let id = SarifAssessmentId::generate(now);
    let status = if task.is_open(now) {
        SubmissionStatus::Accepted
    } else {
        SubmissionStatus::DeadlineExceeded
    };
    let row = SarifAssessment {
        id,
        team_id: auth.team_id,
        broadcast_id,
        assessment,
        description: payload.description,
        status,
    };
    state.store.insert_sarif_assessment(&row)?;
    state.audit.record(
        &AuditEvent::new(
            "submission_accepted",
            state.round_id.clone(),
            AuditDetail::SubmissionAccepted {
                status,
            },
        )
        .with_team(auth.team_id)
        .with_task(task.id),
    );
    Ok(Json(json!({"assessment_id": id, "status": status})).into_response())
}

// ============================================================================
// SECTION: Freeform
// ============================================================================

/// Freeform create payload.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FreeformPayload {
    /// Base64 opaque payload.
    submission: String,
}

/// `POST /v1/task/{task_id}/freeform/`
pub async fn create_freeform(
    State(state): State<Arc<ServerState>>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let auth = authorize_crs(&state, &headers)?;
    let task = resolve_task(&state, &task_id)?;
    let payload: FreeformPayload = parse_payload(body)?;

    let mut errors = FieldErrors::new();
    let decoded =
        decode_base64_field("submission", &payload.submission, MAX_TESTCASE_BYTES, &mut errors);
    let Some(decoded) = decoded else {
        return Err(ApiError::validation("invalid submission", errors));
    };

    let now = Timestamp::now();
    let id = FreeformId::generate(now);
    let mut row = FreeformSubmission {
        id,
        team_id: auth.team_id,
        task_id: task.id,
        payload_path: String::new(),
        status: SubmissionStatus::DeadlineExceeded,
    };
    if task.is_open(now) {
        row.payload_path = archive_payload(&state, decoded).await?;
        row.status = SubmissionStatus::Accepted;
    }
    state.store.insert_freeform(&row)?;
    state.audit.record(
        &AuditEvent::new(
            "submission_accepted",
            state.round_id.clone(),
            AuditDetail::SubmissionAccepted {
                status: row.status,
            },
        )
        .with_team(auth.team_id)
        .with_task(task.id),
    );
    Ok(Json(json!({"freeform_id": id, "status": row.status})).into_response())
}

// ============================================================================
// SECTION: Bundles
// ============================================================================

/// `POST /v1/task/{task_id}/bundle/`
pub async fn create_bundle(
    State(state): State<Arc<ServerState>>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let auth = authorize_crs(&state, &headers)?;
    let task = resolve_task(&state, &task_id)?;
    let now = Timestamp::now();
    if !task.is_open(now) {
        return Err(ApiError::message(DEADLINE_PASSED));
    }
    let payload: BundlePayload = parse_payload(body)?;
    let parsed = payload.parse().map_err(|fields| {
        ApiError::validation("invalid submission", fields)
    })?;
    let bundle = parsed.into_bundle(auth.team_id, task.id, now);
    check_bundle(&state, &bundle)?;
    state.store.insert_bundle(&bundle)?;
    state.audit.record(
        &AuditEvent::new(
            "submission_accepted",
            state.round_id.clone(),
            AuditDetail::SubmissionAccepted {
                status: SubmissionStatus::Accepted,
            },
        )
        .with_team(auth.team_id)
        .with_task(task.id),
    );
    Ok(Json(json!({"bundle_id": bundle.id, "status": "accepted"})).into_response())
}

/// `PATCH /v1/task/{task_id}/bundle/{bundle_id}`
pub async fn update_bundle(
    State(state): State<Arc<ServerState>>,
    Path((task_id, bundle_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let auth = authorize_crs(&state, &headers)?;
    let task = resolve_task(&state, &task_id)?;
    if !task.is_open(Timestamp::now()) {
        return Err(ApiError::message(DEADLINE_PASSED));
    }
    let bundle_id = BundleId::parse(&bundle_id).map_err(|_| ApiError::NotFound)?;
    let mut bundle = state.store.get_bundle(bundle_id, task.id, auth.team_id)?;
    let payload: BundlePayload = parse_payload(body)?;
    let parsed: ParsedBundle = payload.parse().map_err(|fields| {
        ApiError::validation("invalid submission", fields)
    })?;
    parsed.apply_to(&mut bundle);
    check_bundle(&state, &bundle)?;
    state.store.update_bundle(&bundle)?;
    Ok(bundle_response(&bundle))
}

/// `GET /v1/task/{task_id}/bundle/{bundle_id}`
pub async fn get_bundle(
    State(state): State<Arc<ServerState>>,
    Path((task_id, bundle_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let auth = authorize_crs(&state, &headers)?;
    let task = resolve_task(&state, &task_id)?;
    let bundle_id = BundleId::parse(&bundle_id).map_err(|_| ApiError::NotFound)?;
    let bundle = state.store.get_bundle(bundle_id, task.id, auth.team_id)?;
    Ok(bundle_response(&bundle))
}

/// `DELETE /v1/task/{task_id}/bundle/{bundle_id}/`
pub async fn delete_bundle(
    State(state): State<Arc<ServerState>>,
    Path((task_id, bundle_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let auth = authorize_crs(&state, &headers)?;
    let task = resolve_task(&state, &task_id)?;
    if !task.is_open(Timestamp::now()) {
        return Err(ApiError::message(DEADLINE_PASSED));
    }
    let bundle_id = BundleId::parse(&bundle_id).map_err(|_| ApiError::NotFound)?;
    state.store.delete_bundle(bundle_id, task.id, auth.team_id)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Enforces the two-field invariant and cross-references every linked id.
fn check_bundle(state: &ServerState, bundle: &Bundle) -> Result<(), ApiError> {
    if bundle.populated_fields() < 2 {
        return Err(ApiError::message("must set at least 2 fields"));
    }
    // Every reference must exist, belong to the task, and be caller-owned;
    // anything else reads as 404 to avoid an ownership side-channel.
    if let Some(id) = bundle.pov_id {
        state.store.get_pov(id, bundle.task_id, bundle.team_id)?;
    }
    if let Some(id) = bundle.patch_id {
        state.store.get_patch(id, bundle.task_id, bundle.team_id)?;
    }
    if let Some(id) = bundle.submitted_sarif_id {
        state.store.get_sarif_submission(id, bundle.task_id, bundle.team_id)?;
    }
    if let Some(id) = bundle.broadcast_sarif_id {
        state.store.get_sarif_broadcast(id, bundle.task_id)?;
    }
    if let Some(id) = bundle.freeform_id {
        state.store.get_freeform(id, bundle.task_id, bundle.team_id)?;
    }
    Ok(())
}

/// Renders the verbose bundle response body.
fn bundle_response(bundle: &Bundle) -> Response {
    Json(json!({
        "bundle_id": bundle.id,
        "status": "accepted",
        "pov_id": bundle.pov_id,
        "patch_id": bundle.patch_id,
        "submitted_sarif_id": bundle.submitted_sarif_id,
        "broadcast_sarif_id": bundle.broadcast_sarif_id,
        "freeform_id": bundle.freeform_id,
        "description": bundle.description,
    }))
    .into_response()
}
