// crates/crucible-server/src/server/tests.rs
// ============================================================================
// Module: Submission API End-to-End Tests
// Description: Drives the handlers against in-memory backends.
// Purpose: Pin the end-to-end contract: happy paths, deadlines, bundles.
// Dependencies: crucible-core, crucible-orchestrator, crucible-store-sqlite
// ============================================================================

//! ## Overview
//! Exercises the full submission flow with a real store and in-memory
//! orchestrator/blob doubles: POV happy path through worker `final`,
//! deadline-exceeded short-circuit, bundle validation and lifecycle,
//! controller-style idempotent transitions, and the auth error contract.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only panic-based assertions."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::response::IntoResponse;
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use crucible_core::AuthRecord;
use crucible_core::NoopAuditSink;
use crucible_core::Permissions;
use crucible_core::SourceDescriptor;
use crucible_core::SourceKind;
use crucible_core::SubmissionEntity;
use crucible_core::SubmissionStatus;
use crucible_core::SubmissionStore;
use crucible_core::Task;
use crucible_core::TaskId;
use crucible_core::TaskKind;
use crucible_core::TeamId;
use crucible_core::Timestamp;
use crucible_core::UnstrippedSources;
use crucible_orchestrator::Assignment;
use crucible_orchestrator::InMemoryOrchestrator;
use crucible_orchestrator::JobRenderer;
use crucible_orchestrator::RenderConfig;
use crucible_store_sqlite::SqliteStore;
use serde_json::Value;
use serde_json::json;

use super::ServerState;
use crate::archive::InMemoryBlobStore;
use crate::handlers;
use crate::identity::hash_token;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Raw token used by the fixture team.
const TEAM_TOKEN: &str = "fixture-team-token-0001";

/// Test harness bundling the state and fixture identities.
struct Harness {
    /// Shared server state.
    state: Arc<ServerState>,
    /// In-memory orchestrator double.
    orchestrator: Arc<InMemoryOrchestrator>,
    /// In-memory submissions blob store.
    submissions: Arc<InMemoryBlobStore>,
    /// Fixture team id.
    team_id: TeamId,
    /// Open task.
    open_task: TaskId,
    /// Task whose deadline passed in year 1000.
    closed_task: TaskId,
}

impl Harness {
    /// Builds the harness with one team, one open task, one closed task.
    fn new() -> Self {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Timestamp::now();
        let team_id = TeamId::generate(now);
        store
            .upsert_auth(&AuthRecord {
                id: team_id,
                token_hash: hash_token(TEAM_TOKEN).unwrap(),
                note: "fixture".to_string(),
                active: true,
                permissions: Permissions {
                    crs: true,
                    ..Permissions::default()
                },
            })
            .unwrap();

        let open_task = TaskId::generate(now);
        store.insert_task(&task(open_task, now.saturating_add_millis(3_600_000))).unwrap();
        let closed_task = TaskId::generate(now);
        // 1000-01-01 is comfortably before any test run.
        store
            .insert_task(&task(closed_task, Timestamp::from_unix_millis(-30_610_224_000_000)))
            .unwrap();

        let orchestrator = Arc::new(InMemoryOrchestrator::new());
        let submissions = Arc::new(InMemoryBlobStore::new());
        let state = Arc::new(ServerState {
            store: Arc::new(store),
            submissions: Arc::clone(&submissions) as Arc<dyn crucible_core::BlobStore>,
            archive: Arc::new(InMemoryBlobStore::new()),
            orchestrator: Arc::clone(&orchestrator) as Arc<dyn crucible_core::Orchestrator>,
            renderer: JobRenderer::new(RenderConfig {
                namespace: "crucible-eval".to_string(),
                evaluator_image: "evaluator:test".to_string(),
                daemon_image: "daemon:test".to_string(),
                eval_assignment: Assignment::default(),
                broadcast_assignment: Assignment::default(),
                round_id: "round-test".to_string(),
                otel_env: BTreeMap::new(),
            }),
            audit: Arc::new(NoopAuditSink),
            round_id: "round-test".to_string(),
            started_at: now,
        });
        Self {
            state,
            orchestrator,
            submissions,
            team_id,
            open_task,
            closed_task,
        }
    }

    /// Returns authenticated headers for the fixture team.
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let encoded = BASE64.encode(format!("{}:{TEAM_TOKEN}", self.team_id));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        headers
    }

    /// Submits a valid POV against a task; returns the response body.
    async fn post_pov(&self, task: TaskId) -> Value {
        let response = handlers::create_pov(
            State(Arc::clone(&self.state)),
            Path(task.to_string()),
            self.headers(),
            Json(pov_payload()),
        )
        .await
        .unwrap();
        body_json(response).await
    }
}

/// Builds a task with the given deadline.
fn task(id: TaskId, deadline: Timestamp) -> Task {
    Task {
        id,
        kind: TaskKind::Full,
        deadline,
        round_id: "round-test".to_string(),
        commit: "0123abcd".to_string(),
        project_name: "example".to_string(),
        focus: "src".to_string(),
        sources: vec![SourceDescriptor {
            kind: SourceKind::Repo,
            url: "https://sources.internal/example.tar.gz".to_string(),
            sha256: "aa".repeat(32),
        }],
        unstripped_sources: UnstrippedSources::default(),
        harnesses_included: true,
        memory_gb: 8,
        cpus: 4,
    }
}

/// The literal POV payload from the end-to-end scenarios.
fn pov_payload() -> Value {
    json!({
        "testcase": BASE64.encode("aaaaaaaaaa"),
        "fuzzer_name": "harness_1",
        "sanitizer": "address",
        "architecture": "x86_64",
        "engine": "libfuzzer",
    })
}

/// Reads a response body back into JSON.
async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// SECTION: POV Scenarios
// ============================================================================

#[tokio::test]
async fn pov_happy_path_reaches_passed() {
    let harness = Harness::new();
    let body = harness.post_pov(harness.open_task).await;
    assert_eq!(body["status"], "accepted");
    let pov_id = body["pov_id"].as_str().unwrap().to_string();

    // Worker final message flips the row.
    let outcome = harness
        .state
        .store
        .transition(SubmissionEntity::Pov, &pov_id, SubmissionStatus::Passed, None)
        .unwrap();
    assert!(matches!(outcome, crucible_core::TransitionOutcome::Transitioned));

    let response = handlers::get_pov(
        State(Arc::clone(&harness.state)),
        Path((harness.open_task.to_string(), pov_id)),
        harness.headers(),
    )
    .await
    .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "passed");
}

#[tokio::test]
async fn pov_archives_testcase_and_dispatches_job() {
    let harness = Harness::new();
    let body = harness.post_pov(harness.open_task).await;
    let pov_id = body["pov_id"].as_str().unwrap();

    // Content-addressed payload landed in the submissions store.
    let keys = harness.submissions.keys();
    assert_eq!(keys, vec![crate::archive::content_address(b"aaaaaaaaaa")]);
    // Dispatch is fire-and-forget; yield until the spawned task runs.
    for _ in 0 .. 50 {
        if !harness.orchestrator.job_names().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(harness.orchestrator.job_names(), vec![format!("pov-{pov_id}")]);
}

#[tokio::test]
async fn pov_after_deadline_is_marked_without_dispatch() {
    let harness = Harness::new();
    let body = harness.post_pov(harness.closed_task).await;
    assert_eq!(body["status"], "deadline_exceeded");

    for _ in 0 .. 20 {
        tokio::task::yield_now().await;
    }
    assert!(harness.orchestrator.job_names().is_empty());
}

#[tokio::test]
async fn pov_with_wrong_engine_is_rejected_with_field_map() {
    let harness = Harness::new();
    let mut payload = pov_payload();
    payload["engine"] = json!("aflplusplus");
    let result = handlers::create_pov(
        State(Arc::clone(&harness.state)),
        Path(harness.open_task.to_string()),
        harness.headers(),
        Json(payload),
    )
    .await;
    let response = result.unwrap_err().into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["fields"]["engine"].as_str().is_some());
}

#[tokio::test]
async fn missing_auth_is_401() {
    let harness = Harness::new();
    let result = handlers::create_pov(
        State(Arc::clone(&harness.state)),
        Path(harness.open_task.to_string()),
        HeaderMap::new(),
        Json(pov_payload()),
    )
    .await;
    let response = result.unwrap_err().into_response();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_task_is_404() {
    let harness = Harness::new();
    let result = handlers::create_pov(
        State(Arc::clone(&harness.state)),
        Path(TaskId::generate(Timestamp::now()).to_string()),
        harness.headers(),
        Json(pov_payload()),
    )
    .await;
    let response = result.unwrap_err().into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn resubmission_gets_a_fresh_independent_row() {
    let harness = Harness::new();
    let first = harness.post_pov(harness.open_task).await;
    let second = harness.post_pov(harness.open_task).await;
    assert_ne!(first["pov_id"], second["pov_id"]);
}

// ============================================================================
// SECTION: Bundle Scenarios
// ============================================================================

/// Creates a POV and a patch, returning their canonical ids.
async fn seed_pov_and_patch(harness: &Harness) -> (String, String) {
    let pov = harness.post_pov(harness.open_task).await;
    let patch_response = handlers::create_patch(
        State(Arc::clone(&harness.state)),
        Path(harness.open_task.to_string()),
        harness.headers(),
        Json(json!({"patch": BASE64.encode("--- a\n+++ b\n")})),
    )
    .await
    .unwrap();
    let patch = body_json(patch_response).await;
    (
        pov["pov_id"].as_str().unwrap().to_string(),
        patch["patch_id"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn bundle_with_one_field_is_rejected() {
    let harness = Harness::new();
    let (pov_id, _) = seed_pov_and_patch(&harness).await;
    let result = handlers::create_bundle(
        State(Arc::clone(&harness.state)),
        Path(harness.open_task.to_string()),
        harness.headers(),
        Json(json!({"pov_id": pov_id})),
    )
    .await;
    let response = result.unwrap_err().into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["message"], "must set at least 2 fields");
}

#[tokio::test]
async fn bundle_round_trips_with_case_normalized_ids() {
    let harness = Harness::new();
    let (pov_id, patch_id) = seed_pov_and_patch(&harness).await;
    let response = handlers::create_bundle(
        State(Arc::clone(&harness.state)),
        Path(harness.open_task.to_string()),
        harness.headers(),
        Json(json!({
            "pov_id": pov_id.to_uppercase(),
            "patch_id": patch_id.clone(),
        })),
    )
    .await
    .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "accepted");
    let bundle_id = body["bundle_id"].as_str().unwrap().to_string();

    let response = handlers::get_bundle(
        State(Arc::clone(&harness.state)),
        Path((harness.open_task.to_string(), bundle_id)),
        harness.headers(),
    )
    .await
    .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["pov_id"], pov_id);
    assert_eq!(body["patch_id"], patch_id);
}

#[tokio::test]
async fn bundle_referencing_foreign_submission_is_404() {
    let harness = Harness::new();
    let (pov_id, _) = seed_pov_and_patch(&harness).await;
    let foreign_patch = crucible_core::PatchId::generate(Timestamp::now());
    let result = handlers::create_bundle(
        State(Arc::clone(&harness.state)),
        Path(harness.open_task.to_string()),
        harness.headers(),
        Json(json!({"pov_id": pov_id, "patch_id": foreign_patch.to_string()})),
    )
    .await;
    let response = result.unwrap_err().into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bundle_with_malformed_id_is_400() {
    let harness = Harness::new();
    let result = handlers::create_bundle(
        State(Arc::clone(&harness.state)),
        Path(harness.open_task.to_string()),
        harness.headers(),
        Json(json!({"pov_id": "notauuid", "patch_id": "alsonot"})),
    )
    .await;
    let response = result.unwrap_err().into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["fields"]["pov_id"].as_str().is_some());
}

#[tokio::test]
async fn bundle_delete_then_get_is_404() {
    let harness = Harness::new();
    let (pov_id, patch_id) = seed_pov_and_patch(&harness).await;
    let response = handlers::create_bundle(
        State(Arc::clone(&harness.state)),
        Path(harness.open_task.to_string()),
        harness.headers(),
        Json(json!({"pov_id": pov_id, "patch_id": patch_id})),
    )
    .await
    .unwrap();
    let bundle_id = body_json(response).await["bundle_id"].as_str().unwrap().to_string();

    let response = handlers::delete_bundle(
        State(Arc::clone(&harness.state)),
        Path((harness.open_task.to_string(), bundle_id.clone())),
        harness.headers(),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let result = handlers::get_bundle(
        State(Arc::clone(&harness.state)),
        Path((harness.open_task.to_string(), bundle_id)),
        harness.headers(),
    )
    .await;
    assert_eq!(result.unwrap_err().into_response().status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bundle_mutation_on_closed_task_is_rejected() {
    let harness = Harness::new();
    let result = handlers::update_bundle(
        State(Arc::clone(&harness.state)),
        Path((
            harness.closed_task.to_string(),
            crucible_core::BundleId::generate(Timestamp::now()).to_string(),
        )),
        harness.headers(),
        Json(json!({})),
    )
    .await;
    let response = result.unwrap_err().into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["message"], "deadline to modify submission passed");
}

// ============================================================================
// SECTION: Status Surface
// ============================================================================

#[tokio::test]
async fn status_reports_submission_counts() {
    let harness = Harness::new();
    let _ = harness.post_pov(harness.open_task).await;
    let response = super::handle_status(State(Arc::clone(&harness.state))).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["ready"], true);
    assert_eq!(body["state"]["tasks"]["accepted"], 1);
}
