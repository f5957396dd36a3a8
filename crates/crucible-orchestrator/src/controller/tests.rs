// crates/crucible-orchestrator/src/controller/tests.rs
// ============================================================================
// Module: Job Controller Unit Tests
// Description: Unit tests for key derivation and terminal-state handling.
// Purpose: Pin exactly-once transitions and label fail-closed parsing.
// Dependencies: crucible-core, crucible-orchestrator, crucible-store-sqlite
// ============================================================================

//! ## Overview
//! Exercises the controller against the in-memory orchestrator double and
//! a real store: failed Jobs flip rows to `errored` exactly once, complete
//! Jobs only delete, and malformed labels are discarded.

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

use crucible_core::JobObservation;
use crucible_core::JobState;
use crucible_core::NoopAuditSink;
use crucible_core::Orchestrator;
use crucible_core::PovId;
use crucible_core::PovSubmission;
use crucible_core::SourceDescriptor;
use crucible_core::SourceKind;
use crucible_core::SubmissionStatus;
use crucible_core::SubmissionStore;
use crucible_core::Task;
use crucible_core::TaskId;
use crucible_core::TaskKind;
use crucible_core::TeamId;
use crucible_core::Timestamp;
use crucible_core::UnstrippedSources;
use crucible_store_sqlite::SqliteStore;
use serde_json::json;

use super::ControllerConfig;
use super::JobController;
use super::key_from_observation;
use crate::client::InMemoryOrchestrator;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Builds an observation with evaluation labels.
fn observation(name: &str, job_type: &str, object_id: &str, state: JobState) -> JobObservation {
    JobObservation {
        name: name.to_string(),
        labels: BTreeMap::from([
            ("job-kind".to_string(), "eval".to_string()),
            ("job-type".to_string(), job_type.to_string()),
            ("object-id".to_string(), object_id.to_string()),
        ]),
        state,
    }
}

/// Builds a store holding one accepted POV; returns its id.
fn store_with_pov() -> (SqliteStore, PovId) {
    let store = SqliteStore::open_in_memory().unwrap();
    let now = Timestamp::now();
    let task_id = TaskId::generate(now);
    store
        .insert_task(&Task {
            id: task_id,
            kind: TaskKind::Full,
            deadline: now.saturating_add_millis(3_600_000),
            round_id: "round-1".to_string(),
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
        })
        .unwrap();
    let pov_id = PovId::generate(now);
    store
        .insert_pov(&PovSubmission {
            id: pov_id,
            team_id: TeamId::generate(now),
            task_id,
            testcase_path: "sha256/abcd".to_string(),
            fuzzer_name: "harness_1".to_string(),
            sanitizer: "address".to_string(),
            architecture: "x86_64".to_string(),
            engine: "libfuzzer".to_string(),
            status: SubmissionStatus::Accepted,
        })
        .unwrap();
    (store, pov_id)
}

/// Builds a controller over the given store and orchestrator.
fn controller(store: SqliteStore, orchestrator: Arc<InMemoryOrchestrator>) -> JobController {
    JobController::new(
        ControllerConfig::new("round-1", "test-holder"),
        Arc::new(crucible_store_sqlite::SqliteLeaderElector::new(&store)),
        orchestrator,
        Arc::new(store),
        Arc::new(NoopAuditSink),
    )
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn keys_require_wellformed_labels() {
    let id = "019539ac-8f2e-7b31-9d4c-0a1b2c3d4e5f";
    assert!(key_from_observation(&observation("pov-x", "pov", id, JobState::Failed)).is_some());
    assert!(key_from_observation(&observation("j", "pov", "notauuid", JobState::Failed)).is_none());
    assert!(key_from_observation(&observation("j", "mystery", id, JobState::Failed)).is_none());

    let mut missing_id = observation("j", "pov", id, JobState::Failed);
    missing_id.labels.remove("object-id");
    assert!(key_from_observation(&missing_id).is_none());
}

#[test]
fn key_ids_are_case_normalized() {
    let upper = "019539AC-8F2E-7B31-9D4C-0A1B2C3D4E5F";
    let key = key_from_observation(&observation("j", "pov", upper, JobState::Failed)).unwrap();
    assert_eq!(key.object_id, upper.to_ascii_lowercase());
}

#[tokio::test]
async fn failed_job_flips_row_and_deletes() {
    let (store, pov_id) = store_with_pov();
    let orchestrator = Arc::new(InMemoryOrchestrator::new());
    let name = format!("pov-{pov_id}");
    orchestrator.create_job(&name, json!({})).await.unwrap();
    let controller = controller(store.clone(), Arc::clone(&orchestrator));

    let key = key_from_observation(&observation(
        &name,
        "pov",
        &pov_id.to_string(),
        JobState::Failed,
    ))
    .unwrap();
    controller.process(&key).await.unwrap();

    let row = controller.store.transition(
        crucible_core::SubmissionEntity::Pov,
        &pov_id.to_string(),
        SubmissionStatus::Failed,
        None,
    );
    // Already errored; the later transition attempt is a no-op.
    assert!(matches!(row, Ok(crucible_core::TransitionOutcome::AlreadyTerminal)));
    assert!(orchestrator.job_names().is_empty());
}

#[tokio::test]
async fn repeated_failed_observation_is_a_noop() {
    let (store, pov_id) = store_with_pov();
    let orchestrator = Arc::new(InMemoryOrchestrator::new());
    let controller = controller(store, Arc::clone(&orchestrator));
    let key = key_from_observation(&observation(
        &format!("pov-{pov_id}"),
        "pov",
        &pov_id.to_string(),
        JobState::Failed,
    ))
    .unwrap();

    // Job deletion tolerates not-found on both passes.
    controller.process(&key).await.unwrap();
    controller.process(&key).await.unwrap();
}

#[tokio::test]
async fn complete_job_only_deletes() {
    let (store, pov_id) = store_with_pov();
    let orchestrator = Arc::new(InMemoryOrchestrator::new());
    let name = format!("pov-{pov_id}");
    orchestrator.create_job(&name, json!({})).await.unwrap();
    let controller = controller(store.clone(), Arc::clone(&orchestrator));

    let key = key_from_observation(&observation(
        &name,
        "pov",
        &pov_id.to_string(),
        JobState::Complete,
    ))
    .unwrap();
    controller.process(&key).await.unwrap();

    // The row is untouched: a real transition still succeeds afterwards.
    let outcome = controller
        .store
        .transition(
            crucible_core::SubmissionEntity::Pov,
            &pov_id.to_string(),
            SubmissionStatus::Passed,
            None,
        )
        .unwrap();
    assert!(matches!(outcome, crucible_core::TransitionOutcome::Transitioned));
    assert!(orchestrator.job_names().is_empty());
}
