// crates/crucible-server/src/consumer/tests.rs
// ============================================================================
// Module: Result Consumer Unit Tests
// Description: Unit tests for artifact, command-result, and final handling.
// Purpose: Pin poison deletion, idempotent finals, and archival copying.
// Dependencies: crucible-core, crucible-store-sqlite
// ============================================================================

//! ## Overview
//! Exercises the message handlers against a real store and in-memory
//! queue/blob doubles: duplicate finals, poison payloads, artifact
//! archival, and job array appends.

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

use std::sync::Arc;
use std::time::Duration;

use crucible_core::BlobStore;
use crucible_core::JobId;
use crucible_core::JobRecord;
use crucible_core::NoopAuditSink;
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

use super::Outcome;
use super::ResultConsumer;
use crate::archive::InMemoryBlobStore;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Consumer harness over a fresh store and in-memory blobs.
struct Harness {
    /// Consumer under test.
    consumer: ResultConsumer,
    /// Store shared with the consumer.
    store: Arc<SqliteStore>,
    /// Worker blob container.
    worker_blobs: Arc<InMemoryBlobStore>,
    /// Archive destination.
    archive: Arc<InMemoryBlobStore>,
}

impl Harness {
    /// Builds the harness.
    fn new() -> Self {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let worker_blobs = Arc::new(InMemoryBlobStore::new());
        let archive = Arc::new(InMemoryBlobStore::new());
        let queue = crucible_store_sqlite::SqliteResultQueue::new(&store);
        let consumer = ResultConsumer::new(
            Arc::new(queue),
            Arc::clone(&store) as Arc<dyn SubmissionStore>,
            Arc::clone(&worker_blobs) as Arc<dyn crucible_core::BlobStore>,
            Arc::clone(&archive) as Arc<dyn crucible_core::BlobStore>,
            Arc::new(NoopAuditSink),
            "round-test",
            Duration::from_secs(600),
            Duration::from_millis(10),
        );
        Self {
            consumer,
            store,
            worker_blobs,
            archive,
        }
    }

    /// Seeds an accepted POV and returns its id.
    fn seed_pov(&self) -> PovId {
        let now = Timestamp::now();
        let task_id = TaskId::generate(now);
        self.store
            .insert_task(&Task {
                id: task_id,
                kind: TaskKind::Full,
                deadline: now.saturating_add_millis(3_600_000),
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
            })
            .unwrap();
        let pov_id = PovId::generate(now);
        self.store
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
        pov_id
    }

    /// Seeds an accepted job row and returns its id and owner.
    fn seed_job(&self) -> (JobId, TeamId) {
        let now = Timestamp::now();
        let job_id = JobId::generate(now);
        let team_id = TeamId::generate(now);
        self.store
            .insert_job(&JobRecord {
                id: job_id,
                team_id,
                status: SubmissionStatus::Accepted,
                artifacts: Vec::new(),
                results: Vec::new(),
                functionality_tests_passing: None,
                cache_key: "cache-1".to_string(),
            })
            .unwrap();
        (job_id, team_id)
    }

    /// Seeds an accepted patch row and returns its id.
    fn seed_patch(&self) -> crucible_core::PatchId {
        let now = Timestamp::now();
        let task_id = TaskId::generate(now);
        self.store
            .insert_task(&Task {
                id: task_id,
                kind: TaskKind::Full,
                deadline: now.saturating_add_millis(3_600_000),
                round_id: "round-test".to_string(),
                commit: "0123abcd".to_string(),
                project_name: "example".to_string(),
                focus: "src".to_string(),
                sources: Vec::new(),
                unstripped_sources: UnstrippedSources::default(),
                harnesses_included: true,
                memory_gb: 8,
                cpus: 4,
            })
            .unwrap();
        let patch_id = crucible_core::PatchId::generate(now);
        self.store
            .insert_patch(&crucible_core::PatchSubmission {
                id: patch_id,
                team_id: TeamId::generate(now),
                task_id,
                patch_path: "sha256/ffff".to_string(),
                status: SubmissionStatus::Accepted,
                functionality_tests_passing: None,
            })
            .unwrap();
        patch_id
    }
}

// ============================================================================
// SECTION: Final Messages
// ============================================================================

#[tokio::test]
async fn final_message_transitions_once() {
    let harness = Harness::new();
    let pov_id = harness.seed_pov();
    let payload = json!({
        "msg_type": "final",
        "entity": "pov",
        "entity_id": pov_id.to_string(),
        "status": "passed",
    })
    .to_string();

    assert!(matches!(harness.consumer.handle(&payload).await, Outcome::Done));
    // The second delivery is also Done (deleted), with no state change.
    assert!(matches!(harness.consumer.handle(&payload).await, Outcome::Done));
}

#[tokio::test]
async fn final_for_unknown_row_is_poison() {
    let harness = Harness::new();
    let payload = json!({
        "msg_type": "final",
        "entity": "pov",
        "entity_id": PovId::generate(Timestamp::now()).to_string(),
        "status": "passed",
    })
    .to_string();
    assert!(matches!(harness.consumer.handle(&payload).await, Outcome::Poison(_)));
}

#[tokio::test]
async fn malformed_entity_id_is_poison() {
    let harness = Harness::new();
    let payload = json!({
        "msg_type": "final",
        "entity": "pov",
        "entity_id": "notauuid",
        "status": "passed",
    })
    .to_string();
    assert!(matches!(harness.consumer.handle(&payload).await, Outcome::Poison(_)));
}

#[tokio::test]
async fn unparseable_payload_is_poison() {
    let harness = Harness::new();
    assert!(matches!(
        harness.consumer.handle("{not json").await,
        Outcome::Poison(_)
    ));
}

#[tokio::test]
async fn patch_failure_final_carries_functionality_verdict() {
    let harness = Harness::new();
    let patch_id = harness.seed_patch();
    let payload = json!({
        "msg_type": "final",
        "entity": "patch",
        "entity_id": patch_id.to_string(),
        "status": "failed",
        "patch_tests_failed": true,
    })
    .to_string();
    assert!(matches!(harness.consumer.handle(&payload).await, Outcome::Done));
}

// ============================================================================
// SECTION: Artifact Messages
// ============================================================================

#[tokio::test]
async fn pov_artifact_is_copied_to_archive() {
    let harness = Harness::new();
    let pov_id = harness.seed_pov();
    harness
        .worker_blobs
        .put("results/crash-1.bin", b"crash bytes".to_vec(), None)
        .await
        .unwrap();

    let payload = json!({
        "msg_type": "artifact",
        "entity": "pov",
        "entity_id": pov_id.to_string(),
        "blob": {"object_name": "results/crash-1.bin"},
        "filename": "crash-1.bin",
    })
    .to_string();
    assert!(matches!(harness.consumer.handle(&payload).await, Outcome::Done));
    assert_eq!(harness.archive.keys(), vec!["results/crash-1.bin".to_string()]);
}

#[tokio::test]
async fn job_artifact_appends_metadata() {
    let harness = Harness::new();
    let (job_id, team_id) = harness.seed_job();
    harness
        .worker_blobs
        .put("results/run.log", b"log".to_vec(), None)
        .await
        .unwrap();

    let payload = json!({
        "msg_type": "artifact",
        "entity": "job",
        "entity_id": job_id.to_string(),
        "blob": {"object_name": "results/run.log"},
        "filename": "run.log",
        "context": "build",
    })
    .to_string();
    assert!(matches!(harness.consumer.handle(&payload).await, Outcome::Done));

    let row = harness.store.get_job(job_id, team_id).unwrap();
    assert_eq!(row.artifacts.len(), 1);
    assert_eq!(row.artifacts[0].context.as_deref(), Some("build"));
    assert_eq!(harness.archive.keys(), vec!["results/run.log".to_string()]);
}

#[tokio::test]
async fn missing_artifact_blob_is_poison() {
    let harness = Harness::new();
    let pov_id = harness.seed_pov();
    let payload = json!({
        "msg_type": "artifact",
        "entity": "pov",
        "entity_id": pov_id.to_string(),
        "blob": {"object_name": "results/absent.bin"},
    })
    .to_string();
    assert!(matches!(harness.consumer.handle(&payload).await, Outcome::Poison(_)));
}

// ============================================================================
// SECTION: Command Results
// ============================================================================

#[tokio::test]
async fn command_result_appends_to_job() {
    let harness = Harness::new();
    let (job_id, team_id) = harness.seed_job();
    let payload = json!({
        "msg_type": "command_result",
        "entity": "job",
        "entity_id": job_id.to_string(),
        "result": {"command": "make test", "exit_code": 0},
    })
    .to_string();
    assert!(matches!(harness.consumer.handle(&payload).await, Outcome::Done));
    let row = harness.store.get_job(job_id, team_id).unwrap();
    assert_eq!(row.results.len(), 1);
}

#[tokio::test]
async fn command_result_for_pov_is_poison() {
    let harness = Harness::new();
    let pov_id = harness.seed_pov();
    let payload = json!({
        "msg_type": "command_result",
        "entity": "pov",
        "entity_id": pov_id.to_string(),
        "result": {"command": "make test", "exit_code": 0},
    })
    .to_string();
    assert!(matches!(harness.consumer.handle(&payload).await, Outcome::Poison(_)));
}

#[tokio::test]
async fn empty_command_result_is_poison() {
    let harness = Harness::new();
    let (job_id, _team_id) = harness.seed_job();
    let payload = json!({
        "msg_type": "command_result",
        "entity": "job",
        "entity_id": job_id.to_string(),
    })
    .to_string();
    assert!(matches!(harness.consumer.handle(&payload).await, Outcome::Poison(_)));
}
