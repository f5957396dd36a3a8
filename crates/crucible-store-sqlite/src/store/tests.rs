// crates/crucible-store-sqlite/src/store/tests.rs
// ============================================================================
// Module: SQLite Store Unit Tests
// Description: Unit tests for schema, tenancy scoping, and transitions.
// Purpose: Pin the exactly-once transition and cross-tenant folding behavior.
// Dependencies: crucible-core, crucible-store-sqlite, tempfile
// ============================================================================

//! ## Overview
//! Exercises the store against a temp-file database: inserts and reads for
//! every submission kind, idempotent transitions, cross-tenant folding,
//! bundle soft-delete, and identity reconciliation.

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

use crucible_core::ArtifactRecord;
use crucible_core::AuthRecord;
use crucible_core::Bundle;
use crucible_core::BundleId;
use crucible_core::CommandResult;
use crucible_core::JobId;
use crucible_core::JobRecord;
use crucible_core::Permissions;
use crucible_core::PovId;
use crucible_core::PovSubmission;
use crucible_core::SarifBroadcast;
use crucible_core::SarifBroadcastId;
use crucible_core::SourceDescriptor;
use crucible_core::SourceKind;
use crucible_core::StoreError;
use crucible_core::SubmissionEntity;
use crucible_core::SubmissionStatus;
use crucible_core::SubmissionStore;
use crucible_core::Task;
use crucible_core::TaskId;
use crucible_core::TaskKind;
use crucible_core::TeamId;
use crucible_core::Timestamp;
use crucible_core::TransitionOutcome;
use crucible_core::UnstrippedSources;

use super::SqliteStore;
use super::SqliteStoreConfig;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Opens a store backed by a temp file.
fn open_store() -> (tempfile::TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let config = SqliteStoreConfig::new(dir.path().join("store.db"));
    let store = SqliteStore::open(&config).unwrap();
    (dir, store)
}

/// Builds a task with a far-future deadline.
fn sample_task(id: TaskId) -> Task {
    Task {
        id,
        kind: TaskKind::Full,
        deadline: Timestamp::from_unix_millis(i64::MAX / 2),
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
    }
}

/// Builds an accepted POV row.
fn sample_pov(id: PovId, task_id: TaskId, team_id: TeamId) -> PovSubmission {
    PovSubmission {
        id,
        team_id,
        task_id,
        testcase_path: "sha256/abcd".to_string(),
        fuzzer_name: "harness_1".to_string(),
        sanitizer: "address".to_string(),
        architecture: "x86_64".to_string(),
        engine: "libfuzzer".to_string(),
        status: SubmissionStatus::Accepted,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn task_round_trips() {
    let (_dir, store) = open_store();
    let id = TaskId::generate(Timestamp::now());
    let task = sample_task(id);
    store.insert_task(&task).unwrap();
    let loaded = store.get_task(id).unwrap();
    assert_eq!(loaded.project_name, task.project_name);
    assert_eq!(loaded.sources, task.sources);
    assert_eq!(loaded.deadline, task.deadline);
}

#[test]
fn duplicate_task_id_is_a_conflict() {
    let (_dir, store) = open_store();
    let id = TaskId::generate(Timestamp::now());
    store.insert_task(&sample_task(id)).unwrap();
    assert!(matches!(store.insert_task(&sample_task(id)), Err(StoreError::Conflict(_))));
}

#[test]
fn pov_reads_are_tenant_scoped() {
    let (_dir, store) = open_store();
    let task_id = TaskId::generate(Timestamp::now());
    store.insert_task(&sample_task(task_id)).unwrap();
    let owner = TeamId::generate(Timestamp::now());
    let other = TeamId::generate(Timestamp::now());
    let pov_id = PovId::generate(Timestamp::now());
    store.insert_pov(&sample_pov(pov_id, task_id, owner)).unwrap();

    assert!(store.get_pov(pov_id, task_id, owner).is_ok());
    assert!(matches!(store.get_pov(pov_id, task_id, other), Err(StoreError::NotFound)));
}

#[test]
fn transition_is_exactly_once() {
    let (_dir, store) = open_store();
    let task_id = TaskId::generate(Timestamp::now());
    store.insert_task(&sample_task(task_id)).unwrap();
    let team_id = TeamId::generate(Timestamp::now());
    let pov_id = PovId::generate(Timestamp::now());
    store.insert_pov(&sample_pov(pov_id, task_id, team_id)).unwrap();

    let id = pov_id.to_string();
    let first = store
        .transition(SubmissionEntity::Pov, &id, SubmissionStatus::Passed, None)
        .unwrap();
    assert_eq!(first, TransitionOutcome::Transitioned);

    let second = store
        .transition(SubmissionEntity::Pov, &id, SubmissionStatus::Failed, None)
        .unwrap();
    assert_eq!(second, TransitionOutcome::AlreadyTerminal);

    let row = store.get_pov(pov_id, task_id, team_id).unwrap();
    assert_eq!(row.status, SubmissionStatus::Passed);
}

#[test]
fn transition_to_accepted_is_rejected() {
    let (_dir, store) = open_store();
    let result = store.transition(
        SubmissionEntity::Pov,
        "019539ac-8f2e-7b31-9d4c-0a1b2c3d4e5f",
        SubmissionStatus::Accepted,
        None,
    );
    assert!(matches!(result, Err(StoreError::Invalid(_))));
}

#[test]
fn transition_of_unknown_row_is_not_found() {
    let (_dir, store) = open_store();
    let result = store.transition(
        SubmissionEntity::Pov,
        "019539ac-8f2e-7b31-9d4c-0a1b2c3d4e5f",
        SubmissionStatus::Errored,
        None,
    );
    assert!(matches!(result, Err(StoreError::NotFound)));
}

#[test]
fn patch_failure_records_functionality_verdict() {
    let (_dir, store) = open_store();
    let task_id = TaskId::generate(Timestamp::now());
    store.insert_task(&sample_task(task_id)).unwrap();
    let team_id = TeamId::generate(Timestamp::now());
    let patch_id = crucible_core::PatchId::generate(Timestamp::now());
    store
        .insert_patch(&crucible_core::PatchSubmission {
            id: patch_id,
            team_id,
            task_id,
            patch_path: "sha256/ffff".to_string(),
            status: SubmissionStatus::Accepted,
            functionality_tests_passing: None,
        })
        .unwrap();

    store
        .transition(
            SubmissionEntity::Patch,
            &patch_id.to_string(),
            SubmissionStatus::Failed,
            Some(false),
        )
        .unwrap();
    let row = store.get_patch(patch_id, task_id, team_id).unwrap();
    assert_eq!(row.status, SubmissionStatus::Failed);
    assert_eq!(row.functionality_tests_passing, Some(false));
}

#[test]
fn second_broadcast_for_a_task_is_a_conflict() {
    let (_dir, store) = open_store();
    let task_id = TaskId::generate(Timestamp::now());
    store.insert_task(&sample_task(task_id)).unwrap();
    let first = SarifBroadcast {
        id: SarifBroadcastId::generate(Timestamp::now()),
        task_id,
        sarif: serde_json::json!({"version": "2.1.0", "runs": []}),
    };
    store.insert_sarif_broadcast(&first).unwrap();
    let second = SarifBroadcast {
        id: SarifBroadcastId::generate(Timestamp::now()),
        task_id,
        sarif: serde_json::json!({"version": "2.1.0", "runs": []}),
    };
    assert!(matches!(
        store.insert_sarif_broadcast(&second),
        Err(StoreError::Conflict(_))
    ));
}

#[test]
fn bundle_soft_delete_hides_the_row() {
    let (_dir, store) = open_store();
    let task_id = TaskId::generate(Timestamp::now());
    store.insert_task(&sample_task(task_id)).unwrap();
    let team_id = TeamId::generate(Timestamp::now());
    let bundle = Bundle {
        id: BundleId::generate(Timestamp::now()),
        team_id,
        task_id,
        pov_id: Some(PovId::generate(Timestamp::now())),
        patch_id: Some(crucible_core::PatchId::generate(Timestamp::now())),
        submitted_sarif_id: None,
        broadcast_sarif_id: None,
        freeform_id: None,
        description: None,
        deleted: false,
    };
    store.insert_bundle(&bundle).unwrap();
    assert!(store.get_bundle(bundle.id, task_id, team_id).is_ok());

    store.delete_bundle(bundle.id, task_id, team_id).unwrap();
    assert!(matches!(
        store.get_bundle(bundle.id, task_id, team_id),
        Err(StoreError::NotFound)
    ));
    assert!(matches!(
        store.delete_bundle(bundle.id, task_id, team_id),
        Err(StoreError::NotFound)
    ));
}

#[test]
fn job_arrays_append_without_clobbering() {
    let (_dir, store) = open_store();
    let team_id = TeamId::generate(Timestamp::now());
    let job_id = JobId::generate(Timestamp::now());
    store
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

    store
        .append_job_artifact(
            job_id,
            &ArtifactRecord {
                object_name: "artifacts/a".to_string(),
                filename: "a.log".to_string(),
                context: None,
            },
        )
        .unwrap();
    store
        .append_job_result(
            job_id,
            &CommandResult {
                command: "make test".to_string(),
                exit_code: 0,
                stdout: Some("ok".to_string()),
                stderr: None,
            },
        )
        .unwrap();
    store
        .append_job_artifact(
            job_id,
            &ArtifactRecord {
                object_name: "artifacts/b".to_string(),
                filename: "b.log".to_string(),
                context: Some("fuzzing".to_string()),
            },
        )
        .unwrap();

    let row = store.get_job(job_id, team_id).unwrap();
    assert_eq!(row.artifacts.len(), 2);
    assert_eq!(row.results.len(), 1);
    assert_eq!(row.artifacts[1].object_name, "artifacts/b");
}

#[test]
fn auth_upsert_and_deactivation() {
    let (_dir, store) = open_store();
    let keep = TeamId::generate(Timestamp::now());
    let drop = TeamId::generate(Timestamp::now());
    for id in [keep, drop] {
        store
            .upsert_auth(&AuthRecord {
                id,
                token_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
                note: String::new(),
                active: true,
                permissions: Permissions {
                    crs: true,
                    ..Permissions::default()
                },
            })
            .unwrap();
    }

    let deactivated = store.deactivate_auths_except(&[keep]).unwrap();
    assert_eq!(deactivated, 1);
    assert!(store.get_auth(keep).unwrap().active);
    assert!(!store.get_auth(drop).unwrap().active);
}

#[test]
fn status_counts_aggregate_povs_and_patches() {
    let (_dir, store) = open_store();
    let task_id = TaskId::generate(Timestamp::now());
    store.insert_task(&sample_task(task_id)).unwrap();
    let team_id = TeamId::generate(Timestamp::now());
    for _ in 0 .. 3 {
        store
            .insert_pov(&sample_pov(PovId::generate(Timestamp::now()), task_id, team_id))
            .unwrap();
    }
    let counts = store.status_counts().unwrap();
    assert_eq!(counts.accepted, 3);
    assert_eq!(counts.passed, 0);
}
