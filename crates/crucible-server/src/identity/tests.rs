// crates/crucible-server/src/identity/tests.rs
// ============================================================================
// Module: Identity Reconciliation Unit Tests
// Description: Unit tests for startup credential sync.
// Purpose: Pin upsert-and-deactivate semantics and hash verifiability.
// Dependencies: crucible-config, crucible-core, crucible-store-sqlite
// ============================================================================

//! ## Overview
//! Exercises reconciliation against a real store: declared teams are
//! upserted with verifiable hashes, undeclared credentials are
//! deactivated, and re-running is idempotent.

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

use argon2::Argon2;
use argon2::PasswordHash;
use argon2::PasswordVerifier;
use crucible_config::CrucibleConfig;
use crucible_core::AuthRecord;
use crucible_core::NoopAuditSink;
use crucible_core::Permissions;
use crucible_core::SubmissionStore;
use crucible_core::TeamId;
use crucible_core::Timestamp;
use crucible_store_sqlite::SqliteStore;

use super::hash_token;
use super::reconcile_identities;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Builds a config declaring one team with the given id.
fn config_with_team(team_id: &str) -> CrucibleConfig {
    CrucibleConfig::parse(&format!(
        r#"
round_id = "round-1"

[store]
path = "crucible.db"

[orchestrator]
api_url = "https://orchestrator.internal:6443"
token_path = "/var/run/secrets/token"
namespace = "crucible-eval"
evaluator_image = "evaluator:1"
daemon_image = "daemon:1"

[blob]
submissions_bucket = "submissions"
artifacts_bucket = "artifacts"

[archive]
bucket = "archive"

[[teams]]
id = "{team_id}"
note = "declared team"

[teams.api_key]
token = "a-long-enough-example-token"

[teams.api_key.permissions]
crs = true
"#
    ))
    .unwrap()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn hash_token_produces_verifiable_phc_string() {
    let hash = hash_token("a-long-enough-example-token").unwrap();
    assert!(hash.starts_with("$argon2id$"));
    let parsed = PasswordHash::new(&hash).unwrap();
    assert!(
        Argon2::default()
            .verify_password(b"a-long-enough-example-token", &parsed)
            .is_ok()
    );
}

#[test]
fn declared_teams_are_upserted() {
    let store = SqliteStore::open_in_memory().unwrap();
    let team_id = TeamId::generate(Timestamp::now());
    let config = config_with_team(&team_id.to_string());

    let (upserted, deactivated) =
        reconcile_identities(&config, &store, &NoopAuditSink).unwrap();
    assert_eq!(upserted, 1);
    assert_eq!(deactivated, 0);

    let record = store.get_auth(team_id).unwrap();
    assert!(record.active);
    assert!(record.permissions.crs);
    assert_eq!(record.note, "declared team");
}

#[test]
fn undeclared_credentials_are_deactivated_not_deleted() {
    let store = SqliteStore::open_in_memory().unwrap();
    let stale = TeamId::generate(Timestamp::now());
    store
        .upsert_auth(&AuthRecord {
            id: stale,
            token_hash: hash_token("a-long-enough-example-token").unwrap(),
            note: "left over from last round".to_string(),
            active: true,
            permissions: Permissions::default(),
        })
        .unwrap();

    let declared = TeamId::generate(Timestamp::now());
    let config = config_with_team(&declared.to_string());
    let (_, deactivated) = reconcile_identities(&config, &store, &NoopAuditSink).unwrap();
    assert_eq!(deactivated, 1);

    // Still resolvable for audit continuity, just inactive.
    let record = store.get_auth(stale).unwrap();
    assert!(!record.active);
}

#[test]
fn reconciliation_is_idempotent() {
    let store = SqliteStore::open_in_memory().unwrap();
    let team_id = TeamId::generate(Timestamp::now());
    let config = config_with_team(&team_id.to_string());

    reconcile_identities(&config, &store, &NoopAuditSink).unwrap();
    let (upserted, deactivated) =
        reconcile_identities(&config, &store, &NoopAuditSink).unwrap();
    assert_eq!(upserted, 1);
    assert_eq!(deactivated, 0);
    assert!(store.get_auth(team_id).unwrap().active);
}
