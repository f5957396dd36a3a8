// crates/crucible-server/src/identity.rs
// ============================================================================
// Module: Identity Reconciliation
// Description: Startup sync of configured teams into stored credentials.
// Purpose: Upsert declared credentials and deactivate the undeclared rest.
// Dependencies: argon2, crucible-core, crucible-config
// ============================================================================

//! ## Overview
//! At boot the configured team list is reconciled into auth rows: each
//! team is upserted keyed by id with an argon2id hash of its token and the
//! declared permissions and active flag. Credentials present in storage
//! but absent from configuration are deactivated — never deleted — so the
//! audit trail keeps resolving historical ids.

// ============================================================================
// SECTION: Imports
// ============================================================================

use argon2::Argon2;
use argon2::PasswordHasher;
use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use crucible_config::CrucibleConfig;
use crucible_core::AuditDetail;
use crucible_core::AuditEvent;
use crucible_core::AuditSink;
use crucible_core::AuthRecord;
use crucible_core::StoreError;
use crucible_core::SubmissionStore;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors produced during identity reconciliation.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// A team id in configuration failed to parse.
    #[error("identity config invalid: {0}")]
    Config(String),
    /// Token hashing failed.
    #[error("token hashing failed: {0}")]
    Hashing(String),
    /// The store rejected an upsert.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Hashing
// ============================================================================

/// Hashes a raw token into an argon2id PHC string.
///
/// # Errors
///
/// Returns [`IdentityError::Hashing`] when the hasher fails.
pub fn hash_token(token: &str) -> Result<String, IdentityError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(token.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| IdentityError::Hashing(err.to_string()))
}

// ============================================================================
// SECTION: Reconciliation
// ============================================================================

/// Reconciles configured teams into stored credentials.
///
/// Returns `(upserted, deactivated)` counts and emits one audit event.
///
/// # Errors
///
/// Returns [`IdentityError`] on malformed config, hashing failure, or
/// store failure.
pub fn reconcile_identities(
    config: &CrucibleConfig,
    store: &dyn SubmissionStore,
    audit: &dyn AuditSink,
) -> Result<(usize, usize), IdentityError> {
    let mut keep = Vec::with_capacity(config.teams.len());
    for team in &config.teams {
        let team_id = team.team_id().map_err(|err| IdentityError::Config(err.to_string()))?;
        let record = AuthRecord {
            id: team_id,
            token_hash: hash_token(&team.api_key.token)?,
            note: team.note.clone(),
            active: team.api_key.active,
            permissions: team.api_key.permissions,
        };
        store.upsert_auth(&record)?;
        keep.push(team_id);
    }
    let deactivated = store.deactivate_auths_except(&keep)?;
    audit.record(&AuditEvent::new(
        "identity_reconciled",
        config.round_id.clone(),
        AuditDetail::IdentityReconciled {
            upserted: keep.len(),
            deactivated,
        },
    ));
    Ok((keep.len(), deactivated))
}

#[cfg(test)]
mod tests;
