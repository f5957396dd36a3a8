// crates/crucible-server/src/auth.rs
// ============================================================================
// Module: Submission API Authentication
// Description: HTTP Basic authentication against stored argon2id credentials.
// Purpose: Provide strict, fail-closed caller identification for the API.
// Dependencies: argon2, base64, crucible-core, subtle
// ============================================================================

//! ## Overview
//! Callers authenticate with HTTP Basic `id:token`. The id must parse as a
//! team id and resolve to an active credential; the token is verified
//! against the stored argon2id PHC hash. Every failure collapses into the
//! same unauthenticated error so the API discloses nothing about which
//! credentials exist.

// ============================================================================
// SECTION: Imports
// ============================================================================

use argon2::Argon2;
use argon2::PasswordHash;
use argon2::PasswordVerifier;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use crucible_core::Permissions;
use crucible_core::SubmissionStore;
use crucible_core::TeamId;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted authorization header size.
const MAX_AUTH_HEADER_BYTES: usize = 8 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Authentication errors. All map to 401 without detail disclosure.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing or invalid authentication.
    #[error("unauthenticated")]
    Unauthenticated,
}

// ============================================================================
// SECTION: Auth Context
// ============================================================================

/// Authenticated caller context.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Caller team id.
    pub team_id: TeamId,
    /// Permissions granted to the credential.
    pub permissions: Permissions,
}

impl AuthContext {
    /// Returns true when the caller may submit as a CRS.
    #[must_use]
    pub const fn is_crs(&self) -> bool {
        self.permissions.crs
    }
}

// ============================================================================
// SECTION: Authentication
// ============================================================================

/// Authenticates a request against stored credentials.
///
/// # Errors
///
/// Returns [`AuthError::Unauthenticated`] on any failure: missing header,
/// malformed credentials, unknown id, inactive credential, or hash
/// mismatch.
pub fn authenticate(
    store: &dyn SubmissionStore,
    headers: &HeaderMap,
) -> Result<AuthContext, AuthError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AuthError::Unauthenticated)?;
    if header.len() > MAX_AUTH_HEADER_BYTES {
        return Err(AuthError::Unauthenticated);
    }
    let (id, token) = parse_basic(header)?;
    let team_id = TeamId::parse(&id).map_err(|_| AuthError::Unauthenticated)?;
    let record = store.get_auth(team_id).map_err(|_| AuthError::Unauthenticated)?;
    if !record.active {
        return Err(AuthError::Unauthenticated);
    }
    verify_token(&record.token_hash, &token)?;
    Ok(AuthContext {
        team_id,
        permissions: record.permissions,
    })
}

/// Parses a `Basic` authorization header into `(id, token)`.
fn parse_basic(header: &str) -> Result<(String, String), AuthError> {
    let mut parts = header.trim().splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let encoded = parts.next().unwrap_or_default().trim();
    if !scheme.eq_ignore_ascii_case("basic") || encoded.is_empty() {
        return Err(AuthError::Unauthenticated);
    }
    let decoded = BASE64.decode(encoded).map_err(|_| AuthError::Unauthenticated)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::Unauthenticated)?;
    let (id, token) = decoded.split_once(':').ok_or(AuthError::Unauthenticated)?;
    if id.is_empty() || token.is_empty() {
        return Err(AuthError::Unauthenticated);
    }
    Ok((id.to_string(), token.to_string()))
}

/// Verifies a raw token against an argon2id PHC hash.
fn verify_token(stored_hash: &str, token: &str) -> Result<(), AuthError> {
    let parsed = PasswordHash::new(stored_hash).map_err(|_| AuthError::Unauthenticated)?;
    Argon2::default()
        .verify_password(token.as_bytes(), &parsed)
        .map_err(|_| AuthError::Unauthenticated)
}

/// Builds a `Basic` authorization header value for outbound calls.
#[must_use]
pub fn basic_header(id: &str, token: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{id}:{token}").as_bytes()))
}
