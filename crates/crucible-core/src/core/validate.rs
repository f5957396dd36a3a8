// crates/crucible-core/src/core/validate.rs
// ============================================================================
// Module: Crucible Payload Validation
// Description: Size limits, base64 decoding, and per-field error maps.
// Purpose: Enforce payload bounds uniformly across submission kinds.
// Dependencies: base64, serde
// ============================================================================

//! ## Overview
//! Payload bounds apply to decoded bytes, not the base64 wire form: a patch
//! of exactly 102 400 decoded bytes is accepted and one more byte is
//! rejected. Validation failures accumulate into a per-field reason map
//! that the API returns verbatim in 400 bodies.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum decoded patch size in bytes (100 KiB).
pub const MAX_PATCH_BYTES: usize = 100 * 1024;
/// Maximum decoded testcase / freeform payload size in bytes (2 MiB).
pub const MAX_TESTCASE_BYTES: usize = 2 * 1024 * 1024;
/// Maximum description length in bytes (128 KiB).
pub const MAX_DESCRIPTION_BYTES: usize = 128 * 1024;
/// Maximum fuzzer / sanitizer name length in bytes (4 KiB).
pub const MAX_NAME_BYTES: usize = 4 * 1024;

// ============================================================================
// SECTION: Field Errors
// ============================================================================

/// Per-field validation reasons, keyed by payload field name.
///
/// # Invariants
/// - Field order is stable (sorted) for deterministic error bodies.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    /// Creates an empty error map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a reason against a field, keeping the first reason per field.
    pub fn push(&mut self, field: &str, reason: impl Into<String>) {
        self.0.entry(field.to_string()).or_insert_with(|| reason.into());
    }

    /// Returns true when no reasons were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the recorded reason for a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Consumes the map into its sorted underlying form.
    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}

// ============================================================================
// SECTION: Base64 Fields
// ============================================================================

/// Decodes a base64 payload field, enforcing a decoded-size bound.
///
/// On failure the reason is recorded against `field` in `errors` and
/// `None` is returned.
pub fn decode_base64_field(
    field: &str,
    raw: &str,
    max_decoded_bytes: usize,
    errors: &mut FieldErrors,
) -> Option<Vec<u8>> {
    // Reject oversized payloads before decoding: 4 base64 chars carry 3 bytes.
    let ceiling = max_decoded_bytes.saturating_add(3).saturating_mul(4) / 3 + 4;
    if raw.len() > ceiling {
        errors.push(field, format!("exceeds maximum size of {max_decoded_bytes} bytes"));
        return None;
    }
    let decoded = match BASE64.decode(raw.as_bytes()) {
        Ok(decoded) => decoded,
        Err(_) => {
            errors.push(field, "invalid base64");
            return None;
        }
    };
    if decoded.len() > max_decoded_bytes {
        errors.push(field, format!("exceeds maximum size of {max_decoded_bytes} bytes"));
        return None;
    }
    Some(decoded)
}

/// Validates a bounded UTF-8 text field.
pub fn check_text_field(field: &str, raw: &str, max_bytes: usize, errors: &mut FieldErrors) {
    if raw.is_empty() {
        errors.push(field, "must not be empty");
    } else if raw.len() > max_bytes {
        errors.push(field, format!("exceeds maximum size of {max_bytes} bytes"));
    }
}

#[cfg(test)]
mod tests;
