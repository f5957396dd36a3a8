// crates/crucible-core/src/core/validate/tests.rs
// ============================================================================
// Module: Payload Validation Unit Tests
// Description: Unit tests for size bounds and base64 decoding.
// Purpose: Pin the exact decoded-byte boundaries the API enforces.
// Dependencies: base64, crucible-core
// ============================================================================

//! ## Overview
//! Exercises the exact boundary behavior: a patch of 102 400 decoded bytes
//! passes and 102 401 fails.

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

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use super::FieldErrors;
use super::MAX_PATCH_BYTES;
use super::MAX_TESTCASE_BYTES;
use super::check_text_field;
use super::decode_base64_field;

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn patch_boundary_is_exact() {
    let mut errors = FieldErrors::new();
    let at_limit = BASE64.encode(vec![0u8; MAX_PATCH_BYTES]);
    let decoded = decode_base64_field("patch", &at_limit, MAX_PATCH_BYTES, &mut errors);
    assert_eq!(decoded.map(|bytes| bytes.len()), Some(MAX_PATCH_BYTES));
    assert!(errors.is_empty());

    let mut errors = FieldErrors::new();
    let over_limit = BASE64.encode(vec![0u8; MAX_PATCH_BYTES + 1]);
    assert!(decode_base64_field("patch", &over_limit, MAX_PATCH_BYTES, &mut errors).is_none());
    assert!(errors.get("patch").is_some());
}

#[test]
fn testcase_boundary_is_exact() {
    let mut errors = FieldErrors::new();
    let at_limit = BASE64.encode(vec![0u8; MAX_TESTCASE_BYTES]);
    assert!(
        decode_base64_field("testcase", &at_limit, MAX_TESTCASE_BYTES, &mut errors).is_some()
    );

    let mut errors = FieldErrors::new();
    let over_limit = BASE64.encode(vec![0u8; MAX_TESTCASE_BYTES + 1]);
    assert!(
        decode_base64_field("testcase", &over_limit, MAX_TESTCASE_BYTES, &mut errors).is_none()
    );
}

#[test]
fn invalid_base64_is_reported_per_field() {
    let mut errors = FieldErrors::new();
    assert!(decode_base64_field("testcase", "not base64!!!", 1024, &mut errors).is_none());
    assert_eq!(errors.get("testcase"), Some("invalid base64"));
}

#[test]
fn oversized_wire_form_is_rejected_before_decoding() {
    let mut errors = FieldErrors::new();
    let huge = "A".repeat(16 * 1024);
    assert!(decode_base64_field("patch", &huge, 16, &mut errors).is_none());
}

#[test]
fn text_fields_reject_empty_and_oversized() {
    let mut errors = FieldErrors::new();
    check_text_field("description", "", 8, &mut errors);
    assert_eq!(errors.get("description"), Some("must not be empty"));

    let mut errors = FieldErrors::new();
    check_text_field("description", "way past the bound", 8, &mut errors);
    assert!(errors.get("description").is_some());

    let mut errors = FieldErrors::new();
    check_text_field("description", "fine", 8, &mut errors);
    assert!(errors.is_empty());
}

#[test]
fn field_errors_keep_first_reason() {
    let mut errors = FieldErrors::new();
    errors.push("field", "first");
    errors.push("field", "second");
    assert_eq!(errors.get("field"), Some("first"));
}
