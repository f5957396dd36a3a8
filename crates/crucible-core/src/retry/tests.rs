// crates/crucible-core/src/retry/tests.rs
// ============================================================================
// Module: Retry Policy Unit Tests
// Description: Unit tests for attempt counting and backoff growth.
// Purpose: Pin the three-attempt fibonacci policy.
// Dependencies: crucible-core
// ============================================================================

//! ## Overview
//! Exercises attempt exhaustion, non-transient short-circuit, and the
//! fibonacci delay table.

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

use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::backoff_delay;
use super::with_retries_blocking;

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn backoff_follows_fibonacci_multiples() {
    assert_eq!(backoff_delay(1), Duration::from_millis(25));
    assert_eq!(backoff_delay(2), Duration::from_millis(25));
    assert_eq!(backoff_delay(3), Duration::from_millis(50));
    assert_eq!(backoff_delay(4), Duration::from_millis(75));
}

#[test]
fn transient_errors_exhaust_three_attempts() {
    let calls = AtomicU32::new(0);
    let result: Result<(), &str> = with_retries_blocking(
        || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("transient")
        },
        |_| true,
    );
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn non_transient_errors_fail_fast() {
    let calls = AtomicU32::new(0);
    let result: Result<(), &str> = with_retries_blocking(
        || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("fatal")
        },
        |_| false,
    );
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn success_after_retry_returns_value() {
    let calls = AtomicU32::new(0);
    let result = with_retries_blocking(
        || {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("transient")
            } else {
                Ok(7)
            }
        },
        |_| true,
    );
    assert_eq!(result, Ok(7));
}
