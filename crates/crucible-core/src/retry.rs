// crates/crucible-core/src/retry.rs
// ============================================================================
// Module: Crucible Retry Policy
// Description: Bounded fibonacci-backoff retry helper for transient calls.
// Purpose: Apply one retry policy to storage and orchestrator calls.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Transient storage and orchestrator failures retry three times with
//! fibonacci backoff from a 25 ms base (25 ms, 25 ms, 50 ms). Exhaustion
//! surfaces the last error to the caller.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::time::Duration;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Number of attempts before giving up.
pub const RETRY_ATTEMPTS: u32 = 3;
/// Backoff base in milliseconds.
pub const RETRY_BASE_MS: u64 = 25;

/// Returns the backoff delay before the given retry (1-based).
#[must_use]
pub const fn backoff_delay(retry: u32) -> Duration {
    // Fibonacci multiples of the base: 1, 1, 2, 3, 5, ...
    let mut previous = 1u64;
    let mut current = 1u64;
    let mut step = 1u32;
    while step < retry {
        let next = previous + current;
        previous = current;
        current = next;
        step += 1;
    }
    Duration::from_millis(RETRY_BASE_MS * previous)
}

// ============================================================================
// SECTION: Retry Helpers
// ============================================================================

/// Runs an async operation with the standard retry policy.
///
/// The `transient` predicate decides whether an error is worth retrying;
/// non-transient errors return immediately.
///
/// # Errors
///
/// Returns the final error once attempts are exhausted.
pub async fn with_retries<T, E, F, Fut>(
    mut operation: F,
    transient: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < RETRY_ATTEMPTS && transient(&err) => {
                tokio::time::sleep(backoff_delay(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Runs a blocking operation with the standard retry policy.
///
/// # Errors
///
/// Returns the final error once attempts are exhausted.
pub fn with_retries_blocking<T, E>(
    mut operation: impl FnMut() -> Result<T, E>,
    transient: impl Fn(&E) -> bool,
) -> Result<T, E> {
    let mut attempt = 1u32;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < RETRY_ATTEMPTS && transient(&err) => {
                std::thread::sleep(backoff_delay(attempt));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests;
