// crates/crucible-store-sqlite/src/lease/tests.rs
// ============================================================================
// Module: Leader Lease Unit Tests
// Description: Unit tests for acquisition, renewal, and release.
// Purpose: Pin the single-holder invariant across contenders.
// Dependencies: crucible-core, crucible-store-sqlite
// ============================================================================

//! ## Overview
//! Exercises lease contention between two holders: only one holds at a
//! time, expiry hands leadership over, and renewal fails for non-holders.

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

use crucible_core::LeaderElector;
use crucible_core::Timestamp;

use super::SqliteLeaderElector;
use crate::store::SqliteStore;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Lease name under test.
const LEASE: &str = "controller";

/// Opens an elector over a fresh in-memory store.
fn open_elector() -> SqliteLeaderElector {
    let store = SqliteStore::open_in_memory().unwrap();
    SqliteLeaderElector::new(&store)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn only_one_holder_acquires() {
    let elector = open_elector();
    let now = Timestamp::from_unix_millis(1_000);
    assert!(elector.try_acquire(LEASE, "alpha", now, 15_000).unwrap());
    assert!(!elector.try_acquire(LEASE, "beta", now, 15_000).unwrap());
    // Re-acquisition by the holder refreshes the lease.
    assert!(elector.try_acquire(LEASE, "alpha", now, 15_000).unwrap());
}

#[test]
fn expiry_hands_leadership_over() {
    let elector = open_elector();
    assert!(
        elector
            .try_acquire(LEASE, "alpha", Timestamp::from_unix_millis(1_000), 15_000)
            .unwrap()
    );
    assert!(
        elector
            .try_acquire(LEASE, "beta", Timestamp::from_unix_millis(20_000), 15_000)
            .unwrap()
    );
    assert!(
        !elector
            .try_acquire(LEASE, "alpha", Timestamp::from_unix_millis(21_000), 15_000)
            .unwrap()
    );
}

#[test]
fn renewal_requires_a_live_lease_and_matching_holder() {
    let elector = open_elector();
    let now = Timestamp::from_unix_millis(1_000);
    assert!(elector.try_acquire(LEASE, "alpha", now, 15_000).unwrap());

    assert!(elector.renew(LEASE, "alpha", Timestamp::from_unix_millis(10_000), 15_000).unwrap());
    assert!(!elector.renew(LEASE, "beta", Timestamp::from_unix_millis(10_000), 15_000).unwrap());
    // A lease that already expired cannot be renewed, only re-acquired.
    assert!(!elector.renew(LEASE, "alpha", Timestamp::from_unix_millis(60_000), 15_000).unwrap());
}

#[test]
fn release_frees_the_lease_for_the_next_contender() {
    let elector = open_elector();
    let now = Timestamp::from_unix_millis(1_000);
    assert!(elector.try_acquire(LEASE, "alpha", now, 15_000).unwrap());
    elector.release(LEASE, "alpha").unwrap();
    assert!(elector.try_acquire(LEASE, "beta", now, 15_000).unwrap());
}

#[test]
fn release_by_non_holder_is_a_noop() {
    let elector = open_elector();
    let now = Timestamp::from_unix_millis(1_000);
    assert!(elector.try_acquire(LEASE, "alpha", now, 15_000).unwrap());
    elector.release(LEASE, "beta").unwrap();
    assert!(!elector.try_acquire(LEASE, "beta", now, 15_000).unwrap());
}
