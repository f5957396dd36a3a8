// crates/crucible-server/src/archive/tests.rs
// ============================================================================
// Module: Blob Archive Unit Tests
// Description: Unit tests for content addressing and the in-memory store.
// Purpose: Pin key derivation and size-capped reads.
// Dependencies: crucible-core
// ============================================================================

//! ## Overview
//! Exercises content-addressed key derivation and the in-memory blob
//! store's idempotent puts and bounded gets.

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

use crucible_core::BlobError;
use crucible_core::BlobStore;

use super::InMemoryBlobStore;
use super::content_address;

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn content_address_is_deterministic_sha256() {
    let key = content_address(b"aaaaaaaaaa");
    assert!(key.starts_with("sha256/"));
    assert_eq!(key.len(), 7 + 64);
    assert_eq!(key, content_address(b"aaaaaaaaaa"));
    assert_ne!(key, content_address(b"bbbbbbbbbb"));
}

#[tokio::test]
async fn puts_are_idempotent_by_key() {
    let store = InMemoryBlobStore::new();
    store.put("sha256/abc", b"payload".to_vec(), None).await.unwrap();
    store.put("sha256/abc", b"payload".to_vec(), None).await.unwrap();
    assert_eq!(store.keys().len(), 1);
    assert_eq!(store.get("sha256/abc", 1024).await.unwrap(), b"payload");
}

#[tokio::test]
async fn get_enforces_the_size_bound() {
    let store = InMemoryBlobStore::new();
    store.put("big", vec![0u8; 64], None).await.unwrap();
    assert!(matches!(
        store.get("big", 16).await,
        Err(BlobError::TooLarge { .. })
    ));
    assert!(store.get("big", 64).await.is_ok());
}

#[tokio::test]
async fn missing_key_is_not_found() {
    let store = InMemoryBlobStore::new();
    assert!(matches!(
        store.get("absent", 16).await,
        Err(BlobError::NotFound(_))
    ));
}
