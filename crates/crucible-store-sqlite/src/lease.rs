// crates/crucible-store-sqlite/src/lease.rs
// ============================================================================
// Module: SQLite Leader Lease
// Description: Single-row compare-and-swap lease for leader election.
// Purpose: Keep at most one active job controller across replicas.
// Dependencies: crucible-core, rusqlite
// ============================================================================

//! ## Overview
//! One row per lease name. Acquisition succeeds when the lease is free,
//! expired, or already held by the caller; renewal succeeds only for the
//! current holder. Clock skew within the lease duration is the accepted
//! uncertainty window.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;

use crucible_core::LeaderElector;
use crucible_core::LeaseError;
use crucible_core::Timestamp;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::store::SqliteStore;

// ============================================================================
// SECTION: Elector
// ============================================================================

/// `SQLite`-backed lease elector sharing the store connection.
#[derive(Clone)]
pub struct SqliteLeaderElector {
    /// Shared connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteLeaderElector {
    /// Builds an elector over the store's connection.
    #[must_use]
    pub fn new(store: &SqliteStore) -> Self {
        Self {
            connection: store.connection(),
        }
    }

    /// Runs a closure against the locked connection.
    fn with_connection<T>(
        &self,
        operation: impl FnOnce(&Connection) -> Result<T, LeaseError>,
    ) -> Result<T, LeaseError> {
        let guard = self
            .connection
            .lock()
            .map_err(|_| LeaseError::Backend("lease lock poisoned".to_string()))?;
        operation(&guard)
    }
}

impl LeaderElector for SqliteLeaderElector {
    fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        now: Timestamp,
        lease_millis: i64,
    ) -> Result<bool, LeaseError> {
        let expires = now.as_unix_millis().saturating_add(lease_millis);
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO leases (name, holder, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (name) DO UPDATE SET
                     holder = excluded.holder,
                     expires_at = excluded.expires_at
                 WHERE leases.expires_at <= ?4 OR leases.holder = excluded.holder",
                params![name, holder, expires, now.as_unix_millis()],
            )
            .map_err(|err| LeaseError::Backend(err.to_string()))?;
            let current: Option<String> = conn
                .query_row(
                    "SELECT holder FROM leases WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|err| LeaseError::Backend(err.to_string()))?;
            Ok(current.as_deref() == Some(holder))
        })
    }

    fn renew(
        &self,
        name: &str,
        holder: &str,
        now: Timestamp,
        lease_millis: i64,
    ) -> Result<bool, LeaseError> {
        let expires = now.as_unix_millis().saturating_add(lease_millis);
        self.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE leases SET expires_at = ?3
                     WHERE name = ?1 AND holder = ?2 AND expires_at > ?4",
                    params![name, holder, expires, now.as_unix_millis()],
                )
                .map_err(|err| LeaseError::Backend(err.to_string()))?;
            Ok(changed > 0)
        })
    }

    fn release(&self, name: &str, holder: &str) -> Result<(), LeaseError> {
        self.with_connection(|conn| {
            conn.execute(
                "DELETE FROM leases WHERE name = ?1 AND holder = ?2",
                params![name, holder],
            )
            .map_err(|err| LeaseError::Backend(err.to_string()))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests;
