// crates/crucible-store-sqlite/src/queue.rs
// ============================================================================
// Module: SQLite Result Queue
// Description: Durable FIFO queue with visibility timeouts.
// Purpose: Carry worker result messages back to the core exactly as long as needed.
// Dependencies: crucible-core, rand, rusqlite
// ============================================================================

//! ## Overview
//! A pull queue on the store database. Dequeue leases the oldest visible
//! message and hides it until `visible_at`; deleting requires the lease
//! token minted at dequeue time, so a handler that outlives its visibility
//! window can no longer delete the message and redelivery wins.
//! FIFO order follows insertion sequence; redelivered messages keep their
//! original position.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;

use crucible_core::QueueError;
use crucible_core::QueueLease;
use crucible_core::ResultQueue;
use crucible_core::Timestamp;
use rand::Rng;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::store::SqliteStore;

// ============================================================================
// SECTION: Queue
// ============================================================================

/// `SQLite`-backed result queue sharing the store connection.
#[derive(Clone)]
pub struct SqliteResultQueue {
    /// Shared connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteResultQueue {
    /// Builds a queue over the store's connection.
    #[must_use]
    pub fn new(store: &SqliteStore) -> Self {
        Self {
            connection: store.connection(),
        }
    }

    /// Runs a closure against the locked connection.
    fn with_connection<T>(
        &self,
        operation: impl FnOnce(&mut Connection) -> Result<T, QueueError>,
    ) -> Result<T, QueueError> {
        let mut guard = self
            .connection
            .lock()
            .map_err(|_| QueueError::Backend("queue lock poisoned".to_string()))?;
        operation(&mut guard)
    }
}

/// Mints an unguessable lease token.
fn mint_lease() -> String {
    let token: u128 = rand::thread_rng().r#gen();
    format!("{token:032x}")
}

impl ResultQueue for SqliteResultQueue {
    fn enqueue(&self, payload: &str) -> Result<(), QueueError> {
        self.with_connection(|conn| {
            conn.execute("INSERT INTO result_queue (payload) VALUES (?1)", params![payload])
                .map_err(|err| QueueError::Backend(err.to_string()))?;
            Ok(())
        })
    }

    fn dequeue(
        &self,
        now: Timestamp,
        visibility_millis: i64,
    ) -> Result<Option<QueueLease>, QueueError> {
        let lease = mint_lease();
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| QueueError::Backend(err.to_string()))?;
            let head: Option<(i64, String, i64)> = tx
                .query_row(
                    "SELECT seq, payload, delivery_count FROM result_queue
                     WHERE visible_at <= ?1 ORDER BY seq LIMIT 1",
                    params![now.as_unix_millis()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(|err| QueueError::Backend(err.to_string()))?;
            let Some((seq, payload, delivery_count)) = head else {
                return Ok(None);
            };
            tx.execute(
                "UPDATE result_queue
                 SET visible_at = ?2, lease = ?3, delivery_count = delivery_count + 1
                 WHERE seq = ?1",
                params![
                    seq,
                    now.as_unix_millis().saturating_add(visibility_millis),
                    lease
                ],
            )
            .map_err(|err| QueueError::Backend(err.to_string()))?;
            tx.commit().map_err(|err| QueueError::Backend(err.to_string()))?;
            let delivery_count = u32::try_from(delivery_count.saturating_add(1)).unwrap_or(u32::MAX);
            Ok(Some(QueueLease {
                lease: lease.clone(),
                payload,
                delivery_count,
            }))
        })
    }

    fn delete(&self, lease: &str) -> Result<(), QueueError> {
        self.with_connection(|conn| {
            // An expired lease was reassigned or cleared; deleting nothing is correct.
            conn.execute("DELETE FROM result_queue WHERE lease = ?1", params![lease])
                .map_err(|err| QueueError::Backend(err.to_string()))?;
            Ok(())
        })
    }
}
