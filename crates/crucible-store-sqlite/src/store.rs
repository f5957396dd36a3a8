// crates/crucible-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Submission Store
// Description: Durable SubmissionStore backed by SQLite WAL.
// Purpose: Persist tasks, credentials, and submissions with idempotent transitions.
// Dependencies: crucible-core, rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements the durable [`SubmissionStore`] over `SQLite`.
//! The schema is versioned through an incremental ladder;
//! `created_at`/`updated_at` columns are maintained by triggers. Status
//! transitions are a single `UPDATE … WHERE status = 'accepted'`, so a row
//! that already reached a terminal state is never rewritten — duplicate
//! transition attempts report [`TransitionOutcome::AlreadyTerminal`].
//! Tenant-scoped reads fold cross-tenant rows into `NotFound`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use crucible_core::ArtifactRecord;
use crucible_core::AuthRecord;
use crucible_core::Bundle;
use crucible_core::BundleId;
use crucible_core::CommandResult;
use crucible_core::FreeformId;
use crucible_core::FreeformSubmission;
use crucible_core::JobId;
use crucible_core::JobRecord;
use crucible_core::PatchId;
use crucible_core::PatchSubmission;
use crucible_core::Permissions;
use crucible_core::PovId;
use crucible_core::PovSubmission;
use crucible_core::SarifAssessment;
use crucible_core::SarifAssessmentId;
use crucible_core::SarifBroadcast;
use crucible_core::SarifBroadcastId;
use crucible_core::SarifSubmission;
use crucible_core::SarifSubmissionId;
use crucible_core::StatusCounts;
use crucible_core::StoreError;
use crucible_core::SubmissionEntity;
use crucible_core::SubmissionStatus;
use crucible_core::SubmissionStore;
use crucible_core::Task;
use crucible_core::TaskId;
use crucible_core::TeamId;
use crucible_core::TransitionOutcome;
use crucible_core::status::Assessment;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration for the `SQLite` submission store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
}

impl SqliteStoreConfig {
    /// Builds a config with the default busy timeout.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Invalid store data or configuration.
    #[error("sqlite store invalid: {0}")]
    Invalid(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Db(message) => Self::Backend(message),
            SqliteStoreError::Invalid(message) | SqliteStoreError::VersionMismatch(message) => {
                Self::Invalid(message)
            }
        }
    }
}

/// Maps a rusqlite error onto the store error taxonomy.
fn map_db_error(err: &rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(code, _) = err {
        if matches!(code.code, ErrorCode::ConstraintViolation) {
            return StoreError::Conflict(err.to_string());
        }
    }
    StoreError::Backend(err.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed submission store with WAL support.
///
/// # Invariants
/// - Connection access is serialized through a mutex.
/// - The queue and lease backends share this connection.
#[derive(Clone)]
pub struct SqliteStore {
    /// Shared connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database and runs migrations.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] on open, pragma, or migration failure.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        if config.path.is_dir() {
            return Err(SqliteStoreError::Invalid(
                "store path must be a file, not a directory".to_string(),
            ));
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let mut connection = Connection::open_with_flags(&config.path, flags)
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        apply_pragmas(&connection, config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Opens an in-memory store for tests and tooling.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] on open or migration failure.
    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        let mut connection =
            Connection::open_in_memory().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Returns the shared connection handle for sibling backends.
    #[must_use]
    pub(crate) fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.connection)
    }

    /// Runs a closure against the locked connection.
    fn with_connection<T>(
        &self,
        operation: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let guard = self
            .connection
            .lock()
            .map_err(|_| StoreError::Backend("store lock poisoned".to_string()))?;
        operation(&guard)
    }
}

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = wal; PRAGMA synchronous = full;")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Statement creating the full version-1 schema.
const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    deadline INTEGER NOT NULL,
    round_id TEXT NOT NULL,
    commit_hash TEXT NOT NULL,
    project_name TEXT NOT NULL,
    focus TEXT NOT NULL,
    sources_json TEXT NOT NULL,
    unstripped_json TEXT NOT NULL,
    harnesses_included INTEGER NOT NULL,
    memory_gb INTEGER NOT NULL,
    cpus INTEGER NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000),
    updated_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000)
);
CREATE TABLE IF NOT EXISTS auths (
    id TEXT PRIMARY KEY,
    token_hash TEXT NOT NULL,
    note TEXT NOT NULL DEFAULT '',
    active INTEGER NOT NULL DEFAULT 1,
    crs INTEGER NOT NULL DEFAULT 0,
    competition_management INTEGER NOT NULL DEFAULT 0,
    job_runner INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000),
    updated_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000)
);
CREATE TABLE IF NOT EXISTS povs (
    id TEXT PRIMARY KEY,
    team_id TEXT NOT NULL,
    task_id TEXT NOT NULL REFERENCES tasks(id),
    testcase_path TEXT NOT NULL,
    fuzzer_name TEXT NOT NULL,
    sanitizer TEXT NOT NULL,
    architecture TEXT NOT NULL,
    engine TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000),
    updated_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000)
);
CREATE INDEX IF NOT EXISTS idx_povs_task_team ON povs (task_id, team_id);
CREATE TABLE IF NOT EXISTS patches (
    id TEXT PRIMARY KEY,
    team_id TEXT NOT NULL,
    task_id TEXT NOT NULL REFERENCES tasks(id),
    patch_path TEXT NOT NULL,
    status TEXT NOT NULL,
    functionality_tests_passing INTEGER,
    created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000),
    updated_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000)
);
CREATE INDEX IF NOT EXISTS idx_patches_task_team ON patches (task_id, team_id);
CREATE TABLE IF NOT EXISTS sarif_broadcasts (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL UNIQUE REFERENCES tasks(id),
    sarif_json TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000),
    updated_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000)
);
CREATE TABLE IF NOT EXISTS sarif_submissions (
    id TEXT PRIMARY KEY,
    team_id TEXT NOT NULL,
    task_id TEXT NOT NULL REFERENCES tasks(id),
    sarif_json TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000),
    updated_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000)
);
CREATE TABLE IF NOT EXISTS sarif_assessments (
    id TEXT PRIMARY KEY,
    team_id TEXT NOT NULL,
    broadcast_id TEXT NOT NULL REFERENCES sarif_broadcasts(id),
    assessment TEXT NOT NULL,
    description TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000),
    updated_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000)
);
CREATE TABLE IF NOT EXISTS freeform_submissions (
    id TEXT PRIMARY KEY,
    team_id TEXT NOT NULL,
    task_id TEXT NOT NULL REFERENCES tasks(id),
    payload_path TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000),
    updated_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000)
);
CREATE TABLE IF NOT EXISTS bundles (
    id TEXT PRIMARY KEY,
    team_id TEXT NOT NULL,
    task_id TEXT NOT NULL REFERENCES tasks(id),
    pov_id TEXT,
    patch_id TEXT,
    submitted_sarif_id TEXT,
    broadcast_sarif_id TEXT,
    freeform_id TEXT,
    description TEXT,
    deleted INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000),
    updated_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000)
);
CREATE INDEX IF NOT EXISTS idx_bundles_task_team ON bundles (task_id, team_id);
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    team_id TEXT NOT NULL,
    status TEXT NOT NULL,
    artifacts_json TEXT,
    results_json TEXT,
    functionality_tests_passing INTEGER,
    cache_key TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000),
    updated_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000)
);
CREATE TABLE IF NOT EXISTS result_queue (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    payload TEXT NOT NULL,
    visible_at INTEGER NOT NULL DEFAULT 0,
    lease TEXT,
    delivery_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER) * 1000)
);
CREATE INDEX IF NOT EXISTS idx_result_queue_visible ON result_queue (visible_at, seq);
CREATE TABLE IF NOT EXISTS leases (
    name TEXT PRIMARY KEY,
    holder TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);
";

/// Tables that receive an `updated_at` maintenance trigger.
const TRIGGERED_TABLES: &[&str] = &[
    "tasks",
    "auths",
    "povs",
    "patches",
    "sarif_broadcasts",
    "sarif_submissions",
    "sarif_assessments",
    "freeform_submissions",
    "bundles",
    "jobs",
];

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute_batch(SCHEMA_V1)
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            for table in TRIGGERED_TABLES {
                tx.execute_batch(&format!(
                    "CREATE TRIGGER IF NOT EXISTS trg_{table}_updated_at
                     AFTER UPDATE ON {table}
                     BEGIN
                         UPDATE {table}
                         SET updated_at = CAST(strftime('%s','now') AS INTEGER) * 1000
                         WHERE rowid = NEW.rowid;
                     END;"
                ))
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            }
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

// ============================================================================
// SECTION: Row Mapping Helpers
// ============================================================================

/// Parses a status column.
fn parse_status(raw: &str) -> Result<SubmissionStatus, StoreError> {
    SubmissionStatus::from_str(raw).map_err(|err| StoreError::Invalid(err.to_string()))
}

/// Parses a typed id column.
fn parse_id<T: FromStr>(raw: &str) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    T::from_str(raw).map_err(|err| StoreError::Invalid(err.to_string()))
}

/// Parses a JSON column.
fn parse_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|err| StoreError::Invalid(err.to_string()))
}

/// Serializes a value into a JSON column.
fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|err| StoreError::Invalid(err.to_string()))
}

// ============================================================================
// SECTION: SubmissionStore Implementation
// ============================================================================

impl SubmissionStore for SqliteStore {
    fn insert_task(&self, task: &Task) -> Result<(), StoreError> {
        let sources = to_json(&task.sources)?;
        let unstripped = to_json(&task.unstripped_sources)?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO tasks (id, kind, deadline, round_id, commit_hash, project_name,
                                    focus, sources_json, unstripped_json, harnesses_included,
                                    memory_gb, cpus)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    task.id.to_string(),
                    task.kind.label(),
                    task.deadline.as_unix_millis(),
                    task.round_id,
                    task.commit,
                    task.project_name,
                    task.focus,
                    sources,
                    unstripped,
                    task.harnesses_included,
                    task.memory_gb,
                    task.cpus,
                ],
            )
            .map_err(|err| map_db_error(&err))?;
            Ok(())
        })
    }

    fn get_task(&self, id: TaskId) -> Result<Task, StoreError> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, kind, deadline, round_id, commit_hash, project_name, focus,
                        sources_json, unstripped_json, harnesses_included, memory_gb, cpus
                 FROM tasks WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, bool>(9)?,
                        row.get::<_, u32>(10)?,
                        row.get::<_, u32>(11)?,
                    ))
                },
            )
            .optional()
            .map_err(|err| map_db_error(&err))?
            .ok_or(StoreError::NotFound)
            .and_then(
                |(
                    id,
                    kind,
                    deadline,
                    round_id,
                    commit,
                    project_name,
                    focus,
                    sources,
                    unstripped,
                    harnesses_included,
                    memory_gb,
                    cpus,
                )| {
                    Ok(Task {
                        id: parse_id(&id)?,
                        kind: match kind.as_str() {
                            "full" => crucible_core::TaskKind::Full,
                            "delta" => crucible_core::TaskKind::Delta,
                            other => {
                                return Err(StoreError::Invalid(format!(
                                    "unknown task kind: {other}"
                                )));
                            }
                        },
                        deadline: crucible_core::Timestamp::from_unix_millis(deadline),
                        round_id,
                        commit,
                        project_name,
                        focus,
                        sources: parse_json(&sources)?,
                        unstripped_sources: parse_json(&unstripped)?,
                        harnesses_included,
                        memory_gb,
                        cpus,
                    })
                },
            )
        })
    }

    fn upsert_auth(&self, auth: &AuthRecord) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO auths (id, token_hash, note, active, crs, competition_management,
                                    job_runner)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (id) DO UPDATE SET
                     token_hash = excluded.token_hash,
                     note = excluded.note,
                     active = excluded.active,
                     crs = excluded.crs,
                     competition_management = excluded.competition_management,
                     job_runner = excluded.job_runner",
                params![
                    auth.id.to_string(),
                    auth.token_hash,
                    auth.note,
                    auth.active,
                    auth.permissions.crs,
                    auth.permissions.competition_management,
                    auth.permissions.job_runner,
                ],
            )
            .map_err(|err| map_db_error(&err))?;
            Ok(())
        })
    }

    fn deactivate_auths_except(&self, keep: &[TeamId]) -> Result<usize, StoreError> {
        // Build the keep-list as a JSON array so one statement covers any count.
        let keep_json = to_json(&keep.iter().map(ToString::to_string).collect::<Vec<_>>())?;
        self.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE auths SET active = 0
                     WHERE active = 1
                       AND id NOT IN (SELECT value FROM json_each(?1))",
                    params![keep_json],
                )
                .map_err(|err| map_db_error(&err))?;
            Ok(changed)
        })
    }

    fn get_auth(&self, id: TeamId) -> Result<AuthRecord, StoreError> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, token_hash, note, active, crs, competition_management, job_runner
                 FROM auths WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, bool>(5)?,
                        row.get::<_, bool>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(|err| map_db_error(&err))?
            .ok_or(StoreError::NotFound)
            .and_then(|(id, token_hash, note, active, crs, competition_management, job_runner)| {
                Ok(AuthRecord {
                    id: parse_id(&id)?,
                    token_hash,
                    note,
                    active,
                    permissions: Permissions {
                        crs,
                        competition_management,
                        job_runner,
                    },
                })
            })
        })
    }

    fn insert_pov(&self, pov: &PovSubmission) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO povs (id, team_id, task_id, testcase_path, fuzzer_name, sanitizer,
                                   architecture, engine, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    pov.id.to_string(),
                    pov.team_id.to_string(),
                    pov.task_id.to_string(),
                    pov.testcase_path,
                    pov.fuzzer_name,
                    pov.sanitizer,
                    pov.architecture,
                    pov.engine,
                    pov.status.label(),
                ],
            )
            .map_err(|err| map_db_error(&err))?;
            Ok(())
        })
    }

    fn get_pov(
        &self,
        id: PovId,
        task_id: TaskId,
        team_id: TeamId,
    ) -> Result<PovSubmission, StoreError> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, team_id, task_id, testcase_path, fuzzer_name, sanitizer,
                        architecture, engine, status
                 FROM povs WHERE id = ?1 AND task_id = ?2 AND team_id = ?3",
                params![id.to_string(), task_id.to_string(), team_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()
            .map_err(|err| map_db_error(&err))?
            .ok_or(StoreError::NotFound)
            .and_then(
                |(
                    id,
                    team_id,
                    task_id,
                    testcase_path,
                    fuzzer_name,
                    sanitizer,
                    architecture,
                    engine,
                    status,
                )| {
                    Ok(PovSubmission {
                        id: parse_id(&id)?,
                        team_id: parse_id(&team_id)?,
                        task_id: parse_id(&task_id)?,
                        testcase_path,
                        fuzzer_name,
                        sanitizer,
                        architecture,
                        engine,
                        status: parse_status(&status)?,
                    })
                },
            )
        })
    }

    fn insert_patch(&self, patch: &PatchSubmission) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO patches (id, team_id, task_id, patch_path, status,
                                      functionality_tests_passing)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    patch.id.to_string(),
                    patch.team_id.to_string(),
                    patch.task_id.to_string(),
                    patch.patch_path,
                    patch.status.label(),
                    patch.functionality_tests_passing,
                ],
            )
            .map_err(|err| map_db_error(&err))?;
            Ok(())
        })
    }

    fn get_patch(
        &self,
        id: PatchId,
        task_id: TaskId,
        team_id: TeamId,
    ) -> Result<PatchSubmission, StoreError> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, team_id, task_id, patch_path, status, functionality_tests_passing
                 FROM patches WHERE id = ?1 AND task_id = ?2 AND team_id = ?3",
                params![id.to_string(), task_id.to_string(), team_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<bool>>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(|err| map_db_error(&err))?
            .ok_or(StoreError::NotFound)
            .and_then(|(id, team_id, task_id, patch_path, status, functionality)| {
                Ok(PatchSubmission {
                    id: parse_id(&id)?,
                    team_id: parse_id(&team_id)?,
                    task_id: parse_id(&task_id)?,
                    patch_path,
                    status: parse_status(&status)?,
                    functionality_tests_passing: functionality,
                })
            })
        })
    }

    fn insert_sarif_broadcast(&self, broadcast: &SarifBroadcast) -> Result<(), StoreError> {
        let sarif = to_json(&broadcast.sarif)?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO sarif_broadcasts (id, task_id, sarif_json) VALUES (?1, ?2, ?3)",
                params![broadcast.id.to_string(), broadcast.task_id.to_string(), sarif],
            )
            .map_err(|err| map_db_error(&err))?;
            Ok(())
        })
    }

    fn get_sarif_broadcast(
        &self,
        id: SarifBroadcastId,
        task_id: TaskId,
    ) -> Result<SarifBroadcast, StoreError> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, task_id, sarif_json FROM sarif_broadcasts
                 WHERE id = ?1 AND task_id = ?2",
                params![id.to_string(), task_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(|err| map_db_error(&err))?
            .ok_or(StoreError::NotFound)
            .and_then(|(id, task_id, sarif)| {
                Ok(SarifBroadcast {
                    id: parse_id(&id)?,
                    task_id: parse_id(&task_id)?,
                    sarif: parse_json(&sarif)?,
                })
            })
        })
    }

    fn get_sarif_assessment(
        &self,
        id: SarifAssessmentId,
        team_id: TeamId,
    ) -> Result<SarifAssessment, StoreError> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, team_id, broadcast_id, assessment, description, status
                 FROM sarif_assessments WHERE id = ?1 AND team_id = ?2",
                params![id.to_string(), team_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(|err| map_db_error(&err))?
            .ok_or(StoreError::NotFound)
            .and_then(|(id, team_id, broadcast_id, assessment, description, status)| {
                Ok(SarifAssessment {
                    id: parse_id(&id)?,
                    team_id: parse_id(&team_id)?,
                    broadcast_id: parse_id(&broadcast_id)?,
                    assessment: match assessment.as_str() {
                        "correct" => Assessment::Correct,
                        "incorrect" => Assessment::Incorrect,
                        other => {
                            return Err(StoreError::Invalid(format!(
                                "unknown assessment: {other}"
                            )));
                        }
                    },
                    description,
                    status: parse_status(&status)?,
                })
            })
        })
    }

    fn insert_sarif_assessment(&self, assessment: &SarifAssessment) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO sarif_assessments (id, team_id, broadcast_id, assessment,
                                                description, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    assessment.id.to_string(),
                    assessment.team_id.to_string(),
                    assessment.broadcast_id.to_string(),
                    assessment.assessment.label(),
                    assessment.description,
                    assessment.status.label(),
                ],
            )
            .map_err(|err| map_db_error(&err))?;
            Ok(())
        })
    }

    fn insert_sarif_submission(&self, submission: &SarifSubmission) -> Result<(), StoreError> {
        let sarif = to_json(&submission.sarif)?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO sarif_submissions (id, team_id, task_id, sarif_json, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    submission.id.to_string(),
                    submission.team_id.to_string(),
                    submission.task_id.to_string(),
                    sarif,
                    submission.status.label(),
                ],
            )
            .map_err(|err| map_db_error(&err))?;
            Ok(())
        })
    }

    fn get_sarif_submission(
        &self,
        id: SarifSubmissionId,
        task_id: TaskId,
        team_id: TeamId,
    ) -> Result<SarifSubmission, StoreError> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, team_id, task_id, sarif_json, status FROM sarif_submissions
                 WHERE id = ?1 AND task_id = ?2 AND team_id = ?3",
                params![id.to_string(), task_id.to_string(), team_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(|err| map_db_error(&err))?
            .ok_or(StoreError::NotFound)
            .and_then(|(id, team_id, task_id, sarif, status)| {
                Ok(SarifSubmission {
                    id: parse_id(&id)?,
                    team_id: parse_id(&team_id)?,
                    task_id: parse_id(&task_id)?,
                    sarif: parse_json(&sarif)?,
                    status: parse_status(&status)?,
                })
            })
        })
    }

    fn insert_freeform(&self, freeform: &FreeformSubmission) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO freeform_submissions (id, team_id, task_id, payload_path, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    freeform.id.to_string(),
                    freeform.team_id.to_string(),
                    freeform.task_id.to_string(),
                    freeform.payload_path,
                    freeform.status.label(),
                ],
            )
            .map_err(|err| map_db_error(&err))?;
            Ok(())
        })
    }

    fn get_freeform(
        &self,
        id: FreeformId,
        task_id: TaskId,
        team_id: TeamId,
    ) -> Result<FreeformSubmission, StoreError> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, team_id, task_id, payload_path, status FROM freeform_submissions
                 WHERE id = ?1 AND task_id = ?2 AND team_id = ?3",
                params![id.to_string(), task_id.to_string(), team_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(|err| map_db_error(&err))?
            .ok_or(StoreError::NotFound)
            .and_then(|(id, team_id, task_id, payload_path, status)| {
                Ok(FreeformSubmission {
                    id: parse_id(&id)?,
                    team_id: parse_id(&team_id)?,
                    task_id: parse_id(&task_id)?,
                    payload_path,
                    status: parse_status(&status)?,
                })
            })
        })
    }

    fn insert_bundle(&self, bundle: &Bundle) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO bundles (id, team_id, task_id, pov_id, patch_id,
                                      submitted_sarif_id, broadcast_sarif_id, freeform_id,
                                      description, deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0)",
                params![
                    bundle.id.to_string(),
                    bundle.team_id.to_string(),
                    bundle.task_id.to_string(),
                    bundle.pov_id.map(|id| id.to_string()),
                    bundle.patch_id.map(|id| id.to_string()),
                    bundle.submitted_sarif_id.map(|id| id.to_string()),
                    bundle.broadcast_sarif_id.map(|id| id.to_string()),
                    bundle.freeform_id.map(|id| id.to_string()),
                    bundle.description,
                ],
            )
            .map_err(|err| map_db_error(&err))?;
            Ok(())
        })
    }

    fn update_bundle(&self, bundle: &Bundle) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE bundles SET pov_id = ?4, patch_id = ?5, submitted_sarif_id = ?6,
                                        broadcast_sarif_id = ?7, freeform_id = ?8,
                                        description = ?9
                     WHERE id = ?1 AND task_id = ?2 AND team_id = ?3 AND deleted = 0",
                    params![
                        bundle.id.to_string(),
                        bundle.task_id.to_string(),
                        bundle.team_id.to_string(),
                        bundle.pov_id.map(|id| id.to_string()),
                        bundle.patch_id.map(|id| id.to_string()),
                        bundle.submitted_sarif_id.map(|id| id.to_string()),
                        bundle.broadcast_sarif_id.map(|id| id.to_string()),
                        bundle.freeform_id.map(|id| id.to_string()),
                        bundle.description,
                    ],
                )
                .map_err(|err| map_db_error(&err))?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }

    fn get_bundle(
        &self,
        id: BundleId,
        task_id: TaskId,
        team_id: TeamId,
    ) -> Result<Bundle, StoreError> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, team_id, task_id, pov_id, patch_id, submitted_sarif_id,
                        broadcast_sarif_id, freeform_id, description
                 FROM bundles
                 WHERE id = ?1 AND task_id = ?2 AND team_id = ?3 AND deleted = 0",
                params![id.to_string(), task_id.to_string(), team_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, Option<String>>(8)?,
                    ))
                },
            )
            .optional()
            .map_err(|err| map_db_error(&err))?
            .ok_or(StoreError::NotFound)
            .and_then(
                |(
                    id,
                    team_id,
                    task_id,
                    pov_id,
                    patch_id,
                    submitted_sarif_id,
                    broadcast_sarif_id,
                    freeform_id,
                    description,
                )| {
                    Ok(Bundle {
                        id: parse_id(&id)?,
                        team_id: parse_id(&team_id)?,
                        task_id: parse_id(&task_id)?,
                        pov_id: pov_id.as_deref().map(parse_id).transpose()?,
                        patch_id: patch_id.as_deref().map(parse_id).transpose()?,
                        submitted_sarif_id: submitted_sarif_id
                            .as_deref()
                            .map(parse_id)
                            .transpose()?,
                        broadcast_sarif_id: broadcast_sarif_id
                            .as_deref()
                            .map(parse_id)
                            .transpose()?,
                        freeform_id: freeform_id.as_deref().map(parse_id).transpose()?,
                        description,
                        deleted: false,
                    })
                },
            )
        })
    }

    fn delete_bundle(
        &self,
        id: BundleId,
        task_id: TaskId,
        team_id: TeamId,
    ) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE bundles SET deleted = 1
                     WHERE id = ?1 AND task_id = ?2 AND team_id = ?3 AND deleted = 0",
                    params![id.to_string(), task_id.to_string(), team_id.to_string()],
                )
                .map_err(|err| map_db_error(&err))?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }

    fn insert_job(&self, job: &JobRecord) -> Result<(), StoreError> {
        let artifacts = to_json(&job.artifacts)?;
        let results = to_json(&job.results)?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO jobs (id, team_id, status, artifacts_json, results_json,
                                   functionality_tests_passing, cache_key)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    job.id.to_string(),
                    job.team_id.to_string(),
                    job.status.label(),
                    artifacts,
                    results,
                    job.functionality_tests_passing,
                    job.cache_key,
                ],
            )
            .map_err(|err| map_db_error(&err))?;
            Ok(())
        })
    }

    fn get_job(&self, id: JobId, team_id: TeamId) -> Result<JobRecord, StoreError> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, team_id, status, artifacts_json, results_json,
                        functionality_tests_passing, cache_key
                 FROM jobs WHERE id = ?1 AND team_id = ?2",
                params![id.to_string(), team_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<bool>>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(|err| map_db_error(&err))?
            .ok_or(StoreError::NotFound)
            .and_then(|(id, team_id, status, artifacts, results, functionality, cache_key)| {
                Ok(JobRecord {
                    id: parse_id(&id)?,
                    team_id: parse_id(&team_id)?,
                    status: parse_status(&status)?,
                    artifacts: artifacts.as_deref().map_or_else(|| Ok(Vec::new()), parse_json)?,
                    results: results.as_deref().map_or_else(|| Ok(Vec::new()), parse_json)?,
                    functionality_tests_passing: functionality,
                    cache_key,
                })
            })
        })
    }

    fn append_job_artifact(&self, id: JobId, artifact: &ArtifactRecord) -> Result<(), StoreError> {
        let record = to_json(artifact)?;
        self.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE jobs
                     SET artifacts_json = json_insert(
                         CASE WHEN artifacts_json IS NULL THEN '[]' ELSE artifacts_json END,
                         '$[#]', json(?2))
                     WHERE id = ?1",
                    params![id.to_string(), record],
                )
                .map_err(|err| map_db_error(&err))?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }

    fn append_job_result(&self, id: JobId, result: &CommandResult) -> Result<(), StoreError> {
        let record = to_json(result)?;
        self.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE jobs
                     SET results_json = json_insert(
                         CASE WHEN results_json IS NULL THEN '[]' ELSE results_json END,
                         '$[#]', json(?2))
                     WHERE id = ?1",
                    params![id.to_string(), record],
                )
                .map_err(|err| map_db_error(&err))?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }

    fn transition(
        &self,
        entity: SubmissionEntity,
        id: &str,
        status: SubmissionStatus,
        functionality_tests_passing: Option<bool>,
    ) -> Result<TransitionOutcome, StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::Invalid("transition target must be terminal".to_string()));
        }
        let table = match entity {
            SubmissionEntity::Pov => "povs",
            SubmissionEntity::Patch => "patches",
            SubmissionEntity::Job => "jobs",
        };
        self.with_connection(|conn| {
            let changed = if matches!(entity, SubmissionEntity::Pov) {
                conn.execute(
                    &format!(
                        "UPDATE {table} SET status = ?2 WHERE id = ?1 AND status = 'accepted'"
                    ),
                    params![id, status.label()],
                )
                .map_err(|err| map_db_error(&err))?
            } else {
                conn.execute(
                    &format!(
                        "UPDATE {table}
                         SET status = ?2,
                             functionality_tests_passing =
                                 COALESCE(?3, functionality_tests_passing)
                         WHERE id = ?1 AND status = 'accepted'"
                    ),
                    params![id, status.label(), functionality_tests_passing],
                )
                .map_err(|err| map_db_error(&err))?
            };
            if changed > 0 {
                return Ok(TransitionOutcome::Transitioned);
            }
            let exists: Option<i64> = conn
                .query_row(
                    &format!("SELECT 1 FROM {table} WHERE id = ?1"),
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|err| map_db_error(&err))?;
            if exists.is_some() {
                Ok(TransitionOutcome::AlreadyTerminal)
            } else {
                Err(StoreError::NotFound)
            }
        })
    }

    fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        self.with_connection(|conn| {
            let mut counts = StatusCounts::default();
            let mut statement = conn
                .prepare(
                    "SELECT status, COUNT(1) FROM (
                         SELECT status FROM povs
                         UNION ALL
                         SELECT status FROM patches
                     ) GROUP BY status",
                )
                .map_err(|err| map_db_error(&err))?;
            let rows = statement
                .query_map(params![], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(|err| map_db_error(&err))?;
            for row in rows {
                let (status, count) = row.map_err(|err| map_db_error(&err))?;
                let count = u64::try_from(count).unwrap_or(0);
                match parse_status(&status)? {
                    SubmissionStatus::Accepted => counts.accepted = count,
                    SubmissionStatus::Passed => counts.passed = count,
                    SubmissionStatus::Failed => counts.failed = count,
                    SubmissionStatus::Errored => counts.errored = count,
                    SubmissionStatus::DeadlineExceeded => counts.deadline_exceeded = count,
                    SubmissionStatus::Inconclusive => counts.inconclusive = count,
                }
            }
            Ok(counts)
        })
    }
}

#[cfg(test)]
mod tests;
