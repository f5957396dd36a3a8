// crates/crucible-core/src/interfaces.rs
// ============================================================================
// Module: Crucible Interfaces
// Description: Trait seams between the core and its backends.
// Purpose: Keep store, queue, blob, lease, and orchestrator backends swappable.
// Dependencies: async-trait, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The backbone touches five external systems: the relational store, the
//! durable result queue, two blob stores, a leader-election lease, and the
//! container orchestrator. Each is consumed through a trait defined here so
//! production backends and in-memory test doubles are interchangeable.
//! Invariants:
//! - Store transitions are idempotent: moving a row that already left
//!   `accepted` reports [`TransitionOutcome::AlreadyTerminal`], not an error.
//! - Blob stores are idempotent by object name.
//! - Queue deletes are by lease; an expired lease no longer deletes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::BundleId;
use crate::core::identifiers::FreeformId;
use crate::core::identifiers::JobId;
use crate::core::identifiers::PatchId;
use crate::core::identifiers::PovId;
use crate::core::identifiers::SarifAssessmentId;
use crate::core::identifiers::SarifBroadcastId;
use crate::core::identifiers::SarifSubmissionId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::TeamId;
use crate::core::status::SubmissionEntity;
use crate::core::status::SubmissionStatus;
use crate::core::submission::ArtifactRecord;
use crate::core::submission::Bundle;
use crate::core::submission::CommandResult;
use crate::core::submission::FreeformSubmission;
use crate::core::submission::JobRecord;
use crate::core::submission::PatchSubmission;
use crate::core::submission::PovSubmission;
use crate::core::submission::SarifAssessment;
use crate::core::submission::SarifBroadcast;
use crate::core::submission::SarifSubmission;
use crate::core::task::Task;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Identity Records
// ============================================================================

/// Permission flags recognized on a credential.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Permissions {
    /// May submit POVs, patches, SARIF, freeform, and bundles.
    #[serde(default)]
    pub crs: bool,
    /// May perform competition-management operations.
    #[serde(default)]
    pub competition_management: bool,
    /// May drive ad-hoc job-runner entities.
    #[serde(default)]
    pub job_runner: bool,
}

/// A stored credential.
///
/// # Invariants
/// - `id` doubles as the basic-auth username.
/// - `token_hash` is an argon2id PHC string; raw tokens are never stored.
#[derive(Debug, Clone)]
pub struct AuthRecord {
    /// Credential identifier.
    pub id: TeamId,
    /// Argon2id PHC hash of the token.
    pub token_hash: String,
    /// Human-readable note.
    pub note: String,
    /// Whether the credential may authenticate.
    pub active: bool,
    /// Granted permissions.
    pub permissions: Permissions,
}

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// Errors surfaced by the relational store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested row does not exist (or is not visible to the caller).
    #[error("not found")]
    NotFound,
    /// A uniqueness or immutability constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Input failed store-level validation.
    #[error("invalid: {0}")]
    Invalid(String),
    /// The backend failed; possibly transient.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Outcome of an idempotent status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The row moved from `accepted` to the requested terminal status.
    Transitioned,
    /// The row had already left `accepted`; nothing changed.
    AlreadyTerminal,
}

/// Aggregate submission counts by status, reported by `/status/`.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StatusCounts {
    /// Rows awaiting evaluation.
    pub accepted: u64,
    /// Rows that passed.
    pub passed: u64,
    /// Rows that failed.
    pub failed: u64,
    /// Rows errored by infrastructure.
    pub errored: u64,
    /// Rows submitted after the deadline.
    pub deadline_exceeded: u64,
    /// Rows with no usable verdict.
    pub inconclusive: u64,
}

// ============================================================================
// SECTION: Submission Store
// ============================================================================

/// Durable relational model of tasks, credentials, and submissions.
///
/// All reads that take a `team_id` are tenant-scoped: a row owned by a
/// different team reads as [`StoreError::NotFound`], never as a
/// permission error.
pub trait SubmissionStore: Send + Sync {
    /// Persists an immutable task. Duplicate ids are a conflict.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] for duplicate ids and
    /// [`StoreError::Backend`] on storage failure.
    fn insert_task(&self, task: &Task) -> Result<(), StoreError>;

    /// Fetches a task by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when absent.
    fn get_task(&self, id: TaskId) -> Result<Task, StoreError>;

    /// Upserts a credential keyed by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure.
    fn upsert_auth(&self, auth: &AuthRecord) -> Result<(), StoreError>;

    /// Deactivates every credential whose id is not in `keep`.
    /// Returns the number of rows deactivated.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure.
    fn deactivate_auths_except(&self, keep: &[TeamId]) -> Result<usize, StoreError>;

    /// Fetches a credential by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when absent.
    fn get_auth(&self, id: TeamId) -> Result<AuthRecord, StoreError>;

    /// Persists a POV submission row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure.
    fn insert_pov(&self, pov: &PovSubmission) -> Result<(), StoreError>;

    /// Fetches a POV scoped by task and owning team.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for absent or cross-tenant rows.
    fn get_pov(&self, id: PovId, task_id: TaskId, team_id: TeamId)
    -> Result<PovSubmission, StoreError>;

    /// Persists a patch submission row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure.
    fn insert_patch(&self, patch: &PatchSubmission) -> Result<(), StoreError>;

    /// Fetches a patch scoped by task and owning team.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for absent or cross-tenant rows.
    fn get_patch(
        &self,
        id: PatchId,
        task_id: TaskId,
        team_id: TeamId,
    ) -> Result<PatchSubmission, StoreError>;

    /// Persists a broadcast SARIF. At most one broadcast exists per task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the task already has one.
    fn insert_sarif_broadcast(&self, broadcast: &SarifBroadcast) -> Result<(), StoreError>;

    /// Fetches a broadcast by id and task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when absent.
    fn get_sarif_broadcast(
        &self,
        id: SarifBroadcastId,
        task_id: TaskId,
    ) -> Result<SarifBroadcast, StoreError>;

    /// Persists a SARIF assessment row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure.
    fn insert_sarif_assessment(&self, assessment: &SarifAssessment) -> Result<(), StoreError>;

    /// Fetches an assessment scoped by owning team.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for absent or cross-tenant rows.
    fn get_sarif_assessment(
        &self,
        id: SarifAssessmentId,
        team_id: TeamId,
    ) -> Result<SarifAssessment, StoreError>;

    /// Persists a team-authored SARIF row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure.
    fn insert_sarif_submission(&self, submission: &SarifSubmission) -> Result<(), StoreError>;

    /// Fetches a team-authored SARIF scoped by task and owning team.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for absent or cross-tenant rows.
    fn get_sarif_submission(
        &self,
        id: SarifSubmissionId,
        task_id: TaskId,
        team_id: TeamId,
    ) -> Result<SarifSubmission, StoreError>;

    /// Persists a freeform submission row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure.
    fn insert_freeform(&self, freeform: &FreeformSubmission) -> Result<(), StoreError>;

    /// Fetches a freeform submission scoped by task and owning team.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for absent or cross-tenant rows.
    fn get_freeform(
        &self,
        id: FreeformId,
        task_id: TaskId,
        team_id: TeamId,
    ) -> Result<FreeformSubmission, StoreError>;

    /// Persists a bundle row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure.
    fn insert_bundle(&self, bundle: &Bundle) -> Result<(), StoreError>;

    /// Replaces the optional fields of a live bundle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for absent, soft-deleted, or
    /// cross-tenant rows.
    fn update_bundle(&self, bundle: &Bundle) -> Result<(), StoreError>;

    /// Fetches a live bundle scoped by task and owning team.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for absent, soft-deleted, or
    /// cross-tenant rows.
    fn get_bundle(
        &self,
        id: BundleId,
        task_id: TaskId,
        team_id: TeamId,
    ) -> Result<Bundle, StoreError>;

    /// Soft-deletes a bundle; subsequent reads see it as absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for absent, already-deleted, or
    /// cross-tenant rows.
    fn delete_bundle(
        &self,
        id: BundleId,
        task_id: TaskId,
        team_id: TeamId,
    ) -> Result<(), StoreError>;

    /// Persists a job-runner entity row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure.
    fn insert_job(&self, job: &JobRecord) -> Result<(), StoreError>;

    /// Fetches a job-runner entity scoped by owning team.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for absent or cross-tenant rows.
    fn get_job(&self, id: JobId, team_id: TeamId) -> Result<JobRecord, StoreError>;

    /// Appends artifact metadata onto a job row's JSON array.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the job is absent.
    fn append_job_artifact(&self, id: JobId, artifact: &ArtifactRecord) -> Result<(), StoreError>;

    /// Appends a command result onto a job row's JSON array.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the job is absent.
    fn append_job_result(&self, id: JobId, result: &CommandResult) -> Result<(), StoreError>;

    /// Moves a row from `accepted` to a terminal status, exactly once.
    ///
    /// The update is scoped by `status = 'accepted'`; zero affected rows
    /// reports [`TransitionOutcome::AlreadyTerminal`]. For patch and job
    /// entities a functionality verdict may be recorded alongside.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no row with the id exists and
    /// [`StoreError::Invalid`] when `status` is not terminal.
    fn transition(
        &self,
        entity: SubmissionEntity,
        id: &str,
        status: SubmissionStatus,
        functionality_tests_passing: Option<bool>,
    ) -> Result<TransitionOutcome, StoreError>;

    /// Aggregates POV and patch submission counts by status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure.
    fn status_counts(&self) -> Result<StatusCounts, StoreError>;
}

// ============================================================================
// SECTION: Result Queue
// ============================================================================

/// Errors surfaced by the result queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backend failed; possibly transient.
    #[error("queue backend error: {0}")]
    Backend(String),
}

/// One leased message. Deleting requires the lease token, so a handler
/// that outlives its visibility window can no longer delete the message.
#[derive(Debug, Clone)]
pub struct QueueLease {
    /// Opaque lease token bound to this delivery.
    pub lease: String,
    /// Raw message payload (JSON).
    pub payload: String,
    /// Delivery count including this one.
    pub delivery_count: u32,
}

/// Durable FIFO queue with visibility timeouts.
pub trait ResultQueue: Send + Sync {
    /// Appends a message.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Backend`] on storage failure.
    fn enqueue(&self, payload: &str) -> Result<(), QueueError>;

    /// Leases the oldest visible message, hiding it for `visibility_millis`.
    /// Returns `None` when no message is visible.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Backend`] on storage failure.
    fn dequeue(&self, now: Timestamp, visibility_millis: i64)
    -> Result<Option<QueueLease>, QueueError>;

    /// Deletes a leased message. Expired leases delete nothing.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Backend`] on storage failure.
    fn delete(&self, lease: &str) -> Result<(), QueueError>;
}

// ============================================================================
// SECTION: Blob Store
// ============================================================================

/// Errors surfaced by blob stores.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The object does not exist.
    #[error("blob not found: {0}")]
    NotFound(String),
    /// The object exceeds the caller's size bound.
    #[error("blob too large: {key} ({actual_bytes} > {max_bytes})")]
    TooLarge {
        /// Object key.
        key: String,
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual size in bytes.
        actual_bytes: usize,
    },
    /// The backend failed; possibly transient.
    #[error("blob backend error: {0}")]
    Backend(String),
}

/// Content-addressed blob storage, idempotent by object name.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Writes an object. Re-writing the same key is a no-op by contract.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Backend`] on storage failure.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: Option<&str>)
    -> Result<(), BlobError>;

    /// Reads an object, bounded by `max_bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::NotFound`] when absent and [`BlobError::TooLarge`]
    /// when the object exceeds the bound.
    async fn get(&self, key: &str, max_bytes: usize) -> Result<Vec<u8>, BlobError>;
}

// ============================================================================
// SECTION: Leader Election
// ============================================================================

/// Errors surfaced by the lease backend.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// The backend failed; possibly transient.
    #[error("lease backend error: {0}")]
    Backend(String),
}

/// Lease-based leader election.
///
/// At most one holder owns a named lease at any instant (modulo clock skew
/// within the lease duration).
pub trait LeaderElector: Send + Sync {
    /// Attempts to acquire the lease; returns true when this holder owns it.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Backend`] on storage failure.
    fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        now: Timestamp,
        lease_millis: i64,
    ) -> Result<bool, LeaseError>;

    /// Renews the lease; returns false when the lease was lost.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Backend`] on storage failure.
    fn renew(
        &self,
        name: &str,
        holder: &str,
        now: Timestamp,
        lease_millis: i64,
    ) -> Result<bool, LeaseError>;

    /// Releases the lease when held by `holder`.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Backend`] on storage failure.
    fn release(&self, name: &str, holder: &str) -> Result<(), LeaseError>;
}

// ============================================================================
// SECTION: Orchestrator
// ============================================================================

/// Errors surfaced by the orchestrator client.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A Job with the same name already exists; safe to ignore on create.
    #[error("job already exists: {0}")]
    AlreadyExists(String),
    /// The Job does not exist; safe to ignore on delete.
    #[error("job not found: {0}")]
    NotFound(String),
    /// The backend failed; possibly transient.
    #[error("orchestrator backend error: {0}")]
    Backend(String),
}

/// Terminal condition of an orchestrator Job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Terminal success condition.
    Complete,
    /// Terminal failure condition (OOM, eviction past retry, pod policy).
    Failed,
}

/// One orchestrator Job observed in a terminal state.
#[derive(Debug, Clone)]
pub struct JobObservation {
    /// Job object name.
    pub name: String,
    /// Job labels.
    pub labels: BTreeMap<String, String>,
    /// Terminal condition.
    pub state: JobState,
}

/// Batch-workload orchestrator.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Creates a Job from a rendered manifest.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::AlreadyExists`] for duplicate names and
    /// [`OrchestratorError::Backend`] on API failure.
    async fn create_job(&self, name: &str, manifest: Value) -> Result<(), OrchestratorError>;

    /// Deletes a Job with background propagation.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] when absent and
    /// [`OrchestratorError::Backend`] on API failure.
    async fn delete_job(&self, name: &str) -> Result<(), OrchestratorError>;

    /// Lists Jobs currently in a terminal state, filtered to evaluation
    /// Jobs by label selector.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Backend`] on API failure.
    async fn list_terminal_jobs(&self) -> Result<Vec<JobObservation>, OrchestratorError>;
}
