// crates/crucible-server/src/consumer.rs
// ============================================================================
// Module: Result Consumer
// Description: Pull-based handler for worker result messages.
// Purpose: Apply artifact, command-result, and final messages to the store.
// Dependencies: crucible-core, serde, serde_json, tokio
// ============================================================================

//! ## Overview
//! A long-running loop over the durable result queue. Each message is
//! handled under a budget of the visibility timeout minus five seconds, so
//! the handler's context expires strictly before the message becomes
//! visible again. Outcomes:
//!
//! - success — delete the message;
//! - plain error — leave it; visibility expiry redelivers it;
//! - poison (unparseable payload, unknown entity, malformed id) — delete
//!   and audit at error level; the message never returns.
//!
//! Messages for one entity may arrive in any order; only eventual delivery
//! of all of them has to produce the correct row state. Duplicate finals
//! are no-ops thanks to the store's `accepted`-scoped transition.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use crucible_core::ArtifactRecord;
use crucible_core::AuditDetail;
use crucible_core::AuditEvent;
use crucible_core::AuditSink;
use crucible_core::BlobStore;
use crucible_core::CommandResult;
use crucible_core::JobId;
use crucible_core::ResultQueue;
use crucible_core::StoreError;
use crucible_core::SubmissionEntity;
use crucible_core::SubmissionStatus;
use crucible_core::SubmissionStore;
use crucible_core::Timestamp;
use crucible_core::Uuid128;
use serde::Deserialize;
use tokio::sync::watch;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Margin subtracted from the visibility timeout for the handler budget.
const HANDLER_MARGIN: Duration = Duration::from_secs(5);
/// Size cap for archived worker artifacts.
const MAX_ARTIFACT_BYTES: usize = 256 * 1024 * 1024;

// ============================================================================
// SECTION: Messages
// ============================================================================

/// Reference to a blob in the worker's result container.
#[derive(Debug, Deserialize)]
struct BlobRef {
    /// Object name inside the container.
    object_name: String,
}

/// One worker result message.
#[derive(Debug, Deserialize)]
struct WorkerMessage {
    /// `artifact`, `command_result`, or `final`.
    msg_type: String,
    /// `pov`, `patch`, or `job`.
    entity: String,
    /// Canonical submission id.
    entity_id: String,
    /// Artifact blob reference.
    #[serde(default)]
    blob: Option<BlobRef>,
    /// Original filename for artifact messages.
    #[serde(default)]
    filename: Option<String>,
    /// Worker-supplied context for artifact messages.
    #[serde(default)]
    context: Option<String>,
    /// Command result for `command_result` messages.
    #[serde(default)]
    result: Option<CommandResult>,
    /// Terminal status for `final` messages.
    #[serde(default)]
    status: Option<SubmissionStatus>,
    /// Whether patch functionality tests failed, for `final` messages.
    #[serde(default)]
    patch_tests_failed: Option<bool>,
}

/// Handler outcome controlling queue disposition.
enum Outcome {
    /// Message applied; delete it.
    Done,
    /// Message can never be applied; delete it and audit.
    Poison(String),
    /// Transient failure; let visibility expiry redeliver.
    Retry,
}

// ============================================================================
// SECTION: Consumer
// ============================================================================

/// Pull-based consumer of worker result messages.
pub struct ResultConsumer {
    /// Durable result queue.
    queue: Arc<dyn ResultQueue>,
    /// Relational store.
    store: Arc<dyn SubmissionStore>,
    /// Worker result container (artifact source).
    worker_blobs: Arc<dyn BlobStore>,
    /// Long-term archive (artifact destination).
    archive: Arc<dyn BlobStore>,
    /// Audit sink.
    audit: Arc<dyn AuditSink>,
    /// Round identifier stamped onto audit events.
    round_id: String,
    /// Message visibility timeout.
    visibility: Duration,
    /// Wait between empty polls.
    poll_wait: Duration,
}

impl ResultConsumer {
    /// Builds a consumer.
    #[must_use]
    pub fn new(
        queue: Arc<dyn ResultQueue>,
        store: Arc<dyn SubmissionStore>,
        worker_blobs: Arc<dyn BlobStore>,
        archive: Arc<dyn BlobStore>,
        audit: Arc<dyn AuditSink>,
        round_id: impl Into<String>,
        visibility: Duration,
        poll_wait: Duration,
    ) -> Self {
        Self {
            queue,
            store,
            worker_blobs,
            archive,
            audit,
            round_id: round_id.into(),
            visibility,
            poll_wait,
        }
    }

    /// Runs the consume loop until shutdown signals.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let visibility_millis = i64::try_from(self.visibility.as_millis()).unwrap_or(600_000);
        loop {
            if *shutdown.borrow() {
                return;
            }
            let lease = match self.queue.dequeue(Timestamp::now(), visibility_millis) {
                Ok(Some(lease)) => lease,
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_wait) => {}
                        _ = shutdown.changed() => {}
                    }
                    continue;
                }
                Err(_) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_wait) => {}
                        _ = shutdown.changed() => {}
                    }
                    continue;
                }
            };

            let budget = self.visibility.saturating_sub(HANDLER_MARGIN);
            let outcome = match tokio::time::timeout(budget, self.handle(&lease.payload)).await {
                Ok(outcome) => outcome,
                // The budget expired; the message will become visible again.
                Err(_) => Outcome::Retry,
            };
            match outcome {
                Outcome::Done => {
                    let _ = self.queue.delete(&lease.lease);
                }
                Outcome::Poison(reason) => {
                    let _ = self.queue.delete(&lease.lease);
                    self.audit.record(&AuditEvent::new(
                        "poison_message",
                        self.round_id.clone(),
                        AuditDetail::PoisonMessage {
                            reason,
                        },
                    ));
                }
                Outcome::Retry => {}
            }
        }
    }

    /// Applies one message payload.
    async fn handle(&self, payload: &str) -> Outcome {
        let message: WorkerMessage = match serde_json::from_str(payload) {
            Ok(message) => message,
            Err(err) => return Outcome::Poison(format!("unparseable message: {err}")),
        };
        let Some(entity) = SubmissionEntity::parse(&message.entity) else {
            return Outcome::Poison(format!("unknown entity: {}", message.entity));
        };
        let Ok(entity_id) = Uuid128::parse(&message.entity_id) else {
            return Outcome::Poison(format!("malformed entity id: {}", message.entity_id));
        };
        let entity_id = entity_id.to_string();

        match message.msg_type.as_str() {
            "artifact" => self.handle_artifact(entity, &entity_id, &message).await,
            "command_result" => self.handle_command_result(entity, &entity_id, message.result),
            "final" => self.handle_final(entity, &entity_id, &message),
            other => Outcome::Poison(format!("unknown msg_type: {other}")),
        }
    }

    /// Copies a worker artifact into the archive and records it.
    async fn handle_artifact(
        &self,
        entity: SubmissionEntity,
        entity_id: &str,
        message: &WorkerMessage,
    ) -> Outcome {
        let Some(blob) = &message.blob else {
            return Outcome::Poison("artifact message without blob".to_string());
        };
        let filename = message.filename.clone().unwrap_or_else(|| blob.object_name.clone());

        let bytes = match self.worker_blobs.get(&blob.object_name, MAX_ARTIFACT_BYTES).await {
            Ok(bytes) => bytes,
            Err(crucible_core::BlobError::NotFound(name)) => {
                return Outcome::Poison(format!("artifact blob missing: {name}"));
            }
            Err(_) => return Outcome::Retry,
        };
        // Same object name on both sides keeps the copy idempotent.
        if self
            .archive
            .put(&blob.object_name, bytes, Some("application/octet-stream"))
            .await
            .is_err()
        {
            return Outcome::Retry;
        }

        match entity {
            SubmissionEntity::Pov | SubmissionEntity::Patch => {
                self.audit.record(
                    &AuditEvent::new(
                        "file_archived",
                        self.round_id.clone(),
                        AuditDetail::FileArchived {
                            object_name: blob.object_name.clone(),
                            filename,
                        },
                    )
                    .with_submission(entity, entity_id),
                );
                Outcome::Done
            }
            SubmissionEntity::Job => {
                let Ok(job_id) = entity_id.parse::<JobId>() else {
                    return Outcome::Poison(format!("malformed job id: {entity_id}"));
                };
                let record = ArtifactRecord {
                    object_name: blob.object_name.clone(),
                    filename,
                    context: message.context.clone(),
                };
                match self.store.append_job_artifact(job_id, &record) {
                    Ok(()) => Outcome::Done,
                    Err(StoreError::NotFound) => {
                        Outcome::Poison(format!("unknown job: {entity_id}"))
                    }
                    Err(_) => Outcome::Retry,
                }
            }
        }
    }

    /// Appends a command result to a job row.
    fn handle_command_result(
        &self,
        entity: SubmissionEntity,
        entity_id: &str,
        result: Option<CommandResult>,
    ) -> Outcome {
        if !matches!(entity, SubmissionEntity::Job) {
            return Outcome::Poison(format!("command_result for non-job entity: {entity}"));
        }
        let Some(result) = result else {
            return Outcome::Poison("empty command result".to_string());
        };
        let Ok(job_id) = entity_id.parse::<JobId>() else {
            return Outcome::Poison(format!("malformed job id: {entity_id}"));
        };
        match self.store.append_job_result(job_id, &result) {
            Ok(()) => Outcome::Done,
            Err(StoreError::NotFound) => Outcome::Poison(format!("unknown job: {entity_id}")),
            Err(_) => Outcome::Retry,
        }
    }

    /// Applies a final status transition.
    fn handle_final(
        &self,
        entity: SubmissionEntity,
        entity_id: &str,
        message: &WorkerMessage,
    ) -> Outcome {
        let Some(status) = message.status else {
            return Outcome::Poison("final message without status".to_string());
        };
        if !status.is_terminal() {
            return Outcome::Poison(format!("final status is not terminal: {}", status.label()));
        }
        // Patch and job failures carry the functionality verdict.
        let functionality = match (entity, status) {
            (SubmissionEntity::Patch | SubmissionEntity::Job, SubmissionStatus::Failed) => {
                message.patch_tests_failed.map(|failed| !failed)
            }
            _ => None,
        };
        match self.store.transition(entity, entity_id, status, functionality) {
            Ok(outcome) => {
                // A duplicate final leaves both the row and the audit log alone.
                if matches!(outcome, crucible_core::TransitionOutcome::Transitioned) {
                    self.audit.record(
                        &AuditEvent::new(
                            "submission_terminal",
                            self.round_id.clone(),
                            AuditDetail::SubmissionTerminal {
                                status,
                            },
                        )
                        .with_submission(entity, entity_id),
                    );
                }
                Outcome::Done
            }
            Err(StoreError::NotFound) => Outcome::Poison(format!("unknown {entity}: {entity_id}")),
            Err(StoreError::Invalid(reason)) => Outcome::Poison(reason),
            Err(_) => Outcome::Retry,
        }
    }
}

#[cfg(test)]
mod tests;
