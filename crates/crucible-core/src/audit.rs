// crates/crucible-core/src/audit.rs
// ============================================================================
// Module: Crucible Audit Events
// Description: Append-only structured event log taxonomy and sinks.
// Purpose: Record every state-changing decision for scoring and forensics.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every mutation the backbone performs emits exactly one audit event.
//! Events are structured JSON lines; the scoring pipeline replays them
//! after the round. Delete-retry paths may re-emit an event — duplicate
//! audits are accepted over lost ones.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;

use crate::core::identifiers::TaskId;
use crate::core::identifiers::TeamId;
use crate::core::status::SubmissionEntity;
use crate::core::status::SubmissionStatus;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Event Model
// ============================================================================

/// One append-only audit event.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Event kind label.
    pub event: &'static str,
    /// Wall-clock instant the decision was taken.
    pub timestamp: Timestamp,
    /// Competition round identifier.
    pub round_id: String,
    /// Team the event concerns, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<TeamId>,
    /// Task the event concerns, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    /// Submission entity kind, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<SubmissionEntity>,
    /// Submission identifier in canonical form, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,
    /// Kind-specific payload.
    #[serde(flatten)]
    pub detail: AuditDetail,
}

/// Kind-specific audit payloads.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditDetail {
    /// A submission was persisted with its initial status.
    SubmissionAccepted {
        /// Initial status (`accepted` or `deadline_exceeded`).
        status: SubmissionStatus,
    },
    /// A submission reached a terminal status.
    SubmissionTerminal {
        /// Terminal status.
        status: SubmissionStatus,
    },
    /// A worker artifact was copied into the long-term archive.
    FileArchived {
        /// Object name in the archive.
        object_name: String,
        /// Original filename reported by the worker.
        filename: String,
    },
    /// An evaluation Job was handed to the orchestrator.
    JobCreated {
        /// Deterministic Job name.
        job_name: String,
    },
    /// Job dispatch failed after retries; the submission stays accepted.
    JobCreateFailed {
        /// Failure rendered for the log.
        reason: String,
    },
    /// The orchestrator reported a Job as failed.
    JobFailed {
        /// Whether this observation performed the transition.
        transitioned: bool,
    },
    /// A queue message could not be interpreted and was dropped.
    PoisonMessage {
        /// Failure rendered for the log.
        reason: String,
    },
    /// Result of one CRS status probe.
    CrsStatus {
        /// Whether the probe got a 2xx reply.
        reachable: bool,
        /// Probe detail (HTTP status or error).
        detail: String,
    },
    /// Competitor budget snapshot.
    BudgetState {
        /// Remaining memory budget in GiB.
        memory_gb: u32,
        /// Remaining CPU budget.
        cpus: u32,
    },
    /// Identity reconciliation summary at startup.
    IdentityReconciled {
        /// Credentials upserted from configuration.
        upserted: usize,
        /// Stored credentials deactivated as no longer configured.
        deactivated: usize,
    },
}

impl AuditEvent {
    /// Builds an event with the common envelope and no entity references.
    #[must_use]
    pub fn new(event: &'static str, round_id: impl Into<String>, detail: AuditDetail) -> Self {
        Self {
            event,
            timestamp: Timestamp::now(),
            round_id: round_id.into(),
            team_id: None,
            task_id: None,
            entity: None,
            submission_id: None,
            detail,
        }
    }

    /// Returns a copy with the team reference set.
    #[must_use]
    pub const fn with_team(mut self, team_id: TeamId) -> Self {
        self.team_id = Some(team_id);
        self
    }

    /// Returns a copy with the task reference set.
    #[must_use]
    pub const fn with_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Returns a copy with the submission reference set.
    #[must_use]
    pub fn with_submission(mut self, entity: SubmissionEntity, id: impl Into<String>) -> Self {
        self.entity = Some(entity);
        self.submission_id = Some(id.into());
        self
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Append-only audit sink.
pub trait AuditSink: Send + Sync {
    /// Records one event. Sinks must not fail the caller.
    fn record(&self, event: &AuditEvent);
}

/// Audit sink that writes JSON lines to stderr.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            #[allow(
                clippy::print_stderr,
                reason = "Stderr is the event transport for this sink."
            )]
            {
                eprintln!("{payload}");
            }
        }
    }
}

/// No-op audit sink for tests.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &AuditEvent) {}
}
