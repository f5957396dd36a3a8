// crates/crucible-core/src/core/submission.rs
// ============================================================================
// Module: Crucible Submission Records
// Description: Persistent row types for every submission kind.
// Purpose: Provide the canonical shapes the store persists and serves.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Row types for POVs, patches, SARIF documents, freeform payloads,
//! bundles, and generic job-runner entities. These are storage shapes, not
//! API payloads; the server crate owns request/response schemas and maps
//! them onto these records.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

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
use crate::core::status::Assessment;
use crate::core::status::SubmissionStatus;

// ============================================================================
// SECTION: POV
// ============================================================================

/// Proof-of-vulnerability submission row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PovSubmission {
    /// Submission identifier.
    pub id: PovId,
    /// Submitting team.
    pub team_id: TeamId,
    /// Task the POV targets.
    pub task_id: TaskId,
    /// Blob-store path of the raw testcase.
    pub testcase_path: String,
    /// Harness the testcase feeds.
    pub fuzzer_name: String,
    /// Sanitizer expected to fire.
    pub sanitizer: String,
    /// Target architecture; only `x86_64` is recognized.
    pub architecture: String,
    /// Fuzzing engine; only `libfuzzer` is recognized.
    pub engine: String,
    /// Lifecycle state.
    pub status: SubmissionStatus,
}

// ============================================================================
// SECTION: Patch
// ============================================================================

/// Patch submission row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchSubmission {
    /// Submission identifier.
    pub id: PatchId,
    /// Submitting team.
    pub team_id: TeamId,
    /// Task the patch targets.
    pub task_id: TaskId,
    /// Blob-store path of the raw patch.
    pub patch_path: String,
    /// Lifecycle state.
    pub status: SubmissionStatus,
    /// Tri-state functionality verdict; `None` until evaluation reports.
    pub functionality_tests_passing: Option<bool>,
}

// ============================================================================
// SECTION: SARIF
// ============================================================================

/// Broadcast SARIF injected by the competition.
///
/// # Invariants
/// - At most one broadcast exists per task.
/// - Broadcasts carry no lifecycle status; assessments reference them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarifBroadcast {
    /// Broadcast identifier.
    pub id: SarifBroadcastId,
    /// Task the broadcast describes.
    pub task_id: TaskId,
    /// SARIF document.
    pub sarif: Value,
}

/// Team reply to a broadcast SARIF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarifAssessment {
    /// Assessment identifier.
    pub id: SarifAssessmentId,
    /// Assessing team.
    pub team_id: TeamId,
    /// Broadcast under assessment.
    pub broadcast_id: SarifBroadcastId,
    /// Rendered verdict.
    pub assessment: Assessment,
    /// Supporting rationale.
    pub description: String,
    /// Lifecycle state.
    pub status: SubmissionStatus,
}

/// Team-authored SARIF tied to a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarifSubmission {
    /// Submission identifier.
    pub id: SarifSubmissionId,
    /// Submitting team.
    pub team_id: TeamId,
    /// Task the document analyses.
    pub task_id: TaskId,
    /// SARIF document.
    pub sarif: Value,
    /// Lifecycle state.
    pub status: SubmissionStatus,
}

// ============================================================================
// SECTION: Freeform
// ============================================================================

/// Opaque submission for unharnessed or exotic reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreeformSubmission {
    /// Submission identifier.
    pub id: FreeformId,
    /// Submitting team.
    pub team_id: TeamId,
    /// Task the payload relates to.
    pub task_id: TaskId,
    /// Blob-store path of the raw payload.
    pub payload_path: String,
    /// Lifecycle state.
    pub status: SubmissionStatus,
}

// ============================================================================
// SECTION: Bundle
// ============================================================================

/// Soft-deletable aggregate linking submissions for scoring correlation.
///
/// # Invariants
/// - At least two of the optional fields are set.
/// - Every referenced submission belongs to `task_id` and `team_id`.
/// - Mutable only while the owning task is open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    /// Bundle identifier.
    pub id: BundleId,
    /// Owning team.
    pub team_id: TeamId,
    /// Owning task.
    pub task_id: TaskId,
    /// Linked POV.
    pub pov_id: Option<PovId>,
    /// Linked patch.
    pub patch_id: Option<PatchId>,
    /// Linked team-authored SARIF.
    pub submitted_sarif_id: Option<SarifSubmissionId>,
    /// Linked broadcast SARIF.
    pub broadcast_sarif_id: Option<SarifBroadcastId>,
    /// Linked freeform submission.
    pub freeform_id: Option<FreeformId>,
    /// Free-text description.
    pub description: Option<String>,
    /// Soft-delete marker; deleted bundles read as absent.
    pub deleted: bool,
}

impl Bundle {
    /// Counts the populated optional fields.
    #[must_use]
    pub const fn populated_fields(&self) -> usize {
        self.pov_id.is_some() as usize
            + self.patch_id.is_some() as usize
            + self.submitted_sarif_id.is_some() as usize
            + self.broadcast_sarif_id.is_some() as usize
            + self.freeform_id.is_some() as usize
            + self.description.is_some() as usize
    }
}

// ============================================================================
// SECTION: Job Runner
// ============================================================================

/// Artifact metadata recorded against a job-runner entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Object name in the archive.
    pub object_name: String,
    /// Original filename reported by the worker.
    pub filename: String,
    /// Worker-supplied context string.
    #[serde(default)]
    pub context: Option<String>,
}

/// One command execution result reported by the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Command line that ran.
    pub command: String,
    /// Process exit code.
    pub exit_code: i32,
    /// Captured stdout tail.
    #[serde(default)]
    pub stdout: Option<String>,
    /// Captured stderr tail.
    #[serde(default)]
    pub stderr: Option<String>,
}

/// Generic job-runner entity used for ad-hoc test runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job identifier.
    pub id: JobId,
    /// Owning team.
    pub team_id: TeamId,
    /// Lifecycle state.
    pub status: SubmissionStatus,
    /// Artifact metadata appended by the result consumer.
    pub artifacts: Vec<ArtifactRecord>,
    /// Command results appended by the result consumer.
    pub results: Vec<CommandResult>,
    /// Tri-state functionality verdict.
    pub functionality_tests_passing: Option<bool>,
    /// Worker cache key.
    pub cache_key: String,
}
