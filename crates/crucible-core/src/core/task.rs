// crates/crucible-core/src/core/task.rs
// ============================================================================
// Module: Crucible Task Model
// Description: Immutable challenge descriptions announced to teams.
// Purpose: Carry deadlines, source descriptors, and evaluation budgets.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A task is a bounded-duration challenge. Tasks are immutable after
//! creation; every submission references one. A task is open while
//! `now < deadline` — submissions against a closed task are accepted but
//! immediately marked `deadline_exceeded` and never evaluated.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::TaskId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Task Kind
// ============================================================================

/// Scope of the challenge sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Whole-repository challenge.
    Full,
    /// Delta challenge scoped to a diff.
    Delta,
}

impl TaskKind {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Delta => "delta",
        }
    }
}

// ============================================================================
// SECTION: Source Descriptors
// ============================================================================

/// Kind of a challenge source archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Challenge repository tarball.
    Repo,
    /// Fuzzing tooling tarball.
    FuzzTooling,
    /// Delta diff tarball.
    Diff,
}

/// A downloadable challenge source with integrity digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Source kind.
    #[serde(rename = "type")]
    pub kind: SourceKind,
    /// Download URL.
    pub url: String,
    /// SHA-256 of the archive, lowercase hex.
    pub sha256: String,
}

/// Unstripped source descriptors keyed by role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnstrippedSources {
    /// Head repository archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_repo: Option<SourceDescriptor>,
    /// Fuzz tooling archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuzz_tooling: Option<SourceDescriptor>,
    /// Base repository archive (delta tasks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_repo: Option<SourceDescriptor>,
}

// ============================================================================
// SECTION: Task
// ============================================================================

/// A unit of work announced to CRSs.
///
/// # Invariants
/// - Immutable after creation.
/// - `memory_gb` and `cpus` bound the evaluation sandbox for this task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier.
    pub id: TaskId,
    /// Challenge scope.
    pub kind: TaskKind,
    /// Absolute submission deadline.
    pub deadline: Timestamp,
    /// Competition round identifier.
    pub round_id: String,
    /// Challenge commit hash.
    pub commit: String,
    /// OSS project name.
    pub project_name: String,
    /// Directory the challenge focuses on.
    pub focus: String,
    /// Downloadable challenge sources.
    pub sources: Vec<SourceDescriptor>,
    /// Unstripped source archives.
    #[serde(default)]
    pub unstripped_sources: UnstrippedSources,
    /// Whether harnesses ship with the challenge.
    pub harnesses_included: bool,
    /// Sandbox memory budget in GiB.
    pub memory_gb: u32,
    /// Sandbox CPU budget.
    pub cpus: u32,
}

impl Task {
    /// Returns true while the submission window is open.
    #[must_use]
    pub fn is_open(&self, now: Timestamp) -> bool {
        now < self.deadline
    }
}
