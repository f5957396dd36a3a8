// crates/crucible-core/src/core/status.rs
// ============================================================================
// Module: Crucible Submission Statuses
// Description: Lifecycle states shared by every submission kind.
// Purpose: Encode the accepted-to-terminal state machine in one place.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every submission starts in `accepted` and moves to exactly one terminal
//! state. Terminal states are stable: the store refuses to move a row that
//! has already left `accepted`, which makes repeated transition attempts
//! natural no-ops.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Submission Status
// ============================================================================

/// Lifecycle state of a submission.
///
/// # Invariants
/// - `accepted` is the only non-terminal state.
/// - Transitions happen only from `accepted`; terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Stored and awaiting evaluation.
    Accepted,
    /// Evaluation succeeded.
    Passed,
    /// Evaluation ran and the submission did not hold up.
    Failed,
    /// Evaluation infrastructure failed before a verdict.
    Errored,
    /// Submitted after the task deadline; never evaluated.
    DeadlineExceeded,
    /// Evaluation finished without a usable verdict.
    Inconclusive,
}

impl SubmissionStatus {
    /// Returns true when the status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Accepted)
    }

    /// Returns the stable wire label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Errored => "errored",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Inconclusive => "inconclusive",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error produced when a status label is unknown.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown submission status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for SubmissionStatus {
    type Err = UnknownStatus;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "accepted" => Ok(Self::Accepted),
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            "errored" => Ok(Self::Errored),
            "deadline_exceeded" => Ok(Self::DeadlineExceeded),
            "inconclusive" => Ok(Self::Inconclusive),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

// ============================================================================
// SECTION: Assessment
// ============================================================================

/// Verdict a team renders on a broadcast SARIF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assessment {
    /// The broadcast analysis is accurate.
    Correct,
    /// The broadcast analysis is inaccurate.
    Incorrect,
}

impl Assessment {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::Incorrect => "incorrect",
        }
    }
}

// ============================================================================
// SECTION: Submission Entity
// ============================================================================

/// Entity kind referenced by worker result messages and Job labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionEntity {
    /// Proof-of-vulnerability submission.
    Pov,
    /// Patch submission.
    Patch,
    /// Generic job-runner entity.
    Job,
}

impl SubmissionEntity {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pov => "pov",
            Self::Patch => "patch",
            Self::Job => "job",
        }
    }

    /// Parses a wire label.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "pov" => Some(Self::Pov),
            "patch" => Some(Self::Patch),
            "job" => Some(Self::Job),
            _ => None,
        }
    }
}

impl fmt::Display for SubmissionEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
