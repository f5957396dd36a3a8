// crates/crucible-core/src/core/mod.rs
// ============================================================================
// Module: Crucible Core Types
// Description: Canonical Crucible domain structures.
// Purpose: Provide stable, serializable types for tasks, submissions, and jobs.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Crucible core types define tasks, submissions, bundles, evaluation jobs,
//! and the value-level invariants shared across the workspace. These types
//! are the canonical source of truth for any derived API surfaces.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod identifiers;
pub mod maybe;
pub mod status;
pub mod submission;
pub mod task;
pub mod time;
pub mod validate;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use identifiers::BundleId;
pub use identifiers::FreeformId;
pub use identifiers::IdentifierError;
pub use identifiers::JobId;
pub use identifiers::PatchId;
pub use identifiers::PovId;
pub use identifiers::SarifAssessmentId;
pub use identifiers::SarifBroadcastId;
pub use identifiers::SarifSubmissionId;
pub use identifiers::TaskId;
pub use identifiers::TeamId;
pub use identifiers::Uuid128;
pub use maybe::Maybe;
pub use status::Assessment;
pub use status::SubmissionEntity;
pub use status::SubmissionStatus;
pub use submission::ArtifactRecord;
pub use submission::Bundle;
pub use submission::CommandResult;
pub use submission::FreeformSubmission;
pub use submission::JobRecord;
pub use submission::PatchSubmission;
pub use submission::PovSubmission;
pub use submission::SarifAssessment;
pub use submission::SarifBroadcast;
pub use submission::SarifSubmission;
pub use task::SourceDescriptor;
pub use task::SourceKind;
pub use task::Task;
pub use task::TaskKind;
pub use task::UnstrippedSources;
pub use time::Timestamp;
pub use validate::FieldErrors;
pub use validate::MAX_DESCRIPTION_BYTES;
pub use validate::MAX_NAME_BYTES;
pub use validate::MAX_PATCH_BYTES;
pub use validate::MAX_TESTCASE_BYTES;
pub use validate::check_text_field;
pub use validate::decode_base64_field;
