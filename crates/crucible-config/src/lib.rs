// crates/crucible-config/src/lib.rs
// ============================================================================
// Module: Crucible Configuration Library
// Description: Public API surface for Crucible configuration.
// Purpose: Expose configuration loading and validation.
// Dependencies: crate::config
// ============================================================================

//! ## Overview
//! Configuration loading for the Crucible backbone. Parsing is strict and
//! fail-closed: unknown fields, oversized files, and out-of-range values
//! all refuse to boot the process.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::ArchiveConfig;
pub use config::BlobConfig;
pub use config::ConfigError;
pub use config::CrucibleConfig;
pub use config::LogLevel;
pub use config::LoggingConfig;
pub use config::NodeAssignment;
pub use config::OrchestratorConfig;
pub use config::QueueConfig;
pub use config::StoreConfig;
pub use config::TeamConfig;
pub use config::TeamCrsConfig;
pub use config::TeamKeyConfig;
