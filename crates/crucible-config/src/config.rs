// crates/crucible-config/src/config.rs
// ============================================================================
// Module: Crucible Configuration
// Description: Configuration loading and validation for the backbone.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: crucible-core, serde, toml, url
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size limits and
//! `deny_unknown_fields` everywhere. Missing or invalid configuration fails
//! closed: the process refuses to boot rather than run with a partial
//! identity list or an unreachable orchestrator.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use crucible_core::TeamId;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "crucible.toml";
/// Environment variable used to override the config path.
pub(crate) const CONFIG_ENV_VAR: &str = "CRUCIBLE_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum number of configured teams.
pub(crate) const MAX_TEAMS: usize = 256;
/// Maximum length of an API token.
pub(crate) const MAX_TOKEN_LENGTH: usize = 256;
/// Minimum length of an API token.
pub(crate) const MIN_TOKEN_LENGTH: usize = 16;
/// Maximum length of a team note.
pub(crate) const MAX_NOTE_LENGTH: usize = 512;
/// Default queue visibility timeout in seconds (10 minutes).
const DEFAULT_VISIBILITY_SECONDS: u64 = 600;
/// Default queue poll wait in seconds.
const DEFAULT_POLL_WAIT_SECONDS: u64 = 2;
/// Default CRS status poll interval in seconds.
const DEFAULT_CRS_POLL_SECONDS: u64 = 60;
/// Default graceful shutdown budget in seconds.
const DEFAULT_SHUTDOWN_SECONDS: u64 = 30;
/// Default store busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("config read failure: {0}")]
    Read(String),
    /// The file exceeds the size cap.
    #[error("config file exceeds {MAX_CONFIG_FILE_SIZE} bytes")]
    TooLarge,
    /// The TOML failed to parse.
    #[error("config parse failure: {0}")]
    Parse(String),
    /// A value failed validation.
    #[error("config invalid: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Logging
// ============================================================================

/// Log verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Errors and warnings.
    Warn,
    /// Operational messages (default).
    #[default]
    Info,
    /// Developer diagnostics.
    Debug,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Application log level.
    #[serde(default)]
    pub app: LogLevel,
    /// Store-layer log level.
    #[serde(default)]
    pub store: LogLevel,
}

// ============================================================================
// SECTION: Teams
// ============================================================================

/// Inbound credential declaration for a team.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TeamKeyConfig {
    /// Raw API token; hashed with argon2id before storage.
    pub token: String,
    /// Whether the credential may authenticate.
    #[serde(default = "default_true")]
    pub active: bool,
    /// Granted permissions.
    #[serde(default)]
    pub permissions: crucible_core::Permissions,
}

/// Outbound CRS endpoint declaration for a team.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TeamCrsConfig {
    /// Base URL of the team's CRS.
    pub url: String,
    /// API key id presented to the CRS.
    pub api_key_id: String,
    /// API key token presented to the CRS.
    pub api_key_token: String,
    /// Whether the competition tasks this CRS.
    #[serde(default = "default_true")]
    pub task_me: bool,
}

/// One competing team.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TeamConfig {
    /// Team identifier (UUID string; doubles as the basic-auth username).
    pub id: String,
    /// Human-readable note.
    #[serde(default)]
    pub note: String,
    /// Inbound credential.
    pub api_key: TeamKeyConfig,
    /// Outbound CRS endpoint, when the team runs one.
    #[serde(default)]
    pub crs: Option<TeamCrsConfig>,
}

impl TeamConfig {
    /// Parses the team id into its typed form.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the id is not a UUID.
    pub fn team_id(&self) -> Result<TeamId, ConfigError> {
        TeamId::parse(&self.id)
            .map_err(|err| ConfigError::Invalid(format!("team id {}: {err}", self.id)))
    }
}

// ============================================================================
// SECTION: Store / Queue
// ============================================================================

/// Relational store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Path to the database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// Result queue configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct QueueConfig {
    /// Message visibility timeout in seconds.
    pub visibility_seconds: u64,
    /// Poll wait between empty dequeues in seconds.
    pub poll_wait_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_seconds: DEFAULT_VISIBILITY_SECONDS,
            poll_wait_seconds: DEFAULT_POLL_WAIT_SECONDS,
        }
    }
}

// ============================================================================
// SECTION: Orchestrator
// ============================================================================

/// Node affinity and toleration pair for one scheduling class.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeAssignment {
    /// Node label value the class schedules onto.
    #[serde(default)]
    pub node_affinity_label: String,
    /// Taint key the class tolerates.
    #[serde(default)]
    pub toleration: String,
}

/// Container orchestrator configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Base URL of the orchestrator API.
    pub api_url: String,
    /// Path to the bearer token file.
    pub token_path: PathBuf,
    /// Namespace evaluation Jobs run in.
    pub namespace: String,
    /// Evaluator container image.
    pub evaluator_image: String,
    /// Sandbox daemon container image.
    pub daemon_image: String,
    /// Scheduling class for evaluation Jobs.
    #[serde(default)]
    pub eval_node_assignment: NodeAssignment,
    /// Scheduling class for broadcast Jobs.
    #[serde(default)]
    pub broadcast_node_assignment: NodeAssignment,
    /// Scheduling class for scoring Jobs.
    #[serde(default)]
    pub scoring_node_assignment: NodeAssignment,
}

// ============================================================================
// SECTION: Archive
// ============================================================================

/// Primary blob storage configuration (S3-compatible).
///
/// Holds incoming submission payloads and the worker result container.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlobConfig {
    /// Endpoint URL; empty uses the ambient AWS environment.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Region name.
    #[serde(default)]
    pub region: Option<String>,
    /// Bucket for incoming submission payloads.
    pub submissions_bucket: String,
    /// Bucket the worker writes result artifacts into.
    pub artifacts_bucket: String,
    /// Optional key prefix.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Use path-style addressing (required by some S3 clones).
    #[serde(default)]
    pub force_path_style: bool,
}

/// Long-term archive configuration (S3-compatible).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    /// Endpoint URL; empty uses the ambient AWS environment.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Region name.
    #[serde(default)]
    pub region: Option<String>,
    /// Archive bucket.
    pub bucket: String,
    /// Optional key prefix.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Use path-style addressing (required by some S3 clones).
    #[serde(default)]
    pub force_path_style: bool,
}

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Crucible backbone configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrucibleConfig {
    /// Round identifier attached to every audit event and Job.
    pub round_id: String,
    /// Competing teams.
    #[serde(default)]
    pub teams: Vec<TeamConfig>,
    /// Relational store.
    pub store: StoreConfig,
    /// Result queue.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Container orchestrator.
    pub orchestrator: OrchestratorConfig,
    /// Primary blob storage.
    pub blob: BlobConfig,
    /// Long-term archive.
    pub archive: ArchiveConfig,
    /// CRS status fan-out interval in seconds.
    #[serde(default = "default_crs_poll_seconds")]
    pub crs_status_poll_seconds: u64,
    /// Graceful shutdown budget in seconds.
    #[serde(default = "default_shutdown_seconds")]
    pub graceful_shutdown_seconds: u64,
    /// Logging verbosity.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CrucibleConfig {
    /// Loads configuration from the default path or `CRUCIBLE_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on read, parse, or validation failure.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = env::var_os(CONFIG_ENV_VAR)
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_NAME), PathBuf::from);
        Self::load(&path)
    }

    /// Loads configuration from an explicit path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on read, parse, or validation failure.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let metadata = fs::metadata(path).map_err(|err| ConfigError::Read(err.to_string()))?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE as u64 {
            return Err(ConfigError::TooLarge);
        }
        let raw = fs::read_to_string(path).map_err(|err| ConfigError::Read(err.to_string()))?;
        Self::parse(&raw)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on parse or validation failure.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        if raw.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::TooLarge);
        }
        let config: Self =
            toml::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] on the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.round_id.trim().is_empty() {
            return Err(ConfigError::Invalid("round_id must be set".to_string()));
        }
        if self.teams.len() > MAX_TEAMS {
            return Err(ConfigError::Invalid(format!("more than {MAX_TEAMS} teams configured")));
        }
        let mut seen = BTreeSet::new();
        for team in &self.teams {
            let id = team.team_id()?;
            if !seen.insert(id) {
                return Err(ConfigError::Invalid(format!("duplicate team id: {id}")));
            }
            validate_token(&team.id, &team.api_key.token)?;
            if team.note.len() > MAX_NOTE_LENGTH {
                return Err(ConfigError::Invalid(format!("team {id}: note too long")));
            }
            if let Some(crs) = &team.crs {
                validate_url(&team.id, "crs.url", &crs.url)?;
            }
        }
        validate_url("orchestrator", "api_url", &self.orchestrator.api_url)?;
        if self.orchestrator.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid("orchestrator.namespace must be set".to_string()));
        }
        if let Some(endpoint) = &self.blob.endpoint {
            validate_url("blob", "endpoint", endpoint)?;
        }
        if self.blob.submissions_bucket.trim().is_empty()
            || self.blob.artifacts_bucket.trim().is_empty()
        {
            return Err(ConfigError::Invalid("blob buckets must be set".to_string()));
        }
        if let Some(endpoint) = &self.archive.endpoint {
            validate_url("archive", "endpoint", endpoint)?;
        }
        if self.archive.bucket.trim().is_empty() {
            return Err(ConfigError::Invalid("archive.bucket must be set".to_string()));
        }
        if self.queue.visibility_seconds == 0 {
            return Err(ConfigError::Invalid(
                "queue.visibility_seconds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the typed team ids declared in configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when any id is malformed.
    pub fn team_ids(&self) -> Result<Vec<TeamId>, ConfigError> {
        self.teams.iter().map(TeamConfig::team_id).collect()
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Serde default helper: true.
const fn default_true() -> bool {
    true
}

/// Returns the default busy timeout in milliseconds.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default CRS poll interval in seconds.
const fn default_crs_poll_seconds() -> u64 {
    DEFAULT_CRS_POLL_SECONDS
}

/// Returns the default shutdown budget in seconds.
const fn default_shutdown_seconds() -> u64 {
    DEFAULT_SHUTDOWN_SECONDS
}

/// Validates a token against the hard length bounds.
fn validate_token(owner: &str, token: &str) -> Result<(), ConfigError> {
    if token.len() < MIN_TOKEN_LENGTH || token.len() > MAX_TOKEN_LENGTH {
        return Err(ConfigError::Invalid(format!(
            "team {owner}: token length must be {MIN_TOKEN_LENGTH}..={MAX_TOKEN_LENGTH} bytes"
        )));
    }
    Ok(())
}

/// Validates an http(s) URL field.
fn validate_url(owner: &str, field: &str, raw: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(raw)
        .map_err(|err| ConfigError::Invalid(format!("{owner}.{field}: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid(format!("{owner}.{field}: scheme must be http(s)")));
    }
    Ok(())
}
