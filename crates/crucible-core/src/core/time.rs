// crates/crucible-core/src/core/time.rs
// ============================================================================
// Module: Crucible Time Model
// Description: Canonical timestamp representation for records and deadlines.
// Purpose: Provide a single millisecond-precision time value across Crucible.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Crucible stores every instant — task deadlines, record creation times,
//! audit timestamps — as unix epoch milliseconds. Handlers capture `now`
//! once at entry and pass it down so a single request observes a single
//! instant.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical timestamp used in Crucible records and deadlines.
///
/// # Invariants
/// - Unix epoch milliseconds; values before the epoch are representable but
///   never produced by [`Timestamp::now`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self(millis)
    }

    /// Returns the value as unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Parses an RFC 3339 instant.
    #[must_use]
    pub fn parse_rfc3339(input: &str) -> Option<Self> {
        let parsed = OffsetDateTime::parse(input, &Rfc3339).ok()?;
        let nanos = parsed.unix_timestamp_nanos();
        i64::try_from(nanos / 1_000_000).ok().map(Self)
    }

    /// Renders the value as an RFC 3339 string, when representable.
    #[must_use]
    pub fn to_rfc3339(self) -> Option<String> {
        let nanos = i128::from(self.0).checked_mul(1_000_000)?;
        let instant = OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()?;
        instant.format(&Rfc3339).ok()
    }

    /// Returns a timestamp advanced by the given number of milliseconds.
    #[must_use]
    pub const fn saturating_add_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_rfc3339() {
            Some(rendered) => f.write_str(&rendered),
            None => self.0.fmt(f),
        }
    }
}
