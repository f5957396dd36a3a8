// crates/crucible-core/src/core/identifiers.rs
// ============================================================================
// Module: Crucible Identifiers
// Description: Canonical time-ordered identifiers for Crucible records.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: rand, serde
// ============================================================================

//! ## Overview
//! Every Crucible primary key is a time-ordered 128-bit identifier in the
//! UUIDv7 layout: a 48-bit unix-millisecond timestamp, the version nibble,
//! and a random tail. Wire form is the canonical lowercase hyphenated UUID
//! string. Parsing accepts any case; the canonical lowercase form is what
//! gets persisted and compared.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use thiserror::Error;

use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors produced while parsing identifiers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    /// Input is not a hyphenated 36-character UUID form.
    #[error("malformed identifier: {0}")]
    Malformed(String),
}

// ============================================================================
// SECTION: Raw 128-Bit Value
// ============================================================================

/// Raw 128-bit identifier value shared by all typed identifiers.
///
/// # Invariants
/// - The canonical wire form is lowercase hyphenated `8-4-4-4-12` hex.
/// - Values generated by [`Uuid128::generate`] sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uuid128(u128);

impl Uuid128 {
    /// Creates an identifier from a raw 128-bit value.
    #[must_use]
    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    /// Returns the raw 128-bit value.
    #[must_use]
    pub const fn as_raw(self) -> u128 {
        self.0
    }

    /// Generates a fresh time-ordered identifier (UUIDv7 layout).
    ///
    /// The top 48 bits carry unix milliseconds so freshly generated values
    /// sort by creation time; the remainder is random apart from the
    /// version and variant bits.
    #[must_use]
    pub fn generate(now: Timestamp) -> Self {
        let millis = now.as_unix_millis().max(0);
        #[allow(
            clippy::cast_sign_loss,
            reason = "Negative timestamps are clamped to zero above."
        )]
        let millis = (millis as u128) & 0xFFFF_FFFF_FFFF;
        let random: u128 = rand::thread_rng().r#gen();
        // Version 7 in bits 76..80, RFC variant in bits 62..64.
        let rand_a = (random >> 64) & 0x0FFF;
        let rand_b = random & 0x3FFF_FFFF_FFFF_FFFF;
        Self((millis << 80) | (0x7 << 76) | (rand_a << 64) | (0x2 << 62) | rand_b)
    }

    /// Parses an identifier from a hyphenated UUID string, any case.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::Malformed`] when the input is not a
    /// 36-character hyphenated UUID.
    pub fn parse(input: &str) -> Result<Self, IdentifierError> {
        let bytes = input.as_bytes();
        if bytes.len() != 36 {
            return Err(IdentifierError::Malformed(input.to_string()));
        }
        let mut value: u128 = 0;
        for (index, byte) in bytes.iter().enumerate() {
            if matches!(index, 8 | 13 | 18 | 23) {
                if *byte != b'-' {
                    return Err(IdentifierError::Malformed(input.to_string()));
                }
                continue;
            }
            let digit = match byte {
                b'0'..=b'9' => byte - b'0',
                b'a'..=b'f' => byte - b'a' + 10,
                b'A'..=b'F' => byte - b'A' + 10,
                _ => return Err(IdentifierError::Malformed(input.to_string())),
            };
            value = (value << 4) | u128::from(digit);
        }
        Ok(Self(value))
    }

    /// Returns the embedded unix-millisecond timestamp prefix.
    #[must_use]
    pub const fn timestamp_millis(self) -> u64 {
        #[allow(
            clippy::cast_possible_truncation,
            reason = "The shift leaves exactly 48 bits."
        )]
        let millis = (self.0 >> 80) as u64;
        millis
    }
}

impl fmt::Display for Uuid128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = format!("{:032x}", self.0);
        write!(
            f,
            "{}-{}-{}-{}-{}",
            &hex[.. 8],
            &hex[8 .. 12],
            &hex[12 .. 16],
            &hex[16 .. 20],
            &hex[20 ..]
        )
    }
}

impl FromStr for Uuid128 {
    type Err = IdentifierError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

impl Serialize for Uuid128 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Uuid128 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// SECTION: Typed Identifiers
// ============================================================================

/// Declares a typed identifier newtype over [`Uuid128`].
macro_rules! declare_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        ///
        /// # Invariants
        /// - Wire form is the canonical lowercase hyphenated UUID string.
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid128);

        impl $name {
            /// Wraps a raw identifier value.
            #[must_use]
            pub const fn new(value: Uuid128) -> Self {
                Self(value)
            }

            /// Generates a fresh time-ordered identifier.
            #[must_use]
            pub fn generate(now: Timestamp) -> Self {
                Self(Uuid128::generate(now))
            }

            /// Parses an identifier from a hyphenated UUID string, any case.
            ///
            /// # Errors
            ///
            /// Returns [`IdentifierError::Malformed`] when the input is not a
            /// 36-character hyphenated UUID.
            pub fn parse(input: &str) -> Result<Self, IdentifierError> {
                Uuid128::parse(input).map(Self)
            }

            /// Returns the underlying raw identifier.
            #[must_use]
            pub const fn get(self) -> Uuid128 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = IdentifierError;

            fn from_str(input: &str) -> Result<Self, Self::Err> {
                Self::parse(input)
            }
        }
    };
}

declare_id! {
    /// Task identifier announced to competitors.
    TaskId
}
declare_id! {
    /// Team (CRS) identifier; doubles as the basic-auth username.
    TeamId
}
declare_id! {
    /// Proof-of-vulnerability submission identifier.
    PovId
}
declare_id! {
    /// Patch submission identifier.
    PatchId
}
declare_id! {
    /// Broadcast SARIF identifier.
    SarifBroadcastId
}
declare_id! {
    /// Team-authored SARIF submission identifier.
    SarifSubmissionId
}
declare_id! {
    /// SARIF broadcast assessment identifier.
    SarifAssessmentId
}
declare_id! {
    /// Bundle identifier.
    BundleId
}
declare_id! {
    /// Freeform submission identifier.
    FreeformId
}
declare_id! {
    /// Generic job-runner entity identifier.
    JobId
}
