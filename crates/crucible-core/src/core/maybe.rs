// crates/crucible-core/src/core/maybe.rs
// ============================================================================
// Module: Crucible Tri-State Fields
// Description: Absent / explicit-null / present field wrapper.
// Purpose: Let PATCH payloads distinguish "leave alone" from "clear".
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Bundle payload fields are tri-state: an absent field means "leave the
//! stored value alone", an explicit `null` means "clear it", and a value
//! means "replace it". [`Maybe`] captures all three. Declare fields as
//! `#[serde(default)] Maybe<T>`: when the key is present the custom
//! deserializer marks the field defined (for both `null` and values), and
//! when the key is absent serde's default yields the undefined state.
//!
//! Every bundle field uses this wrapper, including `description`; no field
//! takes a raw-copy shortcut.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;

// ============================================================================
// SECTION: Maybe
// ============================================================================

/// Tri-state optional field.
///
/// # Invariants
/// - `defined == false` implies `value == None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Maybe<T> {
    /// True when the field key appeared in the payload.
    defined: bool,
    /// The carried value; `None` for both absent and explicit-null.
    value: Option<T>,
}

impl<T> Maybe<T> {
    /// Returns the undefined (absent) state.
    #[must_use]
    pub const fn undefined() -> Self {
        Self {
            defined: false,
            value: None,
        }
    }

    /// Returns a defined explicit-null state.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            defined: true,
            value: None,
        }
    }

    /// Returns a defined value state.
    #[must_use]
    pub const fn value(value: T) -> Self {
        Self {
            defined: true,
            value: Some(value),
        }
    }

    /// Returns true when the field key appeared in the payload.
    #[must_use]
    pub const fn is_defined(&self) -> bool {
        self.defined
    }

    /// Returns the carried value, if any.
    #[must_use]
    pub const fn as_ref(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Consumes the wrapper and returns the carried value, if any.
    #[must_use]
    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// Applies the tri-state update onto a stored value.
    ///
    /// Undefined leaves `current` alone; null clears it; a value replaces it.
    #[must_use]
    pub fn apply(self, current: Option<T>) -> Option<T> {
        if self.defined { self.value } else { current }
    }

    /// Maps the carried value, preserving definedness.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Maybe<U> {
        Maybe {
            defined: self.defined,
            value: self.value.map(f),
        }
    }
}

impl<T> Default for Maybe<T> {
    fn default() -> Self {
        Self::undefined()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Maybe<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Reaching the deserializer at all means the key was present.
        let value = Option::<T>::deserialize(deserializer)?;
        Ok(Self {
            defined: true,
            value,
        })
    }
}

impl<T: Serialize> Serialize for Maybe<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.value {
            Some(value) => serializer.serialize_some(value),
            None => serializer.serialize_none(),
        }
    }
}
