// crates/crucible-server/src/bundle.rs
// ============================================================================
// Module: Bundle Payloads
// Description: Tri-state bundle payload parsing and field validation.
// Purpose: Turn raw bundle JSON into typed ids with per-field errors.
// Dependencies: crucible-core, serde
// ============================================================================

//! ## Overview
//! Bundle payloads are six optional fields, each tri-state: absent leaves
//! the stored value alone (PATCH), explicit null clears it, and a value
//! replaces it. Ids arrive as strings and are parsed into typed ids here;
//! malformed values produce a per-field 400, never a 404. Every field —
//! `description` included — rides the same [`Maybe`] wrapper.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crucible_core::Bundle;
use crucible_core::BundleId;
use crucible_core::FieldErrors;
use crucible_core::FreeformId;
use crucible_core::MAX_DESCRIPTION_BYTES;
use crucible_core::Maybe;
use crucible_core::PatchId;
use crucible_core::PovId;
use crucible_core::SarifBroadcastId;
use crucible_core::SarifSubmissionId;
use crucible_core::TaskId;
use crucible_core::TeamId;
use crucible_core::Timestamp;
use serde::Deserialize;

// ============================================================================
// SECTION: Wire Payload
// ============================================================================

/// Raw bundle payload as received on POST and PATCH.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundlePayload {
    /// Linked POV id.
    #[serde(default)]
    pub pov_id: Maybe<String>,
    /// Linked patch id.
    #[serde(default)]
    pub patch_id: Maybe<String>,
    /// Linked team-authored SARIF id.
    #[serde(default)]
    pub submitted_sarif_id: Maybe<String>,
    /// Linked broadcast SARIF id.
    #[serde(default)]
    pub broadcast_sarif_id: Maybe<String>,
    /// Linked freeform submission id.
    #[serde(default)]
    pub freeform_id: Maybe<String>,
    /// Free-text description.
    #[serde(default)]
    pub description: Maybe<String>,
}

/// Bundle payload with ids parsed into their typed forms.
#[derive(Debug, Clone)]
pub struct ParsedBundle {
    /// Linked POV id.
    pub pov_id: Maybe<PovId>,
    /// Linked patch id.
    pub patch_id: Maybe<PatchId>,
    /// Linked team-authored SARIF id.
    pub submitted_sarif_id: Maybe<SarifSubmissionId>,
    /// Linked broadcast SARIF id.
    pub broadcast_sarif_id: Maybe<SarifBroadcastId>,
    /// Linked freeform submission id.
    pub freeform_id: Maybe<FreeformId>,
    /// Free-text description.
    pub description: Maybe<String>,
}

impl BundlePayload {
    /// Parses id fields into typed form, collecting per-field errors.
    ///
    /// # Errors
    ///
    /// Returns the field map when any id is malformed or the description
    /// is out of bounds.
    pub fn parse(self) -> Result<ParsedBundle, FieldErrors> {
        let mut errors = FieldErrors::new();
        let pov_id = parse_field("pov_id", self.pov_id, &mut errors);
        let patch_id = parse_field("patch_id", self.patch_id, &mut errors);
        let submitted_sarif_id =
            parse_field("submitted_sarif_id", self.submitted_sarif_id, &mut errors);
        let broadcast_sarif_id =
            parse_field("broadcast_sarif_id", self.broadcast_sarif_id, &mut errors);
        let freeform_id = parse_field("freeform_id", self.freeform_id, &mut errors);
        if let Some(description) = self.description.as_ref() {
            if description.len() > MAX_DESCRIPTION_BYTES {
                errors.push(
                    "description",
                    format!("exceeds maximum size of {MAX_DESCRIPTION_BYTES} bytes"),
                );
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(ParsedBundle {
            pov_id,
            patch_id,
            submitted_sarif_id,
            broadcast_sarif_id,
            freeform_id,
            description: self.description,
        })
    }
}

/// Parses one tri-state id field.
fn parse_field<T: std::str::FromStr>(
    field: &str,
    raw: Maybe<String>,
    errors: &mut FieldErrors,
) -> Maybe<T> {
    if !raw.is_defined() {
        return Maybe::undefined();
    }
    match raw.into_value() {
        None => Maybe::null(),
        Some(value) => match value.parse::<T>() {
            Ok(parsed) => Maybe::value(parsed),
            Err(_) => {
                errors.push(field, "malformed identifier");
                Maybe::null()
            }
        },
    }
}

// ============================================================================
// SECTION: Assembly
// ============================================================================

impl ParsedBundle {
    /// Builds a fresh bundle row from the defined fields.
    #[must_use]
    pub fn into_bundle(self, team_id: TeamId, task_id: TaskId, now: Timestamp) -> Bundle {
        Bundle {
            id: BundleId::generate(now),
            team_id,
            task_id,
            pov_id: self.pov_id.into_value(),
            patch_id: self.patch_id.into_value(),
            submitted_sarif_id: self.submitted_sarif_id.into_value(),
            broadcast_sarif_id: self.broadcast_sarif_id.into_value(),
            freeform_id: self.freeform_id.into_value(),
            description: self.description.into_value(),
            deleted: false,
        }
    }

    /// Applies the tri-state updates onto an existing bundle row.
    pub fn apply_to(self, bundle: &mut Bundle) {
        bundle.pov_id = self.pov_id.apply(bundle.pov_id);
        bundle.patch_id = self.patch_id.apply(bundle.patch_id);
        bundle.submitted_sarif_id = self.submitted_sarif_id.apply(bundle.submitted_sarif_id);
        bundle.broadcast_sarif_id = self.broadcast_sarif_id.apply(bundle.broadcast_sarif_id);
        bundle.freeform_id = self.freeform_id.apply(bundle.freeform_id);
        bundle.description = self.description.apply(bundle.description.take());
    }
}
