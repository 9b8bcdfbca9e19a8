//! Validation scoring.
//!
//! A deterministic completeness metric computed purely from a definition's
//! declared fields. Starts from a baseline for a parseable identity and adds
//! fixed increments for each optional-but-valuable field, capped at 100.
//! Low-scoring definitions are flagged in query results, never excluded.

use super::RawDefinition;

/// Baseline for a parseable file with name and kind.
const BASELINE: u32 = 30;

/// Increment for declared specializations.
const SPECIALIZATIONS_BONUS: u32 = 15;

/// Increment for declared frameworks.
const FRAMEWORKS_BONUS: u32 = 10;

/// Increment for declared domains.
const DOMAINS_BONUS: u32 = 8;

/// Increment for declared roles.
const ROLES_BONUS: u32 = 7;

/// Per-capability increment, capped at [`CAPABILITIES_CAP`].
const CAPABILITY_BONUS: u32 = 2;
const CAPABILITIES_CAP: u32 = 20;

/// Increment for a non-trivial description.
const DESCRIPTION_BONUS: u32 = 10;

/// Minimum description length considered non-trivial.
const DESCRIPTION_MIN_LEN: usize = 80;

/// Compute the validation score (0-100) for a raw definition.
///
/// Pure function of the declared fields; unknown fields never contribute.
pub fn validation_score(raw: &RawDefinition) -> u8 {
    let mut score = BASELINE;

    if !raw.specializations.is_empty() {
        score += SPECIALIZATIONS_BONUS;
    }
    if !raw.frameworks.is_empty() {
        score += FRAMEWORKS_BONUS;
    }
    if !raw.domains.is_empty() {
        score += DOMAINS_BONUS;
    }
    if !raw.roles.is_empty() {
        score += ROLES_BONUS;
    }

    let capability_score = (raw.capabilities.len() as u32) * CAPABILITY_BONUS;
    score += capability_score.min(CAPABILITIES_CAP);

    if raw.description.len() >= DESCRIPTION_MIN_LEN {
        score += DESCRIPTION_BONUS;
    }

    score.min(100) as u8
}
