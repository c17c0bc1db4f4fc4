//! Per-token visibility configuration.
//!
//! DESIGN
//! ======
//! Host documents carry an opaque flag map (`serde_json::Value`). Rather than
//! coercing flag values ad hoc at each use site, the map is parsed into a
//! typed [`VisibilityConfig`] exactly once — at token creation, hydration,
//! and flag update. The rest of the crate only ever sees the typed record.
//!
//! PARSE RULES
//! ===========
//! `min_visible_distance` accepts a JSON number or a numeric string. Absent,
//! null, blank, non-numeric, or non-positive values all collapse to `None`,
//! which downstream means "no threshold — never alter this token's hidden
//! state". `stealth_on_create` accepts a JSON bool or "true"/"false" string
//! and falls back to the originating template's flags when the token's own
//! map lacks the key.

use serde::{Deserialize, Serialize};

/// Flag key for the minimum visibility distance, in feet.
pub const FLAG_MIN_VISIBLE_DISTANCE: &str = "min_visible_distance";

/// Flag key for the stealth-on-create toggle.
pub const FLAG_STEALTH_ON_CREATE: &str = "stealth_on_create";

/// Flag key for a flat stealth skill modifier.
pub const FLAG_STEALTH_MODIFIER: &str = "stealth_modifier";

// =============================================================================
// CONFIG RECORD
// =============================================================================

/// Typed view of a token's visibility flags.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VisibilityConfig {
    /// Threshold in feet. `None` means the token is never auto-toggled.
    pub min_visibility_distance_feet: Option<f64>,
    /// Roll a Stealth check when the token is created.
    pub stealth_on_create: bool,
    /// Flat modifier added to the stealth d20 roll.
    pub stealth_modifier: i64,
}

impl VisibilityConfig {
    /// Parse a token's flag map.
    #[must_use]
    pub fn from_flags(flags: &serde_json::Value) -> Self {
        Self::from_flags_with_template(flags, None)
    }

    /// Parse a token's flag map, falling back to its originating template's
    /// flags for `stealth_on_create` when the token map lacks the key.
    #[must_use]
    pub fn from_flags_with_template(flags: &serde_json::Value, template: Option<&serde_json::Value>) -> Self {
        let stealth_on_create = parse_bool(flags.get(FLAG_STEALTH_ON_CREATE))
            .or_else(|| parse_bool(template.and_then(|t| t.get(FLAG_STEALTH_ON_CREATE))))
            .unwrap_or(false);

        Self {
            min_visibility_distance_feet: parse_positive_number(flags.get(FLAG_MIN_VISIBLE_DISTANCE)),
            stealth_on_create,
            stealth_modifier: flags
                .get(FLAG_STEALTH_MODIFIER)
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(0),
        }
    }
}

// =============================================================================
// VALUE COERCION
// =============================================================================

/// Coerce a flag value into a positive finite number, or `None`.
fn parse_positive_number(value: Option<&serde_json::Value>) -> Option<f64> {
    let raw = match value? {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok()?
        }
        _ => return None,
    };

    (raw.is_finite() && raw > 0.0).then_some(raw)
}

/// Coerce a flag value into a bool. `None` when absent or unparseable,
/// so callers can distinguish "unset" from "explicitly false".
fn parse_bool(value: Option<&serde_json::Value>) -> Option<bool> {
    match value? {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => match s.trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
