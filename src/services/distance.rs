//! Distance engine — unit conversion and token-to-token range.
//!
//! DESIGN
//! ======
//! Pure functions over token geometry and scene grid metadata. Thresholds
//! are configured in feet; scenes measure distance in whatever unit their
//! grid declares, so the threshold is converted into scene units before any
//! comparison. Token positions are pixels, sizes are grid cells — distance
//! runs center-to-center in pixel space, then scales by the grid ratio.
//!
//! All functions are total: unrecognized unit labels degrade to identity
//! conversion and degenerate geometry falls back to grid defaults.

use crate::state::{SceneGrid, Token};

const METERS_PER_FOOT: f64 = 0.3048;
const KILOMETERS_PER_FOOT: f64 = 0.000_304_8;
const FEET_PER_MILE: f64 = 5280.0;

/// A point in scene pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

// =============================================================================
// UNIT CONVERSION
// =============================================================================

/// Convert a threshold in feet into the scene's native distance units.
///
/// The grid's unit label is free text; it is matched case-insensitively by
/// substring, in precedence order: "ft" → feet, "meter"/"m" → meters,
/// "km" → kilometers, "mi" → miles. Anything else is assumed to already
/// be feet, so the value passes through unchanged.
#[must_use]
pub fn convert_threshold_to_scene_units(feet: f64, unit_label: &str) -> f64 {
    let label = unit_label.trim().to_lowercase();
    if label.contains("ft") {
        feet
    } else if label.contains("meter") || label == "m" {
        feet * METERS_PER_FOOT
    } else if label.contains("km") {
        feet * KILOMETERS_PER_FOOT
    } else if label.contains("mi") {
        feet / FEET_PER_MILE
    } else {
        feet
    }
}

// =============================================================================
// GEOMETRY
// =============================================================================

/// Pixel-space center of a token: `position + size_in_cells × cell_px / 2`.
///
/// Non-finite positions default to 0 and non-positive sizes to one cell,
/// matching how the host treats half-initialized documents.
#[must_use]
pub fn center_of(token: &Token, cell_px: f64) -> Point {
    Point {
        x: finite_or(token.x, 0.0) + positive_or(token.width, 1.0) * cell_px / 2.0,
        y: finite_or(token.y, 0.0) + positive_or(token.height, 1.0) * cell_px / 2.0,
    }
}

/// Euclidean center-to-center distance between two tokens, in scene units:
/// `(pixel_distance / cell_px) × distance_per_cell`.
#[must_use]
pub fn distance_between(a: &Token, b: &Token, grid: &SceneGrid) -> f64 {
    let cell_px = positive_or(grid.cell_px, 1.0);
    let ca = center_of(a, cell_px);
    let cb = center_of(b, cell_px);
    let pixel_distance = (ca.x - cb.x).hypot(ca.y - cb.y);
    pixel_distance / cell_px * grid.distance_per_cell
}

fn finite_or(value: f64, default: f64) -> f64 {
    if value.is_finite() { value } else { default }
}

fn positive_or(value: f64, default: f64) -> f64 {
    if value.is_finite() && value > 0.0 { value } else { default }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "distance_test.rs"]
mod tests;
