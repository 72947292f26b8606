//! Screen layout defaults, as fractions of the frame.

use crate::rect::NormalizedRect;

/// Generous search area in the lower-middle of the screen. The bar moves with
/// resolution and UI scale, so this is much larger than the bar itself.
pub const SEARCH_ROI: NormalizedRect = NormalizedRect {
    x: 0.25,
    y: 0.60,
    w: 0.50,
    h: 0.35,
};

/// Used when training never settles on a stable candidate.
pub const FALLBACK_BAR: NormalizedRect = NormalizedRect {
    x: 0.42,
    y: 0.85,
    w: 0.16,
    h: 0.012,
};

/// Expected vertical centre of the bar.
pub const EXPECTED_BAR_CENTER_Y: f64 = FALLBACK_BAR.y + FALLBACK_BAR.h / 2.0;

/// Allowed distance from [`EXPECTED_BAR_CENTER_Y`] before the score falls off.
pub const EXPECTED_BAR_Y_TOLERANCE: f64 = 0.05;
