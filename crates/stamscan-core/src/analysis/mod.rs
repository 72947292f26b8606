pub mod calibrate;
pub mod detect;
pub mod sampler;
pub mod scoring;
pub mod tracker;

use std::fmt;

use crate::rect::PixelRect;

/// A bar-shaped blob found in one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Bounding box in full-frame coordinates.
    pub rect: PixelRect,
    /// Contour polygon area in pixels.
    pub area: f64,
    pub aspect_ratio: f64,
    /// Fraction of the box's pixels inside the calibrated range.
    pub fill_ratio: f64,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} area={:.0} ar={:.1} fill={:.2}",
            self.rect, self.area, self.aspect_ratio, self.fill_ratio
        )
    }
}
