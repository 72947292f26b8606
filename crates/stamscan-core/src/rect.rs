use std::fmt;

use serde::{Deserialize, Serialize};
use stamscan_proto::proto;

/// A rectangle defined in normalized coordinates (0.0 to 1.0),
/// independent of the actual frame resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// A rectangle in absolute pixel coordinates.
///
/// Identity is the exact 4-tuple, so it doubles as a frequency-table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl NormalizedRect {
    /// Convert to pixels, clamped so the result lies inside the frame and is at least 1x1.
    pub fn to_pixel_rect(self, frame_width: u32, frame_height: u32) -> PixelRect {
        assert!(frame_width > 0 && frame_height > 0, "frame must be non-empty");
        let x = ((self.x * frame_width as f64) as u32).min(frame_width - 1);
        let y = ((self.y * frame_height as f64) as u32).min(frame_height - 1);
        let w = ((self.w * frame_width as f64) as u32).clamp(1, frame_width - x);
        let h = ((self.h * frame_height as f64) as u32).clamp(1, frame_height - y);
        PixelRect { x, y, w, h }
    }
}

impl PixelRect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> u32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.h
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.w as f64 / self.h.max(1) as f64
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.w as f64 / 2.0,
            self.y as f64 + self.h as f64 / 2.0,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    /// True when the rectangle is non-empty and fully inside a `width` x `height` frame.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        !self.is_empty() && self.right() <= width && self.bottom() <= height
    }

    /// Shift by `(dx, dy)`, e.g. from ROI-local to frame coordinates.
    pub fn offset(self, dx: u32, dy: u32) -> PixelRect {
        PixelRect {
            x: self.x + dx,
            y: self.y + dy,
            ..self
        }
    }

    /// Intersection with a `width` x `height` frame, or None if nothing is left.
    pub fn clamp_to(self, width: u32, height: u32) -> Option<PixelRect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let rect = PixelRect {
            x: self.x,
            y: self.y,
            w: self.w.min(width - self.x),
            h: self.h.min(height - self.y),
        };
        (!rect.is_empty()).then_some(rect)
    }
}

impl fmt::Display for PixelRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}x{})", self.x, self.y, self.w, self.h)
    }
}

impl From<PixelRect> for proto::Rect {
    fn from(r: PixelRect) -> Self {
        proto::Rect {
            x: r.x,
            y: r.y,
            width: r.w,
            height: r.h,
        }
    }
}

impl From<proto::Rect> for PixelRect {
    fn from(r: proto::Rect) -> Self {
        PixelRect {
            x: r.x,
            y: r.y,
            w: r.width,
            h: r.height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_to_pixel() {
        let n = NormalizedRect { x: 0.5, y: 0.25, w: 0.1, h: 0.05 };
        assert_eq!(n.to_pixel_rect(1920, 1080), PixelRect::new(960, 270, 192, 54));
    }

    #[test]
    fn normalized_to_pixel_stays_inside_frame() {
        let n = NormalizedRect { x: 0.95, y: 0.99, w: 0.2, h: 0.0001 };
        let p = n.to_pixel_rect(640, 360);
        assert!(p.fits_within(640, 360), "{p} escapes the frame");
        assert_eq!(p.h, 1);
    }

    #[test]
    fn clamp_to_trims_overhang() {
        let r = PixelRect::new(600, 300, 100, 100);
        assert_eq!(r.clamp_to(640, 360), Some(PixelRect::new(600, 300, 40, 60)));
        assert_eq!(PixelRect::new(700, 0, 10, 10).clamp_to(640, 360), None);
    }

    #[test]
    fn proto_conversion_keeps_geometry() {
        let r = PixelRect::new(1, 2, 3, 4);
        let back: PixelRect = proto::Rect::from(r).into();
        assert_eq!(back, r);
    }
}
