use std::fmt::{self, Formatter};

use image::{GrayImage, Luma, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use stamscan_proto::proto;

use crate::rect::PixelRect;

pub const HUE_MAX: u8 = 179;
pub const CHANNEL_MAX: u8 = 255;

/// Upper bound of each channel, in (H, S, V) order.
pub const CHANNEL_LIMITS: [u8; 3] = [HUE_MAX, CHANNEL_MAX, CHANNEL_MAX];

/// Mask value for pixels inside the range.
pub const MASK_ON: u8 = 255;

/// HSV in the 8-bit convention: H in [0, 179] (degrees / 2), S and V in [0, 255].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsv {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

impl Hsv {
    pub fn channels(self) -> [u8; 3] {
        [self.h, self.s, self.v]
    }
}

impl fmt::Display for Hsv {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[H: {}, S: {}, V: {}]", self.h, self.s, self.v)
    }
}

pub fn rgb_to_hsv(rgb: Rgb<u8>) -> Hsv {
    let [r, g, b] = rgb.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = (max - min) as f32;

    let s = if max > 0 {
        (delta * 255.0 / max as f32).round() as u8
    } else {
        0
    };

    let (r, g, b) = (r as f32, g as f32, b as f32);
    let h = if delta == 0.0 {
        0.0
    } else if max as f32 == r {
        60.0 * ((g - b) / delta)
    } else if max as f32 == g {
        60.0 * ((b - r) / delta) + 120.0
    } else {
        60.0 * ((r - g) / delta) + 240.0
    };
    let h = if h < 0.0 { h + 360.0 } else { h };
    // 360° wraps to 0 so red stays at the bottom of the hue axis.
    let h = ((h / 2.0).round() as u16 % 180) as u8;

    Hsv { h, s, v: max }
}

/// Inclusive HSV bounds. Hue is treated linearly, no wrap-around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, hsv: Hsv) -> bool {
        let c = hsv.channels();
        (0..3).all(|i| c[i] >= self.lower[i] && c[i] <= self.upper[i])
    }

    /// Every channel ordered and inside its domain.
    pub fn is_valid(&self) -> bool {
        (0..3).all(|i| self.lower[i] <= self.upper[i] && self.upper[i] <= CHANNEL_LIMITS[i])
    }

    /// A looser copy: hue grows by `hue` on both sides, S/V lower bounds drop.
    pub fn widened(&self, hue: u8, sat: u8, val: u8) -> HsvRange {
        HsvRange {
            lower: [
                self.lower[0].saturating_sub(hue),
                self.lower[1].saturating_sub(sat),
                self.lower[2].saturating_sub(val),
            ],
            upper: [
                self.upper[0].saturating_add(hue).min(HUE_MAX),
                self.upper[1],
                self.upper[2],
            ],
        }
    }
}

impl fmt::Display for HsvRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}..={:?}", self.lower, self.upper)
    }
}

impl From<HsvRange> for proto::HsvBounds {
    fn from(r: HsvRange) -> Self {
        proto::HsvBounds {
            lower: r.lower.iter().map(|&c| c as u32).collect(),
            upper: r.upper.iter().map(|&c| c as u32).collect(),
        }
    }
}

impl TryFrom<proto::HsvBounds> for HsvRange {
    type Error = anyhow::Error;

    fn try_from(b: proto::HsvBounds) -> anyhow::Result<Self> {
        fn channels(v: &[u32]) -> anyhow::Result<[u8; 3]> {
            let [h, s, v] = v else {
                anyhow::bail!("expected 3 HSV channels, got {}", v.len());
            };
            Ok([
                u8::try_from(*h)?,
                u8::try_from(*s)?,
                u8::try_from(*v)?,
            ])
        }
        let range = HsvRange {
            lower: channels(&b.lower)?,
            upper: channels(&b.upper)?,
        };
        anyhow::ensure!(range.is_valid(), "HSV bounds out of order or domain: {range}");
        Ok(range)
    }
}

/// Classifies pixels against a primary range, optionally unioned with a wider one.
#[derive(Debug, Clone, Copy)]
pub struct ColorMatcher {
    pub primary: HsvRange,
    pub secondary: Option<HsvRange>,
}

impl ColorMatcher {
    pub fn new(primary: HsvRange, secondary: Option<HsvRange>) -> Self {
        Self { primary, secondary }
    }

    pub fn only(primary: HsvRange) -> Self {
        Self::new(primary, None)
    }

    pub fn matches(&self, rgb: Rgb<u8>) -> bool {
        let hsv = rgb_to_hsv(rgb);
        self.primary.contains(hsv) || self.secondary.is_some_and(|r| r.contains(hsv))
    }

    /// Binary mask (0 / [`MASK_ON`]) of `rect`, in rect-local coordinates.
    pub fn mask(&self, image: &RgbImage, rect: PixelRect) -> GrayImage {
        assert!(
            rect.fits_within(image.width(), image.height()),
            "mask rect {rect} outside {}x{} image",
            image.width(),
            image.height()
        );
        GrayImage::from_fn(rect.w, rect.h, |x, y| {
            let rgb = *image.get_pixel(rect.x + x, rect.y + y);
            Luma([if self.matches(rgb) { MASK_ON } else { 0 }])
        })
    }

    /// Number of matching pixels inside `rect`.
    pub fn count(&self, image: &RgbImage, rect: PixelRect) -> u64 {
        assert!(
            rect.fits_within(image.width(), image.height()),
            "count rect {rect} outside {}x{} image",
            image.width(),
            image.height()
        );
        let mut count = 0;
        for y in rect.y..rect.bottom() {
            for x in rect.x..rect.right() {
                if self.matches(*image.get_pixel(x, y)) {
                    count += 1;
                }
            }
        }
        count
    }

    /// Fraction of `rect` that matches, 0.0 for an empty rect.
    pub fn fill_ratio(&self, image: &RgbImage, rect: PixelRect) -> f64 {
        if rect.is_empty() {
            return 0.0;
        }
        self.count(image, rect) as f64 / rect.area() as f64
    }
}
