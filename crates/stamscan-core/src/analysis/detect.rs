use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use imageproc::point::Point;
use tracing::debug;

use super::Candidate;
use crate::color::{ColorMatcher, HsvRange};
use crate::config::DetectionConfig;
use crate::rect::PixelRect;

/// Finds thin, bar-shaped blobs of the target color inside a search region.
pub struct CandidateDetector<'a> {
    config: &'a DetectionConfig,
    /// Mask used to find blobs (primary range, optionally unioned with a wider one).
    matcher: ColorMatcher,
    /// Primary range only, used to measure fill ratio.
    purity: ColorMatcher,
}

impl<'a> CandidateDetector<'a> {
    pub fn new(range: HsvRange, secondary: Option<HsvRange>, config: &'a DetectionConfig) -> Self {
        Self {
            config,
            matcher: ColorMatcher::new(range, secondary),
            purity: ColorMatcher::only(range),
        }
    }

    /// Candidates in a full frame, with boxes in frame coordinates.
    pub fn detect(&self, image: &RgbImage, roi: PixelRect) -> Vec<Candidate> {
        let (frame_w, frame_h) = image.dimensions();
        let Some(roi) = roi.clamp_to(frame_w, frame_h) else {
            return Vec::new();
        };

        let mask = self.denoise(self.matcher.mask(image, roi));
        let contours: Vec<Contour<i32>> = find_contours(&mask);

        let mut candidates = Vec::new();
        for contour in contours {
            // External borders only: holes and nested blobs are part of a bigger shape.
            if matches!(contour.border_type, BorderType::Hole) || contour.parent.is_some() {
                continue;
            }
            let area = polygon_area(&contour.points);
            if area < self.config.min_contour_area {
                continue;
            }
            let Some(local) = bounding_box(&contour.points) else {
                continue;
            };
            let rect = local.offset(roi.x, roi.y);
            if !self.accepts(rect, roi, frame_w, frame_h) {
                continue;
            }

            let candidate = Candidate {
                rect,
                area,
                aspect_ratio: rect.aspect_ratio(),
                fill_ratio: self.purity.fill_ratio(image, rect),
            };
            debug!(%candidate, "bar candidate");
            candidates.push(candidate);
        }
        candidates
    }

    /// Opening removes speckles, closing fills small gaps inside the bar.
    fn denoise(&self, mask: GrayImage) -> GrayImage {
        let k = self.config.morph_radius;
        if k == 0 {
            return mask;
        }
        close(&open(&mask, Norm::LInf, k), Norm::LInf, k)
    }

    fn accepts(&self, rect: PixelRect, roi: PixelRect, frame_w: u32, frame_h: u32) -> bool {
        let c = self.config;
        let fw = frame_w as f64;
        let fh = frame_h as f64;

        if !rect.fits_within(frame_w, frame_h) {
            return false;
        }
        // The bar is always much smaller than its search region.
        if rect.w as f64 >= c.max_roi_coverage * roi.w as f64
            || rect.h as f64 >= c.max_roi_coverage * roi.h as f64
        {
            debug!(%rect, "rejected: covers the search region");
            return false;
        }
        let w = rect.w as f64;
        if w < c.min_width_frac * fw || w > c.max_width_frac * fw {
            return false;
        }
        if rect.h < c.min_height_px || rect.h as f64 > c.max_height_frac * fh {
            return false;
        }
        if rect.aspect_ratio() < c.min_aspect_ratio {
            return false;
        }
        let (cx, _) = rect.center();
        (cx - fw / 2.0).abs() <= c.max_center_offset_frac * fw
    }
}

/// Shoelace area of a closed polygon.
fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    twice.abs() as f64 / 2.0
}

/// Inclusive pixel bounds of a point set.
fn bounding_box(points: &[Point<i32>]) -> Option<PixelRect> {
    let min_x = points.iter().map(|p| p.x).min()?;
    let max_x = points.iter().map(|p| p.x).max()?;
    let min_y = points.iter().map(|p| p.y).min()?;
    let max_y = points.iter().map(|p| p.y).max()?;
    if min_x < 0 || min_y < 0 {
        return None;
    }
    Some(PixelRect::new(
        min_x as u32,
        min_y as u32,
        (max_x - min_x + 1) as u32,
        (max_y - min_y + 1) as u32,
    ))
}

#[cfg(test)]
mod tests {
    use image::Rgb;
    use tracing_test::traced_test;

    use super::*;
    use crate::config::DEFAULT_COLOR_RANGE;

    const YELLOW: Rgb<u8> = Rgb([250, 210, 30]);
    const BACKGROUND: Rgb<u8> = Rgb([25, 35, 60]);

    fn fill(img: &mut RgbImage, r: PixelRect, color: Rgb<u8>) {
        for y in r.y..r.bottom() {
            for x in r.x..r.right() {
                img.put_pixel(x, y, color);
            }
        }
    }

    fn roi() -> PixelRect {
        PixelRect::new(160, 216, 320, 126)
    }

    #[test]
    #[traced_test]
    fn finds_thin_bar_in_frame_coordinates() {
        let mut img = RgbImage::from_pixel(640, 360, BACKGROUND);
        let bar = PixelRect::new(270, 305, 100, 5);
        fill(&mut img, bar, YELLOW);

        let config = DetectionConfig::default();
        let detector = CandidateDetector::new(DEFAULT_COLOR_RANGE, None, &config);
        let candidates = detector.detect(&img, roi());

        assert_eq!(candidates.len(), 1, "{candidates:?}");
        let c = candidates[0];
        assert_eq!(c.rect, bar);
        assert!((c.fill_ratio - 1.0).abs() < 1e-9);
        assert!((c.aspect_ratio - 20.0).abs() < 1e-9);
    }

    #[test]
    fn two_pixel_bars_need_opening_disabled() {
        let mut img = RgbImage::from_pixel(640, 360, BACKGROUND);
        let bar = PixelRect::new(270, 305, 100, 2);
        fill(&mut img, bar, YELLOW);

        let config = DetectionConfig::default();
        let detector = CandidateDetector::new(DEFAULT_COLOR_RANGE, None, &config);
        assert!(detector.detect(&img, roi()).is_empty());

        let config = DetectionConfig {
            morph_radius: 0,
            min_height_px: 2,
            ..DetectionConfig::default()
        };
        let detector = CandidateDetector::new(DEFAULT_COLOR_RANGE, None, &config);
        let candidates = detector.detect(&img, roi());
        assert_eq!(candidates.len(), 1, "{candidates:?}");
        assert_eq!(candidates[0].rect, bar);
    }

    #[test]
    fn ignores_blobs_and_speckles() {
        let mut img = RgbImage::from_pixel(640, 360, BACKGROUND);
        // Square blob: wrong aspect ratio.
        fill(&mut img, PixelRect::new(300, 240, 40, 40), YELLOW);
        // Single pixels: removed by opening.
        for x in (170..470).step_by(7) {
            img.put_pixel(x, 330, YELLOW);
        }
        let config = DetectionConfig::default();
        let detector = CandidateDetector::new(DEFAULT_COLOR_RANGE, None, &config);
        assert!(detector.detect(&img, roi()).is_empty());
    }

    #[test]
    fn rejects_box_spanning_the_search_region() {
        let mut img = RgbImage::from_pixel(640, 360, BACKGROUND);
        // As wide as the ROI itself: that is the region edge, not the bar.
        fill(&mut img, PixelRect::new(160, 300, 320, 6), YELLOW);
        let config = DetectionConfig {
            max_width_frac: 1.0,
            max_center_offset_frac: 0.5,
            ..DetectionConfig::default()
        };
        let detector = CandidateDetector::new(DEFAULT_COLOR_RANGE, None, &config);
        assert!(detector.detect(&img, roi()).is_empty());
    }

    #[test]
    fn rejects_off_center_bars() {
        let mut img = RgbImage::from_pixel(640, 360, BACKGROUND);
        fill(&mut img, PixelRect::new(162, 305, 30, 5), YELLOW);
        let config = DetectionConfig::default();
        let detector = CandidateDetector::new(DEFAULT_COLOR_RANGE, None, &config);
        assert!(detector.detect(&img, roi()).is_empty());
    }

    #[test]
    fn candidates_stay_inside_frame_when_roi_overhangs() {
        let mut img = RgbImage::from_pixel(640, 360, BACKGROUND);
        fill(&mut img, PixelRect::new(280, 352, 80, 8), YELLOW);
        let config = DetectionConfig::default();
        let detector = CandidateDetector::new(DEFAULT_COLOR_RANGE, None, &config);
        let candidates = detector.detect(&img, PixelRect::new(160, 216, 320, 400));
        assert!(!candidates.is_empty());
        for c in candidates {
            assert!(c.rect.fits_within(640, 360), "{} escapes the frame", c.rect);
        }
    }

    #[test]
    fn secondary_range_catches_dim_pixels() {
        let mut img = RgbImage::from_pixel(640, 360, BACKGROUND);
        let bar = PixelRect::new(270, 305, 100, 5);
        // V ~ 85: below the primary range's V floor of 100, inside the widened one.
        fill(&mut img, bar, Rgb([85, 72, 10]));
        let config = DetectionConfig::default();

        let primary_only = CandidateDetector::new(DEFAULT_COLOR_RANGE, None, &config);
        assert!(primary_only.detect(&img, roi()).is_empty());

        let wide = DEFAULT_COLOR_RANGE.widened(5, 30, 30);
        let with_secondary = CandidateDetector::new(DEFAULT_COLOR_RANGE, Some(wide), &config);
        let candidates = with_secondary.detect(&img, roi());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].rect, bar);
        assert_eq!(candidates[0].fill_ratio, 0.0);
    }

    #[test]
    fn shoelace_area_of_rectangle_outline() {
        let pts = [
            Point::new(0, 0),
            Point::new(9, 0),
            Point::new(9, 4),
            Point::new(0, 4),
        ];
        assert_eq!(polygon_area(&pts), 36.0);
        assert_eq!(bounding_box(&pts), Some(PixelRect::new(0, 0, 10, 5)));
    }
}
