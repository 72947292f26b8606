use image::RgbImage;
use tracing::{debug, info, warn};

use crate::color::{rgb_to_hsv, Hsv, HsvRange};
use crate::config::{RegionConfig, SamplerConfig};
use crate::rect::PixelRect;
use crate::video::FrameSource;

/// Frame indices spread evenly over `[skip, total)`.
///
/// Falls back to the whole video when `skip` leaves nothing to sample.
pub fn sample_frame_indices(total: u32, skip: u32, count: u32) -> Vec<u32> {
    if total == 0 || count == 0 {
        return Vec::new();
    }
    let start = if skip < total { skip } else { 0 };
    let span = (total - start) as u64;
    let n = (count as u64).min(span);
    (0..n).map(|i| start + (i * span / n) as u32).collect()
}

/// Gather HSV samples of target-colored pixels from a sparse set of frames.
///
/// The result may be empty; it is meant only for [`super::calibrate::calibrate_range`].
pub fn sample_colors(
    source: &mut dyn FrameSource,
    skip: u32,
    regions: &RegionConfig,
    config: &SamplerConfig,
) -> Vec<Hsv> {
    let info = source.info();
    let indices = sample_frame_indices(info.frame_count, skip, config.sample_frames);
    if info.width == 0 || info.height == 0 {
        return Vec::new();
    }
    let roi = regions.search_roi.to_pixel_rect(info.width, info.height);

    info!(frames = indices.len(), %roi, "sampling target color");

    let mut samples = Vec::new();
    for index in indices {
        let frame = match source.read_frame(index) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                warn!(index, "sample frame past end of stream");
                continue;
            }
            Err(e) => {
                warn!(index, error = %e, "failed to read sample frame, skipping");
                continue;
            }
        };
        let Some(roi) = roi.clamp_to(frame.image.width(), frame.image.height()) else {
            warn!(index, "sample frame smaller than search region, skipping");
            continue;
        };
        let frame_samples = collect_frame_samples(&frame.image, roi, &config.seed_range, config);
        debug!(index, count = frame_samples.len(), "sampled frame");
        samples.extend(frame_samples);
    }

    info!(count = samples.len(), "color sampling complete");
    samples
}

/// Seed-range pixels of `roi`, or nothing when too few match to trust.
fn collect_frame_samples(
    image: &RgbImage,
    roi: PixelRect,
    seed: &HsvRange,
    config: &SamplerConfig,
) -> Vec<Hsv> {
    let mut matched = Vec::new();
    for y in roi.y..roi.bottom() {
        for x in roi.x..roi.right() {
            let hsv = rgb_to_hsv(*image.get_pixel(x, y));
            if seed.contains(hsv) {
                matched.push(hsv);
            }
        }
    }

    if matched.len() < config.min_mask_pixels {
        return Vec::new();
    }

    let cap = config.max_samples_per_frame.max(1);
    if matched.len() > cap {
        let stride = matched.len().div_ceil(cap);
        matched = matched.into_iter().step_by(stride).collect();
    }
    matched
}
