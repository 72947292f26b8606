//! Turns raw color samples into a robust HSV range.

use tracing::{info, warn};

use crate::color::{Hsv, HsvRange, CHANNEL_LIMITS, HUE_MAX};
use crate::config::CalibrationConfig;

/// A calibrated range together with how it was derived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub range: HsvRange,
    pub sample_count: usize,
    /// Samples that survived outlier rejection (or all of them after a revert).
    pub kept: usize,
    pub consistent: bool,
    /// True when too few samples forced the default range.
    pub fallback: bool,
}

#[derive(Debug, Clone, Copy)]
struct ChannelStats {
    mean: [f64; 3],
    std: [f64; 3],
}

fn channel_stats(samples: &[&Hsv]) -> ChannelStats {
    let n = samples.len().max(1) as f64;
    let mut mean = [0.0; 3];
    for s in samples {
        for (m, c) in mean.iter_mut().zip(s.channels()) {
            *m += c as f64;
        }
    }
    mean.iter_mut().for_each(|m| *m /= n);

    let mut var = [0.0; 3];
    for s in samples {
        for i in 0..3 {
            let d = s.channels()[i] as f64 - mean[i];
            var[i] += d * d;
        }
    }
    ChannelStats {
        mean,
        std: var.map(|v| (v / n).sqrt()),
    }
}

/// Derive `(lower, upper)` bounds from samples. Pure: same input, same output.
pub fn calibrate_range(samples: &[Hsv], config: &CalibrationConfig) -> Calibration {
    if samples.len() < config.min_samples {
        warn!(
            sample_count = samples.len(),
            min_samples = config.min_samples,
            range = %config.fallback_range,
            "too few color samples, using default range"
        );
        return Calibration {
            range: config.fallback_range,
            sample_count: samples.len(),
            kept: 0,
            consistent: false,
            fallback: true,
        };
    }

    let all: Vec<&Hsv> = samples.iter().collect();
    let raw = channel_stats(&all);

    let filtered: Vec<&Hsv> = samples
        .iter()
        .filter(|s| {
            (0..3).all(|i| {
                (s.channels()[i] as f64 - raw.mean[i]).abs() <= config.outlier_sigma * raw.std[i]
            })
        })
        .collect();

    let discarded = 1.0 - filtered.len() as f64 / samples.len() as f64;
    let kept = if discarded > config.max_discard_fraction || filtered.is_empty() {
        warn!(
            discarded_fraction = discarded,
            "outlier rejection too aggressive, keeping all samples"
        );
        all
    } else {
        filtered
    };

    let stats = channel_stats(&kept);
    let consistent =
        stats.std[0] < config.consistent_hue_std && stats.std[1] < config.consistent_sat_std;
    let sigmas = if consistent {
        [config.tight_sigma; 3]
    } else {
        [config.loose_hue_sigma, config.loose_sv_sigma, config.loose_sv_sigma]
    };

    let mut lower = [0u8; 3];
    let mut upper = [0u8; 3];
    for i in 0..3 {
        let limit = CHANNEL_LIMITS[i] as f64;
        let lo = (stats.mean[i] - sigmas[i] * stats.std[i]).floor().clamp(0.0, limit);
        let hi = (stats.mean[i] + sigmas[i] * stats.std[i]).ceil().clamp(0.0, limit);
        lower[i] = lo as u8;
        upper[i] = hi as u8;
    }

    let (h_lo, h_hi) = enforce_min_span(lower[0], upper[0], config.min_hue_span);
    lower[0] = h_lo;
    upper[0] = h_hi;

    // Dim or washed-out frames of the bar still have to match.
    lower[1] = lower[1].min(config.max_lower_sat);
    lower[2] = lower[2].min(config.max_lower_val);

    for i in 0..3 {
        if lower[i] > upper[i] {
            std::mem::swap(&mut lower[i], &mut upper[i]);
        }
    }

    let range = HsvRange::new(lower, upper);
    info!(
        sample_count = samples.len(),
        kept = kept.len(),
        consistent,
        hue_std = stats.std[0],
        sat_std = stats.std[1],
        %range,
        "color range calibrated"
    );

    Calibration {
        range,
        sample_count: samples.len(),
        kept: kept.len(),
        consistent,
        fallback: false,
    }
}

/// Widen `[lo, hi]` symmetrically to at least `min_span`, staying inside the hue domain.
fn enforce_min_span(lo: u8, hi: u8, min_span: u8) -> (u8, u8) {
    let min_span = min_span.min(HUE_MAX) as i32;
    let (lo, hi) = (lo as i32, hi as i32);
    if hi - lo >= min_span {
        return (lo as u8, hi as u8);
    }
    let center = (lo + hi) as f64 / 2.0;
    let mut new_lo = (center - min_span as f64 / 2.0).floor() as i32;
    let mut new_hi = new_lo + min_span;
    if new_lo < 0 {
        new_lo = 0;
        new_hi = min_span;
    }
    if new_hi > HUE_MAX as i32 {
        new_hi = HUE_MAX as i32;
        new_lo = new_hi - min_span;
    }
    (new_lo as u8, new_hi as u8)
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;

    /// Deterministic spread around a centre, no RNG needed.
    fn cluster(center: [u8; 3], spread: [u8; 3], n: usize) -> Vec<Hsv> {
        (0..n)
            .map(|i| {
                let jitter = |ch: usize| {
                    let s = spread[ch] as usize;
                    let offset = (i % (2 * s + 1)) as i32 - s as i32;
                    (center[ch] as i32 + offset).clamp(0, CHANNEL_LIMITS[ch] as i32) as u8
                };
                Hsv {
                    h: jitter(0),
                    s: jitter(1),
                    v: jitter(2),
                }
            })
            .collect()
    }

    #[test]
    #[traced_test]
    fn too_few_samples_fall_back() {
        let config = CalibrationConfig::default();
        let cal = calibrate_range(&cluster([28, 200, 220], [1, 5, 5], 10), &config);
        assert!(cal.fallback);
        assert_eq!(cal.range, config.fallback_range);
        assert!(logs_contain("too few color samples"));
    }

    #[test]
    fn calibration_is_idempotent() {
        let config = CalibrationConfig::default();
        let samples = cluster([27, 210, 230], [3, 20, 15], 500);
        assert_eq!(
            calibrate_range(&samples, &config),
            calibrate_range(&samples, &config)
        );
    }

    #[test]
    fn consistent_samples_give_tight_valid_range() {
        let config = CalibrationConfig::default();
        let cal = calibrate_range(&cluster([27, 210, 230], [2, 10, 10], 500), &config);
        assert!(!cal.fallback);
        assert!(cal.consistent);
        assert!(cal.range.is_valid());
        assert!(cal.range.lower[0] <= 25 && cal.range.upper[0] >= 29);
        assert!(cal.range.upper[0] - cal.range.lower[0] >= config.min_hue_span);
        assert!(cal.range.lower[1] <= config.max_lower_sat);
        assert!(cal.range.lower[2] <= config.max_lower_val);
    }

    #[test]
    fn noisy_samples_use_wider_multipliers() {
        let config = CalibrationConfig::default();
        let cal = calibrate_range(&cluster([27, 150, 200], [12, 90, 40], 500), &config);
        assert!(!cal.consistent);
        assert!(cal.range.is_valid());
        assert_eq!(cal.range.upper[1], 255);
    }

    #[test]
    fn a_few_outliers_are_rejected() {
        let config = CalibrationConfig::default();
        let mut samples = cluster([28, 220, 230], [2, 8, 8], 400);
        samples.extend(std::iter::repeat(Hsv { h: 120, s: 30, v: 40 }).take(4));
        let cal = calibrate_range(&samples, &config);
        assert_eq!(cal.kept, 400);
        assert!(cal.range.upper[0] < 60, "outliers leaked into {}", cal.range);
    }

    #[test]
    fn ranges_stay_in_domain_at_extremes() {
        let config = CalibrationConfig::default();
        for center in [[0, 0, 0], [179, 255, 255], [2, 250, 5]] {
            let cal = calibrate_range(&cluster(center, [3, 3, 3], 200), &config);
            assert!(cal.range.is_valid(), "invalid range {} for {center:?}", cal.range);
        }
    }

    #[test]
    fn min_span_widens_symmetrically() {
        assert_eq!(enforce_min_span(27, 29, 10), (23, 33));
        assert_eq!(enforce_min_span(0, 2, 10), (0, 10));
        assert_eq!(enforce_min_span(178, 179, 10), (169, 179));
        assert_eq!(enforce_min_span(10, 40, 10), (10, 40));
    }
}
