//! Accumulates per-frame candidates into a single stable bar geometry.

use std::collections::BTreeMap;

use tracing::{debug, info};

use super::Candidate;
use crate::config::{RegionConfig, ScoringConfig};
use crate::rect::PixelRect;

/// 1.0 inside `[lo, hi]`, proportional falloff outside.
fn band_fit(value: f64, (lo, hi): (f64, f64)) -> f64 {
    if value <= 0.0 {
        0.0
    } else if value < lo {
        value / lo
    } else if value > hi {
        hi / value
    } else {
        1.0
    }
}

fn purity_fit(purity: f64, cutoff: f64) -> f64 {
    let purity = purity.clamp(0.0, 1.0);
    let at_cutoff = cutoff * 0.5;
    if purity < cutoff || cutoff >= 1.0 {
        purity * 0.5
    } else {
        at_cutoff + (purity - cutoff) / (1.0 - cutoff) * (1.0 - at_cutoff)
    }
}

/// How bar-like a candidate is, in `0.0..=1.0`.
pub fn candidate_quality(
    candidate: &Candidate,
    frame_w: u32,
    frame_h: u32,
    regions: &RegionConfig,
    config: &ScoringConfig,
) -> f64 {
    if frame_w == 0 || frame_h == 0 {
        return 0.0;
    }
    let fw = frame_w as f64;
    let fh = frame_h as f64;
    let rect = candidate.rect;
    let (cx, cy) = rect.center();

    let tol = regions.expected_y_tolerance.max(f64::EPSILON);
    let dy = (cy / fh - regions.expected_center_y).abs();
    let y_fit = if dy <= tol {
        1.0
    } else {
        let excess = (dy - tol) / tol;
        1.0 / (1.0 + excess * excess)
    };

    let falloff = config.center_falloff_frac * fw;
    let x_fit = if falloff > 0.0 {
        (1.0 - (cx - fw / 2.0).abs() / falloff).max(0.0)
    } else {
        0.0
    };

    let ar_fit = band_fit(candidate.aspect_ratio, config.aspect_band);
    let h_fit = band_fit(rect.h as f64 / fh, config.height_band_frac);
    let w_fit = band_fit(rect.w as f64 / fw, config.width_band_frac);
    let purity = purity_fit(candidate.fill_ratio, config.purity_cutoff);

    let shape = 0.2 * x_fit + 0.2 * ar_fit + 0.15 * h_fit + 0.15 * w_fit + 0.3 * purity;
    (y_fit * shape).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RectScore {
    pub votes: u64,
    pub quality_sum: f64,
    pub hits: u32,
}

impl RectScore {
    pub fn mean_quality(&self) -> f64 {
        if self.hits == 0 {
            0.0
        } else {
            self.quality_sum / self.hits as f64
        }
    }
}

/// The winning geometry and how it scored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredRect {
    pub rect: PixelRect,
    pub score: f64,
    pub votes: u64,
    pub mean_quality: f64,
}

/// Vote table keyed by exact geometry. Ordered so ties resolve the same way every run.
#[derive(Debug, Default)]
pub struct RectangleScores {
    entries: BTreeMap<PixelRect, RectScore>,
}

impl RectangleScores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, rect: PixelRect, quality: f64, vote_scale: f64) {
        let entry = self.entries.entry(rect).or_default();
        entry.votes += (quality * vote_scale).round().max(0.0) as u64;
        entry.quality_sum += quality;
        entry.hits += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, rect: &PixelRect) -> Option<&RectScore> {
        self.entries.get(rect)
    }

    /// Highest `votes * sqrt(mean quality) * penalty`, or `None` if nothing scored above zero.
    pub fn select(&self, frame_w: u32, frame_h: u32, config: &ScoringConfig) -> Option<ScoredRect> {
        let max_h = config.max_height_frac * frame_h as f64;
        let max_w = config.max_width_frac * frame_w as f64;

        let mut best: Option<ScoredRect> = None;
        for (rect, score) in &self.entries {
            let mean_quality = score.mean_quality();
            let oversized = rect.h as f64 > max_h || rect.w as f64 > max_w;
            let penalty = if oversized { config.oversize_penalty } else { 1.0 };
            let total = score.votes as f64 * mean_quality.sqrt() * penalty;
            debug!(%rect, votes = score.votes, hits = score.hits, mean_quality, oversized, total, "rectangle score");

            if total > 0.0 && best.map_or(true, |b| total > b.score) {
                best = Some(ScoredRect {
                    rect: *rect,
                    score: total,
                    votes: score.votes,
                    mean_quality,
                });
            }
        }

        if let Some(b) = &best {
            info!(rect = %b.rect, score = b.score, votes = b.votes, candidates = self.entries.len(), "selected stable rectangle");
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u32 = 640;
    const H: u32 = 360;

    fn candidate(rect: PixelRect, fill_ratio: f64) -> Candidate {
        Candidate {
            rect,
            area: rect.area() as f64,
            aspect_ratio: rect.aspect_ratio(),
            fill_ratio,
        }
    }

    fn quality(c: &Candidate) -> f64 {
        candidate_quality(c, W, H, &RegionConfig::default(), &ScoringConfig::default())
    }

    #[test]
    fn band_fit_penalizes_both_sides() {
        assert_eq!(band_fit(10.0, (8.0, 40.0)), 1.0);
        assert_eq!(band_fit(4.0, (8.0, 40.0)), 0.5);
        assert_eq!(band_fit(80.0, (8.0, 40.0)), 0.5);
        assert_eq!(band_fit(0.0, (8.0, 40.0)), 0.0);
    }

    #[test]
    fn purity_is_steeper_above_cutoff() {
        let below = purity_fit(0.7, 0.8) - purity_fit(0.6, 0.8);
        let above = purity_fit(0.95, 0.8) - purity_fit(0.85, 0.8);
        assert!(above > below);
        assert!((purity_fit(1.0, 0.8) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn well_placed_bar_scores_high() {
        let bar = candidate(PixelRect::new(270, 305, 100, 5), 1.0);
        let q = quality(&bar);
        assert!(q > 0.95, "quality {q}");
        assert!(q <= 1.0);
    }

    #[test]
    fn misplaced_or_impure_bars_score_lower() {
        let good = quality(&candidate(PixelRect::new(270, 305, 100, 5), 1.0));
        let high_up = quality(&candidate(PixelRect::new(270, 230, 100, 5), 1.0));
        let impure = quality(&candidate(PixelRect::new(270, 305, 100, 5), 0.3));
        let off_center = quality(&candidate(PixelRect::new(420, 305, 100, 5), 1.0));
        assert!(high_up < good * 0.5, "{high_up} vs {good}");
        assert!(impure < good);
        assert!(off_center < good);
    }

    #[test]
    fn most_consistent_geometry_wins() {
        let config = ScoringConfig::default();
        let bar = PixelRect::new(270, 305, 100, 5);
        let flicker = PixelRect::new(280, 300, 60, 4);
        let mut scores = RectangleScores::new();
        for _ in 0..20 {
            scores.record(bar, 0.9, config.vote_scale);
        }
        for _ in 0..3 {
            scores.record(flicker, 1.0, config.vote_scale);
        }
        let winner = scores.select(W, H, &config).unwrap();
        assert_eq!(winner.rect, bar);
        assert_eq!(winner.votes, 180);
        assert_eq!(scores.get(&bar).unwrap().hits, 20);
    }

    #[test]
    fn oversized_geometry_is_penalized() {
        let config = ScoringConfig::default();
        let bar = PixelRect::new(270, 305, 100, 5);
        // Taller than 2.5% of frame height.
        let slab = PixelRect::new(200, 290, 240, 20);
        let mut scores = RectangleScores::new();
        for _ in 0..10 {
            scores.record(bar, 0.8, config.vote_scale);
            scores.record(slab, 0.9, config.vote_scale);
            scores.record(slab, 0.9, config.vote_scale);
        }
        assert_eq!(scores.select(W, H, &config).unwrap().rect, bar);
    }

    #[test]
    fn empty_or_voteless_table_selects_nothing() {
        let config = ScoringConfig::default();
        let mut scores = RectangleScores::new();
        assert!(scores.select(W, H, &config).is_none());
        scores.record(PixelRect::new(0, 0, 10, 2), 0.01, config.vote_scale);
        assert!(scores.select(W, H, &config).is_none());
        assert_eq!(scores.len(), 1);
    }
}
