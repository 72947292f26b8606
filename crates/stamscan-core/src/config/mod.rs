//! Tuning for every analysis stage.
//!
//! The numbers are empirically tuned to one game's HUD; everything is
//! overridable from a TOML file where only the changed keys need to appear.

pub mod regions;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::color::HsvRange;
use crate::rect::NormalizedRect;

/// Default target color: saturated yellow.
pub const DEFAULT_COLOR_RANGE: HsvRange = HsvRange::new([20, 100, 100], [35, 255, 255]);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to parse forwarded config: {0}")]
    Inline(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub regions: RegionConfig,
    pub sampler: SamplerConfig,
    pub calibration: CalibrationConfig,
    pub detection: DetectionConfig,
    pub scoring: ScoringConfig,
    pub tracker: TrackerConfig,
    pub schedule: ScheduleConfig,
}

impl AnalyzerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(?path, "loaded analyzer config");
        Ok(config)
    }

    /// Parse config text forwarded to a worker process.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    /// The secondary range unioned with `primary`, if enabled.
    pub fn secondary_range(&self, primary: &HsvRange) -> Option<HsvRange> {
        let d = &self.detection;
        d.use_secondary_range
            .then(|| primary.widened(d.secondary_hue_margin, d.secondary_sat_margin, d.secondary_val_margin))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Expected bar centre as a fraction of frame height.
    pub expected_center_y: f64,
    pub expected_y_tolerance: f64,
    pub search_roi: NormalizedRect,
    pub fallback_bar: NormalizedRect,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            expected_center_y: regions::EXPECTED_BAR_CENTER_Y,
            expected_y_tolerance: regions::EXPECTED_BAR_Y_TOLERANCE,
            search_roi: regions::SEARCH_ROI,
            fallback_bar: regions::FALLBACK_BAR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Frames sampled evenly across the video.
    pub sample_frames: u32,
    /// A frame contributes only if its seed mask has at least this many pixels.
    pub min_mask_pixels: usize,
    pub max_samples_per_frame: usize,
    /// Seed range used to find candidate pixels before calibration.
    pub seed_range: HsvRange,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            sample_frames: 20,
            min_mask_pixels: 50,
            max_samples_per_frame: 2000,
            seed_range: DEFAULT_COLOR_RANGE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub min_samples: usize,
    pub outlier_sigma: f64,
    /// Above this discarded fraction the unfiltered samples are used instead.
    pub max_discard_fraction: f64,
    pub consistent_hue_std: f64,
    pub consistent_sat_std: f64,
    pub tight_sigma: f64,
    pub loose_hue_sigma: f64,
    pub loose_sv_sigma: f64,
    pub min_hue_span: u8,
    pub max_lower_sat: u8,
    pub max_lower_val: u8,
    pub fallback_range: HsvRange,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_samples: 50,
            outlier_sigma: 2.5,
            max_discard_fraction: 0.4,
            consistent_hue_std: 6.0,
            consistent_sat_std: 40.0,
            tight_sigma: 1.8,
            loose_hue_sigma: 2.5,
            loose_sv_sigma: 3.0,
            min_hue_span: 10,
            max_lower_sat: 80,
            max_lower_val: 80,
            fallback_range: DEFAULT_COLOR_RANGE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub use_secondary_range: bool,
    pub secondary_hue_margin: u8,
    pub secondary_sat_margin: u8,
    pub secondary_val_margin: u8,
    /// Radius of the square structuring element (1 = 3x3).
    pub morph_radius: u8,
    pub min_contour_area: f64,
    pub min_width_frac: f64,
    pub max_width_frac: f64,
    /// The opening erases anything up to `2 * morph_radius` pixels tall, so
    /// bars thinner than this need `morph_radius = 0`.
    pub min_height_px: u32,
    pub max_height_frac: f64,
    pub min_aspect_ratio: f64,
    /// Max distance of the box centre from the frame centre, as a fraction of frame width.
    pub max_center_offset_frac: f64,
    /// Boxes covering this much of the ROI in either dimension are the ROI edge, not the bar.
    pub max_roi_coverage: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            use_secondary_range: true,
            secondary_hue_margin: 5,
            secondary_sat_margin: 30,
            secondary_val_margin: 30,
            morph_radius: 1,
            min_contour_area: 10.0,
            min_width_frac: 0.03,
            max_width_frac: 0.40,
            min_height_px: 3,
            max_height_frac: 0.03,
            min_aspect_ratio: 3.0,
            max_center_offset_frac: 0.20,
            max_roi_coverage: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Horizontal offset from frame centre, as a fraction of frame width, at which
    /// the centring fit reaches zero.
    pub center_falloff_frac: f64,
    pub aspect_band: (f64, f64),
    pub height_band_frac: (f64, f64),
    pub width_band_frac: (f64, f64),
    pub purity_cutoff: f64,
    /// Votes per unit of quality.
    pub vote_scale: f64,
    pub oversize_penalty: f64,
    /// Plausible maxima; geometries above them get `oversize_penalty`.
    pub max_height_frac: f64,
    pub max_width_frac: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            center_falloff_frac: 0.25,
            aspect_band: (8.0, 40.0),
            height_band_frac: (0.004, 0.02),
            width_band_frac: (0.05, 0.30),
            purity_cutoff: 0.8,
            vote_scale: 10.0,
            oversize_penalty: 0.1,
            max_height_frac: 0.025,
            max_width_frac: 0.35,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub pattern_window: usize,
    pub smoothing_window: usize,
    pub vote_window: usize,
    pub calibration_frames: u32,
    pub default_high: f64,
    pub default_low: f64,
    /// Calibrated high threshold as a fraction of the peak ratio.
    pub high_fraction: f64,
    pub max_high: f64,
    /// Calibrated low threshold as a fraction of the high threshold.
    pub low_fraction: f64,
    pub pattern_ratio_factor: f64,
    pub trend_ratio_factor: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            pattern_window: 6,
            smoothing_window: 10,
            vote_window: 5,
            calibration_frames: 30,
            default_high: 0.08,
            default_low: 0.02,
            high_fraction: 0.5,
            max_high: 0.5,
            low_fraction: 0.25,
            pattern_ratio_factor: 0.3,
            trend_ratio_factor: 0.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub max_workers: usize,
    pub min_chunk_frames: u32,
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    #[serde(with = "millis")]
    pub progress_interval: Duration,
    /// Worker progress message cadence, in frames.
    pub progress_every: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            min_chunk_frames: 500,
            poll_interval: Duration::from_millis(50),
            progress_interval: Duration::from_millis(500),
            progress_every: 100,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
