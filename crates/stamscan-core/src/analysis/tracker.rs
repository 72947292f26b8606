//! Turns a per-frame fill ratio into debounced empty/full transitions.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::config::TrackerConfig;
use crate::event::{StaminaEvent, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Rising,
    Falling,
    Flat,
}

/// Per-frame readings, exposed for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub ratio: f64,
    pub smoothed: f64,
    pub trend: Trend,
    pub provisional_empty: bool,
}

/// Hysteresis state machine for one contiguous run of frames.
pub struct StateTracker {
    config: TrackerConfig,
    area: f64,
    counts: VecDeque<u64>,
    ratios: VecDeque<f64>,
    smoothed_history: VecDeque<f64>,
    votes: VecDeque<bool>,
    frames_seen: u32,
    peak_ratio: f64,
    high: f64,
    low: f64,
    calibrated: bool,
    armed: bool,
    empty: bool,
    last: Option<Reading>,
}

impl StateTracker {
    /// `area` is the pixel area of the tracked rectangle.
    pub fn new(config: &TrackerConfig, area: u64) -> Self {
        Self {
            area: area.max(1) as f64,
            counts: VecDeque::with_capacity(config.pattern_window + 1),
            ratios: VecDeque::with_capacity(config.smoothing_window + 1),
            smoothed_history: VecDeque::with_capacity(5),
            votes: VecDeque::with_capacity(config.vote_window + 1),
            frames_seen: 0,
            peak_ratio: 0.0,
            high: config.default_high,
            low: config.default_low,
            calibrated: false,
            armed: false,
            empty: false,
            last: None,
            config: config.clone(),
        }
    }

    /// `(high, low)` thresholds currently in effect.
    pub fn thresholds(&self) -> (f64, f64) {
        (self.high, self.low)
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// True once the bar has been seen full at least once.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn last_reading(&self) -> Option<Reading> {
        self.last
    }

    /// Continue from a run that ended with the bar drained: arm in the empty state.
    ///
    /// Used when tracking starts mid-video on a dark bar, where the earlier run
    /// already reported the drop and only the refill is left to find.
    pub fn resume_empty(&mut self) {
        debug!(frames_seen = self.frames_seen, "resuming tracking with the bar drained");
        self.armed = true;
        self.empty = true;
        self.votes.clear();
        self.votes.extend(std::iter::repeat(true).take(self.config.vote_window.max(1)));
    }

    /// Feed the masked pixel count of one frame. Returns the transition it caused, if any.
    pub fn push(&mut self, frame_index: u32, masked: u64) -> Option<StaminaEvent> {
        let ratio = (masked as f64 / self.area).min(1.0);
        self.frames_seen += 1;

        if !self.calibrated {
            self.peak_ratio = self.peak_ratio.max(ratio);
            // Frames before the bar first lights up say nothing about its brightness.
            if self.frames_seen >= self.config.calibration_frames && self.peak_ratio >= self.config.default_high {
                self.calibrate_thresholds();
            }
        }

        push_bounded(&mut self.counts, masked, self.config.pattern_window);
        push_bounded(&mut self.ratios, ratio, self.config.smoothing_window);
        let smoothed = self.ratios.iter().sum::<f64>() / self.ratios.len() as f64;
        push_bounded(&mut self.smoothed_history, smoothed, 4);
        let trend = self.trend();

        if !self.armed {
            if smoothed < self.high {
                self.last = Some(Reading {
                    ratio,
                    smoothed,
                    trend,
                    provisional_empty: false,
                });
                return None;
            }
            debug!(frame_index, smoothed, "bar seen full, tracking armed");
            self.armed = true;
            self.empty = false;
            self.votes.clear();
        }

        let provisional_empty = if self.empty {
            smoothed < self.high
        } else {
            // A slide is only trusted once the raw reading has left the band.
            let trend_cut = (self.config.trend_ratio_factor * self.high).min(self.low);
            smoothed < self.low
                || (self.pattern_empty() && smoothed < self.config.pattern_ratio_factor * self.high)
                || (trend == Trend::Falling && ratio < trend_cut)
        };
        self.last = Some(Reading {
            ratio,
            smoothed,
            trend,
            provisional_empty,
        });

        push_bounded(&mut self.votes, provisional_empty, self.config.vote_window);
        let empty_votes = self.votes.iter().filter(|v| **v).count();
        let voted_empty = empty_votes * 2 > self.votes.len();
        if voted_empty == self.empty {
            return None;
        }

        self.empty = voted_empty;
        let transition = if voted_empty {
            Transition::BecameEmpty
        } else {
            Transition::BecameFull
        };
        debug!(frame_index, %transition, ratio, smoothed, high = self.high, low = self.low, "state transition");
        Some(StaminaEvent {
            frame_index,
            transition,
        })
    }

    fn calibrate_thresholds(&mut self) {
        let c = &self.config;
        let ceiling = c.max_high.max(c.default_high);
        self.high = (self.peak_ratio * c.high_fraction).clamp(c.default_high, ceiling);
        self.low = (self.high * c.low_fraction).max(c.default_low);
        self.calibrated = true;
        info!(
            peak_ratio = self.peak_ratio,
            high = self.high,
            low = self.low,
            frames = self.frames_seen,
            "tracker thresholds calibrated"
        );
    }

    /// Consistently low, or a sudden drop from a full bar.
    fn pattern_empty(&self) -> bool {
        let low_count = self.low * self.area;
        let high_count = self.high * self.area;

        let below = self.counts.iter().filter(|&&c| (c as f64) < low_count).count();
        if below * 2 > self.counts.len() {
            return true;
        }

        let n = self.counts.len();
        let Some(&latest) = self.counts.back() else {
            return false;
        };
        if n < 2 || (latest as f64) >= low_count {
            return false;
        }
        let prev_mean = self.counts.iter().take(n - 1).sum::<u64>() as f64 / (n - 1) as f64;
        prev_mean >= high_count
    }

    /// Direction of the last three smoothed deltas, if they all agree.
    fn trend(&self) -> Trend {
        if self.smoothed_history.len() < 4 {
            return Trend::Flat;
        }
        let deltas: Vec<f64> = self
            .smoothed_history
            .iter()
            .zip(self.smoothed_history.iter().skip(1))
            .map(|(a, b)| b - a)
            .collect();
        if deltas.iter().all(|d| *d < 0.0) {
            Trend::Falling
        } else if deltas.iter().all(|d| *d > 0.0) {
            Trend::Rising
        } else {
            Trend::Flat
        }
    }
}

fn push_bounded<T>(buf: &mut VecDeque<T>, value: T, cap: usize) {
    buf.push_back(value);
    while buf.len() > cap.max(1) {
        buf.pop_front();
    }
}
