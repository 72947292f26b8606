//! Public entry point: locate the stamina bar, then scan the whole video for transitions.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, info, warn};

use crate::analysis::calibrate::{calibrate_range, Calibration};
use crate::analysis::detect::CandidateDetector;
use crate::analysis::sampler::sample_colors;
use crate::analysis::scoring::{candidate_quality, RectangleScores, ScoredRect};
use crate::color::HsvRange;
use crate::config::AnalyzerConfig;
use crate::debug::{DebugRenderer, Diagnostics, NoDiagnostics};
use crate::error::{AnalysisError, AnalysisResult};
use crate::event::{format_timestamp, StaminaEvent};
use crate::rect::PixelRect;
use crate::schedule::{
    partition, run_chunks, worker_count, CancelHandle, ChunkRunner, ProcessRunner, ScanProgress,
    ThreadRunner,
};
use crate::video::decoder::VideoDecoder;
use crate::video::frame::Frame;
use crate::video::{BoxedSource, FrameSource, SourceOpener, VideoInfo};
use crate::worker::Chunk;

/// Training frames for a video of `total` frames: 10% of it, clamped to `[100, 1500]`.
pub fn default_training_frames(total: u32) -> u32 {
    (total / 10).clamp(100, 1500)
}

/// Outcome of [`StaminaAnalyzer::find_stable_rectangle`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectSelection {
    pub rect: PixelRect,
    /// No candidate won; `rect` is the configured default position.
    pub is_fallback: bool,
    pub score: Option<ScoredRect>,
    pub frames_examined: u32,
}

enum RunnerKind {
    /// Re-spawn this executable as `worker` per chunk.
    Process,
    /// Run chunks on the blocking pool against the analyzer's own source.
    Thread,
    Custom(Arc<dyn ChunkRunner>),
}

/// Per-video analysis state. One instance per run; nothing is shared between runs.
pub struct StaminaAnalyzer {
    path: PathBuf,
    info: VideoInfo,
    config: AnalyzerConfig,
    opener: Arc<dyn SourceOpener>,
    runner: RunnerKind,
    diagnostics: Arc<dyn Diagnostics>,
    debug_dir: Option<PathBuf>,
    debug_font: Option<PathBuf>,
    calibration: Option<Calibration>,
    selection: Option<RectSelection>,
    cancel: CancelHandle,
}

impl StaminaAnalyzer {
    /// Open a video file. Chunks run in worker processes of the current executable.
    pub fn open(path: &Path, config: AnalyzerConfig) -> AnalysisResult<Self> {
        let decoder = VideoDecoder::open(path).map_err(|source| AnalysisError::VideoUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let info = decoder.info();
        drop(decoder);

        let owned = path.to_path_buf();
        let opener = move || -> anyhow::Result<BoxedSource> { Ok(Box::new(VideoDecoder::open(&owned)?)) };

        info!(
            ?path,
            width = info.width,
            height = info.height,
            fps = info.fps,
            frame_count = info.frame_count,
            duration_seconds = info.duration_seconds(),
            "video opened"
        );
        Ok(Self::build(path.to_path_buf(), info, config, Arc::new(opener), RunnerKind::Process))
    }

    /// Analyze frames from any source. Chunks run in-process, one source per chunk.
    pub fn with_source(
        name: impl Into<PathBuf>,
        opener: Arc<dyn SourceOpener>,
        config: AnalyzerConfig,
    ) -> AnalysisResult<Self> {
        let name = name.into();
        let info = opener
            .open()
            .map_err(|source| AnalysisError::VideoUnreadable {
                path: name.clone(),
                source,
            })?
            .info();
        Ok(Self::build(name, info, config, opener, RunnerKind::Thread))
    }

    fn build(
        path: PathBuf,
        info: VideoInfo,
        config: AnalyzerConfig,
        opener: Arc<dyn SourceOpener>,
        runner: RunnerKind,
    ) -> Self {
        Self {
            path,
            info,
            config,
            opener,
            runner,
            diagnostics: Arc::new(NoDiagnostics),
            debug_dir: None,
            debug_font: None,
            calibration: None,
            selection: None,
            cancel: CancelHandle::new(),
        }
    }

    /// Replace the chunk runner, e.g. to control scheduling in tests.
    pub fn with_runner(mut self, runner: Arc<dyn ChunkRunner>) -> Self {
        self.runner = RunnerKind::Custom(runner);
        self
    }

    /// Write debug overlays into `dir`, labelled with `font` when one is given.
    pub fn with_debug_frames(mut self, dir: &Path, font: Option<&Path>) -> AnalysisResult<Self> {
        let renderer = DebugRenderer::new(dir, font).map_err(AnalysisError::Source)?;
        self.diagnostics = Arc::new(renderer);
        self.debug_dir = Some(dir.to_path_buf());
        self.debug_font = font.map(Path::to_path_buf);
        Ok(self)
    }

    pub fn info(&self) -> VideoInfo {
        self.info
    }

    pub fn video_path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// The calibrated color range, once [`Self::find_stable_rectangle`] has run.
    pub fn color_range(&self) -> Option<HsvRange> {
        self.calibration.map(|c| c.range)
    }

    pub fn calibration(&self) -> Option<Calibration> {
        self.calibration
    }

    pub fn selection(&self) -> Option<RectSelection> {
        self.selection
    }

    /// A handle that aborts a running [`Self::analyze_video`] from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Calibrate the bar color and vote for the most stable bar rectangle.
    ///
    /// Always yields a rectangle: the configured default position when nothing qualifies.
    pub async fn find_stable_rectangle(
        &mut self,
        training_frame_count: u32,
        skip_first_frames: u32,
    ) -> AnalysisResult<RectSelection> {
        let opener = Arc::clone(&self.opener);
        let diagnostics = Arc::clone(&self.diagnostics);
        let config = self.config.clone();
        let info = self.info;

        let (calibration, selection) = tokio::task::spawn_blocking(move || {
            train(
                opener.as_ref(),
                diagnostics.as_ref(),
                &config,
                info,
                training_frame_count,
                skip_first_frames,
            )
        })
        .await
        .map_err(|e| AnalysisError::Worker(format!("training task failed: {e}")))??;

        self.calibration = Some(calibration);
        self.selection = Some(selection);
        Ok(selection)
    }

    /// `MM:SS` of every empty event, in frame order.
    pub async fn analyze_video<F, Fut>(&self, rect: PixelRect, progress: F) -> AnalysisResult<Vec<String>>
    where
        F: FnMut(ScanProgress) -> Fut,
        Fut: Future<Output = ()>,
    {
        let events = self.analyze_events(rect, progress).await?;
        Ok(events
            .iter()
            .filter(|e| e.is_empty_event())
            .map(|e| format_timestamp(e.frame_index, self.info.fps))
            .collect())
    }

    /// Every transition, empty and full, in frame order.
    pub async fn analyze_events<F, Fut>(&self, rect: PixelRect, progress: F) -> AnalysisResult<Vec<StaminaEvent>>
    where
        F: FnMut(ScanProgress) -> Fut,
        Fut: Future<Output = ()>,
    {
        let total = self.info.frame_count;
        if total == 0 {
            info!("video has no frames, nothing to analyze");
            return Ok(Vec::new());
        }

        let range = match self.calibration {
            Some(c) => c.range,
            None => {
                warn!("color range not calibrated, using the default range");
                self.config.calibration.fallback_range
            }
        };
        let rect = match rect.clamp_to(self.info.width, self.info.height) {
            Some(r) => r,
            None => {
                let fallback = self.fallback_rect()?;
                warn!(%rect, %fallback, "rectangle outside the frame, using the default position");
                fallback
            }
        };

        let workers = worker_count(&self.config.schedule);
        let chunks: Vec<Chunk> = partition(total, workers, self.config.schedule.min_chunk_frames)
            .into_iter()
            .enumerate()
            .map(|(index, frames)| Chunk {
                index,
                video_path: self.path.clone(),
                start_frame: frames.start,
                end_frame: frames.end,
                rect,
                range,
                debug_dir: self.debug_dir.clone(),
                debug_font: self.debug_font.clone(),
                config: self.config.clone(),
            })
            .collect();
        info!(workers, chunks = chunks.len(), %rect, %range, "scanning video");

        let runner: Arc<dyn ChunkRunner> = match &self.runner {
            RunnerKind::Process => Arc::new(ProcessRunner::current_exe().map_err(AnalysisError::Source)?),
            RunnerKind::Thread => Arc::new(ThreadRunner::new(
                Arc::clone(&self.opener),
                Arc::clone(&self.diagnostics),
            )),
            RunnerKind::Custom(r) => Arc::clone(r),
        };

        let merged = run_chunks(chunks, runner.as_ref(), &self.config.schedule, Some(&self.cancel), progress).await?;
        Ok(alternating(merged))
    }

    fn fallback_rect(&self) -> AnalysisResult<PixelRect> {
        fallback_rect(&self.config, self.info)
    }
}

fn fallback_rect(config: &AnalyzerConfig, info: VideoInfo) -> AnalysisResult<PixelRect> {
    if info.width == 0 || info.height == 0 {
        return Err(AnalysisError::Source(anyhow!(
            "video reports an empty frame size ({}x{})",
            info.width,
            info.height
        )));
    }
    Ok(config.regions.fallback_bar.to_pixel_rect(info.width, info.height))
}

/// Drop transitions that repeat the current state. A chunk that starts on a
/// drained bar reports the refill even when no earlier drop was seen.
fn alternating(events: Vec<StaminaEvent>) -> Vec<StaminaEvent> {
    let mut empty = false;
    events
        .into_iter()
        .filter(|e| {
            if e.is_empty_event() == empty {
                debug!(frame = e.frame_index, transition = %e.transition, "dropping repeated transition");
                return false;
            }
            empty = e.is_empty_event();
            true
        })
        .collect()
}

/// Blocking half of [`StaminaAnalyzer::find_stable_rectangle`].
fn train(
    opener: &dyn SourceOpener,
    diagnostics: &dyn Diagnostics,
    config: &AnalyzerConfig,
    info: VideoInfo,
    training_frames: u32,
    skip: u32,
) -> AnalysisResult<(Calibration, RectSelection)> {
    let fallback = fallback_rect(config, info)?;
    let mut source = opener.open().map_err(AnalysisError::Source)?;

    let samples = sample_colors(source.as_mut(), skip, &config.regions, &config.sampler);
    let calibration = calibrate_range(&samples, &config.calibration);

    let detector = CandidateDetector::new(
        calibration.range,
        config.secondary_range(&calibration.range),
        &config.detection,
    );
    let roi = config.regions.search_roi.to_pixel_rect(info.width, info.height);
    let start = if skip < info.frame_count { skip } else { 0 };
    info!(start, training_frames, %roi, "training rectangle detector");

    let mut scores = RectangleScores::new();
    let mut examined = 0;
    let mut last_frame: Option<Frame> = None;
    let mut next = start;

    if let Err(e) = source.seek(start) {
        warn!(error = %format!("{e:#}"), "cannot seek to training start");
    } else {
        while examined < training_frames {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!(frame = next, error = %format!("{e:#}"), "skipping undecodable training frame");
                    next += 1;
                    if source.seek(next).is_err() {
                        break;
                    }
                    continue;
                }
            };
            next = frame.frame_number + 1;
            examined += 1;

            let candidates = detector.detect(&frame.image, roi);
            for c in &candidates {
                let quality = candidate_quality(c, info.width, info.height, &config.regions, &config.scoring);
                scores.record(c.rect, quality, config.scoring.vote_scale);
            }
            if !candidates.is_empty() {
                debug!(frame = frame.frame_number, count = candidates.len(), "training candidates");
                diagnostics.candidates(&frame, roi, &candidates);
            }
            last_frame = Some(frame);
        }
    }

    let selection = match scores.select(info.width, info.height, &config.scoring) {
        Some(best) => RectSelection {
            rect: best.rect,
            is_fallback: false,
            score: Some(best),
            frames_examined: examined,
        },
        None => {
            warn!(
                frames = examined,
                geometries = scores.len(),
                rect = %fallback,
                "no stable rectangle found, using the default position"
            );
            RectSelection {
                rect: fallback,
                is_fallback: true,
                score: None,
                frames_examined: examined,
            }
        }
    };
    if let Some(frame) = &last_frame {
        diagnostics.selected(frame, selection.rect, selection.is_fallback);
    }
    Ok((calibration, selection))
}
