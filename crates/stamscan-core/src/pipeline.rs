use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use stamscan_proto::proto::{AnalysisReport, VideoFileSource};
use tracing::info;

use crate::analysis::calibrate::Calibration;
use crate::analyzer::{default_training_frames, RectSelection, StaminaAnalyzer};
use crate::config::AnalyzerConfig;
use crate::event::{format_timestamp, StaminaEvent};
use crate::schedule::ScanProgress;
use crate::video::VideoInfo;

/// Parameters for one end-to-end analysis run.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub analyzer: AnalyzerConfig,
    /// Frames used to locate the bar, or None for [`default_training_frames`].
    pub training_frames: Option<u32>,
    /// Frames skipped at the start before training (intros, loading screens).
    pub skip_frames: u32,
    /// Directory to write debug overlays, or None to skip.
    pub debug_frames_dir: Option<PathBuf>,
    /// TTF/OTF font used to label debug overlays.
    pub debug_font: Option<PathBuf>,
}

/// Locate the bar, scan the video and collect everything into a report.
pub async fn run_pipeline<F, Fut>(input: &Path, config: &PipelineConfig, progress: F) -> Result<AnalysisReport>
where
    F: FnMut(ScanProgress) -> Fut,
    Fut: Future<Output = ()>,
{
    if !input.exists() {
        bail!("input video does not exist: {}", input.display());
    }

    let mut analyzer = StaminaAnalyzer::open(input, config.analyzer.clone())?;
    if let Some(dir) = &config.debug_frames_dir {
        analyzer = analyzer.with_debug_frames(dir, config.debug_font.as_deref())?;
    }

    let info = analyzer.info();
    let training = config
        .training_frames
        .unwrap_or_else(|| default_training_frames(info.frame_count));
    info!(
        ?input,
        training,
        skip = config.skip_frames,
        frame_count = info.frame_count,
        "pipeline starting"
    );

    let selection = analyzer
        .find_stable_rectangle(training, config.skip_frames)
        .await
        .context("failed to locate the stamina bar")?;
    let events = analyzer
        .analyze_events(selection.rect, progress)
        .await
        .context("failed to scan the video")?;

    let calibration = analyzer
        .calibration()
        .context("color range missing after training")?;
    let report = build_report(input, info, &selection, &calibration, &events);
    info!(
        events = report.events.len(),
        empty_events = report.empty_timestamps.len(),
        "pipeline complete"
    );
    Ok(report)
}

fn build_report(
    input: &Path,
    info: VideoInfo,
    selection: &RectSelection,
    calibration: &Calibration,
    events: &[StaminaEvent],
) -> AnalysisReport {
    AnalysisReport {
        source: Some(VideoFileSource {
            file_path: input.to_string_lossy().into_owned(),
            width: info.width,
            height: info.height,
            fps: info.fps,
            frame_count: info.frame_count,
        }),
        rect: Some(selection.rect.into()),
        rect_is_fallback: selection.is_fallback,
        color_range: Some(calibration.range.into()),
        color_range_is_fallback: calibration.fallback,
        events: events.iter().copied().map(Into::into).collect(),
        empty_timestamps: events
            .iter()
            .filter(|e| e.is_empty_event())
            .map(|e| format_timestamp(e.frame_index, info.fps))
            .collect(),
    }
}
