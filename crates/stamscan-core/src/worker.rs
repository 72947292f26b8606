//! Chunk execution and the worker side of the process protocol.
//!
//! A worker reads one length-delimited [`proto::ChunkRequest`] from stdin and
//! streams length-delimited [`proto::WorkerMessage`]s to stdout: any number of
//! progress updates followed by exactly one `Finished` or `Failed`.

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use prost::Message;
use stamscan_proto::proto::{self, worker_message::Payload};
use tracing::{debug, error, info, warn};

use crate::analysis::tracker::StateTracker;
use crate::color::{ColorMatcher, HsvRange};
use crate::config::AnalyzerConfig;
use crate::debug::{DebugRenderer, Diagnostics, NoDiagnostics};
use crate::event::StaminaEvent;
use crate::rect::PixelRect;
use crate::video::decoder::VideoDecoder;
use crate::video::FrameSource;

/// An immutable unit of work: track the bar over `[start_frame, end_frame)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub index: usize,
    pub video_path: PathBuf,
    pub start_frame: u32,
    pub end_frame: u32,
    pub rect: PixelRect,
    pub range: HsvRange,
    pub debug_dir: Option<PathBuf>,
    pub debug_font: Option<PathBuf>,
    pub config: AnalyzerConfig,
}

impl Chunk {
    pub fn len(&self) -> u32 {
        self.end_frame.saturating_sub(self.start_frame)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_request(&self) -> Result<proto::ChunkRequest> {
        Ok(proto::ChunkRequest {
            video_path: self.video_path.to_string_lossy().into_owned(),
            start_frame: self.start_frame,
            end_frame: self.end_frame,
            rect: Some(self.rect.into()),
            color_range: Some(self.range.into()),
            debug_dir: self
                .debug_dir
                .as_ref()
                .map(|d| d.to_string_lossy().into_owned())
                .unwrap_or_default(),
            config_toml: self.config.to_toml()?,
            debug_font: self
                .debug_font
                .as_ref()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default(),
        })
    }

    pub fn from_request(index: usize, req: proto::ChunkRequest) -> Result<Self> {
        let rect = req.rect.context("chunk request has no rectangle")?;
        let range = req
            .color_range
            .context("chunk request has no color range")?
            .try_into()?;
        let config = if req.config_toml.is_empty() {
            AnalyzerConfig::default()
        } else {
            AnalyzerConfig::from_toml(&req.config_toml)?
        };
        Ok(Self {
            index,
            video_path: PathBuf::from(req.video_path),
            start_frame: req.start_frame,
            end_frame: req.end_frame,
            rect: rect.into(),
            range,
            debug_dir: (!req.debug_dir.is_empty()).then(|| PathBuf::from(req.debug_dir)),
            debug_font: (!req.debug_font.is_empty()).then(|| PathBuf::from(req.debug_font)),
            config,
        })
    }
}

/// Frames replayed before `start` so the tracker enters the chunk warmed up.
pub fn preroll_frames(chunk: &Chunk) -> u32 {
    let t = &chunk.config.tracker;
    let warmup = t.calibration_frames.max((t.smoothing_window + t.vote_window) as u32);
    warmup.min(chunk.start_frame)
}

/// Track the bar over one chunk. `progress` receives the number of frames done so far.
///
/// Chunks after the first replay a short pre-roll before `start_frame`; events
/// inside it belong to the previous chunk and are dropped. Frames that fail to
/// decode are skipped; the run stops early if the stream ends.
pub fn run_chunk(
    chunk: &Chunk,
    source: &mut dyn FrameSource,
    diagnostics: &dyn Diagnostics,
    progress: &mut dyn FnMut(u32) -> Result<()>,
) -> Result<Vec<StaminaEvent>> {
    let secondary = chunk.config.secondary_range(&chunk.range);
    let matcher = ColorMatcher::new(chunk.range, secondary);
    let mut tracker = StateTracker::new(&chunk.config.tracker, chunk.rect.area());
    let mut events = Vec::new();
    let first = chunk.start_frame - preroll_frames(chunk);
    let mut entered = first == chunk.start_frame;

    info!(
        chunk = chunk.index,
        start = chunk.start_frame,
        end = chunk.end_frame,
        preroll = chunk.start_frame - first,
        rect = %chunk.rect,
        range = %chunk.range,
        "chunk starting"
    );

    source
        .seek(first)
        .with_context(|| format!("failed to seek to frame {first}"))?;

    let mut next = first;
    while next < chunk.end_frame {
        if !entered && next >= chunk.start_frame {
            entered = true;
            enter_chunk(chunk, &mut tracker);
        }
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!(chunk = chunk.index, frame = next, "stream ended before chunk end");
                break;
            }
            Err(e) => {
                warn!(chunk = chunk.index, frame = next, error = %format!("{e:#}"), "skipping undecodable frame");
                next += 1;
                if let Err(e) = source.seek(next) {
                    error!(chunk = chunk.index, frame = next, error = %format!("{e:#}"), "cannot resume after bad frame");
                    break;
                }
                if next > chunk.start_frame {
                    progress(next - chunk.start_frame)?;
                }
                continue;
            }
        };
        if frame.frame_number >= chunk.end_frame {
            break;
        }
        next = frame.frame_number + 1;

        match frame.local_rect(chunk.rect) {
            Some(local) => {
                let masked = matcher.count(&frame.image, local);
                match tracker.push(frame.frame_number, masked) {
                    Some(event) if event.frame_index < chunk.start_frame => {
                        debug!(chunk = chunk.index, frame = event.frame_index, "transition in pre-roll, left to the previous chunk");
                    }
                    Some(event) => {
                        diagnostics.transition(&frame, chunk.rect, &event, tracker.last_reading());
                        events.push(event);
                    }
                    None => {}
                }
            }
            None => {
                warn!(frame = frame.frame_number, rect = %chunk.rect, "rectangle outside decoded frame, skipping");
            }
        }
        if next > chunk.start_frame {
            progress(next - chunk.start_frame)?;
        }
    }

    info!(
        chunk = chunk.index,
        frames = next.saturating_sub(chunk.start_frame),
        events = events.len(),
        "chunk finished"
    );
    Ok(events)
}

/// A pre-roll that never saw the bar lit means the previous chunk ended drained.
fn enter_chunk(chunk: &Chunk, tracker: &mut StateTracker) {
    if tracker.is_armed() {
        return;
    }
    let (_, low) = tracker.thresholds();
    if let Some(reading) = tracker.last_reading() {
        if reading.smoothed < low {
            info!(chunk = chunk.index, smoothed = reading.smoothed, "bar drained at chunk start");
            tracker.resume_empty();
        }
    }
}

fn write_message(out: &mut impl Write, payload: Payload) -> Result<()> {
    let bytes = proto::WorkerMessage {
        payload: Some(payload),
    }
    .encode_length_delimited_to_vec();
    out.write_all(&bytes).context("failed to write worker message")?;
    out.flush().context("failed to flush worker output")?;
    Ok(())
}

/// Pop one complete length-delimited message off the front of `buf`, if present.
pub fn take_message(buf: &mut Vec<u8>) -> Result<Option<proto::WorkerMessage>> {
    if buf.is_empty() {
        return Ok(None);
    }
    let len = match prost::decode_length_delimiter(buf.as_slice()) {
        Ok(len) => len,
        // A varint is at most 10 bytes; anything shorter may still be arriving.
        Err(_) if buf.len() < 10 => return Ok(None),
        Err(e) => return Err(e).context("corrupt worker message length"),
    };
    let header = prost::length_delimiter_len(len);
    if buf.len() < header + len {
        return Ok(None);
    }
    let msg = proto::WorkerMessage::decode(&buf[header..header + len])
        .context("failed to decode worker message")?;
    buf.drain(..header + len);
    Ok(Some(msg))
}

/// Worker process entry point.
pub fn serve(mut input: impl Read, mut output: impl Write) -> Result<()> {
    let mut raw = Vec::new();
    input
        .read_to_end(&mut raw)
        .context("failed to read chunk request")?;
    let request = proto::ChunkRequest::decode_length_delimited(raw.as_slice())
        .context("failed to decode chunk request")?;
    let chunk = Chunk::from_request(0, request)?;
    debug!(?chunk.video_path, start = chunk.start_frame, end = chunk.end_frame, "worker received chunk");

    let result = execute(&chunk, &mut output);
    match result {
        Ok((events, frames_done)) => write_message(
            &mut output,
            Payload::Finished(proto::ChunkFinished {
                events: events.into_iter().map(Into::into).collect(),
                frames_done,
            }),
        ),
        Err(e) => {
            error!(error = %format!("{e:#}"), "chunk failed");
            write_message(&mut output, Payload::Failed(format!("{e:#}")))?;
            Err(e)
        }
    }
}

fn execute(chunk: &Chunk, output: &mut impl Write) -> Result<(Vec<StaminaEvent>, u32)> {
    let mut decoder = VideoDecoder::open_cropped(&chunk.video_path, Some(chunk.rect))?;
    let renderer = match &chunk.debug_dir {
        Some(dir) => Some(DebugRenderer::new(dir, chunk.debug_font.as_deref())?),
        None => None,
    };
    let diagnostics: &dyn Diagnostics = match &renderer {
        Some(r) => r,
        None => &NoDiagnostics,
    };

    let every = chunk.config.schedule.progress_every.max(1);
    let mut frames_done = 0;
    let events = run_chunk(chunk, &mut decoder, diagnostics, &mut |done| {
        frames_done = done;
        if done % every == 0 {
            write_message(output, Payload::Progress(proto::ChunkProgress { frames_done: done }))?;
        }
        Ok(())
    })?;
    Ok((events, frames_done))
}
