use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use anyhow::{bail, Context, Result};
use image::RgbImage;
use tracing::{debug, error, info, warn};

use super::frame::Frame;
use super::{FrameSource, VideoInfo};
use crate::rect::PixelRect;

/// Backs off seeks by a fraction of a frame so rounding never skips the target.
const SEEK_BACKOFF_FRAMES: f64 = 0.25;

/// Crop filter for `rect`. `exact` stops ffmpeg from snapping odd sizes and
/// offsets to the chroma grid, which would desync the raw frame stride.
fn crop_filter(rect: PixelRect) -> String {
    format!("crop={}:{}:{}:{}:exact=1", rect.w, rect.h, rect.x, rect.y)
}

/// Probe stream metadata with ffprobe.
pub fn probe(path: &Path) -> Result<VideoInfo> {
    info!(?path, "probing video metadata with ffprobe");

    let output = Command::new("ffprobe")
        .args([
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries", "stream=width,height,r_frame_rate,nb_frames:format=duration",
            "-of", "default=noprint_wrappers=1",
        ])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .context("failed to run ffprobe — is ffmpeg installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(%stderr, ?path, "ffprobe failed");
        bail!("ffprobe failed: {stderr}");
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_probe_output(&stdout)
}

/// Parse ffprobe `key=value` lines.
fn parse_probe_output(stdout: &str) -> Result<VideoInfo> {
    let fields: HashMap<&str, &str> = stdout
        .lines()
        .filter_map(|line| line.trim().split_once('='))
        .collect();

    let field = |key: &str| {
        fields
            .get(key)
            .copied()
            .with_context(|| format!("ffprobe output is missing {key}: {stdout}"))
    };

    let width: u32 = field("width")?.parse().context("failed to parse width")?;
    let height: u32 = field("height")?.parse().context("failed to parse height")?;
    if width == 0 || height == 0 {
        bail!("invalid video dimensions: {width}x{height}");
    }

    let rate = field("r_frame_rate")?;
    let fps = if let Some((num, den)) = rate.split_once('/') {
        let num: f64 = num.parse().context("failed to parse fps numerator")?;
        let den: f64 = den.parse().context("failed to parse fps denominator")?;
        if den > 0.0 { num / den } else { 0.0 }
    } else {
        rate.parse().context("failed to parse fps")?
    };

    if fps <= 0.0 {
        warn!(fps, "video has non-positive fps, timestamps will be 0.0");
    }

    // Containers like MKV report nb_frames=N/A; estimate from duration instead.
    let frame_count = match fields.get("nb_frames").and_then(|n| n.parse::<u32>().ok()) {
        Some(n) => n,
        None => {
            let duration: f64 = fields
                .get("duration")
                .and_then(|d| d.parse().ok())
                .unwrap_or(0.0);
            let estimate = (duration * fps).round().max(0.0) as u32;
            warn!(duration, fps, estimate, "nb_frames unavailable, estimating frame count");
            estimate
        }
    };

    info!(width, height, fps, frame_count, "probe completed");
    Ok(VideoInfo {
        width,
        height,
        fps,
        frame_count,
    })
}

/// Decodes video frames by piping raw RGB24 data from the ffmpeg CLI.
///
/// Seeking restarts ffmpeg at the target timestamp, so sequential reads are
/// cheap and random reads cost one process spawn each.
pub struct VideoDecoder {
    path: PathBuf,
    info: VideoInfo,
    crop: Option<PixelRect>,
    child: Option<Child>,
    next_frame_number: u32,
    frame_bytes: usize,
}

impl VideoDecoder {
    /// Open a video file for decoding full frames from the start.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_cropped(path, None)
    }

    /// Open a video file, decoding only `crop` of every frame when given.
    pub fn open_cropped(path: &Path, crop: Option<PixelRect>) -> Result<Self> {
        if !path.exists() {
            bail!("video file does not exist: {}", path.display());
        }

        let info = probe(path)?;

        let crop = match crop {
            Some(rect) => Some(
                rect.clamp_to(info.width, info.height)
                    .with_context(|| format!("crop {rect} lies outside the video"))?,
            ),
            None => None,
        };
        let (out_w, out_h) = crop.map_or((info.width, info.height), |r| (r.w, r.h));

        Ok(Self {
            path: path.to_path_buf(),
            info,
            crop,
            child: None,
            next_frame_number: 0,
            frame_bytes: out_w as usize * out_h as usize * 3,
        })
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    pub fn fps(&self) -> f64 {
        self.info.fps
    }

    fn spawn_at(&mut self, frame_number: u32) -> Result<()> {
        self.close();

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-v", "error", "-nostdin"]);
        if frame_number > 0 && self.info.fps > 0.0 {
            let seconds = ((frame_number as f64 - SEEK_BACKOFF_FRAMES) / self.info.fps).max(0.0);
            cmd.args(["-ss", &format!("{seconds:.6}")]);
        }
        cmd.arg("-i").arg(&self.path);
        if let Some(r) = self.crop {
            cmd.args(["-vf", &crop_filter(r)]);
        }
        cmd.args(["-an", "-sn", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"]);

        info!(path = ?self.path, frame_number, crop = ?self.crop, "spawning ffmpeg decoder process");

        let child = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .context("failed to spawn ffmpeg — is ffmpeg installed?")?;

        self.child = Some(child);
        self.next_frame_number = frame_number;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            debug!(next_frame = self.next_frame_number, "closing ffmpeg decoder process");
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    fn frame_dimensions(&self) -> (u32, u32) {
        self.crop
            .map_or((self.info.width, self.info.height), |r| (r.w, r.h))
    }
}

impl FrameSource for VideoDecoder {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn seek(&mut self, frame_number: u32) -> Result<()> {
        if self.child.is_some() && self.next_frame_number == frame_number {
            return Ok(());
        }
        self.spawn_at(frame_number)
    }

    /// Read the next frame from the ffmpeg pipe, or `None` if the video is finished.
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.child.is_none() {
            self.spawn_at(self.next_frame_number)?;
        }
        let frame_bytes = self.frame_bytes;
        let frame_number = self.next_frame_number;
        let stdout = self
            .child
            .as_mut()
            .and_then(|c| c.stdout.as_mut())
            .context("ffmpeg stdout not available")?;

        let mut buf = vec![0u8; frame_bytes];
        let mut read = 0;

        while read < frame_bytes {
            match stdout.read(&mut buf[read..]) {
                Ok(0) => {
                    if read == 0 {
                        info!(frame_number, "video stream ended");
                        return Ok(None);
                    }
                    error!(
                        read_bytes = read,
                        expected_bytes = frame_bytes,
                        frame_number,
                        "ffmpeg stream ended mid-frame"
                    );
                    bail!("ffmpeg stream ended mid-frame (read {read}/{frame_bytes} bytes)");
                }
                Ok(n) => read += n,
                Err(e) => {
                    error!(frame_number, %e, "failed to read from ffmpeg pipe");
                    return Err(e).context("failed to read from ffmpeg pipe");
                }
            }
        }

        let (w, h) = self.frame_dimensions();
        let image = RgbImage::from_raw(w, h, buf)
            .context("failed to create RgbImage from raw frame data")?;

        self.next_frame_number += 1;

        debug!(frame_number, "decoded frame");

        Ok(Some(Frame {
            image,
            frame_number,
            origin: self.crop.map_or((0, 0), |r| (r.x, r.y)),
        }))
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mp4_probe_output() {
        let info = parse_probe_output(
            "width=1920\nheight=1080\nr_frame_rate=30000/1001\nnb_frames=1800\nduration=60.060000\n",
        )
        .unwrap();
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert!((info.fps - 29.97).abs() < 0.01);
        assert_eq!(info.frame_count, 1800);
    }

    #[test]
    fn estimates_frame_count_without_nb_frames() {
        let info =
            parse_probe_output("width=1280\nheight=720\nr_frame_rate=60/1\nnb_frames=N/A\nduration=10.5\n")
                .unwrap();
        assert_eq!(info.frame_count, 630);
    }

    #[test]
    fn rejects_missing_dimensions() {
        assert!(parse_probe_output("r_frame_rate=30/1\n").is_err());
        assert!(parse_probe_output("width=0\nheight=0\nr_frame_rate=30/1\n").is_err());
    }

    #[test]
    fn crop_keeps_odd_geometry() {
        let filter = crop_filter(PixelRect::new(537, 612, 205, 13));
        assert_eq!(filter, "crop=205:13:537:612:exact=1");
    }

    #[test]
    fn open_missing_file_fails() {
        assert!(VideoDecoder::open(Path::new("/nonexistent/clip.mp4")).is_err());
    }
}
