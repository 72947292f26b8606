use std::sync::Arc;

use anyhow::{bail, Result};
use image::RgbImage;

use super::frame::Frame;
use super::{BoxedSource, FrameSource, VideoInfo};

type Render = dyn Fn(u32) -> Result<RgbImage> + Send + Sync;

/// An in-memory video whose frames are rendered on demand by a closure.
///
/// Cloning is cheap; each clone keeps its own read position, so one value can
/// serve as the source factory for several concurrent consumers.
#[derive(Clone)]
pub struct SyntheticVideo {
    info: VideoInfo,
    render: Arc<Render>,
    position: u32,
}

impl SyntheticVideo {
    pub fn new<F>(width: u32, height: u32, fps: f64, frame_count: u32, render: F) -> Self
    where
        F: Fn(u32) -> RgbImage + Send + Sync + 'static,
    {
        Self::try_new(width, height, fps, frame_count, move |n| Ok(render(n)))
    }

    /// Like [`SyntheticVideo::new`], but rendering may fail, e.g. to simulate corrupt frames.
    pub fn try_new<F>(width: u32, height: u32, fps: f64, frame_count: u32, render: F) -> Self
    where
        F: Fn(u32) -> Result<RgbImage> + Send + Sync + 'static,
    {
        Self {
            info: VideoInfo {
                width,
                height,
                fps,
                frame_count,
            },
            render: Arc::new(render),
            position: 0,
        }
    }

    /// A fresh handle positioned at frame 0.
    pub fn boxed(&self) -> BoxedSource {
        Box::new(SyntheticVideo {
            position: 0,
            ..self.clone()
        })
    }
}

impl FrameSource for SyntheticVideo {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn seek(&mut self, frame_number: u32) -> Result<()> {
        self.position = frame_number;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.position >= self.info.frame_count {
            return Ok(None);
        }
        let frame_number = self.position;
        self.position += 1;

        let image = (self.render)(frame_number)?;
        if image.dimensions() != (self.info.width, self.info.height) {
            bail!(
                "synthetic frame {frame_number} is {:?}, expected {}x{}",
                image.dimensions(),
                self.info.width,
                self.info.height
            );
        }

        Ok(Some(Frame {
            image,
            frame_number,
            origin: (0, 0),
        }))
    }
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    #[test]
    fn renders_requested_frame() {
        let video = SyntheticVideo::new(4, 2, 30.0, 10, |n| {
            RgbImage::from_pixel(4, 2, Rgb([n as u8, 0, 0]))
        });
        let mut source = video.boxed();
        let frame = source.read_frame(7).unwrap().unwrap();
        assert_eq!(frame.frame_number, 7);
        assert_eq!(frame.image.get_pixel(0, 0).0[0], 7);
        assert_eq!(source.next_frame().unwrap().unwrap().frame_number, 8);
    }

    #[test]
    fn duration_follows_frame_count() {
        let video = SyntheticVideo::new(1, 1, 30.0, 900, |_| RgbImage::new(1, 1));
        assert!((video.boxed().info().duration_seconds() - 30.0).abs() < 1e-9);
        let stalled = SyntheticVideo::new(1, 1, 0.0, 900, |_| RgbImage::new(1, 1));
        assert_eq!(stalled.boxed().info().duration_seconds(), 0.0);
    }

    #[test]
    fn ends_after_frame_count() {
        let video = SyntheticVideo::new(1, 1, 30.0, 2, |_| RgbImage::new(1, 1));
        let mut source = video.boxed();
        source.seek(1).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn render_errors_surface_and_advance() {
        let video = SyntheticVideo::try_new(1, 1, 30.0, 3, |n| {
            if n == 1 {
                bail!("corrupt frame");
            }
            Ok(RgbImage::new(1, 1))
        });
        let mut source = video.boxed();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().is_err());
        assert_eq!(source.next_frame().unwrap().unwrap().frame_number, 2);
    }
}
