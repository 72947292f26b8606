pub mod decoder;
pub mod frame;
pub mod synthetic;

use anyhow::Result;

use frame::Frame;

/// Static properties of a video stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: u32,
}

impl VideoInfo {
    pub fn duration_seconds(&self) -> f64 {
        if self.fps > 0.0 {
            self.frame_count as f64 / self.fps
        } else {
            0.0
        }
    }
}

/// Indexed, seekable access to decoded frames of constant size.
pub trait FrameSource {
    fn info(&self) -> VideoInfo;

    /// Position the source so the next call to `next_frame` yields `frame_number`.
    fn seek(&mut self, frame_number: u32) -> Result<()>;

    /// The next frame in decode order, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Random access to a single frame.
    fn read_frame(&mut self, frame_number: u32) -> Result<Option<Frame>> {
        self.seek(frame_number)?;
        self.next_frame()
    }
}

pub type BoxedSource = Box<dyn FrameSource + Send>;

/// Opens independent handles to the same video, one per consumer.
pub trait SourceOpener: Send + Sync {
    fn open(&self) -> Result<BoxedSource>;
}

impl<F> SourceOpener for F
where
    F: Fn() -> Result<BoxedSource> + Send + Sync,
{
    fn open(&self) -> Result<BoxedSource> {
        self()
    }
}
