pub mod analysis;
pub mod analyzer;
pub mod color;
pub mod config;
pub mod debug;
pub mod error;
pub mod event;
pub mod pipeline;
pub mod rect;
pub mod schedule;
pub mod video;
pub mod worker;

pub use analyzer::{default_training_frames, RectSelection, StaminaAnalyzer};
pub use error::{AnalysisError, AnalysisResult};
pub use event::{format_timestamp, StaminaEvent, Transition};
