use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The video could not be opened or probed at all.
    #[error("video {} is unreadable: {source:#}", path.display())]
    VideoUnreadable {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("frame source failed: {0:#}")]
    Source(#[source] anyhow::Error),
    #[error("analysis cancelled")]
    Cancelled,
    #[error("worker task failed: {0}")]
    Worker(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
