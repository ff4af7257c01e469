use std::path::PathBuf;
use thiserror::Error;

/// 单次分析调用的结果类型
pub type VideoResult<T> = Result<T, AnalysisError>;

/// Errors fatal to a whole analysis call.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Cannot open video: {path:?} ({reason})")]
    OpenFailed { path: PathBuf, reason: String },
    #[error("None of the {sampled} sampled frames could be read")]
    NoReadableFrames { sampled: usize },
    #[error("Invalid frame buffer: {0}")]
    InvalidFrame(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AnalysisError {
    pub fn open_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::OpenFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by a capability provider for one frame.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("{0} is not available")]
    Unavailable(String),
    #[error("{provider} inference failed: {message}")]
    Inference { provider: String, message: String },
}

impl ProviderError {
    pub fn inference(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Inference {
            provider: provider.into(),
            message: message.into(),
        }
    }
}
