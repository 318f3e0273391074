//! Error types shared by the voxgate runtime.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Uploaded audio declared a content type outside the supported set.
    #[error("Unsupported audio format")]
    UnsupportedFormat(String),

    /// Synthesis request without any text to speak.
    #[error("Text parameter is required")]
    MissingText,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Inference(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Transcoding failed: {0}")]
    Transcode(String),

    /// Any failure inside the synthesis pipeline, carrying the underlying message.
    #[error("{0}")]
    SynthesisFailure(String),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors raised while validating a request, before any resource was touched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedFormat(_) | Error::MissingText | Error::InvalidInput(_)
        )
    }
}

impl From<hound::Error> for Error {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(io) => Error::Io(io),
            other => Error::Transcode(format!("WAV error: {other}")),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Inference(format!("Malformed engine message: {err}"))
    }
}
