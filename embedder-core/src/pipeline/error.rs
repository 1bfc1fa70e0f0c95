use thiserror::Error;

/// Sent in place of the transport error when the final upload fails.
pub const UPLOAD_FAILED_MESSAGE: &str = "Could not upload to Discord!";

/// A failed request. The display text names the stage and carries the
/// untranslated tool output; it is what the user sees.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not parse url: {0}")]
    InvalidUrl(String),
    #[error("invalid timestamp {0:?}, expected SS, MM:SS or HH:MM:SS")]
    InvalidTimestamp(String),
    #[error("could not prepare workspace: {0}")]
    Workspace(String),
    #[error("could not download video: {0}")]
    Download(String),
    #[error("could not trim video: {0}")]
    Trim(String),
    #[error("could not convert video: {0}")]
    Convert(String),
    #[error("could not compress video: {0}")]
    Compress(String),
    #[error("could not upload video: {0}")]
    Upload(String),
}

impl PipelineError {
    /// Text for the terminal chat response. Upload failures hide the
    /// transport detail.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Upload(_) => UPLOAD_FAILED_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
