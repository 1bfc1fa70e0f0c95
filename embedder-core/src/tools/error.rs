use thiserror::Error;

/// One variant per adapter. The payload is the untranslated text reported by
/// the external tool (or by the OS when the tool could not be started).
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("download failed: {0}")]
    DownloadFailed(String),
    #[error("probe failed: {0}")]
    ProbeFailed(String),
    #[error("transcode failed: {0}")]
    TranscodeFailed(String),
    #[error("trim failed: {0}")]
    TrimFailed(String),
    #[error("compress failed: {0}")]
    CompressFailed(String),
}

impl ToolError {
    pub fn detail(&self) -> &str {
        match self {
            ToolError::DownloadFailed(detail)
            | ToolError::ProbeFailed(detail)
            | ToolError::TranscodeFailed(detail)
            | ToolError::TrimFailed(detail)
            | ToolError::CompressFailed(detail) => detail,
        }
    }
}

pub type ToolResult<T> = Result<T, ToolError>;
