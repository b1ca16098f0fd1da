use thiserror::Error;

/// Processor-stage failures. Recorded as `failure_code` on the asset; they
/// never propagate past the pipeline.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("processing timed out")]
    Timeout,

    #[error("unsupported mime type: {0}")]
    UnsupportedMime(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("read failed: {0}")]
    ReadFailed(String),
}

impl MediaError {
    /// Stable failure code stored on the asset.
    pub fn code(&self) -> &'static str {
        match self {
            MediaError::Timeout => "MEDIA_PROCESSING_TIMEOUT",
            MediaError::UnsupportedMime(_) => "MEDIA_UNSUPPORTED_MIME",
            MediaError::Provider(_) => "MEDIA_PROVIDER_ERROR",
            MediaError::Parse(_) => "MEDIA_PARSE_ERROR",
            MediaError::FileNotFound(_) => "MEDIA_FILE_NOT_FOUND",
            MediaError::ReadFailed(_) => "MEDIA_READ_FAILED",
        }
    }
}
