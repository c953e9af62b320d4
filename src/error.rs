// src/error.rs

use thiserror::Error;

/// Failures surfaced by [`crate::pipeline::Pq7Pipeline::extract`] and the
/// helpers around it.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The image is empty, has a zero dimension, or could not be decoded.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// The completion call failed or returned something outside the schema.
    #[error("LLM extraction failed: {0}")]
    Llm(#[from] LlmError),

    /// Extraction finished but too little was recovered to be useful.
    #[error("insufficient extraction: {missing} of {total} fields empty")]
    MissingFields { missing: usize, total: usize },

    /// The input document could not be fetched or unpacked.
    #[error("document source error: {0}")]
    Source(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Whether re-running the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Llm(e) => e.is_retryable(),
            PipelineError::InvalidImage(_)
            | PipelineError::MissingFields { .. }
            | PipelineError::Source(_)
            | PipelineError::Config(_) => false,
        }
    }
}

/// Failures of the OCR capability for a single region.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine error: {0}")]
    Engine(String),

    #[error("OCR transport error: {0}")]
    Transport(String),

    #[error("OCR timed out after {0} seconds")]
    Timeout(u64),

    #[error("OCR returned malformed data: {0}")]
    Malformed(String),
}

impl OcrError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, OcrError::Transport(_) | OcrError::Timeout(_))
    }
}

/// Failures of the completion service or of decoding its response.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("completion transport error: {0}")]
    Transport(String),

    #[error("completion timed out after {0} seconds")]
    Timeout(u64),

    #[error("completion service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("empty response from completion service")]
    EmptyResponse,

    /// The response could not be parsed into the extraction schema.
    #[error("response does not match schema: {0}")]
    Schema(String),

    #[error("completion backend unavailable: {0}")]
    Unavailable(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Transport(_) | LlmError::Timeout(_) | LlmError::Unavailable(_) => true,
            LlmError::Status { status, .. } => *status == 429 || *status >= 500,
            LlmError::EmptyResponse | LlmError::Schema(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(PipelineError::Llm(LlmError::Timeout(60)).is_retryable());
        assert!(
            PipelineError::Llm(LlmError::Status {
                status: 503,
                body: String::new()
            })
            .is_retryable()
        );
        assert!(
            !PipelineError::Llm(LlmError::Status {
                status: 400,
                body: String::new()
            })
            .is_retryable()
        );
        assert!(!PipelineError::Llm(LlmError::Schema("bad".into())).is_retryable());
        assert!(!PipelineError::InvalidImage("empty".into()).is_retryable());
        assert!(OcrError::Timeout(10).is_retryable());
        assert!(!OcrError::Malformed("x".into()).is_retryable());
    }
}
