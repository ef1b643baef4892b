pub mod gemini;

use async_trait::async_trait;

pub use gemini::GeminiClient;

/// Failure of a remote inference call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InferenceError {
    /// Missing or rejected credential
    #[error("inference service rejected credentials: {0}")]
    Unauthenticated(String),

    #[error("inference service rate limited the request")]
    RateLimited,

    #[error("inference service unavailable: {0}")]
    Unavailable(String),

    #[error("malformed inference response: {0}")]
    InvalidResponse(String),

    #[error("inference call timed out")]
    Timeout,

    #[error("invalid inference input: {0}")]
    InvalidInput(String),

    /// Unknown model or endpoint
    #[error("inference service rejected the configured model: {0}")]
    Misconfigured(String),
}

impl InferenceError {
    /// Transient failures are absorbed per frame; the rest end the session
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InferenceError::RateLimited
                | InferenceError::Unavailable(_)
                | InferenceError::InvalidResponse(_)
                | InferenceError::Timeout
        )
    }
}

/// Boundary to the remote vision/text model
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Plain text completion, used as a connectivity test
    async fn generate_text(&self, prompt: &str) -> Result<String, InferenceError>;

    /// Describe a JPEG still
    async fn analyze_frame(&self, image: &[u8], prompt: &str) -> Result<String, InferenceError>;
}
