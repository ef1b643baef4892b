use crate::analysis::SessionError;
use crate::inference::InferenceError;
use crate::store::StoreError;
use crate::video::VideoAnalysisError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::{self, Display};

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "Request failed");
        }
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl std::error::Error for ApiError {}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self::internal(value.to_string())
    }
}

impl From<InferenceError> for ApiError {
    fn from(value: InferenceError) -> Self {
        let status = match &value {
            InferenceError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            InferenceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            InferenceError::Misconfigured(_) => StatusCode::BAD_GATEWAY,
            InferenceError::RateLimited
            | InferenceError::Timeout
            | InferenceError::Unavailable(_)
            | InferenceError::InvalidResponse(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, value.to_string())
    }
}

impl From<SessionError> for ApiError {
    fn from(value: SessionError) -> Self {
        let status = match &value {
            SessionError::NoSubjectSelected
            | SessionError::AlreadyStarted(_)
            | SessionError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            SessionError::NotFound(_) | SessionError::UnknownCamera(_) => StatusCode::NOT_FOUND,
            SessionError::SubjectBusy { .. } => StatusCode::CONFLICT,
            SessionError::SourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, value.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        let status = match &value {
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
        };
        Self::new(status, value.to_string())
    }
}

impl From<VideoAnalysisError> for ApiError {
    fn from(value: VideoAnalysisError) -> Self {
        match value {
            VideoAnalysisError::EmptyUpload => Self::bad_request("no video file uploaded"),
            VideoAnalysisError::Staging(e) => Self::internal(format!("failed to stage upload: {}", e)),
            VideoAnalysisError::Annotation(e) => e.into(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(InferenceError::Unauthenticated("k".into())).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(InferenceError::RateLimited).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(InferenceError::Misconfigured("no such model".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(SessionError::NoSubjectSelected).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(SessionError::SubjectBusy {
                subject: "cam".into(),
                session_id: "s".into()
            })
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(VideoAnalysisError::EmptyUpload).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
