use super::{normalize, StagedVideo, VideoAnnotator};
use crate::inference::InferenceError;
use bytes::Bytes;
use common::analysis::VideoAnalysisResult;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use telemetry::metrics::ANALYSIS_VIDEO_REQUESTS;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum VideoAnalysisError {
    #[error("no video file uploaded")]
    EmptyUpload,

    #[error("failed to stage upload: {0}")]
    Staging(#[from] std::io::Error),

    #[error(transparent)]
    Annotation(#[from] InferenceError),
}

/// Stages uploads, annotates them and normalizes the result
#[derive(Clone)]
pub struct VideoAnalyzer {
    annotator: Arc<dyn VideoAnnotator>,
    staging_dir: PathBuf,
}

/// Keep only filename-safe characters of a client supplied name
fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

impl VideoAnalyzer {
    pub fn new(annotator: Arc<dyn VideoAnnotator>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            annotator,
            staging_dir: staging_dir.into(),
        }
    }

    pub async fn analyze_upload(
        &self,
        file_name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<Vec<VideoAnalysisResult>, VideoAnalysisError> {
        let result = self.run(file_name, content_type, data).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        ANALYSIS_VIDEO_REQUESTS.with_label_values(&[status]).inc();
        if let Err(e) = &result {
            error!(file = %file_name, error = %e, "Video analysis failed");
        }
        result
    }

    async fn run(
        &self,
        file_name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<Vec<VideoAnalysisResult>, VideoAnalysisError> {
        if data.is_empty() {
            return Err(VideoAnalysisError::EmptyUpload);
        }

        tokio::fs::create_dir_all(&self.staging_dir).await?;
        // Deleted on drop, including when the request is cancelled mid-annotation
        let staged_path = tempfile::Builder::new()
            .prefix("video-")
            .suffix(&format!("-{}", sanitize_file_name(file_name)))
            .tempfile_in(&self.staging_dir)?
            .into_temp_path();
        let staged = StagedVideo {
            path: staged_path.to_path_buf(),
            content_type: content_type.to_string(),
        };

        // Partial writes are cleaned up like any other outcome
        let outcome = match tokio::fs::write(&staged.path, &data).await {
            Ok(()) => {
                info!(path = %staged.path.display(), bytes = data.len(), "Video staged for annotation");
                self.annotator
                    .annotate(&staged)
                    .await
                    .map(|annotations| normalize(annotations.as_ref()))
                    .map_err(VideoAnalysisError::from)
            }
            Err(e) => Err(VideoAnalysisError::Staging(e)),
        };

        match staged_path.close() {
            Ok(()) => info!(path = %staged.path.display(), "Cleaned up staged video"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %staged.path.display(), error = %e, "Failed to remove staged video"),
        }

        outcome
    }
}
