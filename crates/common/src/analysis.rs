//! Analysis session contracts.
//!
//! This module defines the records produced by live and file-based frame
//! analysis, the video-file analysis result shape, and the request/response
//! bodies of the analysis API.

use crate::events::ReportEvent;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Description recorded for a frame whose inference failed transiently
pub const FALLBACK_DESCRIPTION: &str = "Analysis failed for this frame";

/// Lifecycle state of an analysis session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created but not started
    Idle,

    /// Sampling loop is active
    Running,

    /// Stop requested, loop winding down
    Stopping,

    /// Finished normally (stop, sample bound or end of source)
    Stopped,

    /// Aborted by a fatal failure
    Errored,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Errored)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Unbounded sampling of a camera stream
    Live,

    /// Bounded sampling of an uploaded or local video file
    File,
}

/// What a session analyzes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Subject {
    Camera { camera_id: String },
    File { path: String },
}

impl Subject {
    pub fn id(&self) -> &str {
        match self {
            Subject::Camera { camera_id } => camera_id,
            Subject::File { path } => path,
        }
    }

    pub fn mode(&self) -> SessionMode {
        match self {
            Subject::Camera { .. } => SessionMode::Live,
            Subject::File { .. } => SessionMode::File,
        }
    }
}

/// One captured-and-analyzed still within a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSample {
    /// 1-based, contiguous within a session
    pub frame_number: u64,

    /// Playback position of the capture
    pub timestamp_seconds: f64,

    /// Encoded still (JPEG), base64 in JSON
    #[serde(with = "base64_bytes")]
    pub image_data: Vec<u8>,

    /// Inference result; the fallback text when inference failed transiently
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Snapshot of a session for display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub subject: Subject,
    pub mode: SessionMode,
    pub state: SessionState,
    pub sample_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_samples: Option<u64>,
    pub sample_interval_ms: u64,

    /// Wall-clock time of the last successful capture
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sample_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,

    /// Message of the fatal failure when errored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Number of events derived by this session
    pub events_derived: u64,

    #[serde(default)]
    pub frames: Vec<FrameSample>,
}

/// Request to start an analysis session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartSessionRequest {
    /// Camera to analyze live
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_id: Option<String>,

    /// Video file to analyze
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_interval_ms: Option<u64>,

    /// File sessions only; rejected for camera sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_samples: Option<u64>,
}

impl StartSessionRequest {
    pub fn subject(&self) -> Option<Subject> {
        if let Some(camera_id) = self.camera_id.as_ref().filter(|id| !id.trim().is_empty()) {
            return Some(Subject::Camera {
                camera_id: camera_id.clone(),
            });
        }
        self.file_path
            .as_ref()
            .filter(|path| !path.trim().is_empty())
            .map(|path| Subject::File { path: path.clone() })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
}

/// One entry of a video-file analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoAnalysisResult {
    pub frame_number: u64,
    pub timestamp_seconds: f64,
    pub image_url: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoAnalysisResponse {
    pub results: Vec<VideoAnalysisResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextPromptRequest {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextPromptResponse {
    pub response: String,
}

/// Single-frame analysis request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameAnalysisRequest {
    pub camera_id: String,

    /// Base64 JPEG, optionally as a `data:` URL
    pub image: String,

    /// Analytics whose prompt variants should be applied
    #[serde(default)]
    pub analytic_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameAnalysisResponse {
    pub description: String,

    /// Event persisted because the description matched the trigger vocabulary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<ReportEvent>,
}

/// Strips a `data:<mime>;base64,` prefix, leaving plain base64
pub fn strip_data_url(data: &str) -> &str {
    match data.split_once(";base64,") {
        Some((prefix, payload)) if prefix.starts_with("data:") => payload,
        _ => data,
    }
}

/// Decodes base64 image data, accepting `data:` URLs
pub fn decode_image_data(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(strip_data_url(data).trim())
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}
