//! Camera and analytic catalog records.
//!
//! Cameras carry the set of analytics applied to them; the analysis loop
//! only reads these records to pick prompt variants and to label events.

use serde::{Deserialize, Serialize};

/// Locator assigned to cameras created without an explicit stream
pub const DEFAULT_VIDEO_URL: &str = "/videos/default.mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CameraStatus {
    Online,
    #[default]
    Offline,
    Recording,
}

impl std::fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraStatus::Online => write!(f, "online"),
            CameraStatus::Offline => write!(f, "offline"),
            CameraStatus::Recording => write!(f, "recording"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub id: String,
    pub name: String,
    pub location: String,
    pub ip_address: String,
    #[serde(default)]
    pub status: CameraStatus,
    /// Live-stream locator (file path, HLS/RTSP URI)
    pub video_url: String,
    /// Identifiers of analytics applied to this camera, without duplicates
    #[serde(default)]
    pub analytic_ids: Vec<String>,
}

impl Camera {
    pub fn has_analytic(&self, analytic_id: &str) -> bool {
        self.analytic_ids.iter().any(|id| id == analytic_id)
    }

    /// Analytics from `catalog` that are applied to this camera, in catalog order.
    pub fn applied_analytics<'a>(&self, catalog: &'a [Analytic]) -> Vec<&'a Analytic> {
        catalog
            .iter()
            .filter(|analytic| self.has_analytic(&analytic.id))
            .collect()
    }
}

/// Fields accepted when registering a camera
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCamera {
    pub name: String,
    pub location: String,
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analytic {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    #[serde(default)]
    pub icon_name: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Request body for replacing the set of cameras an analytic is applied to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyAnalyticRequest {
    pub camera_ids: Vec<String>,
}
