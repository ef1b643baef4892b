use crate::error::ApiError;
use crate::state::AnalysisServiceState;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use common::analysis::{
    FrameAnalysisRequest, FrameAnalysisResponse, SessionInfo, SessionListResponse,
    StartSessionRequest, TextPromptRequest, TextPromptResponse, VideoAnalysisResponse,
};
use common::cameras::{Analytic, ApplyAnalyticRequest, Camera, NewCamera};
use common::events::{NewReportEvent, ReportEvent};
use serde::Deserialize;
use serde_json::json;

/// Health check endpoint
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "analysis-service"
        })),
    )
}

/// Readiness check endpoint
pub async fn readyz(State(state): State<AnalysisServiceState>) -> impl IntoResponse {
    match state.store().list_analytics().await {
        Ok(analytics) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "analytics": analytics.len(),
                "sessions": state.list_sessions().await.len()
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not ready",
                "error": e.to_string()
            })),
        ),
    }
}

/// Prometheus metrics endpoint
pub async fn metrics() -> impl IntoResponse {
    match telemetry::metrics::gather_text() {
        Ok(text) => text.into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

/// Connectivity test against the text model
pub async fn test_prompt(
    State(state): State<AnalysisServiceState>,
    Json(request): Json<TextPromptRequest>,
) -> Result<Json<TextPromptResponse>, ApiError> {
    let response = state.test_connectivity(&request.prompt).await?;
    Ok(Json(TextPromptResponse { response }))
}

/// Analyze one client-captured frame and derive an event from it
pub async fn analyze_frame(
    State(state): State<AnalysisServiceState>,
    Json(request): Json<FrameAnalysisRequest>,
) -> Result<Json<FrameAnalysisResponse>, ApiError> {
    if request.camera_id.trim().is_empty() {
        return Err(ApiError::bad_request("camera_id is required"));
    }
    Ok(Json(state.analyze_frame(request).await?))
}

/// Analyze an uploaded video file (multipart field `video`)
pub async fn analyze_video(
    State(state): State<AnalysisServiceState>,
    mut multipart: Multipart,
) -> Result<Json<VideoAnalysisResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to parse form data: {}", e)))?
    {
        if field.name() != Some("video") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read video upload: {}", e)))?;

        tracing::info!(file = %file_name, content_type = %content_type, bytes = data.len(), "Received video for analysis");
        let results = state.analyze_video(&file_name, &content_type, data).await?;
        return Ok(Json(VideoAnalysisResponse { results }));
    }

    Err(ApiError::bad_request(
        "No video file uploaded or incorrect fieldname. Expected \"video\".",
    ))
}

pub async fn list_cameras(
    State(state): State<AnalysisServiceState>,
) -> Result<Json<Vec<Camera>>, ApiError> {
    Ok(Json(state.store().list_cameras().await?))
}

pub async fn create_camera(
    State(state): State<AnalysisServiceState>,
    Json(camera): Json<NewCamera>,
) -> Result<(StatusCode, Json<Camera>), ApiError> {
    let camera = state.store().create_camera(camera).await?;
    tracing::info!(camera_id = %camera.id, name = %camera.name, "Camera created");
    Ok((StatusCode::CREATED, Json(camera)))
}

pub async fn get_camera(
    State(state): State<AnalysisServiceState>,
    Path(id): Path<String>,
) -> Result<Json<Camera>, ApiError> {
    Ok(Json(state.store().get_camera(&id).await?))
}

pub async fn update_camera(
    State(state): State<AnalysisServiceState>,
    Path(id): Path<String>,
    Json(mut camera): Json<Camera>,
) -> Result<Json<Camera>, ApiError> {
    camera.id = id;
    Ok(Json(state.store().update_camera(camera).await?))
}

pub async fn delete_camera(
    State(state): State<AnalysisServiceState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store().delete_camera(&id).await?;
    tracing::info!(camera_id = %id, "Camera deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_analytics(
    State(state): State<AnalysisServiceState>,
) -> Result<Json<Vec<Analytic>>, ApiError> {
    Ok(Json(state.store().list_analytics().await?))
}

pub async fn get_analytic(
    State(state): State<AnalysisServiceState>,
    Path(id): Path<String>,
) -> Result<Json<Analytic>, ApiError> {
    Ok(Json(state.store().get_analytic(&id).await?))
}

/// Make exactly the listed cameras carry the analytic
pub async fn apply_analytic(
    State(state): State<AnalysisServiceState>,
    Path(id): Path<String>,
    Json(request): Json<ApplyAnalyticRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .store()
        .apply_analytic(&id, &request.camera_ids)
        .await?;
    tracing::info!(analytic_id = %id, cameras = request.camera_ids.len(), "Analytic applied");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_events(
    State(state): State<AnalysisServiceState>,
) -> Result<Json<Vec<ReportEvent>>, ApiError> {
    Ok(Json(state.store().list_events().await?))
}

/// Manually log an event
pub async fn create_event(
    State(state): State<AnalysisServiceState>,
    Json(event): Json<NewReportEvent>,
) -> Result<(StatusCode, Json<ReportEvent>), ApiError> {
    if event.camera_name.trim().is_empty() {
        return Err(ApiError::bad_request("camera_name is required"));
    }
    let event = state.store().create_event(event).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn start_session(
    State(state): State<AnalysisServiceState>,
    Json(request): Json<StartSessionRequest>,
) -> Result<(StatusCode, Json<SessionInfo>), ApiError> {
    let info = state.start_session(request).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn list_sessions(State(state): State<AnalysisServiceState>) -> impl IntoResponse {
    Json(SessionListResponse {
        sessions: state.list_sessions().await,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    /// Include captured frames in the response
    #[serde(default)]
    pub frames: bool,
}

pub async fn get_session(
    State(state): State<AnalysisServiceState>,
    Path(id): Path<String>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<SessionInfo>, ApiError> {
    Ok(Json(state.get_session(&id, query.frames).await?))
}

pub async fn stop_session(
    State(state): State<AnalysisServiceState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    Ok(Json(state.stop_session(&id).await?))
}
