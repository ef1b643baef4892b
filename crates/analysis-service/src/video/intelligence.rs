use super::{ExplicitFrame, Likelihood, StagedVideo, VideoAnnotations, VideoAnnotator};
use crate::config::VideoIntelligenceConfig;
use crate::inference::gemini::classify_status;
use crate::inference::InferenceError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use telemetry::metrics::ANALYSIS_INFERENCE_LATENCY;
use tracing::{debug, info};

const FEATURES: [&str; 3] = [
    "LABEL_DETECTION",
    "SHOT_CHANGE_DETECTION",
    "EXPLICIT_CONTENT_DETECTION",
];

/// Video Intelligence `videos:annotate` client with long-running operation polling
pub struct VideoIntelligenceClient {
    http: reqwest::Client,
    config: VideoIntelligenceConfig,
}

impl VideoIntelligenceClient {
    pub fn new(config: VideoIntelligenceConfig, request_timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self { http, config })
    }

    fn api_key(&self) -> Result<&str, InferenceError> {
        self.config.api_key.as_deref().ok_or_else(|| {
            InferenceError::Unauthenticated("VIDEO_INTELLIGENCE_API_KEY is not configured".to_string())
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn call(&self, request: reqwest::RequestBuilder) -> Result<Value, InferenceError> {
        let response = request
            .header("x-goog-api-key", self.api_key()?)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout
                } else {
                    InferenceError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, detail));
        }
        response
            .json()
            .await
            .map_err(|e| InferenceError::InvalidResponse(e.to_string()))
    }

    async fn submit(&self, video: &StagedVideo) -> Result<String, InferenceError> {
        let content = tokio::fs::read(&video.path)
            .await
            .map_err(|e| InferenceError::InvalidInput(format!("staged video unreadable: {}", e)))?;
        if content.is_empty() {
            return Err(InferenceError::InvalidInput("staged video is empty".to_string()));
        }

        let body = json!({
            "inputContent": STANDARD.encode(&content),
            "features": FEATURES,
        });
        let operation = self
            .call(self.http.post(self.url("videos:annotate")).json(&body))
            .await?;

        operation["name"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| InferenceError::InvalidResponse("operation has no name".to_string()))
    }

    async fn wait_for(&self, operation: &str) -> Result<Value, InferenceError> {
        loop {
            let state = self.call(self.http.get(self.url(operation))).await?;
            if state["done"].as_bool().unwrap_or(false) {
                if let Some(error) = state.get("error") {
                    return Err(InferenceError::Unavailable(format!(
                        "annotation failed: {}",
                        error["message"].as_str().unwrap_or("unknown error")
                    )));
                }
                return Ok(state);
            }
            debug!(operation, "Annotation still running");
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[async_trait]
impl VideoAnnotator for VideoIntelligenceClient {
    async fn annotate(&self, video: &StagedVideo) -> Result<Option<VideoAnnotations>, InferenceError> {
        let started = Instant::now();
        let operation = self.submit(video).await?;
        info!(operation = %operation, "Waiting for video annotation to complete");

        let finished = tokio::time::timeout(self.config.poll_timeout, self.wait_for(&operation))
            .await
            .map_err(|_| InferenceError::Timeout)??;

        ANALYSIS_INFERENCE_LATENCY
            .with_label_values(&["video"])
            .observe(started.elapsed().as_secs_f64());
        info!(operation = %operation, elapsed_s = started.elapsed().as_secs(), "Video annotation complete");

        Ok(parse_operation(&finished))
    }
}

/// Protobuf JSON durations look like `"12.5s"`; missing means zero
fn parse_offset(value: &Value) -> f64 {
    match value {
        Value::String(s) => s.trim_end_matches('s').parse().unwrap_or(0.0),
        Value::Object(_) => {
            let seconds = value["seconds"]
                .as_f64()
                .or_else(|| value["seconds"].as_str().and_then(|s| s.parse().ok()))
                .unwrap_or(0.0);
            seconds + value["nanos"].as_f64().unwrap_or(0.0) / 1e9
        }
        _ => 0.0,
    }
}

/// Extract the first annotation result of a finished operation
pub fn parse_operation(operation: &Value) -> Option<VideoAnnotations> {
    let result = operation["response"]["annotationResults"].as_array()?.first()?;

    let shot_starts = result["shotAnnotations"]
        .as_array()
        .map(|shots| {
            shots
                .iter()
                .map(|shot| parse_offset(&shot["startTimeOffset"]))
                .collect()
        })
        .unwrap_or_default();

    let labels = result["segmentLabelAnnotations"]
        .as_array()
        .map(|labels| {
            labels
                .iter()
                .filter_map(|label| label["entity"]["description"].as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let explicit_frames = result["explicitAnnotation"]["frames"]
        .as_array()
        .map(|frames| {
            frames
                .iter()
                .map(|frame| ExplicitFrame {
                    time_offset_seconds: parse_offset(&frame["timeOffset"]),
                    likelihood: Likelihood::from_api(
                        frame["pornographyLikelihood"].as_str().unwrap_or_default(),
                    ),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(VideoAnnotations {
        shot_starts,
        labels,
        explicit_frames,
    })
}
