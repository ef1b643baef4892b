//! Generative Language API client.

use super::{InferenceClient, InferenceError};
use crate::config::GeminiConfig;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use telemetry::metrics::ANALYSIS_INFERENCE_LATENCY;
use tracing::debug;

pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, config })
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            model
        )
    }

    async fn generate(&self, operation: &str, model: &str, body: Value) -> Result<String, InferenceError> {
        let api_key = self.config.api_key.as_deref().ok_or_else(|| {
            InferenceError::Unauthenticated("GEMINI_API_KEY is not configured".to_string())
        })?;

        let started = Instant::now();
        let result = self.send(model, api_key, &body).await;
        ANALYSIS_INFERENCE_LATENCY
            .with_label_values(&[operation])
            .observe(started.elapsed().as_secs_f64());
        debug!(operation, model, elapsed_ms = started.elapsed().as_millis() as u64, ok = result.is_ok(), "generateContent finished");
        result
    }

    async fn send(&self, model: &str, api_key: &str, body: &Value) -> Result<String, InferenceError> {
        let response = self
            .http
            .post(self.endpoint(model))
            .header("x-goog-api-key", api_key)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, detail));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;
        extract_text(&payload)
    }
}

fn map_transport_error(err: reqwest::Error) -> InferenceError {
    if err.is_timeout() {
        InferenceError::Timeout
    } else {
        InferenceError::Unavailable(err.to_string())
    }
}

/// Error reasons Google APIs report on 400 for a rejected key
const CREDENTIAL_REASONS: &[&str] = &["API_KEY_INVALID", "PERMISSION_DENIED", "UNAUTHENTICATED"];

/// Map a non-success HTTP status onto the failure taxonomy
pub fn classify_status(status: StatusCode, detail: String) -> InferenceError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => InferenceError::Unauthenticated(detail),
        StatusCode::BAD_REQUEST if CREDENTIAL_REASONS.iter().any(|r| detail.contains(r)) => {
            InferenceError::Unauthenticated(detail)
        }
        StatusCode::NOT_FOUND => InferenceError::Misconfigured(detail),
        StatusCode::TOO_MANY_REQUESTS => InferenceError::RateLimited,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => InferenceError::Timeout,
        s if s.is_server_error() => InferenceError::Unavailable(format!("{}: {}", s, detail)),
        s => InferenceError::InvalidResponse(format!("{}: {}", s, detail)),
    }
}

/// Concatenated text parts of the first candidate
pub fn extract_text(payload: &Value) -> Result<String, InferenceError> {
    let parts = payload["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| InferenceError::InvalidResponse("response has no candidate parts".to_string()))?;

    let text: String = parts
        .iter()
        .filter_map(|part| part["text"].as_str())
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(InferenceError::InvalidResponse(
            "candidate contains no text".to_string(),
        ));
    }
    Ok(text.trim().to_string())
}

#[async_trait]
impl InferenceClient for GeminiClient {
    async fn generate_text(&self, prompt: &str) -> Result<String, InferenceError> {
        if prompt.trim().is_empty() {
            return Err(InferenceError::InvalidInput("prompt is empty".to_string()));
        }
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });
        self.generate("text", &self.config.text_model, body).await
    }

    async fn analyze_frame(&self, image: &[u8], prompt: &str) -> Result<String, InferenceError> {
        if image.is_empty() {
            return Err(InferenceError::InvalidInput("image is empty".to_string()));
        }
        if prompt.trim().is_empty() {
            return Err(InferenceError::InvalidInput("prompt is empty".to_string()));
        }
        let body = json!({
            "contents": [{ "parts": [
                { "inlineData": { "mimeType": "image/jpeg", "data": STANDARD.encode(image) } },
                { "text": prompt }
            ]}]
        });
        self.generate("frame", &self.config.vision_model, body).await
    }
}
