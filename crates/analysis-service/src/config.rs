use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AnalysisServiceConfig {
    /// Address to bind the HTTP server to
    pub bind_addr: String,

    /// Generative model endpoint
    pub gemini: GeminiConfig,

    /// Video annotation endpoint
    pub video_intelligence: VideoIntelligenceConfig,

    /// Sampling and pipeline tuning
    pub analysis: AnalysisSettings,

    /// Maximum accepted multipart body size
    pub max_upload_bytes: usize,

    /// Populate demo cameras, analytics and events on startup
    pub seed_demo_data: bool,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_base: String,
    /// Unset means every call fails as unauthenticated
    pub api_key: Option<String>,
    pub text_model: String,
    pub vision_model: String,
}

#[derive(Debug, Clone)]
pub struct VideoIntelligenceConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
}

/// Tuning shared by live sessions, single-frame and video analysis
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    /// Upper bound on any single inference call
    pub inference_timeout: Duration,

    /// Default minimum time between captures
    pub sample_interval: Duration,

    /// Default sample bound for file sessions
    pub file_max_samples: u64,

    /// Cadence of the cooperative sampling loop
    pub tick_interval: Duration,

    /// Where uploaded videos are staged while being annotated
    pub staging_dir: PathBuf,

    /// Root that root-relative camera locators resolve against
    pub media_root: Option<PathBuf>,

    /// JPEG quality of extracted frames
    pub jpeg_quality: u8,

    /// Finished sessions kept for inspection; the oldest are evicted beyond this
    pub max_finished_sessions: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            inference_timeout: Duration::from_secs(20),
            sample_interval: Duration::from_millis(3000),
            file_max_samples: 10,
            tick_interval: Duration::from_millis(250),
            staging_dir: env::temp_dir(),
            media_root: None,
            jpeg_quality: 80,
            max_finished_sessions: 50,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid {}", name)),
        Err(_) => Ok(default),
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl AnalysisServiceConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr =
            env::var("ANALYSIS_SERVICE_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string());

        let gemini = GeminiConfig {
            api_base: env::var("GEMINI_API_BASE").unwrap_or_else(|_| {
                "https://generativelanguage.googleapis.com/v1beta".to_string()
            }),
            api_key: non_empty_env("GEMINI_API_KEY"),
            text_model: env::var("GEMINI_TEXT_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash".to_string()),
            vision_model: env::var("GEMINI_VISION_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash-image".to_string()),
        };

        let video_intelligence = VideoIntelligenceConfig {
            api_base: env::var("VIDEO_INTELLIGENCE_API_BASE")
                .unwrap_or_else(|_| "https://videointelligence.googleapis.com/v1".to_string()),
            api_key: non_empty_env("VIDEO_INTELLIGENCE_API_KEY"),
            poll_interval: Duration::from_secs(env_or("VIDEO_POLL_INTERVAL_SECS", 5u64)?),
            poll_timeout: Duration::from_secs(env_or("VIDEO_POLL_TIMEOUT_SECS", 600u64)?),
        };

        let defaults = AnalysisSettings::default();
        let analysis = AnalysisSettings {
            inference_timeout: Duration::from_secs(env_or("INFERENCE_TIMEOUT_SECS", 20u64)?),
            sample_interval: Duration::from_millis(env_or("SAMPLE_INTERVAL_MS", 3000u64)?),
            file_max_samples: env_or("FILE_MAX_SAMPLES", defaults.file_max_samples)?,
            tick_interval: Duration::from_millis(env_or("SCHEDULER_TICK_MS", 250u64)?.max(10)),
            staging_dir: non_empty_env("VIDEO_STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.staging_dir),
            media_root: non_empty_env("MEDIA_ROOT").map(PathBuf::from),
            jpeg_quality: env_or("FRAME_JPEG_QUALITY", defaults.jpeg_quality)?,
            max_finished_sessions: env_or("MAX_FINISHED_SESSIONS", defaults.max_finished_sessions)?,
        };

        if analysis.file_max_samples == 0 {
            anyhow::bail!("FILE_MAX_SAMPLES must be at least 1");
        }
        if !(1..=100).contains(&analysis.jpeg_quality) {
            anyhow::bail!("FRAME_JPEG_QUALITY must be between 1 and 100");
        }

        Ok(Self {
            bind_addr,
            gemini,
            video_intelligence,
            analysis,
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", 256 * 1024 * 1024usize)?,
            seed_demo_data: env_or("SEED_DEMO_DATA", true)?,
        })
    }
}
