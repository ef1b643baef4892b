use async_trait::async_trait;
use common::frame_extractor::{FfmpegSource, PlaybackMode, VideoSource};
use std::path::PathBuf;
use std::sync::Arc;

/// Opens playable sources for camera locators and video files
#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(&self, locator: &str, mode: PlaybackMode) -> anyhow::Result<Arc<dyn VideoSource>>;
}

/// Opens sources with FFmpeg. Root-relative locators such as
/// `/videos/cam1.mp4` resolve against `media_root` when one is set.
#[derive(Debug, Clone, Default)]
pub struct FfmpegOpener {
    media_root: Option<PathBuf>,
}

impl FfmpegOpener {
    pub fn new(media_root: Option<PathBuf>) -> Self {
        Self { media_root }
    }

    pub fn resolve(&self, locator: &str) -> String {
        if locator.contains("://") {
            return locator.to_string();
        }
        match &self.media_root {
            Some(root) => root
                .join(locator.trim_start_matches('/'))
                .to_string_lossy()
                .into_owned(),
            None => locator.to_string(),
        }
    }
}

#[async_trait]
impl SourceOpener for FfmpegOpener {
    async fn open(&self, locator: &str, mode: PlaybackMode) -> anyhow::Result<Arc<dyn VideoSource>> {
        let uri = self.resolve(locator);
        tracing::debug!(locator, uri = %uri, ?mode, "Opening video source");
        let source = FfmpegSource::open(uri, mode).await?;
        Ok(Arc::new(source))
    }
}
