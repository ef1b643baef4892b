//! Frame extraction from video sources
//!
//! A [`VideoSource`] exposes the current playback position and the decoded
//! pixels at that position. [`FrameExtractor`] turns those pixels into an
//! encoded JPEG still at the source's native resolution. [`FfmpegSource`]
//! is a source backed by FFmpeg for files and streams.

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Readiness of a source, ordered from least to most buffered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    /// Pixels of the current position are available
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

/// Decoded RGB24 pixels of the frame at the current position
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
    pub timestamp_seconds: f64,
}

/// An encoded still produced by the extractor
#[derive(Debug, Clone)]
pub struct ExtractedFrame {
    pub jpeg: Vec<u8>,
    pub timestamp_seconds: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// Not enough data buffered for the current position; retry on the next tick
    #[error("video source has no frame available at the current position")]
    SourceNotReady,

    /// The frame could not be drawn or encoded; the session cannot continue
    #[error("draw surface unavailable: {0}")]
    DrawSurfaceUnavailable(String),
}

impl ExtractError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExtractError::SourceNotReady)
    }
}

/// A playable video whose current frame can be read
#[async_trait]
pub trait VideoSource: Send + Sync {
    fn ready_state(&self) -> ReadyState;

    /// Current playback position in seconds
    fn current_time(&self) -> f64;

    /// Whether playback reached the end of the source
    fn ended(&self) -> bool;

    /// Decode the frame at the current position; `None` when nothing is buffered
    async fn read_frame(&self) -> Result<Option<RawFrame>>;
}

/// Produces JPEG stills from a [`VideoSource`]
#[derive(Debug, Clone, Copy)]
pub struct FrameExtractor {
    jpeg_quality: u8,
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self { jpeg_quality: 80 }
    }
}

impl FrameExtractor {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub async fn extract(&self, source: &dyn VideoSource) -> Result<ExtractedFrame, ExtractError> {
        if source.ready_state() < ReadyState::HaveCurrentData {
            return Err(ExtractError::SourceNotReady);
        }

        let raw = match source.read_frame().await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Err(ExtractError::SourceNotReady),
            Err(e) => {
                warn!(error = %e, "failed to read frame from video source");
                return Err(ExtractError::SourceNotReady);
            }
        };

        let jpeg = encode_jpeg(&raw, self.jpeg_quality)?;

        debug!(
            width = raw.width,
            height = raw.height,
            timestamp = raw.timestamp_seconds,
            size_bytes = jpeg.len(),
            "frame extracted"
        );

        Ok(ExtractedFrame {
            jpeg,
            timestamp_seconds: raw.timestamp_seconds,
            width: raw.width,
            height: raw.height,
        })
    }
}

/// Draw raw pixels onto a surface of the frame's native size and encode it as JPEG
pub fn encode_jpeg(raw: &RawFrame, quality: u8) -> Result<Vec<u8>, ExtractError> {
    if raw.width == 0 || raw.height == 0 {
        return Err(ExtractError::DrawSurfaceUnavailable(format!(
            "source reported empty dimensions {}x{}",
            raw.width, raw.height
        )));
    }

    let surface = RgbImage::from_raw(raw.width, raw.height, raw.rgb.clone()).ok_or_else(|| {
        ExtractError::DrawSurfaceUnavailable(format!(
            "pixel buffer of {} bytes does not fit {}x{}",
            raw.rgb.len(),
            raw.width,
            raw.height
        ))
    })?;

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode_image(&surface)
        .map_err(|e| ExtractError::DrawSurfaceUnavailable(e.to_string()))?;

    Ok(jpeg)
}

/// Properties of a video probed with ffprobe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoProbe {
    pub width: u32,
    pub height: u32,
    /// `None` for unbounded streams
    pub duration_seconds: Option<f64>,
}

/// How an [`FfmpegSource`] maps wall-clock time onto the video
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    /// Loops the video; reported time keeps increasing across loops
    Live,
    /// Plays once and ends at the video's duration
    Once,
}

/// A video source that plays `uri` in real time and decodes frames with FFmpeg
pub struct FfmpegSource {
    uri: String,
    probe: VideoProbe,
    mode: PlaybackMode,
    started: Instant,
}

impl FfmpegSource {
    pub async fn open(uri: impl Into<String>, mode: PlaybackMode) -> Result<Self> {
        let uri = uri.into();
        let probe = probe_video(&uri).await?;
        if mode == PlaybackMode::Once && probe.duration_seconds.is_none() {
            anyhow::bail!("cannot play {} once: duration unknown", uri);
        }
        Ok(Self {
            uri,
            probe,
            mode,
            started: Instant::now(),
        })
    }

    fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Position inside the video file for the current playback time
    fn seek_position(&self) -> Option<f64> {
        let elapsed = self.elapsed();
        match (self.mode, self.probe.duration_seconds) {
            (PlaybackMode::Live, Some(duration)) if duration > 0.0 => Some(elapsed % duration),
            (PlaybackMode::Live, _) => None,
            (PlaybackMode::Once, duration) => {
                Some(duration.map_or(elapsed, |d| elapsed.min(d)))
            }
        }
    }
}

#[async_trait]
impl VideoSource for FfmpegSource {
    fn ready_state(&self) -> ReadyState {
        ReadyState::HaveEnoughData
    }

    fn current_time(&self) -> f64 {
        match (self.mode, self.probe.duration_seconds) {
            (PlaybackMode::Once, Some(duration)) => self.elapsed().min(duration),
            _ => self.elapsed(),
        }
    }

    fn ended(&self) -> bool {
        match (self.mode, self.probe.duration_seconds) {
            (PlaybackMode::Once, Some(duration)) => self.elapsed() >= duration,
            _ => false,
        }
    }

    async fn read_frame(&self) -> Result<Option<RawFrame>> {
        let timestamp_seconds = self.current_time();
        let rgb = decode_rgb_frame(&self.uri, self.seek_position()).await?;

        let expected = self.probe.width as usize * self.probe.height as usize * 3;
        if rgb.len() < expected {
            debug!(
                source = %self.uri,
                got = rgb.len(),
                expected,
                "short frame from ffmpeg"
            );
            return Ok(None);
        }

        Ok(Some(RawFrame {
            width: self.probe.width,
            height: self.probe.height,
            rgb: rgb[..expected].to_vec(),
            timestamp_seconds,
        }))
    }
}

/// Decode one frame as raw RGB24 at its native size
///
/// # Arguments
/// * `source_uri` - Video source URI (RTSP, HLS, file path, etc.)
/// * `position` - Seek position in seconds, `None` to read the next live frame
async fn decode_rgb_frame(source_uri: &str, position: Option<f64>) -> Result<Vec<u8>> {
    let mut args = Vec::new();
    if let Some(position) = position {
        args.push("-ss".to_string());
        args.push(format!("{:.3}", position));
    }
    args.extend(
        [
            "-i",
            source_uri,
            "-frames:v",
            "1",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "pipe:1",
        ]
        .iter()
        .map(|s| s.to_string()),
    );

    debug!(args = ?args, "spawning ffmpeg for frame extraction");

    let output = Command::new("ffmpeg")
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .context("failed to execute ffmpeg")?;

    if !output.status.success() {
        error!(
            source = %source_uri,
            status = ?output.status,
            "ffmpeg frame extraction failed"
        );
        anyhow::bail!("ffmpeg exited with error: {:?}", output.status);
    }

    Ok(output.stdout)
}

/// Probe frame dimensions and duration of a video source using ffprobe
pub async fn probe_video(source_uri: &str) -> Result<VideoProbe> {
    debug!(source = %source_uri, "probing video");

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height:format=duration",
            "-of",
            "default=noprint_wrappers=1",
            source_uri,
        ])
        .output()
        .await
        .context("failed to execute ffprobe")?;

    if !output.status.success() {
        anyhow::bail!("ffprobe failed: {:?}", output.status);
    }

    let output_str =
        String::from_utf8(output.stdout).context("ffprobe output is not valid UTF-8")?;
    let probe = parse_probe_output(&output_str)?;

    debug!(
        source = %source_uri,
        width = probe.width,
        height = probe.height,
        duration = ?probe.duration_seconds,
        "probed video successfully"
    );

    Ok(probe)
}

/// Parse `key=value` lines printed by ffprobe
fn parse_probe_output(output: &str) -> Result<VideoProbe> {
    let mut width = None;
    let mut height = None;
    let mut duration_seconds = None;

    for line in output.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        match key {
            "width" => width = Some(value.parse::<u32>().context("failed to parse width")?),
            "height" => height = Some(value.parse::<u32>().context("failed to parse height")?),
            // "N/A" for live streams
            "duration" => duration_seconds = value.parse::<f64>().ok().filter(|d| *d > 0.0),
            _ => {}
        }
    }

    match (width, height) {
        (Some(width), Some(height)) => Ok(VideoProbe {
            width,
            height,
            duration_seconds,
        }),
        _ => anyhow::bail!("unexpected ffprobe output format: {}", output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StillSource {
        ready: ReadyState,
        frame: Option<RawFrame>,
    }

    #[async_trait]
    impl VideoSource for StillSource {
        fn ready_state(&self) -> ReadyState {
            self.ready
        }

        fn current_time(&self) -> f64 {
            1.5
        }

        fn ended(&self) -> bool {
            false
        }

        async fn read_frame(&self) -> Result<Option<RawFrame>> {
            Ok(self.frame.clone())
        }
    }

    fn gray_frame(width: u32, height: u32) -> RawFrame {
        RawFrame {
            width,
            height,
            rgb: vec![128; (width * height * 3) as usize],
            timestamp_seconds: 1.5,
        }
    }

    #[tokio::test]
    async fn test_extract_encodes_jpeg_at_native_size() {
        let source = StillSource {
            ready: ReadyState::HaveEnoughData,
            frame: Some(gray_frame(16, 8)),
        };

        let frame = FrameExtractor::default().extract(&source).await.unwrap();
        assert_eq!(&frame.jpeg[0..3], &[0xFF, 0xD8, 0xFF], "should be valid JPEG");
        assert_eq!((frame.width, frame.height), (16, 8));
        assert_eq!(frame.timestamp_seconds, 1.5);

        let decoded = image::load_from_memory(&frame.jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[tokio::test]
    async fn test_extract_requires_current_data() {
        let source = StillSource {
            ready: ReadyState::HaveMetadata,
            frame: Some(gray_frame(4, 4)),
        };
        let err = FrameExtractor::default().extract(&source).await.unwrap_err();
        assert!(matches!(err, ExtractError::SourceNotReady));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_extract_without_buffered_frame_is_not_ready() {
        let source = StillSource {
            ready: ReadyState::HaveCurrentData,
            frame: None,
        };
        let err = FrameExtractor::default().extract(&source).await.unwrap_err();
        assert!(matches!(err, ExtractError::SourceNotReady));
    }

    #[test]
    fn test_mismatched_buffer_is_fatal() {
        let mut raw = gray_frame(4, 4);
        raw.rgb.truncate(10);
        let err = encode_jpeg(&raw, 80).unwrap_err();
        assert!(matches!(err, ExtractError::DrawSurfaceUnavailable(_)));
        assert!(!err.is_retryable());

        let empty = gray_frame(0, 0);
        assert!(matches!(
            encode_jpeg(&empty, 80),
            Err(ExtractError::DrawSurfaceUnavailable(_))
        ));
    }

    #[test]
    fn test_parse_probe_output() {
        let probe = parse_probe_output("width=1280\nheight=720\nduration=12.480000\n").unwrap();
        assert_eq!(probe.width, 1280);
        assert_eq!(probe.height, 720);
        assert_eq!(probe.duration_seconds, Some(12.48));

        let live = parse_probe_output("width=640\nheight=480\nduration=N/A\n").unwrap();
        assert_eq!(live.duration_seconds, None);

        assert!(parse_probe_output("duration=3.0").is_err());
    }
}
