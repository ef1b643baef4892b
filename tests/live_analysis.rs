/// Timing and ordering properties of the sampling loop, run on a paused clock
use analysis_service::{
    analysis::{AnalysisHandle, AnalysisSession, SessionConfig, SessionPipeline},
    derivation::{DerivationContext, EventDeriver},
    inference::{gemini::classify_status, InferenceClient, InferenceError},
    DataStore, MemoryDataStore,
};
use async_trait::async_trait;
use common::analysis::{SessionState, Subject, FALLBACK_DESCRIPTION};
use common::events::Severity;
use common::frame_extractor::{FrameExtractor, RawFrame, ReadyState, VideoSource};
use reqwest::StatusCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Plays on the tokio clock; ends after `duration` when set
struct PausedClockSource {
    started: Instant,
    duration: Option<f64>,
}

impl PausedClockSource {
    fn new(duration: Option<f64>) -> Self {
        Self {
            started: Instant::now(),
            duration,
        }
    }
}

#[async_trait]
impl VideoSource for PausedClockSource {
    fn ready_state(&self) -> ReadyState {
        ReadyState::HaveEnoughData
    }

    fn current_time(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        self.duration.map_or(elapsed, |d| elapsed.min(d))
    }

    fn ended(&self) -> bool {
        self.duration
            .map_or(false, |d| self.started.elapsed().as_secs_f64() >= d)
    }

    async fn read_frame(&self) -> anyhow::Result<Option<RawFrame>> {
        Ok(Some(RawFrame {
            width: 8,
            height: 8,
            rgb: vec![64; 8 * 8 * 3],
            timestamp_seconds: self.current_time(),
        }))
    }
}

/// Tracks concurrency and call count; replies after `delay`
struct CountingInference {
    delay: Duration,
    reply: Result<String, InferenceError>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl CountingInference {
    fn new(delay: Duration, reply: Result<String, InferenceError>) -> Arc<Self> {
        Arc::new(Self {
            delay,
            reply,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl InferenceClient for CountingInference {
    async fn generate_text(&self, _prompt: &str) -> Result<String, InferenceError> {
        self.reply.clone()
    }

    async fn analyze_frame(&self, image: &[u8], _prompt: &str) -> Result<String, InferenceError> {
        assert!(!image.is_empty());
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.reply.clone()
    }
}

fn camera_subject() -> Subject {
    Subject::Camera {
        camera_id: "cam-1".to_string(),
    }
}

fn pipeline(
    source: Arc<dyn VideoSource>,
    inference: Arc<dyn InferenceClient>,
    derivation: Option<(EventDeriver, DerivationContext)>,
) -> SessionPipeline {
    SessionPipeline {
        source,
        extractor: FrameExtractor::default(),
        inference,
        prompt: "Describe the main objects, people, and activities in this image.".to_string(),
        derivation,
        tick_interval: Duration::from_millis(250),
        inference_timeout: Duration::from_secs(20),
    }
}

fn start(
    subject: Subject,
    interval_ms: u64,
    max_samples: Option<u64>,
    pipeline: SessionPipeline,
) -> AnalysisHandle {
    let session = AnalysisSession::new(
        "session-1",
        Some(subject),
        SessionConfig {
            sample_interval: Duration::from_millis(interval_ms),
            max_samples,
        },
    );
    AnalysisHandle::spawn(session, pipeline).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_frame_numbers_contiguous_and_interval_respected() {
    let inference = CountingInference::new(Duration::from_millis(100), Ok("Empty lobby".into()));
    let handle = start(
        camera_subject(),
        2000,
        None,
        pipeline(Arc::new(PausedClockSource::new(None)), inference.clone(), None),
    );

    tokio::time::sleep(Duration::from_millis(10_500)).await;
    handle.stop().await;
    assert_eq!(handle.wait().await, SessionState::Stopped);

    let info = handle.info(true).await.unwrap();
    let numbers: Vec<u64> = info.frames.iter().map(|f| f.frame_number).collect();
    let expected: Vec<u64> = (1..=numbers.len() as u64).collect();
    assert_eq!(numbers, expected);

    // At most one capture per 2000ms of playback
    assert!(info.frames.len() <= 6, "got {} frames", info.frames.len());
    assert!(info.frames.len() >= 5);
    for pair in info.frames.windows(2) {
        assert!(pair[1].timestamp_seconds - pair[0].timestamp_seconds >= 2.0 - 1e-9);
    }
    assert_eq!(info.sample_count, info.frames.len() as u64);
}

#[tokio::test(start_paused = true)]
async fn test_at_most_one_inference_in_flight() {
    // Calls outlast the interval, so a naive timer would overlap them
    let inference = CountingInference::new(Duration::from_millis(3500), Ok("Quiet aisle".into()));
    let handle = start(
        camera_subject(),
        1000,
        None,
        pipeline(Arc::new(PausedClockSource::new(None)), inference.clone(), None),
    );

    tokio::time::sleep(Duration::from_secs(20)).await;
    handle.stop().await;
    handle.wait().await;

    assert_eq!(inference.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(inference.calls.load(Ordering::SeqCst) >= 5);
}

#[tokio::test(start_paused = true)]
async fn test_bounded_session_stops_after_max_samples() {
    let inference = CountingInference::new(Duration::from_millis(50), Ok("Cars parked".into()));
    let handle = start(
        Subject::File {
            path: "/data/lot.mp4".to_string(),
        },
        500,
        Some(10),
        // Plenty of playback left after ten samples
        pipeline(Arc::new(PausedClockSource::new(Some(600.0))), inference.clone(), None),
    );

    assert_eq!(handle.wait().await, SessionState::Stopped);
    let info = handle.info(false).await.unwrap();
    assert_eq!(info.sample_count, 10);
    assert_eq!(inference.calls.load(Ordering::SeqCst), 10);
}

#[tokio::test(start_paused = true)]
async fn test_file_session_stops_at_end_of_source() {
    let inference = CountingInference::new(Duration::ZERO, Ok("Cars parked".into()));
    let handle = start(
        Subject::File {
            path: "/data/short.mp4".to_string(),
        },
        1000,
        Some(10),
        pipeline(Arc::new(PausedClockSource::new(Some(3.5))), inference, None),
    );

    assert_eq!(handle.wait().await, SessionState::Stopped);
    let info = handle.info(false).await.unwrap();
    assert_eq!(info.sample_count, 4);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_inference_discards_late_result() {
    let inference = CountingInference::new(Duration::from_secs(10), Ok("Intruder at the gate".into()));
    let store = Arc::new(MemoryDataStore::new());
    let derivation = (
        EventDeriver::new(store.clone()),
        DerivationContext {
            camera_name: "Main Entrance".to_string(),
            analytic_names: vec![],
            video_reference: "/videos/cam1.mp4".to_string(),
        },
    );
    let handle = start(
        camera_subject(),
        2000,
        None,
        pipeline(Arc::new(PausedClockSource::new(None)), inference.clone(), Some(derivation)),
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(inference.in_flight.load(Ordering::SeqCst), 1);

    // stop() must return while the call is still pending
    let before = Instant::now();
    handle.stop().await;
    assert_eq!(before.elapsed(), Duration::ZERO);
    handle.stop().await;

    assert_eq!(handle.wait().await, SessionState::Stopped);
    tokio::time::sleep(Duration::from_secs(30)).await;

    let info = handle.info(true).await.unwrap();
    assert!(info.frames.is_empty());
    assert_eq!(info.sample_count, 0);
    assert_eq!(inference.calls.load(Ordering::SeqCst), 1);
    assert!(store.list_events().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_uses_fallback_and_continues() {
    let inference = CountingInference::new(
        Duration::from_millis(10),
        Err(InferenceError::Unavailable("connection reset".into())),
    );
    let handle = start(
        camera_subject(),
        2000,
        None,
        pipeline(Arc::new(PausedClockSource::new(None)), inference.clone(), None),
    );

    tokio::time::sleep(Duration::from_millis(4500)).await;
    let info = handle.info(true).await.unwrap();
    assert_eq!(info.state, SessionState::Running);
    assert_eq!(info.sample_count, 3);
    assert!(info
        .frames
        .iter()
        .all(|f| f.description.as_deref() == Some(FALLBACK_DESCRIPTION)));

    handle.stop().await;
    assert_eq!(handle.wait().await, SessionState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_inference_timeout_is_transient() {
    let inference = CountingInference::new(Duration::from_secs(60), Ok("too late".into()));
    let handle = start(
        camera_subject(),
        2000,
        None,
        pipeline(Arc::new(PausedClockSource::new(None)), inference.clone(), None),
    );

    tokio::time::sleep(Duration::from_secs(21)).await;
    let info = handle.info(true).await.unwrap();
    assert_eq!(info.state, SessionState::Running);
    assert_eq!(info.sample_count, 1);
    assert_eq!(info.frames[0].description.as_deref(), Some(FALLBACK_DESCRIPTION));

    handle.stop().await;
    handle.wait().await;
}

#[tokio::test(start_paused = true)]
async fn test_authentication_failure_errors_session() {
    let inference = CountingInference::new(
        Duration::from_millis(10),
        Err(InferenceError::Unauthenticated("API key not valid".into())),
    );
    let handle = start(
        camera_subject(),
        2000,
        None,
        pipeline(Arc::new(PausedClockSource::new(None)), inference.clone(), None),
    );

    assert_eq!(handle.wait().await, SessionState::Errored);
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(inference.calls.load(Ordering::SeqCst), 1);
    let info = handle.info(false).await.unwrap();
    assert!(info.last_error.unwrap().contains("API key not valid"));
    assert!(info.stopped_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_api_key_errors_session() {
    let body = r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT","details":[{"reason":"API_KEY_INVALID"}]}}"#;
    let inference = CountingInference::new(
        Duration::from_millis(10),
        Err(classify_status(StatusCode::BAD_REQUEST, body.to_string())),
    );
    let handle = start(
        camera_subject(),
        2000,
        None,
        pipeline(Arc::new(PausedClockSource::new(None)), inference.clone(), None),
    );

    assert_eq!(handle.wait().await, SessionState::Errored);
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(inference.calls.load(Ordering::SeqCst), 1);
    let info = handle.info(true).await.unwrap();
    assert!(info.frames.is_empty());
    assert!(info.last_error.unwrap().contains("API_KEY_INVALID"));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_model_errors_session() {
    let inference = CountingInference::new(
        Duration::from_millis(10),
        Err(classify_status(
            StatusCode::NOT_FOUND,
            "models/gemini-x is not found".to_string(),
        )),
    );
    let handle = start(
        camera_subject(),
        2000,
        None,
        pipeline(Arc::new(PausedClockSource::new(None)), inference.clone(), None),
    );

    assert_eq!(handle.wait().await, SessionState::Errored);
    assert_eq!(inference.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_live_events_derived_with_severity() {
    let inference = CountingInference::new(Duration::ZERO, Ok("An intruder with fire nearby".into()));
    let store = Arc::new(MemoryDataStore::new());
    let derivation = (
        EventDeriver::new(store.clone()),
        DerivationContext {
            camera_name: "Server Room".to_string(),
            analytic_names: vec!["Fire & Smoke Detection".to_string()],
            video_reference: "/videos/cam4.mp4".to_string(),
        },
    );
    let handle = start(
        camera_subject(),
        2000,
        None,
        pipeline(Arc::new(PausedClockSource::new(None)), inference, Some(derivation)),
    );

    tokio::time::sleep(Duration::from_millis(2500)).await;
    handle.stop().await;
    handle.wait().await;

    let events = store.list_events().await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.severity == Severity::Critical));
    assert_eq!(events[0].analytic_name, "Fire & Smoke Detection");
    assert_eq!(events[0].video_reference, "/videos/cam4.mp4");
    assert_eq!(handle.info(false).await.unwrap().events_derived, 2);
}

#[tokio::test(start_paused = true)]
async fn test_no_trigger_no_event() {
    let inference = CountingInference::new(Duration::ZERO, Ok("A person walks through the lobby".into()));
    let store = Arc::new(MemoryDataStore::new());
    let derivation = (
        EventDeriver::new(store.clone()),
        DerivationContext {
            camera_name: "Main Entrance".to_string(),
            analytic_names: vec![],
            video_reference: "/videos/cam1.mp4".to_string(),
        },
    );
    let handle = start(
        camera_subject(),
        2000,
        None,
        pipeline(Arc::new(PausedClockSource::new(None)), inference, Some(derivation)),
    );

    tokio::time::sleep(Duration::from_millis(4500)).await;
    handle.stop().await;
    handle.wait().await;

    assert!(store.list_events().await.unwrap().is_empty());
    assert_eq!(handle.info(false).await.unwrap().sample_count, 3);
}

#[tokio::test]
async fn test_start_without_subject_rejected() {
    let session = AnalysisSession::new(
        "session-1",
        None,
        SessionConfig {
            sample_interval: Duration::from_secs(2),
            max_samples: None,
        },
    );
    let inference = CountingInference::new(Duration::ZERO, Ok(String::new()));
    let result = AnalysisHandle::spawn(
        session,
        pipeline(Arc::new(PausedClockSource::new(None)), inference.clone(), None),
    );
    assert!(result.is_err());
    assert_eq!(inference.calls.load(Ordering::SeqCst), 0);
}
