use chrono::{DateTime, Utc};
use common::analysis::{FrameSample, SessionInfo, SessionState, Subject};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no camera or video file selected")]
    NoSubjectSelected,

    #[error("session already started (state {0:?})")]
    AlreadyStarted(SessionState),

    #[error("session '{0}' not found")]
    NotFound(String),

    #[error("camera '{0}' not found")]
    UnknownCamera(String),

    #[error("'{subject}' is already being analyzed by session {session_id}")]
    SubjectBusy { subject: String, session_id: String },

    #[error("invalid session request: {0}")]
    InvalidRequest(String),

    #[error("video source unavailable: {0}")]
    SourceUnavailable(String),
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Minimum time between captures
    pub sample_interval: Duration,
    /// `None` samples until stopped or the source ends
    pub max_samples: Option<u64>,
}

/// One run of live or file analysis.
///
/// Mutated only by its own scheduler and by stop requests; frames are
/// append-only and numbered contiguously from 1.
#[derive(Debug)]
pub struct AnalysisSession {
    id: String,
    subject: Option<Subject>,
    config: SessionConfig,
    state: SessionState,
    sample_count: u64,
    last_sample_at: Option<Instant>,
    last_sample_wall: Option<DateTime<Utc>>,
    last_timestamp: Option<f64>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    events_derived: u64,
    frames: Vec<FrameSample>,
}

impl AnalysisSession {
    pub fn new(id: impl Into<String>, subject: Option<Subject>, config: SessionConfig) -> Self {
        Self {
            id: id.into(),
            subject,
            config,
            state: SessionState::Idle,
            sample_count: 0,
            last_sample_at: None,
            last_sample_wall: None,
            last_timestamp: None,
            started_at: None,
            stopped_at: None,
            last_error: None,
            events_derived: 0,
            frames: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subject(&self) -> Option<&Subject> {
        self.subject.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn frames(&self) -> &[FrameSample] {
        &self.frames
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.subject.is_none() {
            return Err(SessionError::NoSubjectSelected);
        }
        if self.state != SessionState::Idle {
            return Err(SessionError::AlreadyStarted(self.state));
        }
        self.state = SessionState::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Whether enough time passed since the last capture
    pub fn interval_elapsed(&self, now: Instant) -> bool {
        self.last_sample_at
            .map_or(true, |last| now.saturating_duration_since(last) >= self.config.sample_interval)
    }

    pub fn has_capacity(&self) -> bool {
        self.config
            .max_samples
            .map_or(true, |max| self.sample_count < max)
    }

    /// Frames must move strictly forward in playback time
    pub fn accepts_timestamp(&self, timestamp_seconds: f64) -> bool {
        self.last_timestamp
            .map_or(true, |last| timestamp_seconds > last)
    }

    /// Gate the next capture from a successful extraction
    pub fn mark_captured(&mut self, now: Instant) {
        self.last_sample_at = Some(now);
        self.last_sample_wall = Some(Utc::now());
    }

    /// Append an analyzed frame. Refused unless running, so late results are dropped.
    pub fn record_sample(
        &mut self,
        timestamp_seconds: f64,
        image_data: Vec<u8>,
        description: String,
    ) -> Option<u64> {
        if self.state != SessionState::Running || !self.has_capacity() {
            return None;
        }
        if !self.accepts_timestamp(timestamp_seconds) {
            return None;
        }

        let frame_number = self.sample_count + 1;
        self.frames.push(FrameSample {
            frame_number,
            timestamp_seconds,
            image_data,
            description: Some(description),
        });
        self.sample_count = frame_number;
        self.last_timestamp = Some(timestamp_seconds);
        Some(frame_number)
    }

    pub fn note_event(&mut self) {
        self.events_derived += 1;
    }

    /// Idempotent. Returns whether the state changed.
    pub fn request_stop(&mut self) -> bool {
        match self.state {
            SessionState::Running => {
                self.state = SessionState::Stopping;
                true
            }
            SessionState::Idle => {
                self.state = SessionState::Stopped;
                self.stopped_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Normal end: stop request honored, sample bound reached or source ended
    pub fn finish(&mut self) {
        if matches!(self.state, SessionState::Running | SessionState::Stopping) {
            self.state = SessionState::Stopped;
            self.stopped_at = Some(Utc::now());
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        if !self.state.is_terminal() {
            self.state = SessionState::Errored;
            self.last_error = Some(message.into());
            self.stopped_at = Some(Utc::now());
        }
    }

    pub fn info(&self, include_frames: bool) -> Option<SessionInfo> {
        let subject = self.subject.clone()?;
        Some(SessionInfo {
            id: self.id.clone(),
            mode: subject.mode(),
            subject,
            state: self.state,
            sample_count: self.sample_count,
            max_samples: self.config.max_samples,
            sample_interval_ms: self.config.sample_interval.as_millis() as u64,
            last_sample_at: self.last_sample_wall,
            started_at: self.started_at,
            stopped_at: self.stopped_at,
            last_error: self.last_error.clone(),
            events_derived: self.events_derived,
            frames: if include_frames {
                self.frames.clone()
            } else {
                Vec::new()
            },
        })
    }
}
