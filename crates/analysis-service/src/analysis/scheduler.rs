//! Cooperative sampling loop.
//!
//! Each tick runs at most one extract, infer and derive cycle. The next
//! cycle never begins before the previous inference call settled, so a
//! session has at most one request in flight.

use super::session::AnalysisSession;
use crate::derivation::{DerivationContext, EventDeriver};
use crate::inference::{InferenceClient, InferenceError};
use common::analysis::{SessionMode, SessionState, FALLBACK_DESCRIPTION};
use common::frame_extractor::{ExtractError, FrameExtractor, VideoSource};
use std::sync::Arc;
use std::time::Duration;
use telemetry::metrics::ANALYSIS_FRAMES;
use tokio::sync::RwLock;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub type SharedSession = Arc<RwLock<AnalysisSession>>;

/// Everything a scheduler needs besides the session itself
#[derive(Clone)]
pub struct SessionPipeline {
    pub source: Arc<dyn VideoSource>,
    pub extractor: FrameExtractor,
    pub inference: Arc<dyn InferenceClient>,
    pub prompt: String,
    /// `None` disables event derivation
    pub derivation: Option<(EventDeriver, DerivationContext)>,
    pub tick_interval: Duration,
    pub inference_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// Interval not elapsed yet
    Waiting,
    /// Source had no frame; retry next tick
    Skipped,
    Sampled { frame_number: u64, described: bool },
    /// Stop arrived during the cycle; its result was dropped
    Discarded,
    Finished(SessionState),
}

pub struct SamplingScheduler {
    session: SharedSession,
    pipeline: SessionPipeline,
    cancel: CancellationToken,
    mode: &'static str,
}

impl SamplingScheduler {
    pub fn new(session: SharedSession, pipeline: SessionPipeline, cancel: CancellationToken, mode: SessionMode) -> Self {
        Self {
            session,
            pipeline,
            cancel,
            mode: match mode {
                SessionMode::Live => "live",
                SessionMode::File => "file",
            },
        }
    }

    /// Drive ticks until the session reaches a terminal state
    pub async fn run(self) -> SessionState {
        let mut ticker = tokio::time::interval(self.pipeline.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let StepOutcome::Finished(state) = self.step().await {
                return state;
            }
        }
        self.finish().await
    }

    async fn finish(&self) -> SessionState {
        let mut session = self.session.write().await;
        session.finish();
        session.state()
    }

    async fn fail(&self, message: String) -> StepOutcome {
        let mut session = self.session.write().await;
        session.fail(message);
        StepOutcome::Finished(session.state())
    }

    /// One tick of the loop
    pub async fn step(&self) -> StepOutcome {
        if self.cancel.is_cancelled() {
            return StepOutcome::Finished(self.finish().await);
        }

        let session_id = {
            let session = self.session.read().await;
            match session.state() {
                SessionState::Running => {}
                SessionState::Stopping => {
                    drop(session);
                    return StepOutcome::Finished(self.finish().await);
                }
                state => return StepOutcome::Finished(state),
            }
            if !session.has_capacity() {
                drop(session);
                return StepOutcome::Finished(self.finish().await);
            }
            if !session.interval_elapsed(Instant::now()) {
                return StepOutcome::Waiting;
            }
            session.id().to_string()
        };

        if self.pipeline.source.ended() {
            info!(session_id = %session_id, "Video source ended");
            return StepOutcome::Finished(self.finish().await);
        }

        let extracted = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return StepOutcome::Discarded,
            result = self.pipeline.extractor.extract(self.pipeline.source.as_ref()) => result,
        };
        let frame = match extracted {
            Ok(frame) => frame,
            Err(ExtractError::SourceNotReady) => {
                debug!(session_id = %session_id, "Source not ready, skipping tick");
                ANALYSIS_FRAMES.with_label_values(&[self.mode, "skipped"]).inc();
                return StepOutcome::Skipped;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Frame extraction failed");
                return self.fail(e.to_string()).await;
            }
        };

        {
            let mut session = self.session.write().await;
            if !session.accepts_timestamp(frame.timestamp_seconds) {
                debug!(session_id = %session_id, timestamp = frame.timestamp_seconds, "Playback position did not advance");
                ANALYSIS_FRAMES.with_label_values(&[self.mode, "skipped"]).inc();
                return StepOutcome::Skipped;
            }
            session.mark_captured(Instant::now());
        }

        let call = tokio::time::timeout(
            self.pipeline.inference_timeout,
            self.pipeline
                .inference
                .analyze_frame(&frame.jpeg, &self.pipeline.prompt),
        );
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = call => Some(result.unwrap_or(Err(InferenceError::Timeout))),
        };
        let Some(result) = result.filter(|_| !self.cancel.is_cancelled()) else {
            debug!(session_id = %session_id, "Session stopped during inference, result discarded");
            return StepOutcome::Discarded;
        };

        let (description, described) = match result {
            Ok(text) => (text, true),
            Err(e) if e.is_transient() => {
                warn!(session_id = %session_id, error = %e, "Inference failed for frame, using fallback");
                (FALLBACK_DESCRIPTION.to_string(), false)
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Inference failed fatally");
                return self.fail(e.to_string()).await;
            }
        };

        let frame_number = {
            let mut session = self.session.write().await;
            let Some(frame_number) =
                session.record_sample(frame.timestamp_seconds, frame.jpeg, description.clone())
            else {
                return StepOutcome::Discarded;
            };
            frame_number
        };
        ANALYSIS_FRAMES
            .with_label_values(&[self.mode, if described { "described" } else { "fallback" }])
            .inc();
        debug!(session_id = %session_id, frame = frame_number, described, "Frame analyzed");

        if described {
            if let Some((deriver, context)) = &self.pipeline.derivation {
                match deriver.derive_and_record(&description, context).await {
                    Ok(Some(_)) => self.session.write().await.note_event(),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(session_id = %session_id, frame = frame_number, error = %e, "Failed to persist derived event")
                    }
                }
            }
        }

        let mut session = self.session.write().await;
        if !session.has_capacity() {
            info!(session_id = %session_id, samples = session.sample_count(), "Sample bound reached");
            session.finish();
        }

        StepOutcome::Sampled {
            frame_number,
            described,
        }
    }
}
