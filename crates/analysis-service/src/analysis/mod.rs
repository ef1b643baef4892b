pub mod scheduler;
pub mod session;
pub mod sources;

pub use scheduler::{SamplingScheduler, SessionPipeline, SharedSession, StepOutcome};
pub use session::{AnalysisSession, SessionConfig, SessionError};
pub use sources::{FfmpegOpener, SourceOpener};

use common::analysis::{SessionInfo, SessionState, Subject};
use std::sync::Arc;
use telemetry::metrics::ANALYSIS_ACTIVE_SESSIONS;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A started session and its sampling task
pub struct AnalysisHandle {
    id: String,
    subject: Subject,
    session: SharedSession,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<SessionState>>>,
}

impl AnalysisHandle {
    /// Start `session` and spawn its scheduler
    pub fn spawn(mut session: AnalysisSession, pipeline: SessionPipeline) -> Result<Self, SessionError> {
        session.start()?;
        let subject = session
            .subject()
            .cloned()
            .ok_or(SessionError::NoSubjectSelected)?;
        let id = session.id().to_string();

        let shared = Arc::new(RwLock::new(session));
        let cancel = CancellationToken::new();
        let scheduler = SamplingScheduler::new(shared.clone(), pipeline, cancel.clone(), subject.mode());

        ANALYSIS_ACTIVE_SESSIONS.inc();
        info!(session_id = %id, subject = %subject.id(), mode = ?subject.mode(), "Analysis session started");

        let session_id = id.clone();
        let task = tokio::spawn(async move {
            let state = scheduler.run().await;
            ANALYSIS_ACTIVE_SESSIONS.dec();
            info!(session_id = %session_id, ?state, "Analysis session ended");
            state
        });

        Ok(Self {
            id,
            subject,
            session: shared,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub async fn state(&self) -> SessionState {
        self.session.read().await.state()
    }

    /// Request a stop without waiting for an in-flight call
    pub async fn stop(&self) {
        if self.session.write().await.request_stop() {
            info!(session_id = %self.id, "Stop requested");
        }
        self.cancel.cancel();
    }

    /// Wait for the sampling task to end
    pub async fn wait(&self) -> SessionState {
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(session_id = %self.id, error = %e, "Sampling task aborted");
                self.session.write().await.fail(e.to_string());
            }
        }
        self.state().await
    }

    pub async fn info(&self, include_frames: bool) -> Option<SessionInfo> {
        self.session.read().await.info(include_frames)
    }
}
