use crate::analysis::{AnalysisHandle, AnalysisSession, SessionConfig, SessionError, SessionPipeline, SourceOpener};
use crate::config::AnalysisSettings;
use crate::derivation::{DerivationContext, EventDeriver};
use crate::inference::{InferenceClient, InferenceError};
use crate::prompt::{build_frame_prompt, BASE_PROMPT};
use crate::store::{DataStore, StoreError};
use crate::video::{VideoAnalysisError, VideoAnalyzer, VideoAnnotator};
use bytes::Bytes;
use common::analysis::{
    decode_image_data, FrameAnalysisRequest, FrameAnalysisResponse, SessionInfo,
    StartSessionRequest, Subject, VideoAnalysisResult,
};
use common::cameras::{Analytic, Camera};
use common::frame_extractor::{FrameExtractor, PlaybackMode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct AnalysisServiceState {
    inner: Arc<AnalysisServiceStateInner>,
}

struct AnalysisServiceStateInner {
    store: Arc<dyn DataStore>,
    inference: Arc<dyn InferenceClient>,
    videos: VideoAnalyzer,
    opener: Arc<dyn SourceOpener>,
    deriver: EventDeriver,
    extractor: FrameExtractor,
    settings: AnalysisSettings,
    sessions: RwLock<HashMap<String, Arc<AnalysisHandle>>>,
    /// Serializes session starts so a subject can't get two live sessions
    start_lock: Mutex<()>,
}

impl AnalysisServiceState {
    pub fn new(
        store: Arc<dyn DataStore>,
        inference: Arc<dyn InferenceClient>,
        annotator: Arc<dyn VideoAnnotator>,
        opener: Arc<dyn SourceOpener>,
        settings: AnalysisSettings,
    ) -> Self {
        Self {
            inner: Arc::new(AnalysisServiceStateInner {
                deriver: EventDeriver::new(store.clone()),
                videos: VideoAnalyzer::new(annotator, settings.staging_dir.clone()),
                store,
                inference,
                opener,
                extractor: FrameExtractor::new(settings.jpeg_quality),
                settings,
                sessions: RwLock::new(HashMap::new()),
                start_lock: Mutex::new(()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.inner.store
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.inner.settings
    }

    async fn with_timeout<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, InferenceError>>,
    ) -> Result<T, InferenceError> {
        tokio::time::timeout(self.inner.settings.inference_timeout, call)
            .await
            .unwrap_or(Err(InferenceError::Timeout))
    }

    /// Round-trip a prompt through the text model
    pub async fn test_connectivity(&self, prompt: &str) -> Result<String, InferenceError> {
        self.with_timeout(self.inner.inference.generate_text(prompt))
            .await
    }

    /// Analytics applied to a camera, or the explicitly requested ones
    async fn resolve_analytics(
        &self,
        camera: Option<&Camera>,
        requested: &[String],
    ) -> Result<Vec<Analytic>, StoreError> {
        let catalog = self.inner.store.list_analytics().await?;
        if !requested.is_empty() {
            return Ok(catalog
                .into_iter()
                .filter(|a| requested.contains(&a.id))
                .collect());
        }
        Ok(camera
            .map(|c| c.applied_analytics(&catalog).into_iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Single cycle of the live loop on a client-captured frame
    pub async fn analyze_frame(
        &self,
        request: FrameAnalysisRequest,
    ) -> Result<FrameAnalysisResponse, InferenceError> {
        let image = decode_image_data(&request.image)
            .map_err(|e| InferenceError::InvalidInput(format!("image is not valid base64: {}", e)))?;
        if image.is_empty() {
            return Err(InferenceError::InvalidInput("image is empty".to_string()));
        }

        let camera = match self.inner.store.get_camera(&request.camera_id).await {
            Ok(camera) => Some(camera),
            Err(StoreError::NotFound { .. }) => None,
            Err(e) => return Err(InferenceError::InvalidInput(e.to_string())),
        };
        let analytics = self
            .resolve_analytics(camera.as_ref(), &request.analytic_ids)
            .await
            .map_err(|e| InferenceError::InvalidInput(e.to_string()))?;
        let prompt = build_frame_prompt(&analytics.iter().collect::<Vec<_>>());

        let description = self
            .with_timeout(self.inner.inference.analyze_frame(&image, &prompt))
            .await?;

        let context = match &camera {
            Some(camera) => DerivationContext {
                camera_name: camera.name.clone(),
                analytic_names: analytics.iter().map(|a| a.name.clone()).collect(),
                video_reference: camera.video_url.clone(),
            },
            None => {
                let camera_name = format!("Camera {}", request.camera_id);
                DerivationContext {
                    video_reference: format!("[Live Stream of {}]", camera_name),
                    camera_name,
                    analytic_names: analytics.iter().map(|a| a.name.clone()).collect(),
                }
            }
        };

        let event = match self.inner.deriver.derive_and_record(&description, &context).await {
            Ok(event) => event,
            Err(e) => {
                warn!(camera_id = %request.camera_id, error = %e, "Failed to persist derived event");
                None
            }
        };

        Ok(FrameAnalysisResponse { description, event })
    }

    pub async fn analyze_video(
        &self,
        file_name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<Vec<VideoAnalysisResult>, VideoAnalysisError> {
        self.inner
            .videos
            .analyze_upload(file_name, content_type, data)
            .await
    }

    async fn build_session(
        &self,
        id: &str,
        subject: &Subject,
        request: &StartSessionRequest,
    ) -> Result<(AnalysisSession, SessionPipeline), SessionError> {
        let settings = &self.inner.settings;
        let sample_interval = match request.sample_interval_ms {
            Some(0) => {
                return Err(SessionError::InvalidRequest(
                    "sample_interval_ms must be positive".to_string(),
                ))
            }
            Some(ms) => Duration::from_millis(ms),
            None => settings.sample_interval,
        };
        if request.max_samples == Some(0) {
            return Err(SessionError::InvalidRequest(
                "max_samples must be positive".to_string(),
            ));
        }

        let (locator, playback, max_samples, prompt, derivation) = match subject {
            Subject::Camera { camera_id } => {
                if request.max_samples.is_some() {
                    return Err(SessionError::InvalidRequest(
                        "max_samples applies only to file sessions".to_string(),
                    ));
                }
                let camera = match self.inner.store.get_camera(camera_id).await {
                    Ok(camera) => camera,
                    Err(StoreError::NotFound { .. }) => {
                        return Err(SessionError::UnknownCamera(camera_id.clone()))
                    }
                    Err(e) => return Err(SessionError::InvalidRequest(e.to_string())),
                };
                let analytics = self
                    .resolve_analytics(Some(&camera), &[])
                    .await
                    .map_err(|e| SessionError::InvalidRequest(e.to_string()))?;
                let context = DerivationContext {
                    camera_name: camera.name.clone(),
                    analytic_names: analytics.iter().map(|a| a.name.clone()).collect(),
                    video_reference: camera.video_url.clone(),
                };
                (
                    camera.video_url.clone(),
                    PlaybackMode::Live,
                    None,
                    build_frame_prompt(&analytics.iter().collect::<Vec<_>>()),
                    Some((self.inner.deriver.clone(), context)),
                )
            }
            Subject::File { path } => (
                path.clone(),
                PlaybackMode::Once,
                Some(request.max_samples.unwrap_or(settings.file_max_samples)),
                BASE_PROMPT.to_string(),
                None,
            ),
        };

        let source = self
            .inner
            .opener
            .open(&locator, playback)
            .await
            .map_err(|e| SessionError::SourceUnavailable(format!("{}: {:#}", locator, e)))?;

        let session = AnalysisSession::new(
            id,
            Some(subject.clone()),
            SessionConfig {
                sample_interval,
                max_samples,
            },
        );
        let pipeline = SessionPipeline {
            source,
            extractor: self.inner.extractor,
            inference: self.inner.inference.clone(),
            prompt,
            derivation,
            tick_interval: settings.tick_interval,
            inference_timeout: settings.inference_timeout,
        };
        Ok((session, pipeline))
    }

    /// Start a live or file session; a subject may only have one non-terminal session
    pub async fn start_session(&self, request: StartSessionRequest) -> Result<SessionInfo, SessionError> {
        let subject = request.subject().ok_or(SessionError::NoSubjectSelected)?;
        let _guard = self.inner.start_lock.lock().await;
        self.prune_finished().await;

        let mut replaced = Vec::new();
        {
            let sessions = self.inner.sessions.read().await;
            for handle in sessions.values().filter(|h| h.subject() == &subject) {
                if handle.state().await.is_terminal() {
                    replaced.push(handle.id().to_string());
                } else {
                    return Err(SessionError::SubjectBusy {
                        subject: subject.id().to_string(),
                        session_id: handle.id().to_string(),
                    });
                }
            }
        }

        let id = Uuid::new_v4().to_string();
        let (session, pipeline) = self.build_session(&id, &subject, &request).await?;
        let handle = Arc::new(AnalysisHandle::spawn(session, pipeline)?);
        let info = handle
            .info(false)
            .await
            .ok_or(SessionError::NoSubjectSelected)?;

        let mut sessions = self.inner.sessions.write().await;
        for old in replaced {
            sessions.remove(&old);
        }
        sessions.insert(id, handle);
        Ok(info)
    }

    /// Evict the oldest terminal sessions beyond `max_finished_sessions`
    async fn prune_finished(&self) {
        let handles: Vec<Arc<AnalysisHandle>> =
            self.inner.sessions.read().await.values().cloned().collect();
        let mut finished = Vec::new();
        for handle in handles {
            if let Some(info) = handle.info(false).await {
                if info.state.is_terminal() {
                    finished.push((info.stopped_at, info.id));
                }
            }
        }

        let keep = self.inner.settings.max_finished_sessions;
        if finished.len() <= keep {
            return;
        }
        finished.sort();
        let evict = finished.len() - keep;
        let mut sessions = self.inner.sessions.write().await;
        for (_, id) in finished.into_iter().take(evict) {
            sessions.remove(&id);
        }
        debug!(evicted = evict, retained = keep, "Pruned finished analysis sessions");
    }

    pub async fn get_session(&self, id: &str, include_frames: bool) -> Result<SessionInfo, SessionError> {
        let handle = self.handle(id).await?;
        handle
            .info(include_frames)
            .await
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let handles: Vec<Arc<AnalysisHandle>> =
            self.inner.sessions.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(info) = handle.info(false).await {
                infos.push(info);
            }
        }
        infos.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        infos
    }

    /// Idempotent; does not wait for an in-flight inference call
    pub async fn stop_session(&self, id: &str) -> Result<SessionInfo, SessionError> {
        let handle = self.handle(id).await?;
        handle.stop().await;
        handle
            .info(false)
            .await
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    async fn handle(&self, id: &str) -> Result<Arc<AnalysisHandle>, SessionError> {
        self.inner
            .sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Stop every session and wait for their loops to exit
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<AnalysisHandle>> =
            self.inner.sessions.read().await.values().cloned().collect();
        info!(sessions = handles.len(), "Stopping analysis sessions");
        for handle in &handles {
            handle.stop().await;
        }
        for handle in &handles {
            handle.wait().await;
        }
    }
}
