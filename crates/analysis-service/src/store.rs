//! Camera, analytic and report-event repository.
//!
//! [`DataStore`] is the injected repository the rest of the service talks to.
//! Every collection can be observed through a [`Subscription`] that yields a
//! full ordered snapshot after each change.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::cameras::{Analytic, Camera, CameraStatus, NewCamera, DEFAULT_VIDEO_URL};
use common::events::{NewReportEvent, ReportEvent, Severity};
use std::collections::HashMap;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid {0}")]
    Invalid(String),
}

impl StoreError {
    fn camera(id: &str) -> Self {
        StoreError::NotFound {
            kind: "camera",
            id: id.to_string(),
        }
    }

    fn analytic(id: &str) -> Self {
        StoreError::NotFound {
            kind: "analytic",
            id: id.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Live view of a collection. Dropping it unsubscribes.
pub struct Subscription<T> {
    rx: watch::Receiver<Vec<T>>,
}

impl<T: Clone> Subscription<T> {
    /// Latest snapshot without waiting
    pub fn snapshot(&self) -> Vec<T> {
        self.rx.borrow().clone()
    }

    /// Wait for the next change and return the new snapshot; `None` once the store is gone
    pub async fn changed(&mut self) -> Option<Vec<T>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    pub fn unsubscribe(self) {}
}

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Cameras ordered by name
    async fn list_cameras(&self) -> StoreResult<Vec<Camera>>;
    async fn get_camera(&self, id: &str) -> StoreResult<Camera>;
    async fn create_camera(&self, camera: NewCamera) -> StoreResult<Camera>;
    async fn update_camera(&self, camera: Camera) -> StoreResult<Camera>;
    async fn delete_camera(&self, id: &str) -> StoreResult<()>;

    /// Analytics ordered by name
    async fn list_analytics(&self) -> StoreResult<Vec<Analytic>>;
    async fn get_analytic(&self, id: &str) -> StoreResult<Analytic>;
    async fn create_analytic(&self, analytic: Analytic) -> StoreResult<Analytic>;

    /// Make exactly `camera_ids` carry the analytic
    async fn apply_analytic(&self, analytic_id: &str, camera_ids: &[String]) -> StoreResult<()>;

    /// Events, newest first
    async fn list_events(&self) -> StoreResult<Vec<ReportEvent>>;
    async fn create_event(&self, event: NewReportEvent) -> StoreResult<ReportEvent>;

    fn subscribe_cameras(&self) -> Subscription<Camera>;
    fn subscribe_analytics(&self) -> Subscription<Analytic>;
    fn subscribe_events(&self) -> Subscription<ReportEvent>;
}

#[derive(Default)]
struct StoreInner {
    cameras: HashMap<String, Camera>,
    analytics: HashMap<String, Analytic>,
    events: Vec<ReportEvent>,
}

impl StoreInner {
    fn camera_snapshot(&self) -> Vec<Camera> {
        let mut cameras: Vec<Camera> = self.cameras.values().cloned().collect();
        cameras.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        cameras
    }

    fn analytic_snapshot(&self) -> Vec<Analytic> {
        let mut analytics: Vec<Analytic> = self.analytics.values().cloned().collect();
        analytics.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        analytics
    }

    fn event_snapshot(&self) -> Vec<ReportEvent> {
        let mut events = self.events.clone();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events
    }
}

/// In-process [`DataStore`]
pub struct MemoryDataStore {
    inner: RwLock<StoreInner>,
    cameras_tx: watch::Sender<Vec<Camera>>,
    analytics_tx: watch::Sender<Vec<Analytic>>,
    events_tx: watch::Sender<Vec<ReportEvent>>,
}

impl Default for MemoryDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            cameras_tx: watch::channel(Vec::new()).0,
            analytics_tx: watch::channel(Vec::new()).0,
            events_tx: watch::channel(Vec::new()).0,
        }
    }

    fn publish_cameras(&self, inner: &StoreInner) {
        self.cameras_tx.send_replace(inner.camera_snapshot());
    }

    fn publish_analytics(&self, inner: &StoreInner) {
        self.analytics_tx.send_replace(inner.analytic_snapshot());
    }

    fn publish_events(&self, inner: &StoreInner) {
        self.events_tx.send_replace(inner.event_snapshot());
    }

    /// Populate the demo catalog; each collection is only seeded when empty
    pub async fn seed_defaults(&self) {
        let mut inner = self.inner.write().await;

        if inner.cameras.is_empty() {
            tracing::info!("Populating initial cameras");
            let cameras = [
                ("Main Entrance", "Lobby", "192.168.1.101", CameraStatus::Online, "/videos/cam1.mp4"),
                ("Warehouse Aisle 3", "Warehouse", "192.168.1.102", CameraStatus::Recording, "/videos/cam2.mp4"),
                ("Loading Dock", "Exterior", "192.168.1.103", CameraStatus::Offline, "/videos/cam3.mp4"),
                ("Server Room", "Data Center", "192.168.1.104", CameraStatus::Online, "/videos/cam4.mp4"),
            ];
            for (name, location, ip, status, video) in cameras {
                let id = Uuid::new_v4().to_string();
                inner.cameras.insert(
                    id.clone(),
                    Camera {
                        id,
                        name: name.to_string(),
                        location: location.to_string(),
                        ip_address: ip.to_string(),
                        status,
                        video_url: video.to_string(),
                        analytic_ids: Vec::new(),
                    },
                );
            }
            self.publish_cameras(&inner);
        }

        if inner.analytics.is_empty() {
            tracing::info!("Populating initial analytics");
            let analytics = [
                ("FaceRecognition", "Facial Recognition", "Identifies known individuals and detects unknown faces.", "1.2.0", "FaceRecognitionIcon", &["Security", "Access Control"][..]),
                ("LPR", "License Plate Recognition (LPR)", "Reads and logs vehicle license plates for vehicle tracking.", "2.0.1", "LPROIcon", &["Traffic", "Parking"][..]),
                ("ObjectDetection", "Object Detection & Tracking", "Detects and tracks specific objects within the video feed.", "1.5.3", "ObjectDetectionIcon", &["Inventory", "Safety"][..]),
                ("AnomalyDetection", "Behavioral Anomaly Detection", "Flags unusual activities or deviations from normal patterns.", "1.0.0", "AnomalyDetectionIcon", &["Security", "Compliance"][..]),
                ("FireSmokeDetection", "Fire & Smoke Detection", "Detects presence of fire or smoke for early warning.", "1.1.0", "DefaultAnalyticIcon", &["Safety", "Emergency"][..]),
                ("IntrusionDetection", "Intrusion Detection", "Alerts on unauthorized entry into defined zones.", "1.0.5", "DefaultAnalyticIcon", &["Security", "Perimeter"][..]),
            ];
            for (id, name, description, version, icon, tags) in analytics {
                inner.analytics.insert(
                    id.to_string(),
                    Analytic {
                        id: id.to_string(),
                        name: name.to_string(),
                        description: description.to_string(),
                        version: version.to_string(),
                        icon_name: icon.to_string(),
                        tags: tags.iter().map(|t| t.to_string()).collect(),
                    },
                );
            }
            self.publish_analytics(&inner);
        }

        if inner.events.is_empty() {
            tracing::info!("Populating initial events");
            let now = Utc::now();
            let events = [
                (1, "Main Entrance", "Facial Recognition", Severity::High, "/videos/event1.mp4", "Unknown person detected entering restricted area."),
                (2, "Warehouse Aisle 3", "Object Detection & Tracking", Severity::Low, "/videos/event2.mp4", "Pallet moved to incorrect location."),
                (3, "Loading Dock", "License Plate Recognition (LPR)", Severity::Medium, "/videos/event3.mp4", "Vehicle without registered plate detected."),
                (4, "Server Room", "Behavioral Anomaly Detection", Severity::Critical, "/videos/event4.mp4", "Unusual activity detected after hours."),
            ];
            for (hours_ago, camera, analytic, severity, video, details) in events {
                inner.events.push(ReportEvent {
                    id: Uuid::new_v4().to_string(),
                    timestamp: now - Duration::hours(hours_ago),
                    camera_name: camera.to_string(),
                    analytic_name: analytic.to_string(),
                    severity,
                    video_reference: video.to_string(),
                    details: details.to_string(),
                });
            }
            self.publish_events(&inner);
        }
    }
}

fn dedup_ids(ids: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn list_cameras(&self) -> StoreResult<Vec<Camera>> {
        Ok(self.inner.read().await.camera_snapshot())
    }

    async fn get_camera(&self, id: &str) -> StoreResult<Camera> {
        let inner = self.inner.read().await;
        inner.cameras.get(id).cloned().ok_or_else(|| StoreError::camera(id))
    }

    async fn create_camera(&self, camera: NewCamera) -> StoreResult<Camera> {
        if camera.name.trim().is_empty() {
            return Err(StoreError::Invalid("camera name".to_string()));
        }

        let record = Camera {
            id: Uuid::new_v4().to_string(),
            name: camera.name,
            location: camera.location,
            ip_address: camera.ip_address,
            status: CameraStatus::Offline,
            video_url: camera
                .video_url
                .filter(|url| !url.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_VIDEO_URL.to_string()),
            analytic_ids: Vec::new(),
        };

        let mut inner = self.inner.write().await;
        inner.cameras.insert(record.id.clone(), record.clone());
        self.publish_cameras(&inner);
        Ok(record)
    }

    async fn update_camera(&self, mut camera: Camera) -> StoreResult<Camera> {
        if camera.name.trim().is_empty() {
            return Err(StoreError::Invalid("camera name".to_string()));
        }
        dedup_ids(&mut camera.analytic_ids);

        let mut inner = self.inner.write().await;
        let slot = inner
            .cameras
            .get_mut(&camera.id)
            .ok_or_else(|| StoreError::camera(&camera.id))?;
        *slot = camera.clone();
        self.publish_cameras(&inner);
        Ok(camera)
    }

    async fn delete_camera(&self, id: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.cameras.remove(id).ok_or_else(|| StoreError::camera(id))?;
        self.publish_cameras(&inner);
        Ok(())
    }

    async fn list_analytics(&self) -> StoreResult<Vec<Analytic>> {
        Ok(self.inner.read().await.analytic_snapshot())
    }

    async fn get_analytic(&self, id: &str) -> StoreResult<Analytic> {
        let inner = self.inner.read().await;
        inner
            .analytics
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::analytic(id))
    }

    async fn create_analytic(&self, analytic: Analytic) -> StoreResult<Analytic> {
        if analytic.id.trim().is_empty() || analytic.name.trim().is_empty() {
            return Err(StoreError::Invalid("analytic id or name".to_string()));
        }
        let mut inner = self.inner.write().await;
        inner.analytics.insert(analytic.id.clone(), analytic.clone());
        self.publish_analytics(&inner);
        Ok(analytic)
    }

    async fn apply_analytic(&self, analytic_id: &str, camera_ids: &[String]) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.analytics.contains_key(analytic_id) {
            return Err(StoreError::analytic(analytic_id));
        }
        if let Some(missing) = camera_ids.iter().find(|id| !inner.cameras.contains_key(*id)) {
            return Err(StoreError::camera(missing));
        }

        let mut changed = false;
        for camera in inner.cameras.values_mut() {
            let wanted = camera_ids.iter().any(|id| *id == camera.id);
            let has = camera.has_analytic(analytic_id);
            if wanted && !has {
                camera.analytic_ids.push(analytic_id.to_string());
                changed = true;
            } else if !wanted && has {
                camera.analytic_ids.retain(|id| id != analytic_id);
                changed = true;
            }
        }

        if changed {
            self.publish_cameras(&inner);
        }
        Ok(())
    }

    async fn list_events(&self) -> StoreResult<Vec<ReportEvent>> {
        Ok(self.inner.read().await.event_snapshot())
    }

    async fn create_event(&self, event: NewReportEvent) -> StoreResult<ReportEvent> {
        let record = ReportEvent {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            camera_name: event.camera_name,
            analytic_name: event.analytic_name,
            severity: event.severity,
            video_reference: event.video_reference,
            details: event.details,
        };

        let mut inner = self.inner.write().await;
        inner.events.push(record.clone());
        self.publish_events(&inner);
        Ok(record)
    }

    fn subscribe_cameras(&self) -> Subscription<Camera> {
        Subscription {
            rx: self.cameras_tx.subscribe(),
        }
    }

    fn subscribe_analytics(&self) -> Subscription<Analytic> {
        Subscription {
            rx: self.analytics_tx.subscribe(),
        }
    }

    fn subscribe_events(&self) -> Subscription<ReportEvent> {
        Subscription {
            rx: self.events_tx.subscribe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_camera(name: &str) -> NewCamera {
        NewCamera {
            name: name.to_string(),
            location: "Lobby".to_string(),
            ip_address: "10.0.0.1".to_string(),
            video_url: None,
        }
    }

    fn analytic(id: &str, name: &str) -> Analytic {
        Analytic {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            version: "1.0.0".to_string(),
            icon_name: String::new(),
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn test_create_camera_applies_defaults() {
        let store = MemoryDataStore::new();
        let camera = store.create_camera(new_camera("Lobby")).await.unwrap();
        assert_eq!(camera.status, CameraStatus::Offline);
        assert_eq!(camera.video_url, DEFAULT_VIDEO_URL);
        assert!(camera.analytic_ids.is_empty());
        assert_eq!(store.get_camera(&camera.id).await.unwrap(), camera);
    }

    #[tokio::test]
    async fn test_cameras_listed_by_name() {
        let store = MemoryDataStore::new();
        store.create_camera(new_camera("Server Room")).await.unwrap();
        store.create_camera(new_camera("Loading Dock")).await.unwrap();
        let names: Vec<String> = store
            .list_cameras()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Loading Dock", "Server Room"]);
    }

    #[tokio::test]
    async fn test_update_and_delete_unknown_camera() {
        let store = MemoryDataStore::new();
        let mut camera = store.create_camera(new_camera("Lobby")).await.unwrap();
        store.delete_camera(&camera.id).await.unwrap();

        camera.name = "Renamed".to_string();
        assert!(matches!(
            store.update_camera(camera.clone()).await,
            Err(StoreError::NotFound { kind: "camera", .. })
        ));
        assert!(store.delete_camera(&camera.id).await.is_err());
    }

    #[tokio::test]
    async fn test_apply_analytic_adds_and_removes() {
        let store = MemoryDataStore::new();
        store
            .create_analytic(analytic("LPR", "License Plate Recognition (LPR)"))
            .await
            .unwrap();
        let a = store.create_camera(new_camera("A")).await.unwrap();
        let b = store.create_camera(new_camera("B")).await.unwrap();

        store
            .apply_analytic("LPR", &[a.id.clone(), b.id.clone()])
            .await
            .unwrap();
        assert!(store.get_camera(&a.id).await.unwrap().has_analytic("LPR"));
        assert!(store.get_camera(&b.id).await.unwrap().has_analytic("LPR"));

        store.apply_analytic("LPR", &[b.id.clone()]).await.unwrap();
        assert!(!store.get_camera(&a.id).await.unwrap().has_analytic("LPR"));
        let b = store.get_camera(&b.id).await.unwrap();
        assert_eq!(b.analytic_ids, vec!["LPR".to_string()]);

        assert!(store.apply_analytic("missing", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_events_newest_first() {
        let store = MemoryDataStore::new();
        store.seed_defaults().await;
        let created = store
            .create_event(NewReportEvent {
                camera_name: "Lobby".to_string(),
                analytic_name: "General Anomaly".to_string(),
                severity: Severity::Medium,
                video_reference: "/videos/default.mp4".to_string(),
                details: "Live analysis detected: smoke".to_string(),
            })
            .await
            .unwrap();

        let events = store.list_events().await.unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0].id, created.id);
        assert!(events.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let store = MemoryDataStore::new();
        store.seed_defaults().await;
        store.seed_defaults().await;
        assert_eq!(store.list_cameras().await.unwrap().len(), 4);
        assert_eq!(store.list_analytics().await.unwrap().len(), 6);
        assert_eq!(store.list_events().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_subscription_receives_snapshots() {
        let store = MemoryDataStore::new();
        let mut cameras = store.subscribe_cameras();
        assert!(cameras.snapshot().is_empty());

        store.create_camera(new_camera("Lobby")).await.unwrap();
        let snapshot = cameras.changed().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "Lobby");

        cameras.unsubscribe();
        // Publishing without subscribers must still succeed
        store.create_camera(new_camera("Dock")).await.unwrap();
        assert_eq!(store.subscribe_cameras().snapshot().len(), 2);
    }
}
