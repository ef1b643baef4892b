//! Turns free-text frame descriptions into report events.

use crate::store::{DataStore, StoreResult};
use common::events::{NewReportEvent, ReportEvent, Severity};
use std::sync::Arc;
use telemetry::metrics::ANALYSIS_EVENTS_DERIVED;

/// Analytic name used when no analytic is applied to the camera
pub const FALLBACK_ANALYTIC_NAME: &str = "General Anomaly";

/// Words that make a description reportable
pub const TRIGGER_WORDS: &[&str] = &["unusual", "alert", "intruder", "fire", "smoke", "suspicious"];

/// Decides whether a description is reportable and how severe it is
pub trait EventClassifier: Send + Sync {
    fn classify(&self, description: &str) -> Option<Severity>;
}

/// Case-insensitive substring matching against [`TRIGGER_WORDS`].
///
/// Severity: "critical" or "fire" is critical, then "high priority" or
/// "intruder" is high, anything else that triggers is medium. Never low.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordClassifier;

impl EventClassifier for KeywordClassifier {
    fn classify(&self, description: &str) -> Option<Severity> {
        let text = description.to_lowercase();
        if !TRIGGER_WORDS.iter().any(|word| text.contains(word)) {
            return None;
        }

        let severity = if text.contains("critical") || text.contains("fire") {
            Severity::Critical
        } else if text.contains("high priority") || text.contains("intruder") {
            Severity::High
        } else {
            Severity::Medium
        };
        Some(severity)
    }
}

/// Subject details attached to a derived event
#[derive(Debug, Clone)]
pub struct DerivationContext {
    pub camera_name: String,
    /// Applied analytic names in catalog order
    pub analytic_names: Vec<String>,
    /// Live-stream locator of the camera
    pub video_reference: String,
}

#[derive(Clone)]
pub struct EventDeriver {
    classifier: Arc<dyn EventClassifier>,
    store: Arc<dyn DataStore>,
}

impl EventDeriver {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self::with_classifier(store, Arc::new(KeywordClassifier))
    }

    pub fn with_classifier(store: Arc<dyn DataStore>, classifier: Arc<dyn EventClassifier>) -> Self {
        Self { classifier, store }
    }

    /// Build the event for a description, without persisting it
    pub fn derive(&self, description: &str, context: &DerivationContext) -> Option<NewReportEvent> {
        let severity = self.classifier.classify(description)?;
        Some(NewReportEvent {
            camera_name: context.camera_name.clone(),
            analytic_name: context
                .analytic_names
                .first()
                .cloned()
                .unwrap_or_else(|| FALLBACK_ANALYTIC_NAME.to_string()),
            severity,
            video_reference: context.video_reference.clone(),
            details: format!("Live analysis detected: {}", description),
        })
    }

    /// Derive and persist at most one event for a description
    pub async fn derive_and_record(
        &self,
        description: &str,
        context: &DerivationContext,
    ) -> StoreResult<Option<ReportEvent>> {
        let Some(event) = self.derive(description, context) else {
            return Ok(None);
        };

        let severity = event.severity;
        let created = self.store.create_event(event).await?;
        ANALYSIS_EVENTS_DERIVED
            .with_label_values(&[&severity.to_string()])
            .inc();
        tracing::info!(
            event_id = %created.id,
            camera = %created.camera_name,
            analytic = %created.analytic_name,
            severity = %severity,
            "Report event derived"
        );
        Ok(Some(created))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDataStore;

    fn context(analytics: &[&str]) -> DerivationContext {
        DerivationContext {
            camera_name: "Main Entrance".to_string(),
            analytic_names: analytics.iter().map(|s| s.to_string()).collect(),
            video_reference: "/videos/cam1.mp4".to_string(),
        }
    }

    #[test]
    fn test_severity_priority() {
        let c = KeywordClassifier;
        assert_eq!(c.classify("An intruder with fire nearby"), Some(Severity::Critical));
        assert_eq!(c.classify("Critical: smoke in the aisle"), Some(Severity::Critical));
        assert_eq!(c.classify("INTRUDER at the gate"), Some(Severity::High));
        assert_eq!(c.classify("Suspicious package, high priority"), Some(Severity::High));
        assert_eq!(c.classify("Unusual gathering near the door"), Some(Severity::Medium));
        assert_eq!(c.classify("A person walks through the lobby"), None);
    }

    #[test]
    fn test_critical_word_alone_does_not_trigger() {
        assert_eq!(KeywordClassifier.classify("critical infrastructure looks normal"), None);
    }

    #[test]
    fn test_substring_matching() {
        // "alert" inside "alerted" and "fire" inside "firearm" both count
        assert_eq!(KeywordClassifier.classify("The guard was alerted"), Some(Severity::Medium));
        assert_eq!(KeywordClassifier.classify("A firearm on the desk"), Some(Severity::Critical));
    }

    #[test]
    fn test_derive_fields() {
        let deriver = EventDeriver::new(Arc::new(MemoryDataStore::new()));
        let event = deriver
            .derive("Smoke rising from a bin", &context(&["Fire & Smoke Detection", "Intrusion Detection"]))
            .unwrap();
        assert_eq!(event.analytic_name, "Fire & Smoke Detection");
        assert_eq!(event.severity, Severity::Medium);
        assert_eq!(event.video_reference, "/videos/cam1.mp4");
        assert_eq!(event.details, "Live analysis detected: Smoke rising from a bin");

        let event = deriver.derive("fire alarm", &context(&[])).unwrap();
        assert_eq!(event.analytic_name, FALLBACK_ANALYTIC_NAME);
    }

    #[tokio::test]
    async fn test_derive_and_record_persists_once() {
        let store = Arc::new(MemoryDataStore::new());
        let deriver = EventDeriver::new(store.clone());

        let none = deriver
            .derive_and_record("Empty corridor", &context(&[]))
            .await
            .unwrap();
        assert!(none.is_none());

        let created = deriver
            .derive_and_record("Intruder on the roof", &context(&[]))
            .await
            .unwrap()
            .unwrap();
        let events = store.list_events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, created.id);
        assert_eq!(events[0].severity, Severity::High);
    }

    struct Always(Severity);

    impl EventClassifier for Always {
        fn classify(&self, _description: &str) -> Option<Severity> {
            Some(self.0)
        }
    }

    #[test]
    fn test_classifier_is_pluggable() {
        let deriver = EventDeriver::with_classifier(
            Arc::new(MemoryDataStore::new()),
            Arc::new(Always(Severity::Low)),
        );
        let event = deriver.derive("anything", &context(&[])).unwrap();
        assert_eq!(event.severity, Severity::Low);
    }
}
