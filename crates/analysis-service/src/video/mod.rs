//! Whole-file video analysis.
//!
//! Uploads are staged on disk, handed to a [`VideoAnnotator`] and the
//! returned shot, label and explicit-content annotations are normalized into
//! one ordered list of [`VideoAnalysisResult`] entries.

pub mod analyzer;
pub mod intelligence;

use crate::inference::InferenceError;
use async_trait::async_trait;
use common::analysis::VideoAnalysisResult;
use std::path::PathBuf;

pub use analyzer::{VideoAnalysisError, VideoAnalyzer};
pub use intelligence::VideoIntelligenceClient;

/// Image locator for entries that carry no extracted still
pub const PLACEHOLDER_IMAGE_URL: &str = "data:image/png;base64,";

pub const NO_INSIGHTS_MESSAGE: &str = "No specific visual insights found by Video Intelligence API for this video. Consider adding more detection features.";

pub const NO_RESULTS_MESSAGE: &str = "No annotation results returned from Video Intelligence API. The video might be too short or have no detectable content for the selected features.";

/// An upload written to the staging directory
#[derive(Debug, Clone)]
pub struct StagedVideo {
    pub path: PathBuf,
    pub content_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Likelihood {
    Unspecified,
    VeryUnlikely,
    Unlikely,
    Possible,
    Likely,
    VeryLikely,
}

impl Likelihood {
    pub fn from_api(value: &str) -> Self {
        match value {
            "VERY_UNLIKELY" => Likelihood::VeryUnlikely,
            "UNLIKELY" => Likelihood::Unlikely,
            "POSSIBLE" => Likelihood::Possible,
            "LIKELY" => Likelihood::Likely,
            "VERY_LIKELY" => Likelihood::VeryLikely,
            _ => Likelihood::Unspecified,
        }
    }

    /// POSSIBLE or stronger
    pub fn is_flagged(self) -> bool {
        matches!(
            self,
            Likelihood::Possible | Likelihood::Likely | Likelihood::VeryLikely
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExplicitFrame {
    pub time_offset_seconds: f64,
    pub likelihood: Likelihood,
}

/// First annotation result of a finished annotation job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoAnnotations {
    /// Start offset of each shot, in service order
    pub shot_starts: Vec<f64>,
    /// Segment label descriptions
    pub labels: Vec<String>,
    pub explicit_frames: Vec<ExplicitFrame>,
}

#[async_trait]
pub trait VideoAnnotator: Send + Sync {
    /// `Ok(None)` when the job finished without any annotation result
    async fn annotate(&self, video: &StagedVideo) -> Result<Option<VideoAnnotations>, InferenceError>;
}

fn entry(timestamp_seconds: f64, description: String) -> VideoAnalysisResult {
    VideoAnalysisResult {
        frame_number: 0,
        timestamp_seconds,
        image_url: PLACEHOLDER_IMAGE_URL.to_string(),
        description,
    }
}

/// Flatten annotations into the ordered result list. Never returns an empty list.
pub fn normalize(annotations: Option<&VideoAnnotations>) -> Vec<VideoAnalysisResult> {
    let Some(annotations) = annotations else {
        return vec![VideoAnalysisResult {
            frame_number: 1,
            ..entry(0.0, NO_RESULTS_MESSAGE.to_string())
        }];
    };

    let mut results: Vec<VideoAnalysisResult> = annotations
        .shot_starts
        .iter()
        .map(|start| entry(*start, format!("Shot detected starting at {} seconds.", start)))
        .collect();

    let labels: Vec<&str> = annotations
        .labels
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();
    if !labels.is_empty() {
        results.push(entry(
            0.0,
            format!("Overall video contains: {}", labels.join("; ")),
        ));
    }

    if let Some(frame) = annotations
        .explicit_frames
        .iter()
        .find(|frame| frame.likelihood.is_flagged())
    {
        results.push(entry(
            frame.time_offset_seconds,
            format!(
                "Potentially explicit content detected at {} seconds.",
                frame.time_offset_seconds
            ),
        ));
    }

    if results.is_empty() {
        results.push(entry(0.0, NO_INSIGHTS_MESSAGE.to_string()));
    }

    // Stable: at equal offsets shots stay ahead of the label summary
    results.sort_by(|a, b| a.timestamp_seconds.total_cmp(&b.timestamp_seconds));
    for (index, result) in results.iter_mut().enumerate() {
        result.frame_number = index as u64 + 1;
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_annotation_result() {
        let results = normalize(None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].frame_number, 1);
        assert_eq!(results[0].description, NO_RESULTS_MESSAGE);
    }

    #[test]
    fn test_empty_annotations_yield_synthetic_entry() {
        let results = normalize(Some(&VideoAnnotations::default()));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].timestamp_seconds, 0.0);
        assert_eq!(results[0].description, NO_INSIGHTS_MESSAGE);
    }

    #[test]
    fn test_ordered_and_renumbered() {
        let annotations = VideoAnnotations {
            shot_starts: vec![0.0, 12.5, 4.0],
            labels: vec!["person".to_string(), "warehouse".to_string(), " ".to_string()],
            explicit_frames: vec![
                ExplicitFrame { time_offset_seconds: 2.0, likelihood: Likelihood::Unlikely },
                ExplicitFrame { time_offset_seconds: 8.0, likelihood: Likelihood::Possible },
                ExplicitFrame { time_offset_seconds: 9.0, likelihood: Likelihood::VeryLikely },
            ],
        };

        let results = normalize(Some(&annotations));
        let descriptions: Vec<&str> = results.iter().map(|r| r.description.as_str()).collect();
        assert_eq!(
            descriptions,
            vec![
                "Shot detected starting at 0 seconds.",
                "Overall video contains: person; warehouse",
                "Shot detected starting at 4 seconds.",
                "Potentially explicit content detected at 8 seconds.",
                "Shot detected starting at 12.5 seconds.",
            ]
        );
        let numbers: Vec<u64> = results.iter().map(|r| r.frame_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert!(results.iter().all(|r| r.image_url == PLACEHOLDER_IMAGE_URL));
    }

    #[test]
    fn test_likelihood_parse() {
        assert_eq!(Likelihood::from_api("LIKELY"), Likelihood::Likely);
        assert_eq!(Likelihood::from_api("LIKELIHOOD_UNSPECIFIED"), Likelihood::Unspecified);
        assert!(!Likelihood::Unlikely.is_flagged());
        assert!(Likelihood::Possible.is_flagged());
    }
}
