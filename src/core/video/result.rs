use super::aggregator::{FaceGroup, LabelSummary};
use super::detection::{FaceDetection, Feature, LabelDetection, TextSpan};
use super::error::VideoResult;
use super::sampler::SamplingPlan;
use super::scene::SceneChangeEvent;
use serde::Serialize;

/// Outcome of the static-video check, reported on every call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StaticPrefilterReport {
    pub enabled: bool,
    pub applied: bool,
    pub detected_static: bool,
    /// Rounded to 3 decimals; `None` when fewer than two probes were read.
    pub mean_abs_diff: Option<f64>,
    pub max_abs_diff: Option<f64>,
}

impl StaticPrefilterReport {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn skipped(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }
}

/// A feature contribution that was dropped without failing the call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureWarning {
    pub feature: Feature,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl FeatureWarning {
    pub fn for_call(feature: Feature, reason: impl Into<String>) -> Self {
        Self {
            feature,
            reason: reason.into(),
            frame_index: None,
            timestamp: None,
        }
    }

    pub fn for_frame(feature: Feature, reason: impl Into<String>, frame_index: u64, timestamp: f64) -> Self {
        Self {
            feature,
            reason: reason.into(),
            frame_index: Some(frame_index),
            timestamp: Some(timestamp),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisMetadata {
    pub duration: f64,
    pub fps: f64,
    pub total_frames: u64,
    pub frames_analyzed: usize,
    pub sample_rate: u32,
    pub max_frames: usize,
    pub sampled_frame_indices: SamplingPlan,
    pub static_prefilter: StaticPrefilterReport,
    pub warnings: Vec<FeatureWarning>,
}

/// 视频分析结果（调用结束后不再修改）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub metadata: AnalysisMetadata,
    pub labels: Vec<LabelSummary>,
    pub faces: Vec<FaceGroup>,
    pub scenes: Vec<SceneChangeEvent>,
    pub text: Vec<TextSpan>,
}

impl AnalysisResult {
    pub fn to_json(&self) -> VideoResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_value(&self) -> VideoResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Single-image analysis: raw per-frame records, faces deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImageAnalysis {
    pub width: u32,
    pub height: u32,
    pub labels: Vec<LabelDetection>,
    pub faces: Vec<FaceDetection>,
    pub text: Vec<TextSpan>,
    pub warnings: Vec<FeatureWarning>,
}

impl ImageAnalysis {
    pub fn to_json(&self) -> VideoResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
