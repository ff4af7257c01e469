//! Detection records produced by capability providers.

use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Analysis features a caller can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Labels,
    Faces,
    Text,
    Scenes,
}

impl Feature {
    pub const ALL: [Feature; 4] = [Feature::Labels, Feature::Faces, Feature::Text, Feature::Scenes];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Labels => "labels",
            Feature::Faces => "faces",
            Feature::Text => "text",
            Feature::Scenes => "scenes",
        }
    }

    /// Whether the feature is served by a model rather than by the pipeline.
    pub fn needs_provider(&self) -> bool {
        !matches!(self, Feature::Scenes)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "labels" => Ok(Feature::Labels),
            "faces" => Ok(Feature::Faces),
            "text" => Ok(Feature::Text),
            "scenes" => Ok(Feature::Scenes),
            other => Err(format!("unknown feature: {}", other)),
        }
    }
}

/// Requested features for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureSet {
    labels: bool,
    faces: bool,
    text: bool,
    scenes: bool,
}

impl FeatureSet {
    pub fn all() -> Self {
        Self::from_features(Feature::ALL)
    }

    pub fn from_features(features: impl IntoIterator<Item = Feature>) -> Self {
        let mut set = Self::default();
        for feature in features {
            set.insert(feature);
        }
        set
    }

    /// Parse a comma list such as `"labels,faces,scenes"`. Unknown names are
    /// ignored.
    pub fn parse(list: &str) -> Self {
        let mut set = Self::default();
        for name in list.split(',').filter(|n| !n.trim().is_empty()) {
            match name.parse::<Feature>() {
                Ok(feature) => set.insert(feature),
                Err(e) => warn!("Ignoring feature request: {}", e),
            }
        }
        set
    }

    pub fn insert(&mut self, feature: Feature) {
        *self.slot(feature) = true;
    }

    pub fn contains(&self, feature: Feature) -> bool {
        match feature {
            Feature::Labels => self.labels,
            Feature::Faces => self.faces,
            Feature::Text => self.text,
            Feature::Scenes => self.scenes,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        Feature::ALL.into_iter().filter(|f| self.contains(*f))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    fn slot(&mut self, feature: Feature) -> &mut bool {
        match feature {
            Feature::Labels => &mut self.labels,
            Feature::Faces => &mut self.faces,
            Feature::Text => &mut self.text,
            Feature::Scenes => &mut self.scenes,
        }
    }
}

/// Axis-aligned box in prepared-frame pixels, serialized as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Smallest box containing every point of a polygon (OCR quads).
    pub fn enclosing(points: &[[f32; 2]]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = Self::new(first[0], first[1], first[0], first[1]);
        for p in &points[1..] {
            bbox.x1 = bbox.x1.min(p[0]);
            bbox.y1 = bbox.y1.min(p[1]);
            bbox.x2 = bbox.x2.max(p[0]);
            bbox.y2 = bbox.y2.max(p[1]);
        }
        Some(bbox)
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelDetection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Vec<[f32; 2]>>,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSpan {
    pub text: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub timestamp: f64,
}

/// One detection from one provider call.
///
/// Providers build these once at their boundary; the pipeline only stamps
/// the frame timestamp afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectionRecord {
    Label(LabelDetection),
    Face(FaceDetection),
    Text(TextSpan),
}

impl DetectionRecord {
    pub fn label(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self::Label(LabelDetection {
            label: label.into(),
            confidence,
            bbox,
            timestamp: 0.0,
        })
    }

    pub fn face(bbox: BoundingBox, confidence: f32) -> Self {
        Self::Face(FaceDetection {
            bbox,
            confidence,
            landmarks: None,
            timestamp: 0.0,
        })
    }

    pub fn text(text: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self::Text(TextSpan {
            text: text.into(),
            confidence,
            bbox,
            timestamp: 0.0,
        })
    }

    /// The feature this record answers.
    pub fn feature(&self) -> Feature {
        match self {
            DetectionRecord::Label(_) => Feature::Labels,
            DetectionRecord::Face(_) => Feature::Faces,
            DetectionRecord::Text(_) => Feature::Text,
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            DetectionRecord::Label(l) => l.confidence,
            DetectionRecord::Face(f) => f.confidence,
            DetectionRecord::Text(t) => t.confidence,
        }
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            DetectionRecord::Label(l) => l.timestamp,
            DetectionRecord::Face(f) => f.timestamp,
            DetectionRecord::Text(t) => t.timestamp,
        }
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        match &mut self {
            DetectionRecord::Label(l) => l.timestamp = timestamp,
            DetectionRecord::Face(f) => f.timestamp = timestamp,
            DetectionRecord::Text(t) => t.timestamp = timestamp,
        }
        self
    }
}

/// Records for one frame, split by kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameDetections {
    pub labels: Vec<LabelDetection>,
    pub faces: Vec<FaceDetection>,
    pub text: Vec<TextSpan>,
}

impl FrameDetections {
    /// Keep records whose kind matches `feature`; returns how many were
    /// dropped for being the wrong kind.
    pub fn extend_from(&mut self, feature: Feature, records: Vec<DetectionRecord>, timestamp: f64) -> usize {
        let mut mismatched = 0;
        for record in records {
            if record.feature() != feature {
                mismatched += 1;
                continue;
            }
            match record.with_timestamp(timestamp) {
                DetectionRecord::Label(l) => self.labels.push(l),
                DetectionRecord::Face(f) => self.faces.push(f),
                DetectionRecord::Text(t) => self.text.push(t),
            }
        }
        mismatched
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.faces.is_empty() && self.text.is_empty()
    }
}
