//! 跨帧聚合：标签排名、文字去重、人脸去重与分组
//!
//! All operations here are pure functions of the per-frame records; they run
//! once after the frame loop.

use super::detection::{BoundingBox, FaceDetection, LabelDetection, TextSpan};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One label name summarized across all analyzed frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSummary {
    pub label: String,
    pub count: usize,
    pub max_confidence: f32,
    pub timestamps: Vec<f64>,
}

/// Faces whose positions stayed close across frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceGroup {
    pub face_id: usize,
    pub detections: Vec<FaceDetection>,
    pub first_seen: f64,
    pub last_seen: f64,
    pub detection_count: usize,
}

/// Deduplicated faces of one frame together with that frame's size.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameFaces {
    pub width: u32,
    pub height: u32,
    pub faces: Vec<FaceDetection>,
}

#[derive(Debug, Clone)]
pub struct Aggregator {
    pub label_limit: usize,
    pub text_limit: usize,
    /// Spans need more than this many characters.
    pub min_text_chars: usize,
    pub face_iou_threshold: f32,
    /// Center distance as a fraction of frame size.
    pub face_group_distance: f32,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self {
            label_limit: 20,
            text_limit: 50,
            min_text_chars: 2,
            face_iou_threshold: 0.35,
            face_group_distance: 0.05,
        }
    }
}

impl Aggregator {
    /// Group by name, rank by `(count, max_confidence)` descending. Ties
    /// keep first-seen order.
    pub fn aggregate_labels(&self, labels: &[LabelDetection]) -> Vec<LabelSummary> {
        let mut by_name: IndexMap<&str, LabelSummary> = IndexMap::new();
        for det in labels {
            let summary = by_name.entry(det.label.as_str()).or_insert_with(|| LabelSummary {
                label: det.label.clone(),
                count: 0,
                max_confidence: 0.0,
                timestamps: Vec::new(),
            });
            summary.count += 1;
            summary.max_confidence = summary.max_confidence.max(det.confidence);
            summary.timestamps.push(det.timestamp);
        }

        let mut ranked: Vec<LabelSummary> = by_name.into_values().collect();
        ranked.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| b.max_confidence.total_cmp(&a.max_confidence))
        });
        ranked.truncate(self.label_limit);
        ranked
    }

    /// Case-insensitive exact dedup; the first occurrence wins.
    pub fn dedup_text(&self, spans: &[TextSpan]) -> Vec<TextSpan> {
        let mut seen = std::collections::HashSet::new();
        spans
            .iter()
            .filter(|span| span.text.chars().count() > self.min_text_chars)
            .filter(|span| seen.insert(span.text.to_lowercase()))
            .take(self.text_limit)
            .cloned()
            .collect()
    }

    /// Greedy NMS within one frame: highest confidence first, drop anything
    /// overlapping a kept face by more than the IoU threshold.
    pub fn dedup_frame_faces(&self, faces: Vec<FaceDetection>) -> Vec<FaceDetection> {
        let mut sorted = faces;
        sorted.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut kept: Vec<FaceDetection> = Vec::with_capacity(sorted.len());
        for face in sorted {
            if kept.iter().all(|k| k.bbox.iou(&face.bbox) <= self.face_iou_threshold) {
                kept.push(face);
            }
        }
        kept
    }

    /// Position-based grouping across frames. This is a proximity heuristic,
    /// not identity tracking.
    pub fn group_faces(&self, frames: &[FrameFaces]) -> Vec<FaceGroup> {
        let flat: Vec<(&FaceDetection, (f32, f32))> = frames
            .iter()
            .flat_map(|f| {
                f.faces
                    .iter()
                    .map(move |face| (face, normalized_center(&face.bbox, f.width, f.height)))
            })
            .collect();

        let mut assigned = vec![false; flat.len()];
        let mut groups = Vec::new();

        for i in 0..flat.len() {
            if assigned[i] {
                continue;
            }
            assigned[i] = true;
            let (seed, seed_center) = flat[i];
            let mut group = FaceGroup {
                face_id: groups.len(),
                detections: vec![seed.clone()],
                first_seen: seed.timestamp,
                last_seen: seed.timestamp,
                detection_count: 1,
            };

            for j in (i + 1)..flat.len() {
                if assigned[j] {
                    continue;
                }
                let (other, center) = flat[j];
                let dist = (center.0 - seed_center.0).hypot(center.1 - seed_center.1);
                if dist < self.face_group_distance {
                    assigned[j] = true;
                    group.detections.push(other.clone());
                    group.last_seen = other.timestamp;
                    group.detection_count += 1;
                }
            }
            groups.push(group);
        }
        groups
    }
}

fn normalized_center(bbox: &BoundingBox, width: u32, height: u32) -> (f32, f32) {
    let (cx, cy) = bbox.center();
    (cx / width.max(1) as f32, cy / height.max(1) as f32)
}
