use super::frame::{luma, Frame};
use serde::{Deserialize, Serialize};

pub type LumaHistogram = [u32; 256];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneEventKind {
    #[default]
    SceneChange,
}

/// 场景切换事件
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SceneChangeEvent {
    #[serde(rename = "type")]
    pub kind: SceneEventKind,
    pub timestamp: f64,
    pub correlation: f64,
}

impl SceneChangeEvent {
    pub fn new(timestamp: f64, correlation: f64) -> Self {
        Self {
            kind: SceneEventKind::SceneChange,
            timestamp,
            correlation,
        }
    }
}

/// Flags a scene boundary when the luminance histogram of a frame stops
/// correlating with the previous analyzed frame.
#[derive(Debug, Clone)]
pub struct SceneChangeDetector {
    threshold: f64,
    last_histogram: Option<LumaHistogram>,
}

impl Default for SceneChangeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneChangeDetector {
    pub fn new() -> Self {
        Self::with_threshold(0.7)
    }

    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            threshold,
            last_histogram: None,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Compare two frames directly.
    pub fn detect(&self, prev: &Frame, curr: &Frame, timestamp: f64) -> Option<SceneChangeEvent> {
        self.compare(&luminance_histogram(prev), &luminance_histogram(curr), timestamp)
    }

    /// Feed the next analyzed frame; compares against the one fed before it.
    pub fn observe(&mut self, frame: &Frame, timestamp: f64) -> Option<SceneChangeEvent> {
        let current = luminance_histogram(frame);
        let event = self
            .last_histogram
            .as_ref()
            .and_then(|last| self.compare(last, &current, timestamp));
        self.last_histogram = Some(current);
        event
    }

    pub fn reset(&mut self) {
        self.last_histogram = None;
    }

    fn compare(&self, prev: &LumaHistogram, curr: &LumaHistogram, timestamp: f64) -> Option<SceneChangeEvent> {
        let correlation = histogram_correlation(prev, curr);
        (correlation < self.threshold).then(|| SceneChangeEvent::new(timestamp, correlation))
    }
}

/// 256 bins over BT.601 luma.
pub fn luminance_histogram(frame: &Frame) -> LumaHistogram {
    let mut hist = [0u32; 256];
    for rgba in frame.data.chunks_exact(4) {
        hist[luma(rgba[0], rgba[1], rgba[2]) as usize] += 1;
    }
    hist
}

/// Pearson correlation of bin counts. A histogram with zero variance makes
/// the denominator vanish; that case scores 1.0.
pub fn histogram_correlation(a: &LumaHistogram, b: &LumaHistogram) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().map(|&v| v as f64).sum::<f64>() / n;
    let mean_b = b.iter().map(|&v| v as f64).sum::<f64>() / n;

    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b.iter()) {
        let da = x as f64 - mean_a;
        let db = y as f64 - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let denom = (var_a * var_b).sqrt();
    if denom <= f64::EPSILON {
        return 1.0;
    }
    cov / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One row of gray pixels, one per value.
    fn gray_ramp(values: impl Iterator<Item = u8>) -> Frame {
        let data: Vec<u8> = values.flat_map(|v| [v, v, v, 255]).collect();
        let width = (data.len() / 4) as u32;
        Frame::new(width, 1, data).unwrap()
    }

    #[test]
    fn test_identical_frames_correlate_fully() {
        let frame = gray_ramp(0..=255);
        let hist = luminance_histogram(&frame);
        assert!((histogram_correlation(&hist, &hist) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_small_shift_is_not_a_scene_change() {
        let detector = SceneChangeDetector::new();
        let base = gray_ramp(0..128);
        let shifted = gray_ramp(4..132);

        // 124 of 128 occupied bins overlap: 60 / 64
        let corr = histogram_correlation(&luminance_histogram(&base), &luminance_histogram(&shifted));
        assert!((corr - 0.9375).abs() < 1e-9);
        assert!(detector.detect(&base, &shifted, 1.0).is_none());
    }

    #[test]
    fn test_inverse_is_a_scene_change() {
        let detector = SceneChangeDetector::new();
        let base = gray_ramp(0..128);
        let inverse = gray_ramp((0..128).map(|v| 255 - v));

        let event = detector.detect(&base, &inverse, 4.0).unwrap();
        assert_eq!(event.timestamp, 4.0);
        assert!(event.correlation < 0.7);
        assert!((event.correlation + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_flat_histogram_scores_one() {
        let flat = [7u32; 256];
        let spike = luminance_histogram(&Frame::filled(4, 4, [10, 10, 10]));
        assert_eq!(histogram_correlation(&flat, &spike), 1.0);
    }

    #[test]
    fn test_observe_tracks_previous_frame() {
        let mut detector = SceneChangeDetector::new();
        let dark = Frame::filled(8, 8, [10, 10, 10]);
        let bright = Frame::filled(8, 8, [200, 200, 200]);

        assert!(detector.observe(&dark, 0.0).is_none());
        assert!(detector.observe(&dark, 2.0).is_none());
        let event = detector.observe(&bright, 4.0).unwrap();
        assert_eq!(event.timestamp, 4.0);

        detector.reset();
        assert!(detector.observe(&dark, 6.0).is_none());
    }

    #[test]
    fn test_event_json_carries_type() {
        let event = SceneChangeEvent::new(4.0, -0.5);
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json, serde_json::json!({"type": "scene_change", "timestamp": 4.0, "correlation": -0.5}));

        let back: SceneChangeEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
