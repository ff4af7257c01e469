use super::source::StreamMetadata;
use serde::Serialize;

/// 抽帧计划：严格递增、非空、长度受限的帧序号列表
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SamplingPlan(Vec<u64>);

impl SamplingPlan {
    /// One index every `period_seconds`, capped at `max_frames`.
    ///
    /// Streams that report no frames still get `[0]`, and a stream shorter
    /// than one period gets its last frame appended so there are two anchors
    /// for scene comparison.
    pub fn build(meta: &StreamMetadata, period_seconds: u32, max_frames: usize) -> Self {
        if meta.total_frames == 0 {
            return Self(vec![0]);
        }

        let period = period_seconds.max(1) as f64;
        let interval = ((meta.fps * period).round_ties_even() as u64).max(1);

        let mut indices: Vec<u64> = (0..meta.total_frames).step_by(interval as usize).collect();
        if indices.len() == 1 && meta.total_frames > 1 {
            indices.push(meta.total_frames - 1);
        }

        Self(limit_indices(&indices, max_frames))
    }

    pub fn indices(&self) -> &[u64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep only the first index.
    pub fn collapse_to_first(&mut self) {
        self.0.truncate(1);
    }

    /// A subset of at most `count` evenly spread indices.
    pub fn probe(&self, count: usize) -> Vec<u64> {
        limit_indices(&self.0, count)
    }

    pub fn into_inner(self) -> Vec<u64> {
        self.0
    }
}

/// Reduce `indices` to at most `max_frames` positions spread linearly over
/// the sorted, deduplicated list (nearest-index rounding).
pub fn limit_indices(indices: &[u64], max_frames: usize) -> Vec<u64> {
    let mut clean = indices.to_vec();
    clean.sort_unstable();
    clean.dedup();

    if clean.len() <= max_frames {
        return clean;
    }
    if max_frames <= 1 {
        return clean.into_iter().take(1).collect();
    }

    let last = (clean.len() - 1) as f64;
    let step = last / (max_frames - 1) as f64;
    let mut reduced: Vec<u64> = (0..max_frames)
        .map(|i| {
            let pos = (i as f64 * step).round_ties_even() as usize;
            clean[pos.min(clean.len() - 1)]
        })
        .collect();
    reduced.sort_unstable();
    reduced.dedup();
    reduced
}
