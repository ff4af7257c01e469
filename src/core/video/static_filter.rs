use super::frame::Frame;
use super::preparer::FramePreparer;
use super::result::StaticPrefilterReport;
use super::sampler::SamplingPlan;
use super::source::FrameSource;
use image::imageops::{self, FilterType};
use image::GrayImage;
use log::debug;
use rayon::prelude::*;

const THUMB_SIZE: u32 = 64;
/// The largest single probe diff may exceed the threshold by this factor.
const MAX_DIFF_FACTOR: f64 = 1.35;

/// 静态视频预筛：抽几帧比较灰度缩略图，几乎不变则只分析首帧
#[derive(Debug, Clone)]
pub struct StaticPrefilter {
    enabled: bool,
    probe_frames: usize,
    threshold: f64,
}

impl StaticPrefilter {
    pub fn new(enabled: bool, probe_frames: usize, threshold: f64) -> Self {
        Self {
            enabled,
            probe_frames: probe_frames.max(2),
            threshold,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Decide whether the sampled footage is static.
    ///
    /// Reads the probe frames from `source` in index order. Unreadable probes
    /// are skipped; fewer than two readable probes means not static.
    pub fn evaluate(
        &self,
        source: &mut dyn FrameSource,
        plan: &SamplingPlan,
        preparer: &FramePreparer,
    ) -> StaticPrefilterReport {
        if !self.enabled || plan.len() < 2 {
            return StaticPrefilterReport::skipped(self.enabled);
        }

        let mut report = StaticPrefilterReport {
            enabled: true,
            applied: true,
            ..StaticPrefilterReport::default()
        };

        let probes = plan.probe(self.probe_frames);
        if probes.len() < 2 {
            return report;
        }

        let frames: Vec<Frame> = probes
            .iter()
            .filter_map(|&idx| source.read_at(idx))
            .map(|frame| preparer.downsize(frame))
            .collect();
        if frames.len() < 2 {
            debug!("Static prefilter: only {} readable probes", frames.len());
            return report;
        }

        let thumbs: Vec<GrayImage> = frames.par_iter().map(gray_thumbnail).collect();
        let diffs: Vec<f64> = thumbs
            .windows(2)
            .map(|pair| mean_abs_diff(&pair[0], &pair[1]))
            .collect();

        let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
        let max = diffs.iter().copied().fold(0.0, f64::max);

        report.mean_abs_diff = Some(round3(mean));
        report.max_abs_diff = Some(round3(max));
        report.detected_static = mean <= self.threshold && max <= self.threshold * MAX_DIFF_FACTOR;

        debug!(
            "Static prefilter: probes={:?} mean={:.3} max={:.3} static={}",
            probes, mean, max, report.detected_static
        );
        report
    }
}

/// 64x64 grayscale, area-averaged when shrinking.
fn gray_thumbnail(frame: &Frame) -> GrayImage {
    let gray = frame.to_gray();
    if gray.width() >= THUMB_SIZE && gray.height() >= THUMB_SIZE {
        imageops::thumbnail(&gray, THUMB_SIZE, THUMB_SIZE)
    } else {
        imageops::resize(&gray, THUMB_SIZE, THUMB_SIZE, FilterType::Triangle)
    }
}

fn mean_abs_diff(a: &GrayImage, b: &GrayImage) -> f64 {
    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw().iter())
        .map(|(&x, &y)| x.abs_diff(y) as u64)
        .sum();
    total as f64 / a.as_raw().len().max(1) as f64
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round_ties_even() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::video::source::{MemoryFrameSource, StreamMetadata};

    fn plan_for(total: u64) -> SamplingPlan {
        SamplingPlan::build(&StreamMetadata::new(30.0, total), 2, 12)
    }

    #[test]
    fn test_identical_probes_are_static() {
        let mut source = MemoryFrameSource::from_fn(300, 30.0, |_| Some(Frame::filled(128, 128, [120, 60, 30])));
        let filter = StaticPrefilter::new(true, 4, 8.5);

        let report = filter.evaluate(&mut source, &plan_for(300), &FramePreparer::new(960));

        assert!(report.applied);
        assert!(report.detected_static);
        assert_eq!(report.mean_abs_diff, Some(0.0));
        assert_eq!(report.max_abs_diff, Some(0.0));
        assert_eq!(source.read_count(), 4);
    }

    #[test]
    fn test_changing_probes_are_not_static() {
        let mut source = MemoryFrameSource::from_fn(300, 30.0, |idx| {
            let v = (idx / 60 * 50) as u8;
            Some(Frame::filled(128, 128, [v, v, v]))
        });
        let filter = StaticPrefilter::new(true, 4, 8.5);

        let report = filter.evaluate(&mut source, &plan_for(300), &FramePreparer::new(960));

        // probes 0, 60, 180, 240 -> gray 0, 50, 150, 200
        assert!(!report.detected_static);
        assert_eq!(report.max_abs_diff, Some(100.0));
        assert_eq!(report.mean_abs_diff, Some(66.667));
    }

    #[test]
    fn test_max_diff_guard() {
        // one jump of 12 over three pairs: mean 4 passes, max 12 > 8.5 * 1.35
        let mut source = MemoryFrameSource::from_fn(300, 30.0, |idx| {
            let v = if idx >= 180 { 112 } else { 100 };
            Some(Frame::filled(64, 64, [v, v, v]))
        });
        let filter = StaticPrefilter::new(true, 4, 8.5);

        let report = filter.evaluate(&mut source, &plan_for(300), &FramePreparer::new(960));
        assert_eq!(report.max_abs_diff, Some(12.0));
        assert_eq!(report.mean_abs_diff, Some(4.0));
        assert!(!report.detected_static);
    }

    #[test]
    fn test_unreadable_probes() {
        let mut source = MemoryFrameSource::from_fn(300, 30.0, |idx| {
            (idx == 0).then(|| Frame::filled(8, 8, [0, 0, 0]))
        });
        let filter = StaticPrefilter::new(true, 4, 8.5);

        let report = filter.evaluate(&mut source, &plan_for(300), &FramePreparer::new(960));
        assert!(report.applied);
        assert!(!report.detected_static);
        assert_eq!(report.mean_abs_diff, None);
    }

    #[test]
    fn test_disabled_or_single_frame_is_skipped() {
        let mut source = MemoryFrameSource::from_fn(300, 30.0, |_| Some(Frame::filled(8, 8, [0, 0, 0])));

        let off = StaticPrefilter::new(false, 4, 8.5).evaluate(&mut source, &plan_for(300), &FramePreparer::new(960));
        assert_eq!(off, StaticPrefilterReport::disabled());

        let single = StaticPrefilter::new(true, 4, 8.5).evaluate(&mut source, &plan_for(1), &FramePreparer::new(960));
        assert!(single.enabled);
        assert!(!single.applied);
        assert_eq!(source.read_count(), 0);
    }
}
