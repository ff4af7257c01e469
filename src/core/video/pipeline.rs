//! 视频分析流水线
//!
//! Sampling, static prefilter, preparation, cached inference, scene cuts and
//! aggregation for one stream per call. Calls on different streams may run
//! concurrently; the inference cache is the only shared state.

use super::aggregator::{Aggregator, FrameFaces};
use super::cache::InferenceCache;
use super::config::AnalysisConfig;
use super::detection::{Feature, FeatureSet, FrameDetections};
use super::error::{AnalysisError, VideoResult};
use super::frame::{Frame, PreparedFrame};
use super::preparer::FramePreparer;
use super::provider::{normalize_records, CapabilityProvider};
use super::result::{AnalysisMetadata, AnalysisResult, FeatureWarning, ImageAnalysis};
use super::sampler::SamplingPlan;
use super::scene::SceneChangeDetector;
use super::source::{FrameSource, FrameSourceOpener, StreamMetadata};
use super::static_filter::StaticPrefilter;
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;

type ActiveProviders = Vec<(Feature, Arc<dyn CapabilityProvider>)>;

pub struct VideoAnalyzer {
    config: AnalysisConfig,
    preparer: FramePreparer,
    prefilter: StaticPrefilter,
    aggregator: Aggregator,
    providers: Vec<Arc<dyn CapabilityProvider>>,
    cache: Arc<InferenceCache>,
}

impl VideoAnalyzer {
    /// Analyzer with its own cache sized from `config`.
    pub fn new(config: AnalysisConfig, providers: Vec<Arc<dyn CapabilityProvider>>) -> Self {
        let config = config.sanitized();
        let cache = Arc::new(InferenceCache::new(config.frame_cache_size));
        Self::with_cache(config, providers, cache)
    }

    pub fn with_cache(
        config: AnalysisConfig,
        providers: Vec<Arc<dyn CapabilityProvider>>,
        cache: Arc<InferenceCache>,
    ) -> Self {
        let config = config.sanitized();
        Self {
            preparer: FramePreparer::new(config.max_frame_width),
            prefilter: StaticPrefilter::new(
                config.static_prefilter_enabled,
                config.static_prefilter_samples,
                config.static_diff_threshold,
            ),
            aggregator: Aggregator {
                label_limit: config.label_limit,
                text_limit: config.text_limit,
                face_iou_threshold: config.face_iou_threshold,
                face_group_distance: config.face_group_distance,
                ..Aggregator::default()
            },
            providers,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn providers(&self) -> &[Arc<dyn CapabilityProvider>] {
        &self.providers
    }

    pub fn cache(&self) -> &Arc<InferenceCache> {
        &self.cache
    }

    /// Open `path` and analyze it. The stream is released before this returns.
    pub fn analyze_path(
        &self,
        opener: &dyn FrameSourceOpener,
        path: &Path,
        features: &FeatureSet,
        sample_rate: u32,
    ) -> VideoResult<AnalysisResult> {
        let source = opener.open(path)?;
        self.analyze(source, features, sample_rate).map_err(|e| {
            warn!("Video analysis failed for {:?}: {}", path, e);
            e
        })
    }

    /// Analyze one opened stream, sampling one frame every `sample_rate`
    /// seconds. Takes ownership of the source and drops it on every path.
    pub fn analyze(
        &self,
        mut source: Box<dyn FrameSource>,
        features: &FeatureSet,
        sample_rate: u32,
    ) -> VideoResult<AnalysisResult> {
        let meta = source.metadata();
        let sample_rate = sample_rate.max(1);

        let mut plan = SamplingPlan::build(&meta, sample_rate, self.config.max_frames);
        let static_report = self.prefilter.evaluate(source.as_mut(), &plan, &self.preparer);
        if static_report.detected_static {
            debug!("Static footage, analyzing first frame only");
            plan.collapse_to_first();
        }

        info!(
            "🎬 VideoAnalyzer: {} frames @ {:.2} fps, sampling {} (features: {:?})",
            meta.total_frames,
            meta.fps,
            plan.len(),
            features.iter().collect::<Vec<_>>()
        );

        let (active, mut warnings) = self.resolve_providers(features);
        let mut scene_detector = features
            .contains(Feature::Scenes)
            .then(|| SceneChangeDetector::with_threshold(self.config.scene_change_threshold));

        let mut all = FrameDetections::default();
        let mut frame_faces = Vec::new();
        let mut scenes = Vec::new();
        let mut analyzed = 0usize;

        for &index in plan.indices() {
            let Some(frame) = source.read_at(index) else {
                debug!("Frame {} unreadable, skipped", index);
                continue;
            };
            let prepared = self.preparer.prepare(frame, index, &meta);
            analyzed += 1;

            let detections = self.infer_frame(&prepared, &active, &mut warnings, true);
            all.labels.extend(detections.labels);
            all.text.extend(detections.text);
            if !detections.faces.is_empty() {
                frame_faces.push(FrameFaces {
                    width: prepared.width(),
                    height: prepared.height(),
                    faces: self.aggregator.dedup_frame_faces(detections.faces),
                });
            }

            if let Some(detector) = scene_detector.as_mut() {
                if let Some(event) = detector.observe(&prepared.frame, prepared.timestamp) {
                    debug!("Scene change at {:.2}s (corr {:.3})", event.timestamp, event.correlation);
                    scenes.push(event);
                }
            }
        }

        if analyzed == 0 {
            drop(source);
            return Err(AnalysisError::NoReadableFrames {
                sampled: plan.len(),
            });
        }
        drop(source);

        let result = AnalysisResult {
            metadata: AnalysisMetadata {
                duration: meta.duration(),
                fps: meta.fps,
                total_frames: meta.total_frames,
                frames_analyzed: analyzed,
                sample_rate,
                max_frames: self.config.max_frames,
                sampled_frame_indices: plan,
                static_prefilter: static_report,
                warnings,
            },
            labels: self.aggregator.aggregate_labels(&all.labels),
            faces: self.aggregator.group_faces(&frame_faces),
            scenes,
            text: self.aggregator.dedup_text(&all.text),
        };

        info!(
            "✅ VideoAnalyzer: {} frames analyzed, {} labels, {} faces, {} scenes, {} warnings",
            result.metadata.frames_analyzed,
            result.labels.len(),
            result.faces.len(),
            result.scenes.len(),
            result.metadata.warnings.len()
        );
        Ok(result)
    }

    /// Run the providers on a single still image. No cache, no temporal
    /// aggregation; faces are deduplicated.
    pub fn analyze_image(&self, frame: Frame, features: &FeatureSet) -> ImageAnalysis {
        let prepared = self.preparer.prepare(frame, 0, &StreamMetadata::new(1.0, 1));
        let (active, mut warnings) = self.resolve_providers(features);
        let detections = self.infer_frame(&prepared, &active, &mut warnings, false);

        ImageAnalysis {
            width: prepared.width(),
            height: prepared.height(),
            labels: detections.labels,
            faces: self.aggregator.dedup_frame_faces(detections.faces),
            text: detections.text,
            warnings,
        }
    }

    /// First available provider per requested feature. Features with no
    /// available provider become call-level warnings.
    fn resolve_providers(&self, features: &FeatureSet) -> (ActiveProviders, Vec<FeatureWarning>) {
        let mut active = Vec::new();
        let mut warnings = Vec::new();

        for feature in features.iter().filter(Feature::needs_provider) {
            let candidates: Vec<_> = self.providers.iter().filter(|p| p.feature() == feature).collect();
            match candidates.iter().find(|p| p.is_available()) {
                Some(provider) => active.push((feature, Arc::clone(*provider))),
                None => {
                    let reason = match candidates.first() {
                        Some(p) => format!("{} is not available", p.name()),
                        None => "no provider registered".to_string(),
                    };
                    warn!("Skipping {}: {}", feature, reason);
                    warnings.push(FeatureWarning::for_call(feature, reason));
                }
            }
        }
        (active, warnings)
    }

    fn infer_frame(
        &self,
        prepared: &PreparedFrame,
        active: &ActiveProviders,
        warnings: &mut Vec<FeatureWarning>,
        use_cache: bool,
    ) -> FrameDetections {
        let mut detections = FrameDetections::default();
        if active.is_empty() {
            return detections;
        }

        let signature = prepared.signature();
        for (feature, provider) in active {
            let infer = || {
                provider.infer(prepared).map(|records| {
                    let (kept, mismatched) = normalize_records(*feature, records);
                    if mismatched > 0 {
                        debug!("{} returned {} records of the wrong kind", provider.name(), mismatched);
                    }
                    kept
                })
            };
            let outcome = if use_cache {
                self.cache
                    .get_or_insert_with(*feature, &signature, infer)
                    .map(|(records, _)| records)
            } else {
                infer()
            };

            match outcome {
                Ok(records) => {
                    detections.extend_from(*feature, records, prepared.timestamp);
                }
                Err(e) => {
                    warn!("{} failed on frame {}: {}", feature, prepared.frame_index, e);
                    warnings.push(FeatureWarning::for_frame(
                        *feature,
                        e.to_string(),
                        prepared.frame_index,
                        prepared.timestamp,
                    ));
                }
            }
        }
        detections
    }
}
