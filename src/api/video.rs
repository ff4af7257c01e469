//! 视频分析服务

use crate::core::video::{
    AnalysisConfig, AnalysisResult, CacheStats, CapabilityProvider, Feature, FeatureSet, Frame, FrameSourceOpener,
    ImageAnalysis, InferenceCache, VideoAnalyzer, VideoResult,
};
use log::info;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Features analyzed when the caller names none.
pub const DEFAULT_FEATURES: &str = "labels,faces,scenes";

/// Seconds between sampled frames when the caller names none.
pub const DEFAULT_SAMPLE_RATE: u32 = 2;

/// 服务统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceStats {
    pub calls: u64,
    pub failed_calls: u64,
    pub frames_analyzed: u64,
    pub cache: CacheStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub feature: Feature,
    pub loaded: bool,
}

/// Health report: which models are loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub loaded: bool,
    pub providers: Vec<ProviderStatus>,
}

#[derive(Debug, Default)]
struct CallCounters {
    calls: u64,
    failed_calls: u64,
    frames_analyzed: u64,
}

/// 视频分析服务 - 抽帧 + 静态预筛 + 推理缓存 + 聚合
///
/// Owns the provider set and an inference cache shared by every call made
/// through it.
pub struct VideoAnalysisService {
    analyzer: VideoAnalyzer,
    opener: Box<dyn FrameSourceOpener>,
    counters: Mutex<CallCounters>,
}

impl VideoAnalysisService {
    pub fn create(
        config: AnalysisConfig,
        providers: Vec<Arc<dyn CapabilityProvider>>,
        opener: Box<dyn FrameSourceOpener>,
    ) -> Self {
        let config = config.sanitized();
        let cache = Arc::new(InferenceCache::new(config.frame_cache_size));
        info!(
            "🎬 VideoAnalysisService: created ({} providers, max_frames={}, cache={})",
            providers.len(),
            config.max_frames,
            config.frame_cache_size
        );
        Self {
            analyzer: VideoAnalyzer::with_cache(config, providers, cache),
            opener,
            counters: Mutex::new(CallCounters::default()),
        }
    }

    /// Configuration from `LOCAL_AI_VIDEO_*` variables.
    pub fn from_env(providers: Vec<Arc<dyn CapabilityProvider>>, opener: Box<dyn FrameSourceOpener>) -> Self {
        Self::create(AnalysisConfig::from_env(), providers, opener)
    }

    pub fn config(&self) -> &AnalysisConfig {
        self.analyzer.config()
    }

    fn counters(&self) -> MutexGuard<'_, CallCounters> {
        // plain counters stay usable after a panic elsewhere
        self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Analyze the video at `path`. `features` is a comma list; empty means
    /// [`DEFAULT_FEATURES`].
    pub fn analyze_video(
        &self,
        path: impl AsRef<Path>,
        features: &str,
        sample_rate: u32,
    ) -> VideoResult<AnalysisResult> {
        let path = path.as_ref();
        let features = parse_features(features);
        info!("🎞️ VideoAnalysisService: analyzing {:?}", path);

        let outcome = self
            .analyzer
            .analyze_path(self.opener.as_ref(), path, &features, sample_rate);

        let mut counters = self.counters();
        counters.calls += 1;
        match &outcome {
            Ok(result) => counters.frames_analyzed += result.metadata.frames_analyzed as u64,
            Err(_) => counters.failed_calls += 1,
        }
        drop(counters);
        outcome
    }

    pub fn analyze_image(&self, frame: Frame, features: &str) -> ImageAnalysis {
        let features = parse_features(features);
        let analysis = self.analyzer.analyze_image(frame, &features);
        let mut counters = self.counters();
        counters.calls += 1;
        counters.frames_analyzed += 1;
        analysis
    }

    /// Decode the still image at `path` and analyze it.
    pub fn analyze_image_file(&self, path: impl AsRef<Path>, features: &str) -> VideoResult<ImageAnalysis> {
        match Frame::open(path.as_ref()) {
            Ok(frame) => Ok(self.analyze_image(frame, features)),
            Err(e) => {
                let mut counters = self.counters();
                counters.calls += 1;
                counters.failed_calls += 1;
                Err(e)
            }
        }
    }

    /// True when at least one provider is available.
    pub fn is_loaded(&self) -> bool {
        self.analyzer.providers().iter().any(|p| p.is_available())
    }

    pub fn status(&self) -> ServiceStatus {
        let providers: Vec<ProviderStatus> = self
            .analyzer
            .providers()
            .iter()
            .map(|p| ProviderStatus {
                name: p.name().to_string(),
                feature: p.feature(),
                loaded: p.is_available(),
            })
            .collect();
        ServiceStatus {
            loaded: providers.iter().any(|p| p.loaded),
            providers,
        }
    }

    pub fn stats(&self) -> ServiceStats {
        let cache = self.analyzer.cache().stats();
        let counters = self.counters();
        ServiceStats {
            calls: counters.calls,
            failed_calls: counters.failed_calls,
            frames_analyzed: counters.frames_analyzed,
            cache,
        }
    }

    pub fn reset_stats(&self) {
        *self.counters() = CallCounters::default();
    }

    pub fn clear_cache(&self) {
        self.analyzer.cache().clear();
        info!("🧹 VideoAnalysisService: cache cleared");
    }
}

impl Drop for VideoAnalysisService {
    fn drop(&mut self) {
        info!("🗑️ VideoAnalysisService: released");
    }
}

fn parse_features(list: &str) -> FeatureSet {
    if list.trim().is_empty() {
        FeatureSet::parse(DEFAULT_FEATURES)
    } else {
        FeatureSet::parse(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::video::{BoundingBox, DetectionRecord, ImageSequenceOpener, MemoryFrameSource, MockProvider};
    use crate::core::video::source::MemorySourceOpener;
    use crate::core::video::AnalysisError;

    fn create_test_stream() -> MemoryFrameSource {
        MemoryFrameSource::from_fn(300, 30.0, |idx| {
            let v = (idx / 60 * 50) as u8;
            Some(Frame::filled(48, 32, [v, v, v]))
        })
    }

    fn create_service(providers: Vec<Arc<dyn CapabilityProvider>>) -> VideoAnalysisService {
        let opener = MemorySourceOpener::new().with_stream("clip.mp4", create_test_stream());
        VideoAnalysisService::create(AnalysisConfig::default(), providers, Box::new(opener))
    }

    fn labels_provider() -> Arc<MockProvider> {
        Arc::new(MockProvider::with_records(
            "objects",
            Feature::Labels,
            vec![DetectionRecord::label("person", 0.8, BoundingBox::new(1.0, 1.0, 9.0, 9.0))],
        ))
    }

    #[test]
    fn test_analyze_video_and_stats() {
        let service = create_service(vec![labels_provider()]);

        let result = service.analyze_video("clip.mp4", "", DEFAULT_SAMPLE_RATE).unwrap();
        assert_eq!(result.metadata.frames_analyzed, 5);
        assert_eq!(result.labels[0].label, "person");
        assert_eq!(result.scenes.len(), 4);
        // faces requested by default but nothing serves them
        assert_eq!(result.metadata.warnings.len(), 1);

        assert!(service.analyze_video("missing.mp4", "labels", 2).is_err());

        let stats = service.stats();
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.failed_calls, 1);
        assert_eq!(stats.frames_analyzed, 5);
        assert_eq!(stats.cache.entries, 5);

        service.reset_stats();
        assert_eq!(service.stats().calls, 0);
    }

    #[test]
    fn test_second_call_served_from_cache() {
        let labels = labels_provider();
        let service = create_service(vec![labels.clone()]);

        service.analyze_video("clip.mp4", "labels", 2).unwrap();
        service.analyze_video("clip.mp4", "labels", 2).unwrap();
        assert_eq!(labels.call_count(), 5);
        assert_eq!(service.stats().cache.hits, 5);

        service.clear_cache();
        service.analyze_video("clip.mp4", "labels", 2).unwrap();
        assert_eq!(labels.call_count(), 10);
    }

    #[test]
    fn test_status_and_loaded() {
        let service = create_service(vec![
            labels_provider(),
            Arc::new(MockProvider::unavailable("retina", Feature::Faces)),
        ]);

        assert!(service.is_loaded());
        let status = service.status();
        assert!(status.loaded);
        assert_eq!(status.providers.len(), 2);
        assert_eq!(status.providers[1].name, "retina");
        assert!(!status.providers[1].loaded);

        let empty = create_service(vec![Arc::new(MockProvider::unavailable("ocr", Feature::Text))]);
        assert!(!empty.is_loaded());
        assert!(!empty.status().loaded);
    }

    #[test]
    fn test_result_json_shape() {
        let service = create_service(vec![labels_provider()]);
        let json = service
            .analyze_video("clip.mp4", "labels,scenes", 2)
            .unwrap()
            .to_json_value()
            .unwrap();

        let meta = &json["metadata"];
        assert_eq!(meta["total_frames"], 300);
        assert_eq!(meta["frames_analyzed"], 5);
        assert_eq!(meta["sampled_frame_indices"], serde_json::json!([0, 60, 120, 180, 240]));
        assert_eq!(meta["static_prefilter"]["applied"], true);
        assert_eq!(meta["static_prefilter"]["detected_static"], false);
        assert!(meta["warnings"].as_array().unwrap().is_empty());

        assert_eq!(json["labels"][0]["label"], "person");
        assert_eq!(json["labels"][0]["count"], 5);
        assert_eq!(json["scenes"][0]["type"], "scene_change");
        assert_eq!(json["scenes"][0]["timestamp"], 2.0);
        assert!(json["faces"].as_array().unwrap().is_empty());
        assert!(json["text"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_image_sequence_directory() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..6u8 {
            let img = image::RgbaImage::from_pixel(40, 30, image::Rgba([i * 40, 0, 0, 255]));
            img.save(dir.path().join(format!("frame_{:03}.png", i))).unwrap();
        }

        let service = VideoAnalysisService::create(
            AnalysisConfig::default(),
            vec![labels_provider()],
            Box::new(ImageSequenceOpener::new(1.0)),
        );
        let result = service.analyze_video(dir.path(), "labels", 2).unwrap();

        // 6 frames at 1 fps, one every 2 s
        assert_eq!(result.metadata.sampled_frame_indices.indices(), &[0, 2, 4]);
        assert_eq!(result.metadata.frames_analyzed, 3);

        let missing = service.analyze_video(dir.path().join("nope"), "labels", 2);
        assert!(matches!(missing, Err(AnalysisError::OpenFailed { .. })));
    }

    #[test]
    fn test_analyze_image() {
        let service = create_service(vec![labels_provider()]);
        let analysis = service.analyze_image(Frame::filled(32, 32, [5, 5, 5]), "labels");
        assert_eq!(analysis.labels.len(), 1);
        assert_eq!(analysis.labels[0].timestamp, 0.0);
        assert_eq!(service.stats().frames_analyzed, 1);
    }

    #[test]
    fn test_analyze_image_file() {
        let dir = tempfile::tempdir().unwrap();
        let still = dir.path().join("still.png");
        image::RgbaImage::from_pixel(16, 16, image::Rgba([3, 3, 3, 255])).save(&still).unwrap();
        let broken = dir.path().join("broken.jpg");
        std::fs::write(&broken, b"not a jpeg").unwrap();

        let service = create_service(vec![labels_provider()]);
        let analysis = service.analyze_image_file(&still, "labels").unwrap();
        assert_eq!(analysis.labels[0].label, "person");

        assert!(matches!(service.analyze_image_file(&broken, "labels"), Err(AnalysisError::Image(_))));
        let stats = service.stats();
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.failed_calls, 1);
    }

    #[test]
    fn test_stats_survive_poisoned_counters() {
        let service = create_service(vec![labels_provider()]);

        let poisoner = std::thread::scope(|s| {
            s.spawn(|| {
                let _guard = service.counters.lock().unwrap();
                panic!("poison the counters");
            })
            .join()
        });
        assert!(poisoner.is_err());
        assert!(service.counters.is_poisoned());

        service.analyze_video("clip.mp4", "labels", 2).unwrap();
        service.analyze_image(Frame::filled(8, 8, [1, 1, 1]), "labels");
        let stats = service.stats();
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.frames_analyzed, 6);

        service.reset_stats();
        assert_eq!(service.stats().calls, 0);
    }

    #[test]
    fn test_video_file_through_ffmpeg() {
        use crate::core::video::FfmpegOpener;
        use std::process::{Command, Stdio};

        let opener = FfmpegOpener::new();
        if !opener.is_available() {
            eprintln!("ffmpeg not found, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.avi");
        let status = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-y", "-f", "lavfi", "-i"])
            // luma steps by 60 every second
            .arg("color=c=black:s=64x48:r=10:d=5,geq=lum=60*floor(T):cb=128:cr=128")
            .args(["-c:v", "mjpeg", "-q:v", "3"])
            .arg(&video)
            .stdin(Stdio::null())
            .status()
            .unwrap();
        assert!(status.success());

        let service = VideoAnalysisService::create(AnalysisConfig::default(), vec![labels_provider()], Box::new(opener));
        let result = service.analyze_video(&video, "labels", 1).unwrap();

        // 50 frames at 10 fps, one per second
        assert_eq!(result.metadata.total_frames, 50);
        assert_eq!(result.metadata.sampled_frame_indices.indices(), &[0, 10, 20, 30, 40]);
        assert_eq!(result.metadata.frames_analyzed, 5);
        assert_eq!(result.labels[0].label, "person");
    }
}
