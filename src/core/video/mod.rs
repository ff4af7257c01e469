pub mod aggregator;
pub mod cache;
pub mod config;
pub mod detection;
pub mod error;
pub mod ffmpeg;
pub mod frame;
pub mod pipeline;
pub mod preparer;
pub mod provider;
pub mod result;
pub mod sampler;
pub mod scene;
pub mod source;
pub mod static_filter;

pub use aggregator::{Aggregator, FaceGroup, LabelSummary};
pub use cache::{CacheStats, InferenceCache};
pub use config::AnalysisConfig;
pub use detection::{BoundingBox, DetectionRecord, FaceDetection, Feature, FeatureSet, LabelDetection, TextSpan};
pub use error::{AnalysisError, ProviderError, VideoResult};
pub use ffmpeg::{FfmpegOpener, FfmpegSource, VideoProbe};
pub use frame::{Frame, FrameSignature, PreparedFrame};
pub use pipeline::VideoAnalyzer;
pub use preparer::FramePreparer;
pub use provider::{CapabilityProvider, MockProvider};
pub use result::{AnalysisMetadata, AnalysisResult, FeatureWarning, ImageAnalysis, StaticPrefilterReport};
pub use sampler::SamplingPlan;
pub use scene::{SceneChangeDetector, SceneChangeEvent, SceneEventKind};
pub use source::{
    FrameSource, FrameSourceOpener, ImageSequenceOpener, ImageSequenceSource, MemoryFrameSource, MemorySourceOpener,
    StreamMetadata,
};
pub use static_filter::StaticPrefilter;
