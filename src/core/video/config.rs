//! Analysis configuration.

use log::warn;
use std::str::FromStr;

pub const ENV_MAX_FRAMES: &str = "LOCAL_AI_VIDEO_MAX_FRAMES";
pub const ENV_RESIZE_MAX_WIDTH: &str = "LOCAL_AI_VIDEO_RESIZE_MAX_WIDTH";
pub const ENV_STATIC_PREFILTER: &str = "LOCAL_AI_VIDEO_STATIC_PREFILTER";
pub const ENV_STATIC_PREFILTER_SAMPLES: &str = "LOCAL_AI_VIDEO_STATIC_PREFILTER_SAMPLES";
pub const ENV_STATIC_DIFF_THRESHOLD: &str = "LOCAL_AI_VIDEO_STATIC_DIFF_THRESHOLD";
pub const ENV_FRAME_CACHE_SIZE: &str = "LOCAL_AI_VIDEO_FRAME_CACHE_SIZE";

/// 视频分析配置
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    /// Upper bound on frames analyzed per call (1..=60)
    pub max_frames: usize,
    /// Frames wider than this are downscaled (160..=1920)
    pub max_frame_width: u32,
    pub static_prefilter_enabled: bool,
    /// Probe frames for the static check (2..=8)
    pub static_prefilter_samples: usize,
    /// Mean absolute gray difference below which footage is static (1.0..=35.0)
    pub static_diff_threshold: f64,
    /// Inference cache entries; 0 disables the cache (0..=512)
    pub frame_cache_size: usize,
    pub scene_change_threshold: f64,
    pub face_iou_threshold: f32,
    /// Normalized center distance for grouping faces across frames
    pub face_group_distance: f32,
    pub label_limit: usize,
    pub text_limit: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_frames: 12,
            max_frame_width: 960,
            static_prefilter_enabled: true,
            static_prefilter_samples: 4,
            static_diff_threshold: 8.5,
            frame_cache_size: 64,
            scene_change_threshold: 0.7,
            face_iou_threshold: 0.35,
            face_group_distance: 0.05,
            label_limit: 20,
            text_limit: 50,
        }
    }
}

impl AnalysisConfig {
    /// Slides, screen recordings, surveillance: lenient static check, more cache.
    pub fn for_static_content() -> Self {
        Self {
            static_prefilter_samples: 6,
            static_diff_threshold: 12.0,
            frame_cache_size: 128,
            ..Self::default()
        }
    }

    /// Sports, action footage: more frames, stricter static check, earlier
    /// scene cuts.
    pub fn for_high_motion() -> Self {
        Self {
            max_frames: 24,
            static_diff_threshold: 4.0,
            scene_change_threshold: 0.6,
            face_group_distance: 0.08,
            ..Self::default()
        }
    }

    /// Read `LOCAL_AI_VIDEO_*` variables; unset or unparsable values fall
    /// back to the defaults, everything is clamped.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            max_frames: parse_or(&lookup, ENV_MAX_FRAMES, defaults.max_frames),
            max_frame_width: parse_or(&lookup, ENV_RESIZE_MAX_WIDTH, defaults.max_frame_width),
            static_prefilter_enabled: lookup(ENV_STATIC_PREFILTER)
                .map(|raw| env_enabled(&raw))
                .unwrap_or(defaults.static_prefilter_enabled),
            static_prefilter_samples: parse_or(
                &lookup,
                ENV_STATIC_PREFILTER_SAMPLES,
                defaults.static_prefilter_samples,
            ),
            static_diff_threshold: parse_or(
                &lookup,
                ENV_STATIC_DIFF_THRESHOLD,
                defaults.static_diff_threshold,
            ),
            frame_cache_size: parse_or(&lookup, ENV_FRAME_CACHE_SIZE, defaults.frame_cache_size),
            ..defaults
        }
        .sanitized()
    }

    /// Clamp every field into its supported range.
    pub fn sanitized(mut self) -> Self {
        self.max_frames = self.max_frames.clamp(1, 60);
        self.max_frame_width = self.max_frame_width.clamp(160, 1920);
        self.static_prefilter_samples = self.static_prefilter_samples.clamp(2, 8);
        self.static_diff_threshold = clamp_f64(self.static_diff_threshold, 1.0, 35.0, 8.5);
        self.frame_cache_size = self.frame_cache_size.min(512);
        self.scene_change_threshold = clamp_f64(self.scene_change_threshold, -1.0, 1.0, 0.7);
        self.face_iou_threshold = clamp_f32(self.face_iou_threshold, 0.0, 1.0, 0.35);
        self.face_group_distance = clamp_f32(self.face_group_distance, 0.0, 1.5, 0.05);
        self
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid {}={:?}, using default", key, raw);
            default
        }),
        None => default,
    }
}

fn env_enabled(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn clamp_f64(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(min, max)
    }
}

fn clamp_f32(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(min, max)
    }
}
