//! Frame sources: random-access readers over a video stream.
//!
//! A source is opened once per analysis call and owned by that call. Release
//! happens on `Drop`, so every exit path of the pipeline closes the stream.

use super::error::{AnalysisError, VideoResult};
use super::frame::Frame;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Stream properties read once at the start of a call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub fps: f64,
    pub total_frames: u64,
}

impl StreamMetadata {
    /// Non-positive or non-finite fps is treated as 1.0.
    pub fn new(fps: f64, total_frames: u64) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 1.0 };
        Self { fps, total_frames }
    }

    pub fn duration(&self) -> f64 {
        self.total_frames as f64 / self.fps
    }

    pub fn timestamp_of(&self, frame_index: u64) -> f64 {
        frame_index as f64 / self.fps
    }
}

/// An opened video stream.
pub trait FrameSource: Send {
    fn metadata(&self) -> StreamMetadata;

    /// Seek to `index` and decode one frame. `None` means the frame is
    /// unavailable; callers skip it.
    fn read_at(&mut self, index: u64) -> Option<Frame>;
}

/// Opens frame sources by path.
pub trait FrameSourceOpener: Send + Sync {
    fn open(&self, path: &Path) -> VideoResult<Box<dyn FrameSource>>;
}

const SEQUENCE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// A directory of still images played back at a fixed frame rate.
///
/// Files are ordered by name, so `frame_00001.png` style numbering works.
pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    fps: f64,
}

impl ImageSequenceSource {
    pub fn open(dir: impl AsRef<Path>, fps: f64) -> VideoResult<Self> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir)
            .map_err(|e| AnalysisError::open_failed(dir, e.to_string()))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_frame = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| SEQUENCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_frame && path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(AnalysisError::open_failed(dir, "no image frames found"));
        }

        info!("🎞️ ImageSequenceSource: opened {:?} ({} frames)", dir, files.len());
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            fps,
        })
    }
}

impl FrameSource for ImageSequenceSource {
    fn metadata(&self) -> StreamMetadata {
        StreamMetadata::new(self.fps, self.files.len() as u64)
    }

    fn read_at(&mut self, index: u64) -> Option<Frame> {
        let path = self.files.get(usize::try_from(index).ok()?)?;
        match Frame::open(path) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!("Frame {} unreadable ({:?}): {}", index, path, e);
                None
            }
        }
    }
}

impl Drop for ImageSequenceSource {
    fn drop(&mut self) {
        debug!("🗑️ ImageSequenceSource: released {:?}", self.dir);
    }
}

/// Opens every path as an [`ImageSequenceSource`] at a fixed fps.
#[derive(Debug, Clone)]
pub struct ImageSequenceOpener {
    pub fps: f64,
}

impl ImageSequenceOpener {
    pub fn new(fps: f64) -> Self {
        Self { fps }
    }
}

impl FrameSourceOpener for ImageSequenceOpener {
    fn open(&self, path: &Path) -> VideoResult<Box<dyn FrameSource>> {
        Ok(Box::new(ImageSequenceSource::open(path, self.fps)?))
    }
}

type FrameFn = dyn Fn(u64) -> Option<Frame> + Send + Sync;

/// In-memory stream backed by a frame generator.
///
/// Clones share the generator and the read counter and release flag, which lets tests
/// observe what the pipeline did with a source it owned.
#[derive(Clone)]
pub struct MemoryFrameSource {
    metadata: StreamMetadata,
    frames: Arc<FrameFn>,
    reads: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

impl MemoryFrameSource {
    pub fn new(frames: Vec<Frame>, fps: f64) -> Self {
        let total = frames.len() as u64;
        let frames = Arc::new(frames);
        Self::from_fn(total, fps, move |index| {
            frames.get(usize::try_from(index).ok()?).cloned()
        })
    }

    pub fn from_fn<F>(total_frames: u64, fps: f64, generator: F) -> Self
    where
        F: Fn(u64) -> Option<Frame> + Send + Sync + 'static,
    {
        Self {
            metadata: StreamMetadata::new(fps, total_frames),
            frames: Arc::new(generator),
            reads: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of `read_at` calls across all clones.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// True once any clone has been dropped.
    pub fn was_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl FrameSource for MemoryFrameSource {
    fn metadata(&self) -> StreamMetadata {
        self.metadata
    }

    fn read_at(&mut self, index: u64) -> Option<Frame> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if index >= self.metadata.total_frames {
            return None;
        }
        (self.frames)(index)
    }
}

impl Drop for MemoryFrameSource {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Path-keyed registry of in-memory streams.
#[derive(Clone, Default)]
pub struct MemorySourceOpener {
    streams: HashMap<PathBuf, MemoryFrameSource>,
}

impl MemorySourceOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream(mut self, path: impl Into<PathBuf>, source: MemoryFrameSource) -> Self {
        self.streams.insert(path.into(), source);
        self
    }
}

impl FrameSourceOpener for MemorySourceOpener {
    fn open(&self, path: &Path) -> VideoResult<Box<dyn FrameSource>> {
        self.streams
            .get(path)
            .map(|source| Box::new(source.clone()) as Box<dyn FrameSource>)
            .ok_or_else(|| AnalysisError::open_failed(path, "no such stream"))
    }
}
