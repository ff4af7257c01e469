//! ffmpeg 视频源：ffprobe 读取元数据，ffmpeg 子进程输出 rgb24 原始帧
//!
//! One decoder process runs at a time. Forward reads within a short gap are
//! served by discarding frames; anything else restarts the decoder with an
//! input-side seek.

use super::error::{AnalysisError, VideoResult};
use super::frame::Frame;
use super::source::{FrameSource, FrameSourceOpener, StreamMetadata};
use log::{debug, info, warn};
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

/// Forward gaps up to this many frames are decoded through instead of
/// restarting the decoder.
const MAX_SKIP_FRAMES: u64 = 90;

/// Stream properties reported by ffprobe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoProbe {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub total_frames: u64,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Parse `"30000/1001"` or `"29.97"`. `"0/0"` yields `None`.
fn parse_frame_rate(s: &str) -> Option<f64> {
    let rate = match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den <= 0.0 {
                return None;
            }
            num / den
        }
        None => s.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

fn parse_probe(json: &[u8]) -> Result<VideoProbe, String> {
    let probe: FfprobeOutput = serde_json::from_slice(json).map_err(|e| e.to_string())?;
    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref().map_or(true, |t| t == "video"))
        .ok_or("no video stream")?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err("video stream has no frame size".to_string()),
    };

    // 0.0 is normalized to 1 fps by StreamMetadata
    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(0.0);

    let counted = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.trim().parse::<u64>().ok())
        .filter(|&n| n > 0);
    let total_frames = counted.unwrap_or_else(|| {
        let duration = stream
            .duration
            .as_deref()
            .or(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
            .and_then(|d| d.trim().parse::<f64>().ok())
            .unwrap_or(0.0);
        if fps > 0.0 && duration > 0.0 {
            (duration * fps).round() as u64
        } else {
            0
        }
    });

    Ok(VideoProbe {
        width,
        height,
        fps,
        total_frames,
    })
}

/// Run ffprobe on `path`.
pub fn probe_video(ffprobe: &Path, path: &Path) -> VideoResult<VideoProbe> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            "-select_streams",
            "v:0",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .map_err(|e| AnalysisError::open_failed(path, format!("cannot run {:?}: {}", ffprobe, e)))?;

    if !output.status.success() {
        return Err(AnalysisError::open_failed(path, "ffprobe could not read the file"));
    }
    parse_probe(&output.stdout).map_err(|reason| AnalysisError::open_failed(path, reason))
}

/// Opens video files through the ffmpeg command line tools.
#[derive(Debug, Clone)]
pub struct FfmpegOpener {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegOpener {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegOpener {
    /// `ffmpeg` and `ffprobe` from `PATH`.
    pub fn new() -> Self {
        Self::with_binaries("ffmpeg", "ffprobe")
    }

    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// True when both tools can be executed.
    pub fn is_available(&self) -> bool {
        [&self.ffmpeg, &self.ffprobe].iter().all(|bin| {
            Command::new(bin)
                .arg("-version")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false)
        })
    }
}

impl FrameSourceOpener for FfmpegOpener {
    fn open(&self, path: &Path) -> VideoResult<Box<dyn FrameSource>> {
        Ok(Box::new(FfmpegSource::open(path, &self.ffmpeg, &self.ffprobe)?))
    }
}

struct Decoder {
    child: Child,
    stdout: ChildStdout,
    next_index: u64,
}

/// A video file decoded by an ffmpeg child process.
///
/// The child is killed and reaped on `Drop`.
pub struct FfmpegSource {
    path: PathBuf,
    ffmpeg: PathBuf,
    probe: VideoProbe,
    decoder: Option<Decoder>,
    frame_buf: Vec<u8>,
}

impl FfmpegSource {
    pub fn open(path: impl AsRef<Path>, ffmpeg: &Path, ffprobe: &Path) -> VideoResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(AnalysisError::open_failed(path, "no such file"));
        }

        let probe = probe_video(ffprobe, path)?;
        info!(
            "🎞️ FfmpegSource: opened {:?} ({}x{}, {:.2} fps, {} frames)",
            path, probe.width, probe.height, probe.fps, probe.total_frames
        );
        Ok(Self {
            path: path.to_path_buf(),
            ffmpeg: ffmpeg.to_path_buf(),
            frame_buf: vec![0; probe.width as usize * probe.height as usize * 3],
            probe,
            decoder: None,
        })
    }

    pub fn probe(&self) -> VideoProbe {
        self.probe
    }

    /// True while a decoder process is alive.
    pub fn is_decoding(&self) -> bool {
        self.decoder.is_some()
    }

    fn spawn_decoder(&self, index: u64) -> VideoResult<Decoder> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin"]);
        if index > 0 {
            // half a frame early so the first decoded frame is `index`
            let start = (index as f64 - 0.5) / StreamMetadata::new(self.probe.fps, 0).fps;
            cmd.arg("-ss").arg(format!("{:.6}", start));
        }
        cmd.arg("-i")
            .arg(&self.path)
            .args(["-map", "0:v:0", "-an", "-sn", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd.spawn()?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AnalysisError::open_failed(&self.path, "ffmpeg stdout unavailable"));
        };
        debug!("FfmpegSource: decoder started at frame {}", index);
        Ok(Decoder {
            child,
            stdout,
            next_index: index,
        })
    }

    fn stop_decoder(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            drop(decoder.stdout);
            let _ = decoder.child.kill();
            let _ = decoder.child.wait();
        }
    }

    /// Read the next raw frame into `frame_buf`. Stops the decoder at end of
    /// stream.
    fn read_next(&mut self) -> bool {
        let Some(decoder) = self.decoder.as_mut() else {
            return false;
        };
        match decoder.stdout.read_exact(&mut self.frame_buf) {
            Ok(()) => {
                decoder.next_index += 1;
                true
            }
            Err(e) => {
                debug!("FfmpegSource: decoder ended at frame {}: {}", decoder.next_index, e);
                self.stop_decoder();
                false
            }
        }
    }

    fn current_frame(&self) -> Option<Frame> {
        let rgba: Vec<u8> = self
            .frame_buf
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], 255])
            .collect();
        Frame::new(self.probe.width, self.probe.height, rgba).ok()
    }
}

impl FrameSource for FfmpegSource {
    fn metadata(&self) -> StreamMetadata {
        StreamMetadata::new(self.probe.fps, self.probe.total_frames)
    }

    fn read_at(&mut self, index: u64) -> Option<Frame> {
        if self.probe.total_frames > 0 && index >= self.probe.total_frames {
            return None;
        }

        let reusable = matches!(
            &self.decoder,
            Some(d) if index >= d.next_index && index - d.next_index <= MAX_SKIP_FRAMES
        );
        if !reusable {
            self.stop_decoder();
            match self.spawn_decoder(index) {
                Ok(decoder) => self.decoder = Some(decoder),
                Err(e) => {
                    warn!("FfmpegSource: cannot start decoder for {:?}: {}", self.path, e);
                    return None;
                }
            }
        }

        while self.decoder.as_ref().is_some_and(|d| d.next_index < index) {
            if !self.read_next() {
                return None;
            }
        }
        if !self.read_next() {
            warn!("Frame {} unreadable ({:?})", index, self.path);
            return None;
        }
        self.current_frame()
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.stop_decoder();
        debug!("🗑️ FfmpegSource: released {:?}", self.path);
    }
}
