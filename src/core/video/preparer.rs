use super::frame::{Frame, PreparedFrame};
use super::source::StreamMetadata;
use image::imageops;
use log::warn;

/// Bounds frame width before any hashing or model call.
#[derive(Debug, Clone, Copy)]
pub struct FramePreparer {
    max_width: u32,
}

impl FramePreparer {
    pub fn new(max_width: u32) -> Self {
        Self {
            max_width: max_width.max(1),
        }
    }

    pub fn max_width(&self) -> u32 {
        self.max_width
    }

    pub fn prepare(&self, frame: Frame, frame_index: u64, meta: &StreamMetadata) -> PreparedFrame {
        PreparedFrame {
            frame: self.downsize(frame),
            frame_index,
            timestamp: meta.timestamp_of(frame_index),
        }
    }

    /// Area-averaged downscale to `max_width`, keeping aspect ratio. Frames
    /// already narrow enough are returned untouched.
    pub fn downsize(&self, frame: Frame) -> Frame {
        if frame.is_empty() || frame.width <= self.max_width {
            return frame;
        }

        let ratio = self.max_width as f64 / frame.width as f64;
        let target_height = ((frame.height as f64 * ratio).round() as u32).max(1);

        match frame.to_image() {
            Some(img) => Frame::from_image(imageops::thumbnail(&img, self.max_width, target_height)),
            None => {
                warn!(
                    "Frame buffer does not match {}x{}, skipping resize",
                    frame.width, frame.height
                );
                frame
            }
        }
    }
}
