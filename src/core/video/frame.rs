use super::error::{AnalysisError, VideoResult};
use image::{DynamicImage, GrayImage, RgbaImage};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// 帧数据结构（RGBA 像素）
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>, // RGBA 格式
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> VideoResult<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(AnalysisError::InvalidFrame(format!(
                "{}x{} RGBA frame needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Solid-color frame, mostly useful for synthetic streams.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = [rgb[0], rgb[1], rgb[2], 255].repeat(width as usize * height as usize);
        Self {
            width,
            height,
            data,
        }
    }

    pub fn from_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
        }
    }

    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self::from_image(image.to_rgba8())
    }

    /// Decode a still image file (png, jpeg, bmp).
    pub fn open(path: impl AsRef<Path>) -> VideoResult<Self> {
        Ok(Self::from_dynamic(image::open(path)?))
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn to_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.data.clone())
    }

    /// BT.601 luma, integer weights.
    pub fn to_gray(&self) -> GrayImage {
        let luma: Vec<u8> = self
            .data
            .chunks_exact(4)
            .map(|rgba| luma(rgba[0], rgba[1], rgba[2]))
            .collect();
        GrayImage::from_raw(self.width, self.height, luma)
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }
}

/// Rounded to nearest, as cv2.cvtColor does.
pub(crate) fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114 + 500) / 1000) as u8
}

/// Content hash of a prepared frame, used as the inference cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameSignature(String);

impl FrameSignature {
    pub fn of(frame: &Frame) -> Self {
        if frame.is_empty() {
            return Self("empty".to_string());
        }
        let mut hasher = Sha256::new();
        hasher.update(frame.width.to_le_bytes());
        hasher.update(frame.height.to_le_bytes());
        hasher.update(&frame.data);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FrameSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A frame after size normalization, tagged with where it came from.
#[derive(Debug, Clone)]
pub struct PreparedFrame {
    pub frame: Frame,
    pub frame_index: u64,
    /// Seconds from stream start.
    pub timestamp: f64,
}

impl PreparedFrame {
    pub fn width(&self) -> u32 {
        self.frame.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }

    pub fn signature(&self) -> FrameSignature {
        FrameSignature::of(&self.frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let data = vec![255u8; 100 * 100 * 4];
        let frame = Frame::new(100, 100, data).unwrap();

        assert_eq!(frame.width, 100);
        assert_eq!(frame.height, 100);
        assert_eq!(frame.pixel_count(), 10000);
    }

    #[test]
    fn test_frame_rejects_short_buffer() {
        let result = Frame::new(10, 10, vec![0u8; 10]);
        assert!(matches!(result, Err(AnalysisError::InvalidFrame(_))));
    }

    #[test]
    fn test_gray_conversion() {
        let frame = Frame::filled(4, 4, [255, 255, 255]);
        let gray = frame.to_gray();
        assert_eq!(gray.dimensions(), (4, 4));
        assert!(gray.pixels().all(|p| p.0[0] == 255));

        let red = Frame::filled(2, 2, [255, 0, 0]);
        assert!(red.to_gray().pixels().all(|p| p.0[0] == 76));
    }

    #[test]
    fn test_luma_rounds_to_nearest() {
        // 149.685 and 0.57 round up
        assert_eq!(luma(0, 255, 0), 150);
        assert_eq!(luma(0, 0, 5), 1);
        // 29.07 rounds down
        assert_eq!(luma(0, 0, 255), 29);
        assert_eq!(luma(128, 128, 128), 128);
    }

    #[test]
    fn test_open_image_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        RgbaImage::from_pixel(6, 4, image::Rgba([9, 8, 7, 255])).save(&path).unwrap();

        let frame = Frame::open(&path).unwrap();
        assert_eq!(frame, Frame::filled(6, 4, [9, 8, 7]));
    }

    #[test]
    fn test_open_corrupt_image_is_image_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"\x89PNG not really").unwrap();

        assert!(matches!(Frame::open(&path), Err(AnalysisError::Image(_))));
    }

    #[test]
    fn test_signature_is_content_addressed() {
        let a = Frame::filled(8, 8, [10, 20, 30]);
        let b = Frame::filled(8, 8, [10, 20, 30]);
        let c = Frame::filled(8, 8, [10, 20, 31]);

        assert_eq!(FrameSignature::of(&a), FrameSignature::of(&b));
        assert_ne!(FrameSignature::of(&a), FrameSignature::of(&c));
        assert_eq!(FrameSignature::of(&a).as_str().len(), 64);
    }

    #[test]
    fn test_signature_includes_shape() {
        let wide = Frame::filled(8, 2, [0, 0, 0]);
        let tall = Frame::filled(2, 8, [0, 0, 0]);
        assert_ne!(FrameSignature::of(&wide), FrameSignature::of(&tall));
    }
}
