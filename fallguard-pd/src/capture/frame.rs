//! Raw video frames

use crate::error::{Error, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb, RgbImage};

/// Decoded BGR8 frame, row-major, no padding
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture wall-clock time (Unix milliseconds)
    pub timestamp_ms: i64,
    /// Per-source capture counter
    pub sequence: u64,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl Frame {
    /// Wrap BGR8 pixel data, checking the buffer matches the dimensions
    pub fn from_bgr(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = Self::byte_len(width, height);
        if data.len() != expected {
            return Err(Error::FrameDecode(format!(
                "frame buffer is {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp_ms: 0,
            sequence: 0,
        })
    }

    /// Solid-colour frame, mostly useful for tests and placeholders
    pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(Self::byte_len(width, height));
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&bgr);
        }
        Self {
            data,
            width,
            height,
            timestamp_ms: 0,
            sequence: 0,
        }
    }

    /// Byte length of a BGR8 frame
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }

    /// Capture time as fractional Unix seconds
    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp_ms as f64 / 1000.0
    }

    /// Convert to an RGB image buffer
    pub fn to_rgb_image(&self) -> RgbImage {
        let mut rgb = Vec::with_capacity(self.data.len());
        for px in self.data.chunks_exact(3) {
            rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        }
        ImageBuffer::<Rgb<u8>, Vec<u8>>::from_vec(self.width, self.height, rgb)
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    /// Build a frame from an RGB image, keeping this frame's timing metadata
    pub fn with_rgb_image(&self, image: &RgbImage) -> Self {
        let mut data = Vec::with_capacity(image.as_raw().len());
        for px in image.as_raw().chunks_exact(3) {
            data.extend_from_slice(&[px[2], px[1], px[0]]);
        }
        Self {
            data,
            width: image.width(),
            height: image.height(),
            timestamp_ms: self.timestamp_ms,
            sequence: self.sequence,
        }
    }

    /// Encode as JPEG
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let rgb = self.to_rgb_image();
        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(&rgb)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bgr_checks_length() {
        assert!(Frame::from_bgr(vec![0; 12], 2, 2).is_ok());
        assert!(matches!(
            Frame::from_bgr(vec![0; 11], 2, 2),
            Err(Error::FrameDecode(_))
        ));
    }

    #[test]
    fn test_rgb_conversion_swaps_channels() {
        let frame = Frame::filled(2, 1, [10, 20, 30]);
        let rgb = frame.to_rgb_image();
        assert_eq!(rgb.get_pixel(0, 0).0, [30, 20, 10]);

        let back = frame.with_rgb_image(&rgb);
        assert_eq!(back.data, frame.data);
    }

    #[test]
    fn test_encode_jpeg_has_magic() {
        let jpeg = Frame::filled(16, 16, [0, 128, 255]).encode_jpeg(80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
