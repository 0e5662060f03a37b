//! Pixel ingest — BMP decode and raw RGB/RGBA conversion.
//!
//! Hosts hand over pixel data in one of three encodings; all three land in
//! the same row-major RGB buffer with a top-left origin. Texture sources
//! with a bottom-left origin (game-engine convention) pass `flip = true`
//! to reverse row order during the copy.

use image::ImageFormat;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to decode BMP: {0}")]
    Decode(String),
    #[error("pixel buffer too short: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("image dimensions are zero")]
    ZeroDimensions,
}

/// Row-major RGB image, top-left origin, 3 bytes per pixel.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl PixelBuffer {
    /// Decode a complete BMP file held in memory.
    pub fn from_bmp(bytes: &[u8]) -> Result<Self, IngestError> {
        let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Bmp)
            .map_err(|e| IngestError::Decode(e.to_string()))?;
        let rgb = decoded.to_rgb8();
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            return Err(IngestError::ZeroDimensions);
        }
        Ok(Self {
            data: rgb.into_raw(),
            width,
            height,
        })
    }

    /// Copy a packed RGB buffer.
    ///
    /// With `flip` set, input row `r` lands at row `height - 1 - r`.
    pub fn from_rgb(bytes: &[u8], width: u32, height: u32, flip: bool) -> Result<Self, IngestError> {
        Self::from_packed(bytes, width, height, flip, 3)
    }

    /// Copy a packed RGBA buffer. The alpha byte is read and discarded,
    /// never composited.
    pub fn from_rgba(
        bytes: &[u8],
        width: u32,
        height: u32,
        flip: bool,
    ) -> Result<Self, IngestError> {
        Self::from_packed(bytes, width, height, flip, 4)
    }

    fn from_packed(
        bytes: &[u8],
        width: u32,
        height: u32,
        flip: bool,
        stride: usize,
    ) -> Result<Self, IngestError> {
        if width == 0 || height == 0 {
            return Err(IngestError::ZeroDimensions);
        }
        let w = width as usize;
        let h = height as usize;
        let expected = w * h * stride;
        if bytes.len() < expected {
            return Err(IngestError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }

        let mut data = vec![0u8; w * h * 3];
        for row in 0..h {
            let target = if flip { h - 1 - row } else { row };
            let src = &bytes[row * w * stride..(row + 1) * w * stride];
            let dst = &mut data[target * w * 3..(target + 1) * w * 3];
            for col in 0..w {
                dst[col * 3..col * 3 + 3].copy_from_slice(&src[col * stride..col * stride + 3]);
            }
        }

        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGB bytes, `width * height * 3` long.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// RGB triple at (x, y), or `None` out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let off = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.data[off], self.data[off + 1], self.data[off + 2]])
    }
}
