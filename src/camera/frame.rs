//! Frame data structures for captured camera content

use image::{GrayImage, RgbaImage};
use std::time::Instant;

/// A single raster frame pulled from a camera source.
///
/// Frames are immutable once captured: every downstream stage copies out
/// what it needs and produces new buffers, so a frame handed to a detector
/// stays valid even after the camera has moved on.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw RGBA pixel data
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Timestamp when the frame was captured
    pub timestamp: Instant,
}

impl Frame {
    /// Create a new frame from raw RGBA data
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    /// Create a frame from a decoded image
    pub fn from_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height)
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// View the frame as an owned RGBA image buffer.
    ///
    /// Returns `None` if the pixel buffer does not match the declared
    /// dimensions (a malformed capture).
    pub fn to_rgba(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.data.clone())
    }

    /// Convert the frame to grayscale using standard luminance weights.
    pub fn to_luma(&self) -> GrayImage {
        let mut gray = GrayImage::new(self.width, self.height);

        for y in 0..self.height {
            for x in 0..self.width {
                let idx = ((y * self.width + x) * 4) as usize;
                if idx + 2 < self.data.len() {
                    let r = self.data[idx] as f32;
                    let g = self.data[idx + 1] as f32;
                    let b = self.data[idx + 2] as f32;
                    let lum = (0.299 * r + 0.587 * g + 0.114 * b) as u8;
                    gray.put_pixel(x, y, image::Luma([lum]));
                }
            }
        }

        gray
    }
}
