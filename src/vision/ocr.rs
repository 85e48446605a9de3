//! OCR preprocessing and the text-recognition boundary
//!
//! Text extraction itself is delegated to an external recognition engine
//! through [`TextRecognizer`]; this module owns everything around it:
//! cropping the candidate region out of the frame, cleaning it up for
//! character segmentation, and the request/response types the engine sees.

use image::{imageops, GrayImage};
use imageproc::contrast::adaptive_threshold;
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::camera::Frame;
use crate::vision::BoundingBox;

/// Characters that can appear on a plate, plus the separator.
pub const PLATE_CHARSET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ-";

/// Raw text read from a region, before grammar validation.
#[derive(Debug, Clone)]
pub struct OcrText {
    pub text: String,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
}

/// A single recognition request handed to the engine.
pub struct OcrRequest<'a> {
    /// Preprocessed region image (binarized, upscaled)
    pub image: &'a GrayImage,
    /// Characters the engine should constrain itself to
    pub charset: &'a str,
    /// Plates are a single line; engines that support layout hints
    /// should use single-line/single-word mode
    pub single_line: bool,
}

/// Failure inside the recognition engine itself.
///
/// Treated as "no plate" by callers, not as a scan-stopping error.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("ocr backend failure: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Common interface for text-recognition engines.
///
/// Returning `Ok(None)` means the engine ran and found no readable text;
/// that is an expected outcome, not an error.
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &'static str;

    fn recognize(&self, request: &OcrRequest<'_>) -> Result<Option<OcrText>, OcrError>;
}

/// Placeholder recognizer used while a real backend is not wired.
#[derive(Debug, Default)]
pub struct NoopRecognizer;

impl TextRecognizer for NoopRecognizer {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn recognize(&self, _: &OcrRequest<'_>) -> Result<Option<OcrText>, OcrError> {
        Ok(None)
    }
}

/// Tunables for region preprocessing ahead of OCR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrPreprocessConfig {
    /// Radius of the local neighborhood used for adaptive binarization
    pub binarize_block_radius: u32,
    /// Structuring-element size for the morphological close/open pass
    pub morph_radius: u8,
    /// Upscale factor applied after cleanup to aid character segmentation
    pub upscale: u32,
}

impl Default for OcrPreprocessConfig {
    fn default() -> Self {
        Self {
            binarize_block_radius: 12,
            morph_radius: 1,
            upscale: 3,
        }
    }
}

/// Crop a candidate region out of the frame and prepare it for OCR.
///
/// Grayscale, local-mean binarization (tolerates uneven lighting across
/// the plate), a light close+open to knock out speckle, then a smooth
/// upscale. Returns `None` for boxes that fall outside the frame.
pub fn prepare_region(
    frame: &Frame,
    bbox: &BoundingBox,
    config: &OcrPreprocessConfig,
) -> Option<GrayImage> {
    let (fw, fh) = frame.dimensions();
    if bbox.width == 0 || bbox.height == 0 {
        return None;
    }
    if bbox.x + bbox.width > fw || bbox.y + bbox.height > fh {
        return None;
    }

    let gray = frame.to_luma();
    let crop = imageops::crop_imm(&gray, bbox.x, bbox.y, bbox.width, bbox.height).to_image();

    Some(prepare_crop(&crop, config))
}

/// Preprocess an already-cropped region image.
pub fn prepare_crop(crop: &GrayImage, config: &OcrPreprocessConfig) -> GrayImage {
    let binary = adaptive_threshold(crop, config.binarize_block_radius);

    let cleaned = if config.morph_radius > 0 {
        let closed = close(&binary, Norm::LInf, config.morph_radius);
        open(&closed, Norm::LInf, config.morph_radius)
    } else {
        binary
    };

    if config.upscale > 1 {
        let (w, h) = cleaned.dimensions();
        imageops::resize(
            &cleaned,
            w * config.upscale,
            h * config.upscale,
            imageops::FilterType::CatmullRom,
        )
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_prepare_region_upscales() {
        let frame = Frame::new(vec![128u8; 100 * 40 * 4], 100, 40);
        let bbox = BoundingBox::new(10, 5, 60, 20);

        let prepared = prepare_region(&frame, &bbox, &OcrPreprocessConfig::default()).unwrap();
        assert_eq!(prepared.dimensions(), (180, 60));
    }

    #[test]
    fn test_prepare_region_rejects_out_of_bounds() {
        let frame = Frame::new(vec![0u8; 100 * 40 * 4], 100, 40);

        let outside = BoundingBox::new(80, 30, 40, 20);
        assert!(prepare_region(&frame, &outside, &OcrPreprocessConfig::default()).is_none());

        let degenerate = BoundingBox::new(0, 0, 0, 10);
        assert!(prepare_region(&frame, &degenerate, &OcrPreprocessConfig::default()).is_none());
    }

    #[test]
    fn test_prepare_crop_binarizes() {
        // Gradient-lit strip: global thresholding would lose one end.
        let crop = GrayImage::from_fn(60, 20, |x, _| Luma([(40 + x * 3) as u8]));
        let config = OcrPreprocessConfig {
            upscale: 1,
            ..Default::default()
        };

        let prepared = prepare_crop(&crop, &config);
        assert!(prepared.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn test_noop_recognizer_reads_nothing() {
        let image = GrayImage::new(10, 10);
        let request = OcrRequest {
            image: &image,
            charset: PLATE_CHARSET,
            single_line: true,
        };

        let result = NoopRecognizer.recognize(&request).unwrap();
        assert!(result.is_none());
    }
}
