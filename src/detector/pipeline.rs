//! Shared region-proposal → OCR → validation pass
//!
//! The custom-model strategy (when degraded), the generic-model strategy
//! (for refinement) and the heuristic strategy all run this same pass;
//! only where the candidate boxes come from differs between them.

use std::sync::Arc;
use tracing::debug;

use crate::camera::Frame;
use crate::vision::ocr::{self, OcrPreprocessConfig, OcrRequest, PLATE_CHARSET};
use crate::vision::{
    propose_regions, CandidateRegion, DetectionResult, PlateNumber, RegionProposalConfig,
    TextRecognizer,
};

/// Region proposal plus OCR plus grammar validation over one frame.
pub struct ProposalPipeline {
    proposal: RegionProposalConfig,
    preprocess: OcrPreprocessConfig,
    recognizer: Arc<dyn TextRecognizer>,
}

impl ProposalPipeline {
    pub fn new(
        proposal: RegionProposalConfig,
        preprocess: OcrPreprocessConfig,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> Self {
        Self {
            proposal,
            preprocess,
            recognizer,
        }
    }

    /// Propose regions and read them in rank order; first validated plate
    /// wins. Returns `None` when no region yields a grammar-valid read —
    /// OCR failures and rejected text are normal misses here, never
    /// errors.
    pub fn detect(&self, frame: &Frame) -> Option<DetectionResult> {
        let regions = propose_regions(frame, &self.proposal);
        if regions.is_empty() {
            debug!("no plate-plausible regions in frame");
            return None;
        }

        for region in &regions {
            if let Some(result) = self.read_region(frame, region) {
                return Some(result);
            }
        }

        None
    }

    /// OCR a single candidate region and validate the text.
    pub fn read_region(&self, frame: &Frame, region: &CandidateRegion) -> Option<DetectionResult> {
        let prepared = ocr::prepare_region(frame, &region.bbox, &self.preprocess)?;

        let request = OcrRequest {
            image: &prepared,
            charset: PLATE_CHARSET,
            single_line: true,
        };

        let text = match self.recognizer.recognize(&request) {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                // Engine failure reads as "no plate"; the scan loop moves on.
                debug!("ocr failed on region {:?}: {e}", region.bbox);
                return None;
            }
        };

        let Some(plate) = PlateNumber::parse(&text.text) else {
            debug!("ocr text {:?} rejected by plate grammar", text.text);
            return None;
        };

        Some(DetectionResult {
            plate,
            detection_confidence: region.confidence,
            ocr_confidence: text.confidence,
            bbox: Some(region.bbox),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::vision::ocr::{OcrError, OcrText};
    use image::{GrayImage, Luma};

    /// Recognizer that always reads the same text.
    pub struct FixedRecognizer {
        pub text: &'static str,
        pub confidence: f32,
    }

    impl TextRecognizer for FixedRecognizer {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn recognize(&self, _: &OcrRequest<'_>) -> Result<Option<OcrText>, OcrError> {
            Ok(Some(OcrText {
                text: self.text.to_string(),
                confidence: self.confidence,
            }))
        }
    }

    /// Recognizer whose backend always errors.
    pub struct FailingRecognizer;

    impl TextRecognizer for FailingRecognizer {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn recognize(&self, _: &OcrRequest<'_>) -> Result<Option<OcrText>, OcrError> {
            Err(OcrError::Backend(anyhow::anyhow!("backend exploded")))
        }
    }

    /// RGBA frame with a plate-shaped dark rectangle outline on white.
    pub fn plate_frame(w: u32, h: u32, bbox: crate::vision::BoundingBox) -> Frame {
        let mut gray = GrayImage::from_pixel(w, h, Luma([255u8]));

        let x1 = bbox.x + bbox.width - 1;
        let y1 = bbox.y + bbox.height - 1;
        for x in bbox.x..=x1 {
            gray.put_pixel(x, bbox.y, Luma([0]));
            gray.put_pixel(x, y1, Luma([0]));
        }
        for y in bbox.y..=y1 {
            gray.put_pixel(bbox.x, y, Luma([0]));
            gray.put_pixel(x1, y, Luma([0]));
        }
        let mut x = bbox.x + 8;
        while x + 4 < x1 {
            for y in (bbox.y + 6)..(y1 - 6) {
                gray.put_pixel(x, y, Luma([0]));
            }
            x += 12;
        }

        let mut rgba = Vec::with_capacity((w * h * 4) as usize);
        for p in gray.pixels() {
            let v = p.0[0];
            rgba.extend_from_slice(&[v, v, v, 255]);
        }
        Frame::new(rgba, w, h)
    }
}
