//! Vision Layer
//!
//! Classical image processing shared by every detector strategy: region
//! proposal over raw frames, OCR preprocessing and the recognizer
//! boundary, and plate-grammar validation.

pub mod ocr;
pub mod plate;
pub mod region_proposal;

use serde::{Deserialize, Serialize};

pub use ocr::{OcrError, OcrRequest, OcrText, TextRecognizer};
pub use plate::PlateNumber;
pub use region_proposal::{propose_regions, RegionProposalConfig};

/// Axis-aligned bounding box in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Box area in pixels.
    pub fn area(&self) -> u32 {
        self.width * self.height
    }

    /// Width-to-height ratio; 0.0 for degenerate boxes.
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f32 / self.height as f32
    }

    /// Center point of the box.
    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let intersection = if x2 > x1 && y2 > y1 {
            ((x2 - x1) * (y2 - y1)) as f32
        } else {
            0.0
        };

        let union = self.area() as f32 + other.area() as f32 - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Intersection of two boxes, if they overlap at all.
    pub fn intersect(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        if x2 > x1 && y2 > y1 {
            Some(BoundingBox::new(x1, y1, x2 - x1, y2 - y1))
        } else {
            None
        }
    }
}

/// A plate-plausible region proposed from a frame.
///
/// Ephemeral: produced by region proposal, consumed within one detection
/// attempt, never persisted.
#[derive(Debug, Clone, Copy)]
pub struct CandidateRegion {
    pub bbox: BoundingBox,
    /// Plate-likeness score (0.0 - 1.0)
    pub confidence: f32,
}

/// One confirmed plate detection from a detector strategy.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    /// Grammar-validated plate number
    pub plate: PlateNumber,
    /// Confidence that the bounding box contains a plate (0.0 - 1.0)
    pub detection_confidence: f32,
    /// Confidence of the text read (0.0 - 1.0)
    pub ocr_confidence: f32,
    /// Where the plate was found, for overlay rendering only
    pub bbox: Option<BoundingBox>,
}
