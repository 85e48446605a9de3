//! Region proposal engine
//!
//! Proposes plate-plausible rectangular regions from a raw frame using
//! classical image processing only: Sobel edge extraction, connected-edge
//! contour tracing, rectangularity scoring and non-maximum suppression.
//! No learned weights, so every fallback strategy can reuse it.
//!
//! The engine is a pure function of its pixel input: identical frames
//! produce identical candidate lists, and a frame with no edge-plausible
//! rectangular region produces an empty list, never a guessed box.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use crate::camera::Frame;
use crate::vision::{BoundingBox, CandidateRegion};

const SOBEL_X: [[f32; 3]; 3] = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
const SOBEL_Y: [[f32; 3]; 3] = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];

/// Weight of rectangularity vs interior edge density in the region score.
const RECTANGULARITY_WEIGHT: f32 = 0.6;
/// Interior edge density at which the density term saturates.
const DENSITY_SATURATION: f32 = 0.25;

/// Tunables for region proposal.
///
/// Area bounds assume roughly 720p input; scale them with the capture
/// resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionProposalConfig {
    /// Sobel gradient magnitude above which a pixel counts as an edge
    pub edge_threshold: f32,
    /// Minimum pixels in a contour before it is considered at all
    pub min_contour_len: usize,
    /// Minimum fraction of a box border lying on detected edges
    pub min_rectangularity: f32,
    /// Plate-plausible aspect ratio range (width : height)
    pub min_aspect: f32,
    pub max_aspect: f32,
    /// Plate-plausible area range in px^2
    pub min_area: u32,
    pub max_area: u32,
    /// Overlap above which a lower-scored region is suppressed
    pub nms_iou_threshold: f32,
    /// Maximum candidates returned per frame
    pub max_regions: usize,
}

impl Default for RegionProposalConfig {
    fn default() -> Self {
        Self {
            edge_threshold: 160.0,
            min_contour_len: 60,
            min_rectangularity: 0.6,
            min_aspect: 2.0,
            max_aspect: 5.0,
            min_area: 800,
            max_area: 20_000,
            nms_iou_threshold: 0.3,
            max_regions: 4,
        }
    }
}

/// Propose plate-plausible regions from a frame.
pub fn propose_regions(frame: &Frame, config: &RegionProposalConfig) -> Vec<CandidateRegion> {
    propose_from_luma(&frame.to_luma(), config)
}

/// Propose regions from an already grayscaled frame.
pub fn propose_from_luma(gray: &GrayImage, config: &RegionProposalConfig) -> Vec<CandidateRegion> {
    let start = Instant::now();
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return vec![];
    }

    let edges = edge_mask(gray, config.edge_threshold);
    let contours = trace_contours(&edges, width as usize, height as usize, config.min_contour_len);

    let mut candidates = Vec::new();
    for contour in &contours {
        let bbox = contour.bbox();

        let area = bbox.area();
        if area < config.min_area || area > config.max_area {
            continue;
        }

        let aspect = bbox.aspect_ratio();
        if !(config.min_aspect..=config.max_aspect).contains(&aspect) {
            continue;
        }

        let rectangularity = border_edge_fraction(&edges, width as usize, height as usize, &bbox);
        if rectangularity < config.min_rectangularity {
            continue;
        }

        let density = interior_edge_density(&edges, width as usize, &bbox);
        let density_norm = (density / DENSITY_SATURATION).min(1.0);
        let score = RECTANGULARITY_WEIGHT * rectangularity
            + (1.0 - RECTANGULARITY_WEIGHT) * density_norm;

        candidates.push(CandidateRegion {
            bbox,
            confidence: score.clamp(0.0, 1.0),
        });
    }

    let kept = non_maximum_suppression(candidates, config.nms_iou_threshold, config.max_regions);

    debug!(
        "Region proposal complete in {:?}: {} contours, {} candidates kept",
        start.elapsed(),
        contours.len(),
        kept.len()
    );

    kept
}

/// Binary edge mask from thresholded Sobel gradient magnitude.
fn edge_mask(gray: &GrayImage, threshold: f32) -> Vec<bool> {
    let (width, height) = gray.dimensions();
    let w = width as usize;
    let h = height as usize;
    let mut mask = vec![false; w * h];

    for y in 0..h {
        let ys = [y.saturating_sub(1), y, (y + 1).min(h - 1)];
        for x in 0..w {
            let xs = [x.saturating_sub(1), x, (x + 1).min(w - 1)];

            let mut gx = 0.0f32;
            let mut gy = 0.0f32;
            for ky in 0..3 {
                for kx in 0..3 {
                    let v = gray.get_pixel(xs[kx] as u32, ys[ky] as u32).0[0] as f32;
                    gx += v * SOBEL_X[ky][kx];
                    gy += v * SOBEL_Y[ky][kx];
                }
            }

            if (gx * gx + gy * gy).sqrt() >= threshold {
                mask[y * w + x] = true;
            }
        }
    }

    mask
}

/// A traced connected component of edge pixels.
struct Contour {
    len: usize,
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
}

impl Contour {
    fn bbox(&self) -> BoundingBox {
        BoundingBox::new(
            self.min_x as u32,
            self.min_y as u32,
            (self.max_x - self.min_x + 1) as u32,
            (self.max_y - self.min_y + 1) as u32,
        )
    }
}

/// Trace 8-connected edge components with an explicit flood-fill stack.
fn trace_contours(edges: &[bool], w: usize, h: usize, min_len: usize) -> Vec<Contour> {
    let mut visited = vec![false; w * h];
    let mut contours = Vec::new();
    let mut stack = Vec::new();

    for start in 0..edges.len() {
        if !edges[start] || visited[start] {
            continue;
        }

        let mut contour = Contour {
            len: 0,
            min_x: usize::MAX,
            min_y: usize::MAX,
            max_x: 0,
            max_y: 0,
        };

        visited[start] = true;
        stack.push(start);

        while let Some(idx) = stack.pop() {
            let x = idx % w;
            let y = idx / w;

            contour.len += 1;
            contour.min_x = contour.min_x.min(x);
            contour.min_y = contour.min_y.min(y);
            contour.max_x = contour.max_x.max(x);
            contour.max_y = contour.max_y.max(y);

            let x0 = x.saturating_sub(1);
            let x1 = (x + 1).min(w - 1);
            let y0 = y.saturating_sub(1);
            let y1 = (y + 1).min(h - 1);
            for ny in y0..=y1 {
                for nx in x0..=x1 {
                    let nidx = ny * w + nx;
                    if edges[nidx] && !visited[nidx] {
                        visited[nidx] = true;
                        stack.push(nidx);
                    }
                }
            }
        }

        if contour.len >= min_len {
            contours.push(contour);
        }
    }

    contours
}

/// Fraction of the box's border pixels coinciding with detected edges.
///
/// A one-pixel tolerance band absorbs the edge thickening Sobel introduces
/// around a step boundary.
fn border_edge_fraction(edges: &[bool], w: usize, h: usize, bbox: &BoundingBox) -> f32 {
    let x0 = bbox.x as usize;
    let y0 = bbox.y as usize;
    let x1 = (bbox.x + bbox.width - 1) as usize;
    let y1 = (bbox.y + bbox.height - 1) as usize;

    let near_edge = |x: usize, y: usize| -> bool {
        let xa = x.saturating_sub(1);
        let xb = (x + 1).min(w - 1);
        let ya = y.saturating_sub(1);
        let yb = (y + 1).min(h - 1);
        for ny in ya..=yb {
            for nx in xa..=xb {
                if edges[ny * w + nx] {
                    return true;
                }
            }
        }
        false
    };

    let mut total = 0u32;
    let mut on_edge = 0u32;

    for x in x0..=x1 {
        for y in [y0, y1] {
            total += 1;
            if near_edge(x, y) {
                on_edge += 1;
            }
        }
    }
    // Skip the corners already counted by the horizontal runs.
    if y1 > y0 + 1 {
        for y in (y0 + 1)..y1 {
            for x in [x0, x1] {
                total += 1;
                if near_edge(x, y) {
                    on_edge += 1;
                }
            }
        }
    }

    if total == 0 {
        return 0.0;
    }
    on_edge as f32 / total as f32
}

/// Fraction of pixels inside the box that are edge pixels.
fn interior_edge_density(edges: &[bool], w: usize, bbox: &BoundingBox) -> f32 {
    let mut count = 0u32;
    for y in bbox.y..bbox.y + bbox.height {
        for x in bbox.x..bbox.x + bbox.width {
            if edges[y as usize * w + x as usize] {
                count += 1;
            }
        }
    }
    count as f32 / bbox.area().max(1) as f32
}

/// Keep the highest-scored regions, suppressing overlapping lower scores.
fn non_maximum_suppression(
    mut candidates: Vec<CandidateRegion>,
    iou_threshold: f32,
    max_regions: usize,
) -> Vec<CandidateRegion> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<CandidateRegion> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_regions {
            break;
        }
        let overlaps = kept
            .iter()
            .any(|k| k.bbox.iou(&candidate.bbox) > iou_threshold);
        if !overlaps {
            kept.push(candidate);
        }
    }

    kept
}
