//! Detector Strategies
//!
//! Four interchangeable implementations of the [`Detector`] contract, in
//! descending order of assumed capability: a remote vision-language
//! service, a purpose-trained model, a generic object model refined by
//! region proposal, and the pure region-proposal + OCR fallback. The
//! [`chain::FallbackChain`] owns which one is active and demotes on
//! failure; nothing else in the crate branches on detector type.

pub mod chain;
pub mod custom_model;
pub mod generic_model;
pub mod heuristic;
pub mod model;
pub mod pipeline;
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::camera::Frame;
use crate::vision::DetectionResult;

pub use chain::{ChainError, FallbackChain};
pub use custom_model::CustomModelDetector;
pub use generic_model::GenericModelDetector;
pub use heuristic::HeuristicDetector;
pub use remote::RemoteVisionDetector;

/// Capability rank of a detector strategy, used for fallback ordering.
///
/// Ordering is by descending capability: `Remote` is preferred over
/// `CustomModel`, and so on down to `HeuristicOnly`, which is always
/// available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorCapability {
    Remote,
    CustomModel,
    GenericModel,
    HeuristicOnly,
}

impl DetectorCapability {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            DetectorCapability::Remote => "remote",
            DetectorCapability::CustomModel => "custom_model",
            DetectorCapability::GenericModel => "generic_model",
            DetectorCapability::HeuristicOnly => "heuristic",
        }
    }
}

/// Detector failures, split by when they occur.
///
/// Both variants demote the fallback chain; neither stops scanning while
/// a less capable strategy remains.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// `initialize()` failed; the strategy never became ready.
    #[error("detector initialization failed: {0}")]
    Init(#[source] anyhow::Error),
    /// `detect()` blew up (as opposed to finding nothing).
    #[error("detector runtime failure: {0}")]
    Runtime(#[source] anyhow::Error),
}

/// Per-strategy confidence gates.
///
/// A detection is accepted only when the region/detection confidence and
/// the OCR confidence independently clear these floors. More capable
/// strategies warrant higher floors: their output is presented with more
/// authority, so false positives cost more.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorThresholds {
    pub detection: f32,
    pub ocr: f32,
}

impl DetectorThresholds {
    pub fn new(detection: f32, ocr: f32) -> Self {
        Self { detection, ocr }
    }

    /// Whether a result clears both gates.
    pub fn accepts(&self, result: &DetectionResult) -> bool {
        result.detection_confidence >= self.detection && result.ocr_confidence >= self.ocr
    }
}

/// Confidence gates per strategy.
///
/// Defaults keep the numbers the field deployment settled on; they are
/// tunable, not derived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTable {
    pub remote: DetectorThresholds,
    pub custom_model: DetectorThresholds,
    pub generic_model: DetectorThresholds,
    pub heuristic: DetectorThresholds,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            remote: DetectorThresholds::new(0.70, 0.80),
            custom_model: DetectorThresholds::new(0.50, 0.55),
            generic_model: DetectorThresholds::new(0.40, 0.45),
            heuristic: DetectorThresholds::new(0.30, 0.35),
        }
    }
}

impl ThresholdTable {
    pub fn for_capability(&self, capability: DetectorCapability) -> DetectorThresholds {
        match capability {
            DetectorCapability::Remote => self.remote,
            DetectorCapability::CustomModel => self.custom_model,
            DetectorCapability::GenericModel => self.generic_model,
            DetectorCapability::HeuristicOnly => self.heuristic,
        }
    }
}

/// Common contract for every detection strategy.
#[async_trait]
pub trait Detector: Send {
    /// Capability rank of this strategy.
    fn capability(&self) -> DetectorCapability;

    /// Prepare the strategy for use. Idempotent: calling it on an
    /// already-ready strategy is a no-op and must not re-acquire
    /// resources.
    async fn initialize(&mut self) -> Result<(), DetectorError>;

    /// Run one detection attempt over a frame.
    ///
    /// `Ok(None)` is the normal "nothing found" outcome; `Err` means the
    /// strategy itself failed and the chain should demote.
    async fn detect(&mut self, frame: &Frame) -> Result<Option<DetectionResult>, DetectorError>;

    /// Release any held resources. Safe to call repeatedly.
    fn dispose(&mut self);
}
