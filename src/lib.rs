//! platewatch - license-plate scanning pipeline
//!
//! The detection core of the traffic-administration field module: locate
//! a plate in a camera frame, read and validate its text, resolve it
//! against the vehicle registry, and degrade gracefully across four
//! detector strategies of decreasing capability. The crate is a purely
//! in-process orchestration layer; the camera device, OCR engine, vision
//! service, detection models and registry backend are all collaborators
//! supplied by the host.

pub mod camera;
pub mod config;
pub mod detector;
pub mod lookup;
pub mod scanner;
pub mod vision;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::detector::pipeline::ProposalPipeline;
use crate::detector::{
    CustomModelDetector, Detector, FallbackChain, GenericModelDetector, HeuristicDetector,
    RemoteVisionDetector,
};
use crate::vision::TextRecognizer;

pub use crate::camera::{CameraError, CameraSource, Frame};
pub use crate::scanner::{ScanOrchestrator, ScanOutcome, ScanState, ScanStatus};
pub use crate::vision::{DetectionResult, PlateNumber};

/// Assemble the standard four-strategy fallback chain from configuration.
///
/// The host supplies the text-recognition engine; strategies that cannot
/// come up (no credential, no model file) are skipped at initialization
/// time by the chain itself.
pub fn build_chain(config: &AppConfig, recognizer: Arc<dyn TextRecognizer>) -> FallbackChain {
    let pipeline = || {
        ProposalPipeline::new(
            config.proposal.clone(),
            config.ocr.clone(),
            recognizer.clone(),
        )
    };

    let model_config = crate::detector::model::OnnxModelConfig::default();

    let strategies: Vec<Box<dyn Detector>> = vec![
        Box::new(RemoteVisionDetector::new(
            config.remote.clone(),
            config::vision_api_key(),
        )),
        Box::new(CustomModelDetector::new(
            config.models.plate_model_path.clone(),
            model_config.clone(),
            pipeline(),
        )),
        Box::new(GenericModelDetector::new(
            config.models.generic_model_path.clone(),
            model_config,
            config.proposal.clone(),
            pipeline(),
        )),
        Box::new(HeuristicDetector::new(pipeline())),
    ];

    FallbackChain::new(strategies)
}
