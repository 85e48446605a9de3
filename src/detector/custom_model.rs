//! Custom-model strategy
//!
//! Runs a purpose-trained plate detector when one is available. When no
//! model file can be resolved the strategy stays usable by degrading to
//! the region-proposal pipeline, preserving the call contract so the
//! fallback chain still has a working rung here.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::camera::Frame;
use crate::detector::model::{ModelKind, ModelStore, ObjectModel, OnnxModelConfig, OnnxObjectModel};
use crate::detector::pipeline::ProposalPipeline;
use crate::detector::{Detector, DetectorCapability, DetectorError};
use crate::vision::{CandidateRegion, DetectionResult};

pub struct CustomModelDetector {
    /// Explicitly configured model path, if any
    model_path: Option<PathBuf>,
    model_config: OnnxModelConfig,
    model: Option<Box<dyn ObjectModel>>,
    pipeline: ProposalPipeline,
    ready: bool,
}

impl CustomModelDetector {
    pub fn new(
        model_path: Option<PathBuf>,
        model_config: OnnxModelConfig,
        pipeline: ProposalPipeline,
    ) -> Self {
        Self {
            model_path,
            model_config,
            model: None,
            pipeline,
            ready: false,
        }
    }

    fn load_model(&self) -> Option<Box<dyn ObjectModel>> {
        let store = match ModelStore::new() {
            Ok(store) => store,
            Err(e) => {
                warn!("Model store unavailable: {e}");
                return None;
            }
        };

        let path = store.resolve(ModelKind::PlateDetector, self.model_path.as_deref())?;
        match OnnxObjectModel::load(&path, self.model_config.clone()) {
            Ok(model) => Some(Box::new(model)),
            Err(e) => {
                warn!("Failed to load custom plate model {:?}: {e}", path);
                None
            }
        }
    }
}

#[async_trait]
impl Detector for CustomModelDetector {
    fn capability(&self) -> DetectorCapability {
        DetectorCapability::CustomModel
    }

    async fn initialize(&mut self) -> Result<(), DetectorError> {
        if self.ready {
            return Ok(());
        }

        self.model = self.load_model();
        match &self.model {
            Some(model) => info!("Custom plate model ready: {}", model.name()),
            None => warn!(
                "No custom plate model available; degrading to region-proposal pipeline"
            ),
        }

        self.ready = true;
        Ok(())
    }

    async fn detect(&mut self, frame: &Frame) -> Result<Option<DetectionResult>, DetectorError> {
        if !self.ready {
            return Err(DetectorError::Runtime(anyhow::anyhow!(
                "detect called before initialize"
            )));
        }

        let Some(model) = self.model.as_mut() else {
            // Degraded mode: same contract, heuristic machinery.
            return Ok(self.pipeline.detect(frame));
        };

        let detections = model.infer(frame).map_err(DetectorError::Runtime)?;
        debug!("custom model proposed {} regions", detections.len());

        for detection in &detections {
            let region = CandidateRegion {
                bbox: detection.bbox,
                confidence: detection.confidence,
            };
            if let Some(result) = self.pipeline.read_region(frame, &region) {
                return Ok(Some(result));
            }
        }

        Ok(None)
    }

    fn dispose(&mut self) {
        self.model = None;
        self.ready = false;
    }
}
