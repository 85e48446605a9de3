//! Generic-object-model strategy
//!
//! A general-purpose object model finds coarse regions of interest
//! (vehicles, signage); the region-proposal engine then refines those to
//! plate-sized boxes before OCR. Without a loadable generic model the
//! strategy cannot initialize, and the chain moves on to the heuristic.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::camera::Frame;
use crate::detector::model::{ModelKind, ModelStore, ObjectModel, OnnxModelConfig, OnnxObjectModel};
use crate::detector::pipeline::ProposalPipeline;
use crate::detector::{Detector, DetectorCapability, DetectorError};
use crate::vision::{propose_regions, CandidateRegion, DetectionResult, RegionProposalConfig};

pub struct GenericModelDetector {
    model_path: Option<PathBuf>,
    model_config: OnnxModelConfig,
    proposal: RegionProposalConfig,
    pipeline: ProposalPipeline,
    model: Option<Box<dyn ObjectModel>>,
}

impl GenericModelDetector {
    pub fn new(
        model_path: Option<PathBuf>,
        model_config: OnnxModelConfig,
        proposal: RegionProposalConfig,
        pipeline: ProposalPipeline,
    ) -> Self {
        Self {
            model_path,
            model_config,
            proposal,
            pipeline,
            model: None,
        }
    }

    /// Keep the proposals that fall inside some coarse model region; when
    /// the model found nothing useful, fall back to the raw proposals so
    /// a weak model never blinds the strategy.
    fn refine(
        proposals: Vec<CandidateRegion>,
        coarse: &[crate::detector::model::ModelDetection],
    ) -> Vec<CandidateRegion> {
        if coarse.is_empty() {
            return proposals;
        }

        let refined: Vec<CandidateRegion> = proposals
            .iter()
            .copied()
            .filter(|p| coarse.iter().any(|c| p.bbox.intersect(&c.bbox).is_some()))
            .collect();

        if refined.is_empty() {
            proposals
        } else {
            refined
        }
    }
}

#[async_trait]
impl Detector for GenericModelDetector {
    fn capability(&self) -> DetectorCapability {
        DetectorCapability::GenericModel
    }

    async fn initialize(&mut self) -> Result<(), DetectorError> {
        if self.model.is_some() {
            return Ok(());
        }

        let store = ModelStore::new().map_err(DetectorError::Init)?;
        let path = store
            .resolve(ModelKind::GenericObject, self.model_path.as_deref())
            .ok_or_else(|| {
                DetectorError::Init(anyhow::anyhow!("no generic object model available"))
            })?;

        let model = OnnxObjectModel::load(&path, self.model_config.clone())
            .map_err(DetectorError::Init)?;
        info!("Generic object model ready: {}", model.name());
        self.model = Some(Box::new(model));
        Ok(())
    }

    async fn detect(&mut self, frame: &Frame) -> Result<Option<DetectionResult>, DetectorError> {
        let Some(model) = self.model.as_mut() else {
            return Err(DetectorError::Runtime(anyhow::anyhow!(
                "detect called before initialize"
            )));
        };

        let coarse = model.infer(frame).map_err(DetectorError::Runtime)?;
        let proposals = propose_regions(frame, &self.proposal);
        let refined = Self::refine(proposals, &coarse);
        debug!(
            "generic model: {} coarse regions, {} refined proposals",
            coarse.len(),
            refined.len()
        );

        for region in &refined {
            if let Some(result) = self.pipeline.read_region(frame, region) {
                return Ok(Some(result));
            }
        }

        Ok(None)
    }

    fn dispose(&mut self) {
        self.model = None;
    }
}
