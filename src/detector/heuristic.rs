//! Heuristic-only strategy
//!
//! Region proposal plus OCR with no learned model anywhere. The strategy
//! of last resort: it has nothing to acquire, so initialization cannot
//! fail and the fallback chain always has somewhere to land.

use async_trait::async_trait;

use crate::camera::Frame;
use crate::detector::pipeline::ProposalPipeline;
use crate::detector::{Detector, DetectorCapability, DetectorError};
use crate::vision::DetectionResult;

pub struct HeuristicDetector {
    pipeline: ProposalPipeline,
    ready: bool,
}

impl HeuristicDetector {
    pub fn new(pipeline: ProposalPipeline) -> Self {
        Self {
            pipeline,
            ready: false,
        }
    }
}

#[async_trait]
impl Detector for HeuristicDetector {
    fn capability(&self) -> DetectorCapability {
        DetectorCapability::HeuristicOnly
    }

    async fn initialize(&mut self) -> Result<(), DetectorError> {
        self.ready = true;
        Ok(())
    }

    async fn detect(&mut self, frame: &Frame) -> Result<Option<DetectionResult>, DetectorError> {
        if !self.ready {
            return Err(DetectorError::Runtime(anyhow::anyhow!(
                "detect called before initialize"
            )));
        }
        Ok(self.pipeline.detect(frame))
    }

    fn dispose(&mut self) {
        self.ready = false;
    }
}
