//! Fallback chain manager
//!
//! Owns the preference-ordered detector strategies and the single piece
//! of "which detector is active" state. Strategies are tried in
//! capability order at startup; any runtime failure demotes to the next
//! rung. Demotion is one-directional for the session — climbing back up
//! requires an explicit [`FallbackChain::reinitialize`].

use thiserror::Error;
use tracing::{info, warn};

use crate::camera::Frame;
use crate::detector::{Detector, DetectorCapability, DetectorError};
use crate::vision::DetectionResult;

/// Chain-level failures. Exhaustion is the only one: every per-strategy
/// failure short of it is absorbed by demotion.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("all detector strategies failed to initialize")]
    Exhausted,
}

/// Result of one detection attempt through the chain.
#[derive(Debug)]
pub enum ChainDetection {
    /// The active strategy ran; `None` means nothing found.
    Finding(Option<DetectionResult>),
    /// The active strategy failed and the chain demoted. The frame is not
    /// retried; the next scheduled attempt uses the new strategy.
    Demoted {
        from: DetectorCapability,
        to: DetectorCapability,
    },
}

pub struct FallbackChain {
    strategies: Vec<Box<dyn Detector>>,
    active: Option<usize>,
}

impl FallbackChain {
    /// Build a chain from strategies, ordered most-capable first.
    pub fn new(mut strategies: Vec<Box<dyn Detector>>) -> Self {
        strategies.sort_by_key(|s| s.capability());
        Self {
            strategies,
            active: None,
        }
    }

    /// Capability of the currently active strategy.
    pub fn active_capability(&self) -> Option<DetectorCapability> {
        self.active.map(|i| self.strategies[i].capability())
    }

    /// Initialize the most capable strategy that will come up. No-op when
    /// a strategy is already active.
    pub async fn initialize(&mut self) -> Result<DetectorCapability, ChainError> {
        if let Some(capability) = self.active_capability() {
            return Ok(capability);
        }
        self.initialize_from(0).await
    }

    /// Explicit restart from the top of the preference order. This is the
    /// only path that can re-select a previously demoted strategy.
    pub async fn reinitialize(&mut self) -> Result<DetectorCapability, ChainError> {
        if let Some(index) = self.active.take() {
            self.strategies[index].dispose();
        }
        self.initialize_from(0).await
    }

    async fn initialize_from(&mut self, start: usize) -> Result<DetectorCapability, ChainError> {
        for index in start..self.strategies.len() {
            let capability = self.strategies[index].capability();
            match self.strategies[index].initialize().await {
                Ok(()) => {
                    info!("Detector strategy active: {}", capability.label());
                    self.active = Some(index);
                    return Ok(capability);
                }
                Err(e) => {
                    warn!(
                        "Detector strategy {} failed to initialize: {e}",
                        capability.label()
                    );
                }
            }
        }

        self.active = None;
        Err(ChainError::Exhausted)
    }

    /// Run one detection attempt with the active strategy.
    pub async fn detect(&mut self, frame: &Frame) -> Result<ChainDetection, ChainError> {
        let Some(index) = self.active else {
            return Err(ChainError::Exhausted);
        };

        match self.strategies[index].detect(frame).await {
            Ok(finding) => Ok(ChainDetection::Finding(finding)),
            Err(e) => {
                let from = self.strategies[index].capability();
                warn!("Detector strategy {} failed: {e}; demoting", from.label());
                self.strategies[index].dispose();
                self.active = None;

                let to = self.initialize_from(index + 1).await?;
                Ok(ChainDetection::Demoted { from, to })
            }
        }
    }

    /// Dispose every strategy and clear the active selection.
    pub fn dispose(&mut self) {
        for strategy in &mut self.strategies {
            strategy.dispose();
        }
        self.active = None;
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_first_working_strategy_becomes_active() {
        let mut chain = FallbackChain::new(vec![
            Box::new(StubDetector::new(
                DetectorCapability::Remote,
                true,
                StubBehavior::ReturnsNone,
            )),
            Box::new(StubDetector::new(
                DetectorCapability::CustomModel,
                false,
                StubBehavior::ReturnsNone,
            )),
        ]);

        let active = chain.initialize().await.unwrap();
        assert_eq!(active, DetectorCapability::CustomModel);
    }

    #[tokio::test]
    async fn test_initialize_twice_does_not_reacquire() {
        let remote = StubDetector::new(
            DetectorCapability::Remote,
            false,
            StubBehavior::ReturnsNone,
        );
        let (init_calls, _) = remote.counters();

        let mut chain = FallbackChain::new(vec![Box::new(remote)]);
        chain.initialize().await.unwrap();
        chain.initialize().await.unwrap();

        assert_eq!(init_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_runtime_failure_demotes_without_retrying_frame() {
        let failing = StubDetector::new(
            DetectorCapability::Remote,
            false,
            StubBehavior::AlwaysFails,
        );
        let fallback = StubDetector::new(
            DetectorCapability::HeuristicOnly,
            false,
            StubBehavior::ReturnsPlate,
        );
        let (_, fallback_detects) = fallback.counters();

        let mut chain = FallbackChain::new(vec![Box::new(failing), Box::new(fallback)]);
        chain.initialize().await.unwrap();

        let result = chain.detect(&test_frame()).await.unwrap();
        assert!(matches!(
            result,
            ChainDetection::Demoted {
                from: DetectorCapability::Remote,
                to: DetectorCapability::HeuristicOnly,
            }
        ));
        // The failed frame is not replayed against the new strategy.
        assert_eq!(fallback_detects.load(std::sync::atomic::Ordering::SeqCst), 0);

        // The next attempt runs on the demoted-to strategy.
        let next = chain.detect(&test_frame()).await.unwrap();
        assert!(matches!(next, ChainDetection::Finding(Some(_))));
        assert_eq!(fallback_detects.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_demotion_is_monotonic_within_session() {
        let mut chain = FallbackChain::new(vec![
            Box::new(StubDetector::new(
                DetectorCapability::Remote,
                false,
                StubBehavior::AlwaysFails,
            )),
            Box::new(StubDetector::new(
                DetectorCapability::HeuristicOnly,
                false,
                StubBehavior::ReturnsNone,
            )),
        ]);
        chain.initialize().await.unwrap();
        chain.detect(&test_frame()).await.unwrap();
        assert_eq!(
            chain.active_capability(),
            Some(DetectorCapability::HeuristicOnly)
        );

        // Repeated attempts never climb back up on their own.
        for _ in 0..3 {
            chain.detect(&test_frame()).await.unwrap();
            assert_eq!(
                chain.active_capability(),
                Some(DetectorCapability::HeuristicOnly)
            );
        }
    }

    #[tokio::test]
    async fn test_explicit_reinitialize_restarts_from_the_top() {
        let mut chain = FallbackChain::new(vec![
            Box::new(StubDetector::new(
                DetectorCapability::Remote,
                false,
                StubBehavior::AlwaysFails,
            )),
            Box::new(StubDetector::new(
                DetectorCapability::HeuristicOnly,
                false,
                StubBehavior::ReturnsNone,
            )),
        ]);
        chain.initialize().await.unwrap();
        chain.detect(&test_frame()).await.unwrap();
        assert_eq!(
            chain.active_capability(),
            Some(DetectorCapability::HeuristicOnly)
        );

        let active = chain.reinitialize().await.unwrap();
        assert_eq!(active, DetectorCapability::Remote);
    }

    #[tokio::test]
    async fn test_total_exhaustion_is_a_chain_error() {
        let mut chain = FallbackChain::new(vec![
            Box::new(StubDetector::new(
                DetectorCapability::Remote,
                true,
                StubBehavior::ReturnsNone,
            )),
            Box::new(StubDetector::new(
                DetectorCapability::HeuristicOnly,
                true,
                StubBehavior::ReturnsNone,
            )),
        ]);

        assert!(matches!(
            chain.initialize().await,
            Err(ChainError::Exhausted)
        ));
    }

    #[tokio::test]
    async fn test_last_strategy_failing_exhausts_the_chain() {
        let mut chain = FallbackChain::new(vec![Box::new(StubDetector::new(
            DetectorCapability::HeuristicOnly,
            false,
            StubBehavior::AlwaysFails,
        ))]);
        chain.initialize().await.unwrap();

        assert!(matches!(
            chain.detect(&test_frame()).await,
            Err(ChainError::Exhausted)
        ));
    }

    #[tokio::test]
    async fn test_strategies_are_ordered_by_capability() {
        // Constructed out of order; the chain still prefers Remote.
        let mut chain = FallbackChain::new(vec![
            Box::new(StubDetector::new(
                DetectorCapability::HeuristicOnly,
                false,
                StubBehavior::ReturnsNone,
            )),
            Box::new(StubDetector::new(
                DetectorCapability::Remote,
                false,
                StubBehavior::ReturnsNone,
            )),
        ]);

        let active = chain.initialize().await.unwrap();
        assert_eq!(active, DetectorCapability::Remote);
    }
}
