//! Scan Orchestrator
//!
//! Owns the camera lifecycle and the continuous-scan loop: pull a frame
//! on a fixed cadence, run it through the fallback chain under a hard
//! timeout, gate the result on per-strategy confidence floors, merge in
//! the vehicle lookup, and publish a [`ScanOutcome`]. Attempts are
//! strictly sequential; the interval is never re-armed while an attempt
//! is in flight, and an explicit stop lets an in-flight analysis finish
//! before the camera is released.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::camera::{CameraError, CameraSource, Frame};
use crate::detector::{ChainError, FallbackChain, ThresholdTable};
use crate::detector::chain::ChainDetection;
use crate::lookup::{VehicleLookup, VehicleRecord};
use crate::vision::{DetectionResult, PlateNumber};

/// Orchestrator state. Owned exclusively by the orchestrator; hosts read
/// it, nothing else writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    CameraStarting,
    CameraActive,
    Scanning,
    Capturing,
    Analyzing,
    Error,
}

/// Terminal status of one completed scan attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// Plate detected and found in the registry
    Registered,
    /// Plate detected, validly read, but not on file
    NotRegistered,
    /// Nothing detected (or detection failed its confidence gate)
    NoPlateDetected,
    /// Plate detected but the lookup backend failed
    DetectionError,
}

/// Externally visible result of a scan attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub plate: Option<PlateNumber>,
    pub vehicle: Option<VehicleRecord>,
    pub status: ScanStatus,
}

impl ScanOutcome {
    fn no_plate() -> Self {
        Self {
            plate: None,
            vehicle: None,
            status: ScanStatus::NoPlateDetected,
        }
    }
}

/// Scan-loop cadence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Milliseconds between detection attempts
    pub interval_ms: u64,
    /// Hard per-attempt ceiling; slower attempts are discarded
    pub attempt_timeout_ms: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1500,
            attempt_timeout_ms: 10_000,
        }
    }
}

impl ScanSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// Orchestrator failures that block the session.
///
/// Everything else the pipeline can produce resolves into a normal
/// [`ScanOutcome`]; only camera loss and detector exhaustion surface here.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("camera failure: {0}")]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Detectors(#[from] ChainError),
    #[error("operation requires state {expected:?}, current state is {actual:?}")]
    InvalidState {
        expected: &'static str,
        actual: ScanState,
    },
}

/// Cloneable handle for stopping a running scan loop from the host.
#[derive(Clone)]
pub struct ScanHandle {
    stop: watch::Sender<bool>,
}

impl ScanHandle {
    /// Request the loop to stop. An attempt already analyzing completes
    /// and publishes before the camera is released.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

pub struct ScanOrchestrator {
    session_id: Uuid,
    camera: Box<dyn CameraSource>,
    chain: FallbackChain,
    lookup: Arc<dyn VehicleLookup>,
    settings: ScanSettings,
    thresholds: ThresholdTable,
    state: ScanState,
    last_detection: Option<DetectionResult>,
    latest_outcome: Arc<RwLock<Option<ScanOutcome>>>,
    outcome_tx: Sender<ScanOutcome>,
    outcome_rx: Receiver<ScanOutcome>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl ScanOrchestrator {
    pub fn new(
        camera: Box<dyn CameraSource>,
        chain: FallbackChain,
        lookup: Arc<dyn VehicleLookup>,
        settings: ScanSettings,
        thresholds: ThresholdTable,
    ) -> Self {
        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded();
        let (stop_tx, stop_rx) = watch::channel(false);

        Self {
            session_id: Uuid::new_v4(),
            camera,
            chain,
            lookup,
            settings,
            thresholds,
            state: ScanState::Idle,
            last_detection: None,
            latest_outcome: Arc::new(RwLock::new(None)),
            outcome_tx,
            outcome_rx,
            stop_tx,
            stop_rx,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// The last detection that cleared its confidence gate, until
    /// superseded or cleared on stop.
    pub fn last_detection(&self) -> Option<&DetectionResult> {
        self.last_detection.as_ref()
    }

    /// Receiver for published outcomes. Cloneable; outcomes arrive in
    /// attempt-completion order.
    pub fn outcomes(&self) -> Receiver<ScanOutcome> {
        self.outcome_rx.clone()
    }

    /// Shared cell holding the most recently published outcome, for UI
    /// hosts that poll instead of draining the channel. The value stays
    /// until superseded by the next published outcome.
    pub fn latest_outcome(&self) -> Arc<RwLock<Option<ScanOutcome>>> {
        self.latest_outcome.clone()
    }

    /// Handle the host uses to stop a running loop.
    pub fn handle(&self) -> ScanHandle {
        ScanHandle {
            stop: self.stop_tx.clone(),
        }
    }

    /// Acquire the camera and bring up the detector chain.
    ///
    /// Valid from `Idle` or `Error` (explicit retry). Camera acquisition
    /// failure parks the session in `Error` until the user retries; it is
    /// never auto-retried.
    pub async fn start(&mut self) -> Result<(), ScanError> {
        match self.state {
            ScanState::Idle | ScanState::Error => {}
            actual => {
                return Err(ScanError::InvalidState {
                    expected: "Idle or Error",
                    actual,
                })
            }
        }

        info!(session = %self.session_id, "starting camera");
        self.state = ScanState::CameraStarting;

        if let Err(e) = self.camera.start() {
            warn!(session = %self.session_id, "camera start failed: {e}");
            self.state = ScanState::Error;
            return Err(e.into());
        }

        match self.chain.initialize().await {
            Ok(capability) => {
                info!(session = %self.session_id, "scanning with {} strategy", capability.label());
            }
            Err(e) => {
                self.camera.stop();
                self.state = ScanState::Error;
                return Err(e.into());
            }
        }

        self.state = ScanState::CameraActive;
        Ok(())
    }

    /// Run the continuous scan loop until the host stops it.
    ///
    /// Starts the camera first if needed, so a single call covers the
    /// whole "start scanning" gesture. Returns normally on stop (state
    /// back to `Idle`, camera released) and with an error on camera loss
    /// or detector exhaustion (state `Error`).
    pub async fn run(&mut self) -> Result<(), ScanError> {
        if self.state != ScanState::CameraActive {
            self.start().await?;
        }

        self.stop_tx.send_replace(false);
        let mut stop_rx = self.stop_rx.clone();

        let mut interval = tokio::time::interval(self.settings.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(session = %self.session_id, "continuous scan loop started");
        loop {
            if *stop_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = stop_rx.changed() => {}
                _ = interval.tick() => {
                    self.state = ScanState::Scanning;
                    let frame = match self.camera.current_frame() {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(session = %self.session_id, "frame pull failed: {e}");
                            self.camera.stop();
                            self.state = ScanState::Error;
                            return Err(e.into());
                        }
                    };

                    // The attempt is awaited to completion here: a stop
                    // request arriving meanwhile takes effect only after
                    // the outcome is published.
                    match self.analyze(&frame).await {
                        Ok(Some(outcome)) => self.publish(outcome),
                        Ok(None) => {}
                        Err(e) => {
                            self.camera.stop();
                            self.state = ScanState::Error;
                            return Err(e);
                        }
                    }
                    self.state = ScanState::Scanning;
                }
            }
        }

        info!(session = %self.session_id, "scan loop stopped");
        self.release();
        Ok(())
    }

    /// Manual one-shot capture: freeze the current frame, analyze it
    /// once, return to the idle-camera state regardless of outcome.
    pub async fn capture(&mut self) -> Result<ScanOutcome, ScanError> {
        if self.state != ScanState::CameraActive {
            return Err(ScanError::InvalidState {
                expected: "CameraActive",
                actual: self.state,
            });
        }

        self.state = ScanState::Capturing;
        let frame = match self.camera.current_frame() {
            Ok(frame) => frame,
            Err(e) => {
                self.camera.stop();
                self.state = ScanState::Error;
                return Err(e.into());
            }
        };

        let analyzed = self.analyze(&frame).await;
        self.state = ScanState::CameraActive;

        // A discarded attempt (timeout, demotion) still answers the
        // operator's explicit capture request with "nothing found".
        let outcome = analyzed?.unwrap_or_else(ScanOutcome::no_plate);
        self.publish(outcome.clone());
        Ok(outcome)
    }

    /// Explicitly stop and release the camera. The running loop observes
    /// the stop flag; callers holding only `&mut self` outside `run` can
    /// use this directly.
    pub fn stop(&mut self) {
        self.stop_tx.send_replace(true);
        self.release();
    }

    /// Explicit user-triggered retry of the full strategy preference
    /// order; the only way back up after demotions.
    pub async fn reinitialize_detectors(&mut self) -> Result<(), ScanError> {
        self.chain.reinitialize().await?;
        Ok(())
    }

    /// One detection attempt over a frame. `Ok(None)` means the attempt
    /// was discarded (timeout or strategy demotion) and nothing is
    /// published; transient failures stay silent at the UI layer.
    async fn analyze(&mut self, frame: &Frame) -> Result<Option<ScanOutcome>, ScanError> {
        self.state = ScanState::Analyzing;

        let detection =
            tokio::time::timeout(self.settings.attempt_timeout(), self.chain.detect(frame)).await;

        match detection {
            Err(_) => {
                debug!(session = %self.session_id, "detection attempt timed out; discarding");
                Ok(None)
            }
            Ok(Err(e @ ChainError::Exhausted)) => Err(e.into()),
            Ok(Ok(ChainDetection::Demoted { from, to })) => {
                info!(
                    session = %self.session_id,
                    "detector demoted {} -> {}",
                    from.label(),
                    to.label()
                );
                Ok(None)
            }
            Ok(Ok(ChainDetection::Finding(None))) => Ok(Some(ScanOutcome::no_plate())),
            Ok(Ok(ChainDetection::Finding(Some(result)))) => {
                Ok(Some(self.resolve(result).await))
            }
        }
    }

    /// Gate a raw detection and merge in the registry lookup.
    async fn resolve(&mut self, result: DetectionResult) -> ScanOutcome {
        let capability = self
            .chain
            .active_capability()
            .unwrap_or(crate::detector::DetectorCapability::HeuristicOnly);
        let thresholds = self.thresholds.for_capability(capability);

        if !thresholds.accepts(&result) {
            debug!(
                session = %self.session_id,
                "detection below {} thresholds (det {:.2}, ocr {:.2}); treating as no plate",
                capability.label(),
                result.detection_confidence,
                result.ocr_confidence
            );
            return ScanOutcome::no_plate();
        }

        info!(session = %self.session_id, "plate detected: {}", result.plate);
        let plate = result.plate.clone();
        self.last_detection = Some(result);

        match self.lookup.lookup(&plate).await {
            Ok(Some(record)) => ScanOutcome {
                plate: Some(plate),
                vehicle: Some(record),
                status: ScanStatus::Registered,
            },
            Ok(None) => ScanOutcome {
                plate: Some(plate),
                vehicle: None,
                status: ScanStatus::NotRegistered,
            },
            Err(e) => {
                // The detection is real even when the registry is not
                // reachable; never show the operator a blank result.
                warn!(session = %self.session_id, "vehicle lookup failed: {e}");
                ScanOutcome {
                    plate: Some(plate),
                    vehicle: None,
                    status: ScanStatus::DetectionError,
                }
            }
        }
    }

    fn publish(&self, outcome: ScanOutcome) {
        *self.latest_outcome.write() = Some(outcome.clone());
        let _ = self.outcome_tx.send(outcome);
    }

    /// Release the camera and clear per-session detection state.
    fn release(&mut self) {
        self.camera.stop();
        self.last_detection = None;
        self.state = ScanState::Idle;
    }
}

impl Drop for ScanOrchestrator {
    fn drop(&mut self) {
        self.camera.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::StillCamera;
    use crate::detector::chain::test_support::{StubBehavior, StubDetector};
    use crate::detector::DetectorCapability;
    use crate::lookup::LookupError;
    use async_trait::async_trait;

    struct FailingCamera;

    impl CameraSource for FailingCamera {
        fn start(&mut self) -> Result<(), CameraError> {
            Err(CameraError::PermissionDenied)
        }
        fn stop(&mut self) {}
        fn is_active(&self) -> bool {
            false
        }
        fn current_frame(&self) -> Result<Frame, CameraError> {
            Err(CameraError::StreamTimeout)
        }
    }

    enum LookupBehavior {
        Match,
        NoMatch,
        Fails,
    }

    struct StubLookup(LookupBehavior);

    #[async_trait]
    impl VehicleLookup for StubLookup {
        async fn lookup(
            &self,
            plate: &PlateNumber,
        ) -> Result<Option<VehicleRecord>, LookupError> {
            match self.0 {
                LookupBehavior::Match => Ok(Some(VehicleRecord {
                    plate: plate.as_str().to_string(),
                    owner_name: "K. Mensah".to_string(),
                    make: "Toyota".to_string(),
                    model: "Corolla".to_string(),
                    color: "Silver".to_string(),
                    registered_until: Some("2026-03-01".to_string()),
                    violations: vec![],
                })),
                LookupBehavior::NoMatch => Ok(None),
                LookupBehavior::Fails => Err(LookupError::Backend { status: 503 }),
            }
        }
    }

    fn still_camera() -> Box<dyn CameraSource> {
        Box::new(StillCamera::new(Frame::new(vec![0u8; 16 * 16 * 4], 16, 16)))
    }

    fn orchestrator(
        detector: StubDetector,
        lookup: LookupBehavior,
        settings: ScanSettings,
    ) -> ScanOrchestrator {
        ScanOrchestrator::new(
            still_camera(),
            FallbackChain::new(vec![Box::new(detector)]),
            Arc::new(StubLookup(lookup)),
            settings,
            ThresholdTable::default(),
        )
    }

    fn fast_settings() -> ScanSettings {
        ScanSettings {
            interval_ms: 20,
            attempt_timeout_ms: 5_000,
        }
    }

    #[tokio::test]
    async fn test_capture_registered_plate() {
        let detector = StubDetector::new(
            DetectorCapability::HeuristicOnly,
            false,
            StubBehavior::ReturnsPlate,
        );
        let mut orch = orchestrator(detector, LookupBehavior::Match, fast_settings());

        orch.start().await.unwrap();
        assert_eq!(orch.state(), ScanState::CameraActive);

        let outcome = orch.capture().await.unwrap();
        assert_eq!(outcome.status, ScanStatus::Registered);
        assert_eq!(outcome.plate.unwrap().as_str(), "GR-1234-20");
        assert!(outcome.vehicle.is_some());
        assert_eq!(orch.state(), ScanState::CameraActive);
        assert!(orch.last_detection().is_some());
    }

    #[tokio::test]
    async fn test_capture_unregistered_plate() {
        let detector = StubDetector::new(
            DetectorCapability::HeuristicOnly,
            false,
            StubBehavior::ReturnsPlate,
        );
        let mut orch = orchestrator(detector, LookupBehavior::NoMatch, fast_settings());

        orch.start().await.unwrap();
        let outcome = orch.capture().await.unwrap();
        assert_eq!(outcome.status, ScanStatus::NotRegistered);
        assert!(outcome.plate.is_some());
        assert!(outcome.vehicle.is_none());
    }

    #[tokio::test]
    async fn test_lookup_failure_still_reports_the_plate() {
        let detector = StubDetector::new(
            DetectorCapability::HeuristicOnly,
            false,
            StubBehavior::ReturnsPlate,
        );
        let mut orch = orchestrator(detector, LookupBehavior::Fails, fast_settings());

        orch.start().await.unwrap();
        let outcome = orch.capture().await.unwrap();
        assert_eq!(outcome.status, ScanStatus::DetectionError);
        assert_eq!(outcome.plate.unwrap().as_str(), "GR-1234-20");
    }

    #[tokio::test]
    async fn test_low_confidence_detection_is_gated_to_no_plate() {
        // Remote thresholds default to 0.70/0.80; 0.5 must not pass.
        let detector = StubDetector::new(
            DetectorCapability::Remote,
            false,
            StubBehavior::ReturnsPlate,
        )
        .with_confidence(0.5);
        let mut orch = orchestrator(detector, LookupBehavior::Match, fast_settings());

        orch.start().await.unwrap();
        let outcome = orch.capture().await.unwrap();
        assert_eq!(outcome.status, ScanStatus::NoPlateDetected);
        assert!(outcome.plate.is_none());
        assert!(orch.last_detection().is_none());
    }

    #[tokio::test]
    async fn test_camera_failure_parks_session_in_error() {
        let mut orch = ScanOrchestrator::new(
            Box::new(FailingCamera),
            FallbackChain::new(vec![Box::new(StubDetector::new(
                DetectorCapability::HeuristicOnly,
                false,
                StubBehavior::ReturnsNone,
            ))]),
            Arc::new(StubLookup(LookupBehavior::NoMatch)),
            fast_settings(),
            ThresholdTable::default(),
        );

        let err = orch.start().await.unwrap_err();
        assert!(matches!(
            err,
            ScanError::Camera(CameraError::PermissionDenied)
        ));
        assert_eq!(orch.state(), ScanState::Error);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_continuous_loop_publishes_and_stops() {
        let detector = StubDetector::new(
            DetectorCapability::HeuristicOnly,
            false,
            StubBehavior::ReturnsPlate,
        );
        let mut orch = orchestrator(detector, LookupBehavior::Match, fast_settings());
        let handle = orch.handle();
        let outcomes = orch.outcomes();

        let task = tokio::spawn(async move {
            orch.run().await.unwrap();
            orch
        });

        let first = outcomes
            .recv_timeout(Duration::from_secs(2))
            .expect("expected a published outcome");
        assert_eq!(first.status, ScanStatus::Registered);

        handle.stop();
        let orch = task.await.unwrap();
        assert_eq!(orch.state(), ScanState::Idle);
        // Stop clears the retained detection; the displayed outcome
        // survives until superseded.
        assert!(orch.last_detection().is_none());
        assert!(orch.latest_outcome().read().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_mid_analysis_lets_the_attempt_finish() {
        let detector = StubDetector::new(
            DetectorCapability::HeuristicOnly,
            false,
            StubBehavior::ReturnsPlateAfter(Duration::from_millis(200)),
        );
        let mut orch = orchestrator(detector, LookupBehavior::Match, fast_settings());
        let handle = orch.handle();
        let outcomes = orch.outcomes();

        let task = tokio::spawn(async move {
            orch.run().await.unwrap();
            orch
        });

        // Let the first attempt get in flight, then stop mid-analysis.
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.stop();

        let orch = task.await.unwrap();
        assert_eq!(orch.state(), ScanState::Idle);

        // The in-flight attempt completed and its outcome was published;
        // no further attempts started afterwards.
        let first = outcomes.try_recv().expect("in-flight outcome published");
        assert_eq!(first.status, ScanStatus::Registered);
        assert!(outcomes.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timed_out_attempt_is_discarded() {
        let detector = StubDetector::new(
            DetectorCapability::HeuristicOnly,
            false,
            StubBehavior::ReturnsPlateAfter(Duration::from_millis(500)),
        );
        let settings = ScanSettings {
            interval_ms: 20,
            attempt_timeout_ms: 40,
        };
        let mut orch = orchestrator(detector, LookupBehavior::Match, settings);
        let handle = orch.handle();
        let outcomes = orch.outcomes();

        let task = tokio::spawn(async move {
            orch.run().await.unwrap();
            orch
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.stop();
        task.await.unwrap();

        // Every attempt exceeded the timeout, so nothing was published.
        assert!(outcomes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_capture_requires_active_camera() {
        let detector = StubDetector::new(
            DetectorCapability::HeuristicOnly,
            false,
            StubBehavior::ReturnsPlate,
        );
        let mut orch = orchestrator(detector, LookupBehavior::Match, fast_settings());

        let err = orch.capture().await.unwrap_err();
        assert!(matches!(err, ScanError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_miss_publishes_no_plate_outcome() {
        let detector = StubDetector::new(
            DetectorCapability::HeuristicOnly,
            false,
            StubBehavior::ReturnsNone,
        );
        let mut orch = orchestrator(detector, LookupBehavior::Match, fast_settings());

        orch.start().await.unwrap();
        let outcome = orch.capture().await.unwrap();
        assert_eq!(outcome.status, ScanStatus::NoPlateDetected);
    }
}
