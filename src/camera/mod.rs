//! Camera Source Layer
//!
//! The scanner does not own a capture backend; it consumes any collaborator
//! implementing [`CameraSource`]. The host application supplies the real
//! device (WebRTC, V4L2, platform capture API); this crate ships a
//! file/buffer-backed [`StillCamera`] used by tests and the diagnostic
//! binary.

pub mod frame;

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

pub use frame::Frame;

/// Camera acquisition and streaming failures.
///
/// All variants are terminal for the current scan session: the orchestrator
/// surfaces them to the operator and waits for an explicit retry rather
/// than hammering a device that said no.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("no camera device found")]
    DeviceNotFound,
    #[error("camera device is busy")]
    DeviceBusy,
    #[error("camera capture is not supported in this environment")]
    Unsupported,
    #[error("camera stream timed out")]
    StreamTimeout,
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Preferred capture width in pixels
    pub width: u32,
    /// Preferred capture height in pixels
    pub height: u32,
    /// Maximum frames per second to pull
    pub max_fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            max_fps: 30,
        }
    }
}

/// A source of raster frames with an explicit start/stop lifecycle.
///
/// `current_frame` returns an owned copy of the most recent frame; callers
/// may hold it across further camera ticks without it being overwritten.
pub trait CameraSource: Send {
    /// Acquire the device and begin streaming.
    fn start(&mut self) -> Result<(), CameraError>;

    /// Release the device. Safe to call when already stopped.
    fn stop(&mut self);

    /// Whether the source is currently streaming.
    fn is_active(&self) -> bool;

    /// Pull a copy of the most recent frame.
    fn current_frame(&self) -> Result<Frame, CameraError>;
}

/// A camera source backed by a single fixed frame.
///
/// Serves the same frame on every tick. Used by the diagnostic binary to
/// run the pipeline over a captured still, and by tests as a deterministic
/// stand-in for a live device.
pub struct StillCamera {
    frame: Frame,
    active: bool,
}

impl StillCamera {
    /// Create a still camera holding the given frame.
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            active: false,
        }
    }

    /// Load a still image from disk.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let image = image::open(path)
            .with_context(|| format!("failed to load still image {:?}", path))?
            .to_rgba8();
        info!(
            "Loaded still frame {:?} ({}x{})",
            path,
            image.width(),
            image.height()
        );

        Ok(Self::new(Frame::from_image(image)))
    }
}

impl CameraSource for StillCamera {
    fn start(&mut self) -> Result<(), CameraError> {
        self.active = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn current_frame(&self) -> Result<Frame, CameraError> {
        if !self.active {
            return Err(CameraError::StreamTimeout);
        }
        Ok(self.frame.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_still_camera_lifecycle() {
        let mut camera = StillCamera::new(Frame::new(vec![0u8; 16], 2, 2));
        assert!(!camera.is_active());
        assert_eq!(camera.current_frame().unwrap_err(), CameraError::StreamTimeout);

        camera.start().unwrap();
        assert!(camera.is_active());
        assert_eq!(camera.current_frame().unwrap().dimensions(), (2, 2));

        camera.stop();
        assert!(!camera.is_active());
    }

    #[test]
    fn test_current_frame_is_a_copy() {
        let mut camera = StillCamera::new(Frame::new(vec![7u8; 16], 2, 2));
        camera.start().unwrap();

        let mut frame = camera.current_frame().unwrap();
        frame.data[0] = 0;

        // The source's frame is untouched by mutations of the copy.
        assert_eq!(camera.current_frame().unwrap().data[0], 7);
    }
}
