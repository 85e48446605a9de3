//! Remote vision strategy
//!
//! Ships the frame to an external multimodal vision service with a
//! natural-language instruction and parses the free-text reply for a
//! plate string or the `NONE` sentinel. The service returns no bounding
//! box; one is synthesized deterministically for overlay rendering only
//! and is never used for cropping.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::camera::Frame;
use crate::detector::{Detector, DetectorCapability, DetectorError};
use crate::vision::{BoundingBox, DetectionResult, PlateNumber};

/// Reply token meaning "no plate in this image".
const NONE_SENTINEL: &str = "NONE";

/// Settings for the remote vision service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteVisionConfig {
    /// Service endpoint URL
    pub endpoint: String,
    /// Model identifier passed through to the service
    pub model: String,
    /// Natural-language instruction sent with every frame
    pub instruction: String,
    /// Request body ceiling in bytes; larger frames are not sent
    pub max_payload_bytes: usize,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Confidence assigned on structural success (the service reports none)
    pub fixed_confidence: f32,
    /// Whether to synthesize an overlay bounding box
    pub synthesize_overlay_box: bool,
}

impl Default for RemoteVisionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://vision.dvla.example/v1/analyze".to_string(),
            model: "vision-default".to_string(),
            instruction: "Read the vehicle license plate in this image. Reply with only the \
                          plate characters, or NONE if no plate is visible."
                .to_string(),
            max_payload_bytes: 18 * 1024 * 1024,
            request_timeout_secs: 20,
            fixed_confidence: 0.9,
            synthesize_overlay_box: true,
        }
    }
}

/// Remote service failure modes.
#[derive(Debug, Error)]
pub enum RemoteVisionError {
    #[error("vision service rejected the credential")]
    Auth,
    #[error("frame payload of {size} bytes exceeds the {limit} byte ceiling")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("vision service is rate limiting requests")]
    RateLimited,
    #[error("vision service transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("vision service reply could not be decoded: {0}")]
    Decode(String),
}

#[derive(Debug, Serialize)]
struct VisionRequest<'a> {
    model: &'a str,
    instruction: &'a str,
    image_base64: String,
}

#[derive(Debug, Deserialize)]
struct VisionReply {
    text: String,
}

pub struct RemoteVisionDetector {
    config: RemoteVisionConfig,
    api_key: Option<String>,
    client: Option<reqwest::Client>,
}

impl RemoteVisionDetector {
    pub fn new(config: RemoteVisionConfig, api_key: Option<String>) -> Self {
        Self {
            config,
            api_key,
            client: None,
        }
    }

    /// Encode the frame as PNG for transport.
    fn encode_frame(&self, frame: &Frame) -> Result<Vec<u8>, RemoteVisionError> {
        let rgba = frame
            .to_rgba()
            .ok_or_else(|| RemoteVisionError::Decode("malformed frame buffer".to_string()))?;

        let mut png = Vec::new();
        image::DynamicImage::ImageRgba8(rgba)
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| RemoteVisionError::Decode(e.to_string()))?;

        if png.len() > self.config.max_payload_bytes {
            return Err(RemoteVisionError::PayloadTooLarge {
                size: png.len(),
                limit: self.config.max_payload_bytes,
            });
        }
        Ok(png)
    }

    async fn ask(&self, frame: &Frame) -> Result<String, RemoteVisionError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| RemoteVisionError::Decode("client not initialized".to_string()))?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(RemoteVisionError::Auth)?;

        let png = self.encode_frame(frame)?;
        let request = VisionRequest {
            model: &self.config.model,
            instruction: &self.config.instruction,
            image_base64: base64::prelude::BASE64_STANDARD.encode(&png),
        };

        let response = client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => {}
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                return Err(RemoteVisionError::Auth)
            }
            reqwest::StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(RemoteVisionError::PayloadTooLarge {
                    size: png.len(),
                    limit: self.config.max_payload_bytes,
                })
            }
            reqwest::StatusCode::TOO_MANY_REQUESTS => return Err(RemoteVisionError::RateLimited),
            s => return Err(RemoteVisionError::Decode(format!("unexpected status {s}"))),
        }

        let reply: VisionReply = response
            .json()
            .await
            .map_err(|e| RemoteVisionError::Decode(e.to_string()))?;
        Ok(reply.text)
    }
}

/// Extract a grammar-valid plate from a free-text service reply.
///
/// The sentinel wins over anything else in the reply; otherwise single
/// tokens and short joined token windows are tried against the grammar,
/// so "The plate reads GR 1234 20." still resolves.
pub fn parse_reply(reply: &str) -> Option<PlateNumber> {
    let tokens: Vec<&str> = reply
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_ascii_alphanumeric()))
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.iter().any(|t| t.eq_ignore_ascii_case(NONE_SENTINEL)) {
        return None;
    }

    for window_len in 1..=3usize {
        for window in tokens.windows(window_len) {
            if let Some(plate) = PlateNumber::parse(&window.join(" ")) {
                return Some(plate);
            }
        }
    }

    None
}

/// Deterministic plate-proportioned box centered in the frame, for
/// overlay purposes only.
pub fn synthesize_overlay_box(frame_width: u32, frame_height: u32) -> BoundingBox {
    let width = (frame_width * 2 / 5).max(1);
    let height = (width / 4).max(1);
    let x = (frame_width.saturating_sub(width)) / 2;
    let y = (frame_height.saturating_sub(height)) / 2;
    BoundingBox::new(x, y, width, height)
}

#[async_trait]
impl Detector for RemoteVisionDetector {
    fn capability(&self) -> DetectorCapability {
        DetectorCapability::Remote
    }

    async fn initialize(&mut self) -> Result<(), DetectorError> {
        if self.client.is_some() {
            return Ok(());
        }

        if self.api_key.is_none() {
            return Err(DetectorError::Init(anyhow::anyhow!(
                "no vision service credential configured"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .build()
            .map_err(|e| DetectorError::Init(e.into()))?;

        info!("Remote vision strategy ready: {}", self.config.endpoint);
        self.client = Some(client);
        Ok(())
    }

    async fn detect(&mut self, frame: &Frame) -> Result<Option<DetectionResult>, DetectorError> {
        let reply = self
            .ask(frame)
            .await
            .map_err(|e| DetectorError::Runtime(e.into()))?;
        debug!("vision service reply: {:?}", reply);

        let Some(plate) = parse_reply(&reply) else {
            return Ok(None);
        };

        let bbox = self
            .config
            .synthesize_overlay_box
            .then(|| synthesize_overlay_box(frame.width, frame.height));

        Ok(Some(DetectionResult {
            plate,
            detection_confidence: self.config.fixed_confidence,
            ocr_confidence: self.config.fixed_confidence,
            bbox,
        }))
    }

    fn dispose(&mut self) {
        self.client = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply_bare_plate() {
        let plate = parse_reply("GR-1234-20").unwrap();
        assert_eq!(plate.as_str(), "GR-1234-20");
    }

    #[test]
    fn test_parse_reply_with_prose() {
        let plate = parse_reply("The plate reads GR 1234 20.").unwrap();
        assert_eq!(plate.as_str(), "GR-1234-20");
    }

    #[test]
    fn test_parse_reply_none_sentinel() {
        assert!(parse_reply("NONE").is_none());
        assert!(parse_reply("none").is_none());
        // Sentinel wins even with other text around it.
        assert!(parse_reply("NONE - no plate visible").is_none());
    }

    #[test]
    fn test_parse_reply_garbage() {
        assert!(parse_reply("I cannot tell what this is.").is_none());
        assert!(parse_reply("").is_none());
    }

    #[test]
    fn test_synthesized_box_is_deterministic_and_centered() {
        let a = synthesize_overlay_box(1280, 720);
        let b = synthesize_overlay_box(1280, 720);
        assert_eq!(a, b);

        assert_eq!(a.width, 512);
        assert_eq!(a.height, 128);
        let (cx, cy) = a.center();
        assert!((cx as i64 - 640).abs() <= 1);
        assert!((cy as i64 - 360).abs() <= 1);
    }

    #[tokio::test]
    async fn test_initialize_without_credential_fails() {
        let mut d = RemoteVisionDetector::new(RemoteVisionConfig::default(), None);
        let err = d.initialize().await.unwrap_err();
        assert!(matches!(err, DetectorError::Init(_)));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let mut d = RemoteVisionDetector::new(
            RemoteVisionConfig::default(),
            Some("test-key".to_string()),
        );
        d.initialize().await.unwrap();
        d.initialize().await.unwrap();
        assert!(d.client.is_some());
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let config = RemoteVisionConfig {
            max_payload_bytes: 64,
            ..Default::default()
        };
        let d = RemoteVisionDetector::new(config, Some("k".to_string()));

        let frame = Frame::new(vec![0u8; 64 * 64 * 4], 64, 64);
        let err = d.encode_frame(&frame).unwrap_err();
        assert!(matches!(err, RemoteVisionError::PayloadTooLarge { .. }));
    }
}
