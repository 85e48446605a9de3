//! Application Configuration
//!
//! Pipeline settings stored in TOML format. Service credentials are not
//! part of the file; they come from the environment (the only
//! environment variables this crate reads).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::camera::CameraConfig;
use crate::detector::remote::RemoteVisionConfig;
use crate::detector::ThresholdTable;
use crate::lookup::LookupConfig;
use crate::scanner::ScanSettings;
use crate::vision::ocr::OcrPreprocessConfig;
use crate::vision::RegionProposalConfig;

/// Environment variable carrying the remote vision service credential.
pub const VISION_API_KEY_VAR: &str = "PLATEWATCH_VISION_API_KEY";
/// Environment variable carrying the vehicle registry credential.
pub const LOOKUP_API_KEY_VAR: &str = "PLATEWATCH_LOOKUP_API_KEY";

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Scan-loop cadence and timeout
    pub scan: ScanSettings,
    /// Camera preferences
    pub camera: CameraConfig,
    /// Per-strategy confidence gates
    pub thresholds: ThresholdTable,
    /// Region-proposal tunables
    pub proposal: RegionProposalConfig,
    /// OCR preprocessing tunables
    pub ocr: OcrPreprocessConfig,
    /// Remote vision service settings
    pub remote: RemoteVisionConfig,
    /// Detector model file locations
    pub models: ModelSettings,
    /// Vehicle registry settings
    pub lookup: LookupConfig,
}

/// Locations of detector model files. Unset paths fall back to the
/// per-user model cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Purpose-trained plate detector ONNX file
    pub plate_model_path: Option<PathBuf>,
    /// Generic object detector ONNX file
    pub generic_model_path: Option<PathBuf>,
}

/// Credential for the remote vision service, if configured.
pub fn vision_api_key() -> Option<String> {
    std::env::var(VISION_API_KEY_VAR).ok().filter(|k| !k.is_empty())
}

/// Credential for the vehicle registry, if configured.
pub fn lookup_api_key() -> Option<String> {
    std::env::var(LOOKUP_API_KEY_VAR).ok().filter(|k| !k.is_empty())
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
