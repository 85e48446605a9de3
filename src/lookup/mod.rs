//! Vehicle Lookup Boundary
//!
//! Resolves a validated plate to registration data. The backend is the
//! record-management service, reached over HTTP here; everything the
//! scanner needs is behind [`VehicleLookup`], so tests and alternative
//! hosts can supply their own resolver.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::vision::PlateNumber;

/// Registration data for a plate that is on file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleRecord {
    /// Canonical plate as registered
    pub plate: String,
    pub owner_name: String,
    pub make: String,
    pub model: String,
    pub color: String,
    /// Registration expiry date, ISO 8601
    pub registered_until: Option<String>,
    /// Outstanding violation summaries
    #[serde(default)]
    pub violations: Vec<String>,
}

/// Lookup backend failures.
///
/// Independent of detection: a lookup error after a confirmed detection
/// still surfaces the plate to the operator.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("lookup transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("lookup backend returned status {status}")]
    Backend { status: u16 },
    #[error("lookup response could not be decoded: {0}")]
    Decode(String),
}

/// Resolve plates against the vehicle registry.
#[async_trait]
pub trait VehicleLookup: Send + Sync {
    /// `Ok(None)` means the plate was validly read but is not on file.
    async fn lookup(&self, plate: &PlateNumber) -> Result<Option<VehicleRecord>, LookupError>;
}

/// Settings for the HTTP registry client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    /// Registry base URL
    pub base_url: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            base_url: "https://records.dvla.example/api".to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// HTTP implementation backed by the record-management service.
pub struct HttpVehicleLookup {
    config: LookupConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpVehicleLookup {
    pub fn new(config: LookupConfig, api_key: Option<String>) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            config,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl VehicleLookup for HttpVehicleLookup {
    async fn lookup(&self, plate: &PlateNumber) -> Result<Option<VehicleRecord>, LookupError> {
        let url = format!(
            "{}/vehicles/{}",
            self.config.base_url.trim_end_matches('/'),
            plate.as_str()
        );
        debug!("vehicle lookup: {url}");

        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        match response.status() {
            s if s.is_success() => {}
            reqwest::StatusCode::NOT_FOUND => return Ok(None),
            s => {
                return Err(LookupError::Backend {
                    status: s.as_u16(),
                })
            }
        }

        let record: VehicleRecord = response
            .json()
            .await
            .map_err(|e| LookupError::Decode(e.to_string()))?;
        Ok(Some(record))
    }
}
