//! Object-model collaborator and model storage
//!
//! The custom and generic strategies consume detection models through the
//! [`ObjectModel`] trait: frame in, ranked labelled detections out. The
//! shipped implementation runs ONNX models (YOLO-style output layout)
//! through ONNX Runtime; [`ModelStore`] handles caching and verified
//! download of model files.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use image::imageops::FilterType;
use ndarray::{Array, IxDyn};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::camera::Frame;
use crate::vision::BoundingBox;

/// One ranked detection from an object model.
#[derive(Debug, Clone)]
pub struct ModelDetection {
    /// Class label assigned by the model
    pub label: String,
    /// Model confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Bounding box in original frame coordinates
    pub bbox: BoundingBox,
}

/// A detection model consumed as a collaborator: the strategies never see
/// tensors or runtimes, only ranked detections.
pub trait ObjectModel: Send {
    fn name(&self) -> &str;

    fn infer(&mut self, frame: &Frame) -> Result<Vec<ModelDetection>>;
}

/// Configuration for the ONNX-backed object model.
#[derive(Debug, Clone)]
pub struct OnnxModelConfig {
    /// Square input size the model expects
    pub input_size: u32,
    /// Detections below this confidence are dropped
    pub confidence_threshold: f32,
    /// IoU threshold for duplicate suppression
    pub iou_threshold: f32,
    /// Maximum detections returned per frame
    pub max_detections: usize,
    /// Class labels in model output order
    pub labels: Vec<String>,
}

impl Default for OnnxModelConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.4,
            iou_threshold: 0.4,
            max_detections: 10,
            labels: vec!["license_plate".to_string()],
        }
    }
}

/// ONNX Runtime implementation of [`ObjectModel`].
///
/// Expects YOLO-style output: `[1, 4 + num_classes, num_predictions]`
/// with `(cx, cy, w, h)` box coordinates in input-size space.
pub struct OnnxObjectModel {
    name: String,
    session: Session,
    config: OnnxModelConfig,
}

impl OnnxObjectModel {
    /// Load a model file into a new session.
    pub fn load(model_path: &Path, config: OnnxModelConfig) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        let input_names: Vec<String> =
            session.inputs.iter().map(|input| input.name.clone()).collect();
        let output_names: Vec<String> =
            session.outputs.iter().map(|output| output.name.clone()).collect();
        debug!(
            "Model loaded. Inputs: {:?}, Outputs: {:?}",
            input_names, output_names
        );

        let name = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx-model".to_string());

        Ok(Self {
            name,
            session,
            config,
        })
    }

    /// Convert a frame to a normalized NCHW tensor at the model's input
    /// size.
    fn preprocess(&self, frame: &Frame) -> Result<Array<f32, IxDyn>> {
        let rgba = frame
            .to_rgba()
            .context("frame pixel buffer does not match its dimensions")?;

        let size = self.config.input_size;
        let resized = image::DynamicImage::ImageRgba8(rgba)
            .resize_exact(size, size, FilterType::Triangle)
            .to_rgb8();

        let mut input = Array::zeros(IxDyn(&[1, 3, size as usize, size as usize]));
        for (x, y, pixel) in resized.enumerate_pixels() {
            input[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
            input[[0, 1, y as usize, x as usize]] = pixel[1] as f32 / 255.0;
            input[[0, 2, y as usize, x as usize]] = pixel[2] as f32 / 255.0;
        }

        Ok(input)
    }

    /// Decode YOLO-style output back to frame coordinates and suppress
    /// duplicates.
    fn postprocess(
        &self,
        output: Array<f32, IxDyn>,
        frame_width: u32,
        frame_height: u32,
    ) -> Vec<ModelDetection> {
        let shape = output.shape();
        if shape.len() != 3 || shape[1] < 5 {
            warn!("unexpected model output shape {:?}", shape);
            return vec![];
        }

        let num_classes = shape[1] - 4;
        let num_predictions = shape[2];
        let scale_x = frame_width as f32 / self.config.input_size as f32;
        let scale_y = frame_height as f32 / self.config.input_size as f32;

        let mut detections = Vec::new();
        for i in 0..num_predictions {
            let mut best_class = 0;
            let mut confidence = output[[0, 4, i]];
            for c in 1..num_classes {
                let score = output[[0, 4 + c, i]];
                if score > confidence {
                    confidence = score;
                    best_class = c;
                }
            }

            if confidence < self.config.confidence_threshold {
                continue;
            }

            let cx = output[[0, 0, i]];
            let cy = output[[0, 1, i]];
            let w = output[[0, 2, i]];
            let h = output[[0, 3, i]];

            let x = ((cx - w / 2.0) * scale_x).max(0.0) as u32;
            let y = ((cy - h / 2.0) * scale_y).max(0.0) as u32;
            let width = (w * scale_x).min(frame_width as f32) as u32;
            let height = (h * scale_y).min(frame_height as f32) as u32;
            if width == 0 || height == 0 {
                continue;
            }

            let label = self
                .config
                .labels
                .get(best_class)
                .cloned()
                .unwrap_or_else(|| format!("class_{best_class}"));

            detections.push(ModelDetection {
                label,
                confidence,
                bbox: BoundingBox::new(x, y, width, height),
            });
        }

        suppress_duplicates(detections, self.config.iou_threshold, self.config.max_detections)
    }
}

impl ObjectModel for OnnxObjectModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<ModelDetection>> {
        let input = self.preprocess(frame)?;
        let input_tensor = Value::from_array(input)?;

        let outputs = self.session.run(ort::inputs![input_tensor])?;

        let output_value = outputs
            .get("output0")
            .or_else(|| outputs.get("output"))
            .or_else(|| outputs.get("boxes"))
            .context("No detection output tensor found (tried: output0, output, boxes)")?;
        let (shape, data) = output_value.try_extract_tensor::<f32>()?;

        let shape_usize: Vec<usize> = shape.as_ref().iter().map(|&x| x as usize).collect();
        let output = Array::from_shape_vec(IxDyn(&shape_usize), data.to_vec())?;
        drop(outputs);

        Ok(self.postprocess(output, frame.width, frame.height))
    }
}

/// Greedy IoU suppression, highest confidence first.
fn suppress_duplicates(
    mut detections: Vec<ModelDetection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<ModelDetection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<ModelDetection> = Vec::new();
    for detection in detections {
        if keep.len() >= max_detections {
            break;
        }
        if keep.iter().all(|k| k.bbox.iou(&detection.bbox) < iou_threshold) {
            keep.push(detection);
        }
    }
    keep
}

/// Model identifier within the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Purpose-trained plate detector
    PlateDetector,
    /// General-purpose object detector
    GenericObject,
}

impl ModelKind {
    pub fn filename(&self) -> &'static str {
        match self {
            ModelKind::PlateDetector => "plate_det.onnx",
            ModelKind::GenericObject => "generic_det.onnx",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelKind::PlateDetector => "Plate Detector",
            ModelKind::GenericObject => "Generic Object Detector",
        }
    }
}

/// On-disk cache of detector model files.
pub struct ModelStore {
    models_dir: PathBuf,
}

impl ModelStore {
    /// Create a store rooted in the per-user data directory.
    pub fn new() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("org", "dvla", "platewatch")
            .context("Failed to resolve a data directory")?;
        Self::with_dir(dirs.data_dir().join("models"))
    }

    /// Create a store with a custom directory.
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)?;
        Ok(Self { models_dir })
    }

    /// Path a model of this kind would live at.
    pub fn model_path(&self, kind: ModelKind) -> PathBuf {
        self.models_dir.join(kind.filename())
    }

    /// Whether a plausible model file is present.
    pub fn is_available(&self, kind: ModelKind) -> bool {
        let path = self.model_path(kind);
        match std::fs::metadata(&path) {
            // Anything under 100 KB is a truncated download, not a model.
            Ok(metadata) => metadata.len() > 100_000,
            Err(_) => false,
        }
    }

    /// Resolve a usable model file: an explicitly configured path wins,
    /// then the cache. `None` means the strategy has no model to load.
    pub fn resolve(&self, kind: ModelKind, configured: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = configured {
            if path.exists() {
                return Some(path.to_path_buf());
            }
            warn!(
                "Configured {} path {:?} does not exist; falling back to cache",
                kind.display_name(),
                path
            );
        }

        if self.is_available(kind) {
            return Some(self.model_path(kind));
        }
        None
    }

    /// Download a model into the cache, streaming to a temp file and
    /// verifying the checksum before moving it into place.
    pub async fn download(
        &self,
        kind: ModelKind,
        url: &str,
        expected_sha256: Option<&str>,
    ) -> Result<PathBuf> {
        let path = self.model_path(kind);
        info!("Downloading {} model from {}", kind.display_name(), url);

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .get(url)
            .send()
            .await
            .context("Failed to send download request")?;

        if !response.status().is_success() {
            anyhow::bail!("Download failed with status {}: {}", response.status(), url);
        }

        let total_size = response.content_length();
        debug!("Download size: {:?} bytes", total_size);

        let temp_path = path.with_extension("tmp");
        let mut file =
            std::fs::File::create(&temp_path).context("Failed to create temp file")?;

        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Error reading download stream")?;
            file.write_all(&chunk).context("Failed to write to temp file")?;
            hasher.update(&chunk);
        }
        file.flush().context("Failed to flush temp file")?;
        drop(file);

        let hash = format!("{:x}", hasher.finalize());
        if let Some(expected) = expected_sha256 {
            if hash != expected {
                std::fs::remove_file(&temp_path).ok();
                anyhow::bail!(
                    "Checksum mismatch for {}: expected {}, got {}",
                    kind.filename(),
                    expected,
                    hash
                );
            }
            info!("Checksum verified for {}", kind.display_name());
        }

        std::fs::rename(&temp_path, &path)
            .context("Failed to move downloaded file to final location")?;

        info!("Successfully downloaded {} model", kind.display_name());
        Ok(path)
    }
}
