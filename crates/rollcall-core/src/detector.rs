//! Face detector adapter.
//!
//! Wraps a single-class YOLO-style localization model. The model sees the
//! image stretched to its fixed input size; boxes come back as
//! `(cx, cy, w, h)` in that space and are mapped to original-image pixels by
//! scaling each axis independently. No NMS is applied: every box above the
//! confidence threshold is returned.

use crate::error::InferenceError;
use crate::onnx::{OnnxConfig, OnnxModel};
use crate::types::{BoundingBox, FaceCandidate};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::{Array4, ArrayView2};
use serde::Deserialize;

const DETECTOR_INPUT_SIZE: u32 = 512;
const DETECTOR_CONFIDENCE_THRESHOLD: f32 = 0.5;
/// Rows per anchor in the output tensor: cx, cy, w, h, confidence.
const DETECTOR_OUTPUT_ROWS: usize = 5;

/// One raw model output, in model-input pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub cx: f32,
    pub cy: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Black-box localization model.
pub trait DetectionModel: Send + Sync {
    /// Fixed `(width, height)` the model expects.
    fn input_size(&self) -> (u32, u32);

    /// Run the model on a `1×3×H×W` tensor.
    fn infer(&self, input: Array4<f32>) -> Result<Vec<RawDetection>, InferenceError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub input_width: u32,
    pub input_height: u32,
    /// Candidates must score strictly above this.
    pub confidence_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_width: DETECTOR_INPUT_SIZE,
            input_height: DETECTOR_INPUT_SIZE,
            confidence_threshold: DETECTOR_CONFIDENCE_THRESHOLD,
        }
    }
}

pub struct FaceDetector {
    model: Box<dyn DetectionModel>,
    confidence_threshold: f32,
}

impl FaceDetector {
    pub fn new(model: Box<dyn DetectionModel>, confidence_threshold: f32) -> Self {
        Self {
            model,
            confidence_threshold,
        }
    }

    /// Load the ONNX detector from `model_path`.
    pub fn load(
        model_path: &str,
        config: &DetectorConfig,
        onnx: &OnnxConfig,
    ) -> Result<Self, InferenceError> {
        let input_size = (config.input_width, config.input_height);
        let model = OnnxDetectionModel::load(model_path, input_size, onnx)?;
        Ok(Self::new(Box::new(model), config.confidence_threshold))
    }

    /// Detect faces, returning candidates in original-image coordinates
    /// sorted by descending confidence. An image with no faces yields an
    /// empty vector.
    ///
    /// A box that lies past an image edge is clamped and may come back with
    /// zero area. [`RecognitionPipeline::detect`] filters those out.
    ///
    /// [`RecognitionPipeline::detect`]: crate::pipeline::RecognitionPipeline::detect
    pub fn detect(&self, image: &RgbImage) -> Result<Vec<FaceCandidate>, InferenceError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let model_size = self.model.input_size();
        let input = preprocess(image, model_size);
        let raw = self.model.infer(input)?;

        let candidates =
            decode_detections(&raw, model_size, (width, height), self.confidence_threshold);
        tracing::debug!(
            raw = raw.len(),
            kept = candidates.len(),
            threshold = self.confidence_threshold,
            "detector: decoded candidates"
        );
        Ok(candidates)
    }
}

/// Stretch to the model input size and scale pixels to [0, 1], NCHW RGB.
fn preprocess(image: &RgbImage, (width, height): (u32, u32)) -> Array4<f32> {
    let resized = image::imageops::resize(image, width, height, FilterType::Triangle);

    Array4::from_shape_fn((1, 3, height as usize, width as usize), |(_, c, y, x)| {
        resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
}

/// Threshold, map to image space, clamp, and sort by descending confidence.
///
/// The sort is stable, so equal-confidence candidates keep model order.
fn decode_detections(
    raw: &[RawDetection],
    model_size: (u32, u32),
    image_size: (u32, u32),
    threshold: f32,
) -> Vec<FaceCandidate> {
    let mut candidates: Vec<FaceCandidate> = raw
        .iter()
        .filter(|det| det.confidence > threshold)
        .map(|det| FaceCandidate {
            bbox: map_to_image(det, model_size, image_size),
            confidence: det.confidence,
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    candidates
}

/// Scale center and half-extents per axis, truncate toward zero, then clamp.
fn map_to_image(
    det: &RawDetection,
    (model_w, model_h): (u32, u32),
    (image_w, image_h): (u32, u32),
) -> BoundingBox {
    let scale_x = image_w as f32 / model_w as f32;
    let scale_y = image_h as f32 / model_h as f32;

    let half_w = det.width / 2.0;
    let half_h = det.height / 2.0;

    let x1 = ((det.cx - half_w) * scale_x) as i32;
    let y1 = ((det.cy - half_h) * scale_y) as i32;
    let x2 = ((det.cx + half_w) * scale_x) as i32;
    let y2 = ((det.cy + half_h) * scale_y) as i32;

    BoundingBox::clamped(x1, y1, x2, y2, image_w, image_h)
}

/// ONNX Runtime implementation of [`DetectionModel`].
pub struct OnnxDetectionModel {
    model: OnnxModel,
    input_size: (u32, u32),
}

impl OnnxDetectionModel {
    pub fn load(
        model_path: &str,
        input_size: (u32, u32),
        onnx: &OnnxConfig,
    ) -> Result<Self, InferenceError> {
        let model = OnnxModel::load(model_path, onnx)?;
        tracing::info!(
            path = model_path,
            width = input_size.0,
            height = input_size.1,
            "face detector ready"
        );
        Ok(Self { model, input_size })
    }
}

impl DetectionModel for OnnxDetectionModel {
    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn infer(&self, input: Array4<f32>) -> Result<Vec<RawDetection>, InferenceError> {
        let output = self.model.run(&input)?;
        parse_output(&output.shape, &output.data)
    }
}

/// Parse a `(1, C, N)` output tensor, C >= 5, into one detection per anchor.
fn parse_output(shape: &[usize], data: &[f32]) -> Result<Vec<RawDetection>, InferenceError> {
    let &[batch, rows, anchors] = shape else {
        return Err(InferenceError::UnexpectedShape {
            shape: shape.to_vec(),
            reason: "expected rank 3 (1, C, N)",
        });
    };
    if batch != 1 || rows < DETECTOR_OUTPUT_ROWS {
        return Err(InferenceError::UnexpectedShape {
            shape: shape.to_vec(),
            reason: "expected batch 1 and at least 5 rows",
        });
    }

    let table = ArrayView2::from_shape((rows, anchors), data).map_err(|_| {
        InferenceError::UnexpectedShape {
            shape: shape.to_vec(),
            reason: "data length does not match shape",
        }
    })?;

    Ok(table
        .columns()
        .into_iter()
        .map(|col| RawDetection {
            cx: col[0],
            cy: col[1],
            width: col[2],
            height: col[3],
            confidence: col[4],
        })
        .collect())
}
