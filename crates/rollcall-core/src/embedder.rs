//! Face embedder adapter.
//!
//! Turns a tight face crop into a unit-norm feature vector using an
//! ArcFace-style model (w600k_r50 by default).

use crate::error::InferenceError;
use crate::onnx::{OnnxConfig, OnnxModel};
use crate::types::Embedding;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use serde::Deserialize;

const EMBEDDER_INPUT_SIZE: u32 = 112;
const EMBEDDER_MEAN: f32 = 127.5;
const EMBEDDER_STD: f32 = 128.0;

/// Black-box feature extraction model.
pub trait EmbeddingModel: Send + Sync {
    /// Fixed `(width, height)` the model expects.
    fn input_size(&self) -> (u32, u32);

    /// Run the model on a `1×3×H×W` tensor, returning the raw feature vector.
    fn infer(&self, input: Array4<f32>) -> Result<Vec<f32>, InferenceError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    /// Square input side length.
    pub input_size: u32,
    pub mean: f32,
    pub std: f32,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            input_size: EMBEDDER_INPUT_SIZE,
            mean: EMBEDDER_MEAN,
            std: EMBEDDER_STD,
        }
    }
}

pub struct FaceEmbedder {
    model: Box<dyn EmbeddingModel>,
    mean: f32,
    std: f32,
}

impl FaceEmbedder {
    pub fn new(model: Box<dyn EmbeddingModel>, config: &EmbedderConfig) -> Self {
        Self {
            model,
            mean: config.mean,
            std: config.std,
        }
    }

    /// Load the ONNX embedder from `model_path`.
    pub fn load(
        model_path: &str,
        config: &EmbedderConfig,
        onnx: &OnnxConfig,
    ) -> Result<Self, InferenceError> {
        let model = OnnxEmbeddingModel::load(model_path, config.input_size, onnx)?;
        Ok(Self::new(Box::new(model), config))
    }

    /// Embed a face crop. The crop is resized to the model input, so any
    /// non-empty size is accepted.
    pub fn embed(&self, face: &RgbImage) -> Result<Embedding, InferenceError> {
        let input = self.preprocess(face);
        let raw = self.model.infer(input)?;

        if raw.is_empty() {
            return Err(InferenceError::Failed("embedding model returned an empty vector".into()));
        }

        Ok(Embedding::normalized(raw))
    }

    /// Resize to the model input and apply `(p - mean) / std`, NCHW RGB.
    fn preprocess(&self, face: &RgbImage) -> Array4<f32> {
        let (width, height) = self.model.input_size();
        let resized = image::imageops::resize(face, width, height, FilterType::Triangle);

        Array4::from_shape_fn((1, 3, height as usize, width as usize), |(_, c, y, x)| {
            (resized.get_pixel(x as u32, y as u32)[c] as f32 - self.mean) / self.std
        })
    }
}

/// ONNX Runtime implementation of [`EmbeddingModel`].
pub struct OnnxEmbeddingModel {
    model: OnnxModel,
    input_size: u32,
}

impl OnnxEmbeddingModel {
    pub fn load(
        model_path: &str,
        input_size: u32,
        onnx: &OnnxConfig,
    ) -> Result<Self, InferenceError> {
        let model = OnnxModel::load(model_path, onnx)?;
        tracing::info!(path = model_path, input_size, "face embedder ready");
        Ok(Self { model, input_size })
    }
}

impl EmbeddingModel for OnnxEmbeddingModel {
    fn input_size(&self) -> (u32, u32) {
        (self.input_size, self.input_size)
    }

    fn infer(&self, input: Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        // Output is (1, D); flatten regardless of rank.
        Ok(self.model.run(&input)?.data)
    }
}
