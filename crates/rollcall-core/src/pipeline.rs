//! Recognition pipeline: detect every face, crop it, embed it.

use crate::detector::{DetectorConfig, FaceDetector};
use crate::embedder::{EmbedderConfig, FaceEmbedder};
use crate::error::{InferenceError, PipelineError};
use crate::onnx::OnnxConfig;
use crate::types::{BoundingBox, FaceCandidate, FaceEmbedding};
use image::RgbImage;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub detector: DetectorConfig,
    pub embedder: EmbedderConfig,
    pub onnx: OnnxConfig,
}

/// Decode an encoded image (JPEG, PNG, ...) into an RGB raster.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Stateless composition of the two adapters; safe to share across threads.
pub struct RecognitionPipeline {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl RecognitionPipeline {
    pub fn new(detector: FaceDetector, embedder: FaceEmbedder) -> Self {
        Self { detector, embedder }
    }

    /// Load both ONNX models.
    pub fn load(
        detector_path: &str,
        embedder_path: &str,
        config: &PipelineConfig,
    ) -> Result<Self, InferenceError> {
        let detector = FaceDetector::load(detector_path, &config.detector, &config.onnx)?;
        let embedder = FaceEmbedder::load(embedder_path, &config.embedder, &config.onnx)?;
        Ok(Self::new(detector, embedder))
    }

    /// Detected faces that can be cropped, by descending confidence.
    pub fn detect(&self, image: &RgbImage) -> Result<Vec<FaceCandidate>, InferenceError> {
        let mut faces = self.detector.detect(image)?;
        faces.retain(|face| !face.bbox.is_empty());
        Ok(faces)
    }

    /// Embed every detected face, in detection order.
    ///
    /// Boxes that clamped to zero area are skipped. No faces is an empty
    /// vector, not an error.
    pub fn process_all_faces(
        &self,
        image: &RgbImage,
    ) -> Result<Vec<FaceEmbedding>, InferenceError> {
        let candidates = self.detector.detect(image)?;

        let mut results = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            if let Some(face) = self.embed_candidate(image, candidate)? {
                results.push(face);
            }
        }

        tracing::debug!(
            detected = candidates.len(),
            embedded = results.len(),
            "pipeline: processed all faces"
        );
        Ok(results)
    }

    /// The highest-confidence face that survives cropping, if any.
    ///
    /// Same result as the first element of
    /// [`process_all_faces`](Self::process_all_faces), without embedding the rest.
    pub fn process_first_face(
        &self,
        image: &RgbImage,
    ) -> Result<Option<FaceEmbedding>, InferenceError> {
        for candidate in self.detector.detect(image)? {
            if let Some(face) = self.embed_candidate(image, &candidate)? {
                return Ok(Some(face));
            }
        }
        Ok(None)
    }

    fn embed_candidate(
        &self,
        image: &RgbImage,
        candidate: &FaceCandidate,
    ) -> Result<Option<FaceEmbedding>, InferenceError> {
        let Some(crop) = crop(image, &candidate.bbox) else {
            tracing::debug!(
                bbox = ?candidate.bbox.corners(),
                confidence = candidate.confidence,
                "pipeline: dropping zero-area crop"
            );
            return Ok(None);
        };

        let embedding = self.embedder.embed(&crop)?;
        Ok(Some(FaceEmbedding {
            embedding,
            bbox: candidate.bbox,
        }))
    }
}

fn crop(image: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    if bbox.is_empty() {
        return None;
    }
    let face = image::imageops::crop_imm(image, bbox.x1(), bbox.y1(), bbox.width(), bbox.height());
    Some(face.to_image())
}
