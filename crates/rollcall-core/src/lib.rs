//! rollcall-core: face detection, embedding and gallery matching.
//!
//! A YOLO-style detector and an ArcFace-style embedder run via ONNX Runtime.
//! [`RecognitionService`] ties them to an [`EnrollmentStore`] through a
//! process-wide [`GalleryCache`].

pub mod aggregate;
pub mod cache;
pub mod detector;
pub mod embedder;
pub mod error;
pub mod matcher;
mod onnx;
pub mod pipeline;
pub mod service;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

pub use aggregate::aggregate;
pub use cache::GalleryCache;
pub use detector::{DetectorConfig, FaceDetector};
pub use embedder::{EmbedderConfig, FaceEmbedder};
pub use error::{InferenceError, PipelineError};
pub use matcher::{similarity, similarity_batch, Gallery};
pub use onnx::OnnxConfig;
pub use pipeline::{decode_image, PipelineConfig, RecognitionPipeline};
pub use service::{
    EnrollmentReport, FailureReason, ImageFailure, MatchConfig, RecognitionService, ServiceError,
};
pub use store::{EnrollmentRecord, EnrollmentStore, EnrollmentSummary, MemoryStore, StoreError};
pub use types::{BoundingBox, Embedding, FaceCandidate, FaceEmbedding, GalleryEntry, MatchResult};
