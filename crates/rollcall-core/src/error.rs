use thiserror::Error;

/// Failure inside one of the two black-box models.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    Failed(String),
    #[error("unexpected output shape {shape:?}: {reason}")]
    UnexpectedShape {
        shape: Vec<usize>,
        reason: &'static str,
    },
    #[error("inference session lock poisoned")]
    SessionPoisoned,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("cannot aggregate zero embeddings")]
    EmptyInput,
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("identity {0:?} appears more than once in gallery")]
    DuplicateIdentity(String),
}
