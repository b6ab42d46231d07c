//! ONNX Runtime session shared by the detection and embedding models.

use crate::error::InferenceError;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::Deserialize;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OnnxConfig {
    /// Intra-op thread count per session.
    pub intra_threads: usize,
}

impl Default for OnnxConfig {
    fn default() -> Self {
        Self { intra_threads: 4 }
    }
}

/// First output tensor of a run, copied out of the session.
pub(crate) struct ModelOutput {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// An ONNX session that can be shared across threads.
///
/// `Session::run` needs exclusive access, so calls are serialized on a mutex.
pub(crate) struct OnnxModel {
    session: Mutex<Session>,
}

impl OnnxModel {
    pub fn load(model_path: &str, config: &OnnxConfig) -> Result<Self, InferenceError> {
        if !Path::new(model_path).exists() {
            return Err(InferenceError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(config.intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ONNX model"
        );

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    pub fn run(&self, input: &Array4<f32>) -> Result<ModelOutput, InferenceError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| InferenceError::SessionPoisoned)?;

        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Failed(format!("output extraction: {e}")))?;

        Ok(ModelOutput {
            shape: shape.iter().map(|&d| d.max(0) as usize).collect(),
            data: data.to_vec(),
        })
    }
}
