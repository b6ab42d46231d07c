//! Deterministic stand-ins for the two models and the enrollment store.

use crate::detector::{DetectionModel, RawDetection};
use crate::embedder::EmbeddingModel;
use crate::error::InferenceError;
use crate::store::{EnrollmentRecord, EnrollmentStore, EnrollmentSummary, MemoryStore, StoreError};
use crate::types::{Embedding, GalleryEntry};
use ndarray::{Array4, Axis};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Returns the same detections for every image.
pub struct FakeDetectionModel {
    input_size: (u32, u32),
    detections: Vec<RawDetection>,
}

impl FakeDetectionModel {
    pub fn new(input_size: (u32, u32), detections: Vec<RawDetection>) -> Self {
        Self {
            input_size,
            detections,
        }
    }
}

impl DetectionModel for FakeDetectionModel {
    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn infer(&self, input: Array4<f32>) -> Result<Vec<RawDetection>, InferenceError> {
        let (w, h) = self.input_size;
        assert_eq!(input.shape(), &[1, 3, h as usize, w as usize]);
        Ok(self.detections.clone())
    }
}

pub struct FailingDetectionModel;

impl DetectionModel for FailingDetectionModel {
    fn input_size(&self) -> (u32, u32) {
        (32, 32)
    }

    fn infer(&self, _input: Array4<f32>) -> Result<Vec<RawDetection>, InferenceError> {
        Err(InferenceError::Failed("detector exploded".into()))
    }
}

/// Returns a fixed raw vector for every crop.
pub struct ConstantEmbeddingModel {
    output: Vec<f32>,
}

impl ConstantEmbeddingModel {
    pub fn new(output: Vec<f32>) -> Self {
        Self { output }
    }
}

impl EmbeddingModel for ConstantEmbeddingModel {
    fn input_size(&self) -> (u32, u32) {
        (112, 112)
    }

    fn infer(&self, _input: Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        Ok(self.output.clone())
    }
}

/// Embeds a crop as its per-channel mean, so crops of different colors
/// land on different vectors and crops of the same color on the same one.
pub struct MeanColorEmbeddingModel;

impl EmbeddingModel for MeanColorEmbeddingModel {
    fn input_size(&self) -> (u32, u32) {
        (16, 16)
    }

    fn infer(&self, input: Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        Ok((0..3)
            .map(|c| input.index_axis(Axis(1), c).mean().unwrap_or(0.0))
            .collect())
    }
}

pub struct FailingEmbeddingModel;

impl EmbeddingModel for FailingEmbeddingModel {
    fn input_size(&self) -> (u32, u32) {
        (112, 112)
    }

    fn infer(&self, _input: Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        Err(InferenceError::Failed("embedder exploded".into()))
    }
}

pub fn raw(cx: f32, cy: f32, w: f32, h: f32, confidence: f32) -> RawDetection {
    RawDetection {
        cx,
        cy,
        width: w,
        height: h,
        confidence,
    }
}

pub fn entry(identity: &str, values: Vec<f32>) -> GalleryEntry {
    GalleryEntry {
        identity: identity.to_string(),
        reference: Embedding::normalized(values),
    }
}

pub fn record(identity: &str, values: Vec<f32>) -> EnrollmentRecord {
    EnrollmentRecord {
        identity: identity.to_string(),
        embedding: Embedding::normalized(values),
        images_processed: 1,
        images_failed: 0,
        enrolled_at: chrono::Utc::now(),
    }
}

/// [`MemoryStore`] that counts full loads and can be told to fail or stall.
#[derive(Default)]
pub struct InstrumentedStore {
    pub inner: MemoryStore,
    pub loads: AtomicUsize,
    pub fail: AtomicBool,
    pub load_delay_ms: AtomicUsize,
}

impl InstrumentedStore {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(StoreError::Backend("store offline".into()))
        } else {
            Ok(())
        }
    }
}

impl EnrollmentStore for InstrumentedStore {
    fn load_all(&self, subset: Option<&[String]>) -> Result<Vec<GalleryEntry>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        // Snapshot first, then stall, so writes during the delay are missed.
        let entries = self.inner.load_all(subset);
        let delay = self.load_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay as u64));
        }
        entries
    }

    fn upsert(&self, record: &EnrollmentRecord) -> Result<(), StoreError> {
        self.check()?;
        self.inner.upsert(record)
    }

    fn contains(&self, identity: &str) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.contains(identity)
    }

    fn list(&self) -> Result<Vec<EnrollmentSummary>, StoreError> {
        self.check()?;
        self.inner.list()
    }

    fn remove(&self, identity: &str) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.remove(identity)
    }
}
