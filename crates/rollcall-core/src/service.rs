//! Caller-facing API: detect, recognize and enroll over one shared pipeline,
//! enrollment store and gallery cache.

use crate::aggregate::aggregate;
use crate::cache::{load_gallery, GalleryCache};
use crate::error::{InferenceError, PipelineError};
use crate::matcher::Gallery;
use crate::pipeline::{decode_image, RecognitionPipeline};
use crate::store::{EnrollmentRecord, EnrollmentStore, EnrollmentSummary, StoreError};
use crate::types::{Embedding, FaceCandidate, MatchResult};
use chrono::Utc;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Minimum cosine similarity for a positive match (inclusive).
    pub similarity_threshold: f32,
    /// Recognize against an empty gallery when the store cannot be read,
    /// instead of failing the request.
    pub degrade_on_store_error: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.45,
            degrade_on_store_error: false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no usable face in {} submitted image(s)", .failures.len())]
    NoUsableImages { failures: Vec<ImageFailure> },
}

/// Why one enrollment image contributed nothing.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("could not decode image: {0}")]
    Decode(String),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("inference failed: {0}")]
    Inference(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageFailure {
    /// 1-based position in the submitted sequence.
    pub index: usize,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollmentReport {
    pub identity: String,
    pub images_processed: usize,
    pub failures: Vec<ImageFailure>,
}

pub struct RecognitionService {
    pipeline: RecognitionPipeline,
    store: Arc<dyn EnrollmentStore>,
    cache: GalleryCache,
    config: MatchConfig,
}

impl RecognitionService {
    pub fn new(
        pipeline: RecognitionPipeline,
        store: Arc<dyn EnrollmentStore>,
        config: MatchConfig,
    ) -> Self {
        let cache = GalleryCache::new(Arc::clone(&store));
        Self {
            pipeline,
            store,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &GalleryCache {
        &self.cache
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Every croppable face, highest confidence first.
    pub fn detect_all(&self, image: &RgbImage) -> Result<Vec<FaceCandidate>, ServiceError> {
        Ok(self.pipeline.detect(image)?)
    }

    pub fn detect_first(&self, image: &RgbImage) -> Result<Option<FaceCandidate>, ServiceError> {
        Ok(self.detect_all(image)?.into_iter().next())
    }

    /// Match every detected face against the gallery, in detection order.
    ///
    /// With `subset`, only those identities are considered and the gallery is
    /// read straight from the store; otherwise the cached full gallery is used.
    pub fn recognize_all(
        &self,
        image: &RgbImage,
        subset: Option<&[String]>,
    ) -> Result<Vec<MatchResult>, ServiceError> {
        let faces = self.pipeline.process_all_faces(image)?;
        if faces.is_empty() {
            return Ok(Vec::new());
        }

        let gallery = self.gallery(subset)?;
        let threshold = self.config.similarity_threshold;

        let mut results = Vec::with_capacity(faces.len());
        for face in &faces {
            let result = gallery.best_match(&face.embedding, threshold)?;
            tracing::debug!(
                matched = result.matched,
                identity = ?result.identity,
                score = result.score,
                bbox = ?face.bbox.corners(),
                "face matched against gallery"
            );
            results.push(result.with_bbox(face.bbox));
        }
        Ok(results)
    }

    pub fn recognize_first(
        &self,
        image: &RgbImage,
        subset: Option<&[String]>,
    ) -> Result<Option<MatchResult>, ServiceError> {
        let Some(face) = self.pipeline.process_first_face(image)? else {
            return Ok(None);
        };
        let gallery = self.gallery(subset)?;
        let result = gallery.best_match(&face.embedding, self.config.similarity_threshold)?;
        Ok(Some(result.with_bbox(face.bbox)))
    }

    /// Enroll `identity` from several encoded images.
    ///
    /// Each image contributes the embedding of its highest-confidence face.
    /// Images that fail are reported individually; the call only fails when
    /// none is usable. The stored reference replaces any previous one, and the
    /// gallery cache is invalidated before returning.
    pub fn enroll<I: AsRef<[u8]>>(
        &self,
        identity: &str,
        images: &[I],
    ) -> Result<EnrollmentReport, ServiceError> {
        let mut embeddings = Vec::with_capacity(images.len());
        let mut failures = Vec::new();

        for (i, bytes) in images.iter().enumerate() {
            match self.enrollment_embedding(bytes.as_ref()) {
                Ok(embedding) => embeddings.push(embedding),
                Err(reason) => {
                    tracing::warn!(identity, index = i + 1, %reason, "enrollment image rejected");
                    failures.push(ImageFailure {
                        index: i + 1,
                        reason,
                    });
                }
            }
        }

        if embeddings.is_empty() {
            return Err(ServiceError::NoUsableImages { failures });
        }

        let record = EnrollmentRecord {
            identity: identity.to_string(),
            embedding: aggregate(&embeddings)?,
            images_processed: embeddings.len(),
            images_failed: failures.len(),
            enrolled_at: Utc::now(),
        };
        self.store.upsert(&record)?;
        self.cache.invalidate();

        tracing::info!(
            identity,
            images_processed = record.images_processed,
            images_failed = record.images_failed,
            dim = record.embedding.dim(),
            "identity enrolled"
        );

        Ok(EnrollmentReport {
            identity: record.identity,
            images_processed: record.images_processed,
            failures,
        })
    }

    /// Delete an identity. Returns whether it was enrolled.
    pub fn remove(&self, identity: &str) -> Result<bool, ServiceError> {
        let removed = self.store.remove(identity)?;
        if removed {
            self.cache.invalidate();
            tracing::info!(identity, "identity removed");
        }
        Ok(removed)
    }

    pub fn list(&self) -> Result<Vec<EnrollmentSummary>, ServiceError> {
        Ok(self.store.list()?)
    }

    pub fn is_enrolled(&self, identity: &str) -> Result<bool, ServiceError> {
        Ok(self.store.contains(identity)?)
    }

    fn gallery(&self, subset: Option<&[String]>) -> Result<Arc<Gallery>, ServiceError> {
        let loaded = match subset {
            Some(ids) => load_gallery(self.store.as_ref(), Some(ids)).map(Arc::new),
            None => self.cache.get(),
        };

        match loaded {
            Ok(gallery) => Ok(gallery),
            Err(e) if self.config.degrade_on_store_error => {
                tracing::warn!(error = %e, "gallery unavailable; matching against empty gallery");
                Ok(Arc::new(Gallery::empty()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn enrollment_embedding(&self, bytes: &[u8]) -> Result<Embedding, FailureReason> {
        let image = decode_image(bytes).map_err(|e| FailureReason::Decode(e.to_string()))?;
        match self.pipeline.process_first_face(&image) {
            Ok(Some(face)) => Ok(face.embedding),
            Ok(None) => Err(FailureReason::NoFaceDetected),
            Err(e) => Err(FailureReason::Inference(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::FaceDetector;
    use crate::embedder::{EmbedderConfig, EmbeddingModel, FaceEmbedder};
    use crate::test_support::{
        raw, FailingEmbeddingModel, FakeDetectionModel, InstrumentedStore, MeanColorEmbeddingModel,
    };
    use crate::types::NO_MATCH_SCORE;
    use image::Rgb;

    const RED: Rgb<u8> = Rgb([255, 0, 0]);
    const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
    const BLUE: Rgb<u8> = Rgb([0, 0, 255]);

    fn solid(color: Rgb<u8>) -> RgbImage {
        RgbImage::from_pixel(100, 100, color)
    }

    fn png(color: Rgb<u8>) -> Vec<u8> {
        let mut bytes = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut bytes);
        solid(color)
            .write_to(&mut cursor, image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn pipeline(faces: usize, embedder: impl EmbeddingModel + 'static) -> RecognitionPipeline {
        let detections = [
            raw(30.0, 30.0, 40.0, 40.0, 0.9),
            raw(70.0, 70.0, 40.0, 40.0, 0.8),
        ];
        let detector = FakeDetectionModel::new((100, 100), detections[..faces].to_vec());
        RecognitionPipeline::new(
            FaceDetector::new(Box::new(detector), 0.5),
            FaceEmbedder::new(Box::new(embedder), &EmbedderConfig::default()),
        )
    }

    fn service_with(
        faces: usize,
        embedder: impl EmbeddingModel + 'static,
        config: MatchConfig,
    ) -> (Arc<InstrumentedStore>, RecognitionService) {
        let store = Arc::new(InstrumentedStore::default());
        let service = RecognitionService::new(pipeline(faces, embedder), store.clone(), config);
        (store, service)
    }

    fn service(faces: usize) -> (Arc<InstrumentedStore>, RecognitionService) {
        service_with(faces, MeanColorEmbeddingModel, MatchConfig::default())
    }

    #[test]
    fn test_detect_all_and_first() {
        let (_, svc) = service(2);
        let image = solid(RED);

        let faces = svc.detect_all(&image).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].bbox.corners(), [10, 10, 50, 50]);
        assert_eq!(svc.detect_first(&image).unwrap(), faces.first().copied());
    }

    #[test]
    fn test_recognize_against_empty_gallery() {
        let (_, svc) = service(2);
        let results = svc.recognize_all(&solid(RED), None).unwrap();

        assert_eq!(results.len(), 2);
        for r in &results {
            assert!(!r.matched);
            assert_eq!(r.identity, None);
            assert_eq!(r.score, NO_MATCH_SCORE);
            assert!(r.bbox.is_some());
        }
    }

    #[test]
    fn test_recognize_no_faces_skips_store() {
        let (store, svc) = service(0);
        assert!(svc.recognize_all(&solid(RED), None).unwrap().is_empty());
        assert_eq!(svc.recognize_first(&solid(RED), None).unwrap(), None);
        assert_eq!(store.loads(), 0);
    }

    #[test]
    fn test_enroll_then_recognize() {
        let (_, svc) = service(1);
        svc.enroll("red", &[png(RED), png(RED)]).unwrap();
        svc.enroll("green", &[png(GREEN)]).unwrap();

        let results = svc.recognize_all(&solid(RED), None).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].matched);
        assert_eq!(results[0].identity.as_deref(), Some("red"));
        assert!((results[0].score - 1.0).abs() < 1e-5);
        assert_eq!(results[0].bbox.map(|b| b.corners()), Some([10, 10, 50, 50]));

        let blue = svc.recognize_first(&solid(BLUE), None).unwrap().unwrap();
        assert!(!blue.matched);
        assert!(blue.score < 0.45);
    }

    #[test]
    fn test_enroll_reports_partial_failures() {
        let (store, svc) = service(1);
        let images = vec![png(RED), b"garbage".to_vec(), png(RED)];

        let report = svc.enroll("alice", &images).unwrap();
        assert_eq!(report.identity, "alice");
        assert_eq!(report.images_processed, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 2);
        assert!(matches!(report.failures[0].reason, FailureReason::Decode(_)));

        let summary = &store.list().unwrap()[0];
        assert_eq!(summary.images_processed, 2);
        assert_eq!(summary.images_failed, 1);
        assert!(svc.is_enrolled("alice").unwrap());
    }

    #[test]
    fn test_enroll_fails_when_no_face_anywhere() {
        let (store, svc) = service(0);
        let err = svc.enroll("bob", &[png(RED), png(GREEN)]).unwrap_err();

        match err {
            ServiceError::NoUsableImages { failures } => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].index, 1);
                assert_eq!(failures[1].reason, FailureReason::NoFaceDetected);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!store.contains("bob").unwrap());
    }

    #[test]
    fn test_enroll_inference_failure_reported() {
        let (_, svc) = service_with(1, FailingEmbeddingModel, MatchConfig::default());
        let err = svc.enroll("carol", &[png(RED)]).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::NoUsableImages { ref failures }
                if matches!(failures[0].reason, FailureReason::Inference(_))
        ));
    }

    #[test]
    fn test_enroll_with_no_images_is_error() {
        let (_, svc) = service(1);
        let images: [Vec<u8>; 0] = [];
        assert!(matches!(
            svc.enroll("nobody", &images),
            Err(ServiceError::NoUsableImages { failures }) if failures.is_empty()
        ));
    }

    #[test]
    fn test_enroll_invalidates_cache() {
        let (_, svc) = service(1);
        svc.enroll("green", &[png(GREEN)]).unwrap();
        assert!(!svc.recognize_all(&solid(RED), None).unwrap()[0].matched);
        assert!(svc.cache().is_cached());

        svc.enroll("red", &[png(RED)]).unwrap();
        assert!(!svc.cache().is_cached());
        let result = &svc.recognize_all(&solid(RED), None).unwrap()[0];
        assert_eq!(result.identity.as_deref(), Some("red"));
    }

    #[test]
    fn test_reenroll_replaces_reference() {
        let (store, svc) = service(1);
        svc.enroll("x", &[png(GREEN)]).unwrap();
        svc.enroll("x", &[png(RED)]).unwrap();

        assert_eq!(store.list().unwrap().len(), 1);
        let result = &svc.recognize_all(&solid(RED), None).unwrap()[0];
        assert_eq!(result.identity.as_deref(), Some("x"));
    }

    #[test]
    fn test_store_write_failure_leaves_cache_untouched() {
        let (store, svc) = service(1);
        svc.enroll("red", &[png(RED)]).unwrap();
        svc.recognize_all(&solid(RED), None).unwrap();
        assert!(svc.cache().is_cached());

        store.set_failing(true);
        let err = svc.enroll("green", &[png(GREEN)]).unwrap_err();
        assert!(matches!(err, ServiceError::Store(_)));
        assert!(svc.cache().is_cached());

        // Served from cache while the store is down.
        let result = &svc.recognize_all(&solid(RED), None).unwrap()[0];
        assert_eq!(result.identity.as_deref(), Some("red"));
    }

    #[test]
    fn test_store_read_failure_is_fatal_by_default() {
        let (store, svc) = service(1);
        store.set_failing(true);
        assert!(matches!(
            svc.recognize_all(&solid(RED), None),
            Err(ServiceError::Store(_))
        ));
    }

    #[test]
    fn test_store_read_failure_degrades_when_configured() {
        let config = MatchConfig {
            degrade_on_store_error: true,
            ..MatchConfig::default()
        };
        let (store, svc) = service_with(2, MeanColorEmbeddingModel, config);
        store.set_failing(true);

        let results = svc.recognize_all(&solid(RED), None).unwrap();
        assert_eq!(results.len(), 2);
        for r in &results {
            assert!(!r.matched);
            assert_eq!(r.score, NO_MATCH_SCORE);
        }
        assert!(!svc.cache().is_cached());
    }

    #[test]
    fn test_subset_bypasses_cache() {
        let (store, svc) = service(1);
        svc.enroll("red", &[png(RED)]).unwrap();
        svc.enroll("green", &[png(GREEN)]).unwrap();

        let only_green = vec!["green".to_string()];
        let result = &svc.recognize_all(&solid(RED), Some(&only_green[..])).unwrap()[0];
        assert!(!result.matched);
        assert!(!svc.cache().is_cached());
        assert_eq!(store.loads(), 1);

        let result = &svc.recognize_all(&solid(RED), None).unwrap()[0];
        assert_eq!(result.identity.as_deref(), Some("red"));
        assert!(svc.cache().is_cached());
    }

    #[test]
    fn test_unknown_subset_matches_nothing() {
        let (_, svc) = service(1);
        svc.enroll("red", &[png(RED)]).unwrap();

        let ghost = vec!["ghost".to_string()];
        let result = &svc.recognize_all(&solid(RED), Some(&ghost[..])).unwrap()[0];
        assert!(!result.matched);
        assert_eq!(result.score, NO_MATCH_SCORE);
    }

    #[test]
    fn test_remove_invalidates_cache() {
        let (_, svc) = service(1);
        svc.enroll("red", &[png(RED)]).unwrap();
        assert!(svc.recognize_all(&solid(RED), None).unwrap()[0].matched);

        assert!(svc.remove("red").unwrap());
        assert!(!svc.cache().is_cached());
        assert!(!svc.remove("red").unwrap());

        let result = &svc.recognize_all(&solid(RED), None).unwrap()[0];
        assert!(!result.matched);
        assert_eq!(result.score, NO_MATCH_SCORE);
        assert!(svc.list().unwrap().is_empty());
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(
            FailureReason::NoFaceDetected.to_string(),
            "no face detected"
        );
        assert_eq!(
            FailureReason::Decode("bad header".into()).to_string(),
            "could not decode image: bad header"
        );
    }
}
