//! Enrollment store interface and an in-memory implementation.
//!
//! The store is keyed by identity with last-write-wins semantics. Entries
//! come back in first-enrollment order; re-enrolling an identity replaces its
//! vector without moving it.

use crate::error::PipelineError;
use crate::types::{Embedding, GalleryEntry};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store backend: {0}")]
    Backend(String),
    #[error("corrupt record for {identity:?}: {reason}")]
    Corrupt { identity: String, reason: String },
    #[error("stored gallery is inconsistent: {0}")]
    InvalidGallery(#[source] PipelineError),
}

/// Canonical reference vector for one identity plus enrollment metadata.
#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentRecord {
    pub identity: String,
    pub embedding: Embedding,
    pub images_processed: usize,
    pub images_failed: usize,
    pub enrolled_at: DateTime<Utc>,
}

impl EnrollmentRecord {
    pub fn entry(&self) -> GalleryEntry {
        GalleryEntry {
            identity: self.identity.clone(),
            reference: self.embedding.clone(),
        }
    }

    pub fn summary(&self) -> EnrollmentSummary {
        EnrollmentSummary {
            identity: self.identity.clone(),
            dim: self.embedding.dim(),
            images_processed: self.images_processed,
            images_failed: self.images_failed,
            enrolled_at: self.enrolled_at,
        }
    }
}

/// Enrollment metadata without the vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollmentSummary {
    pub identity: String,
    pub dim: usize,
    pub images_processed: usize,
    pub images_failed: usize,
    pub enrolled_at: DateTime<Utc>,
}

pub trait EnrollmentStore: Send + Sync {
    /// Load gallery entries in stored order, optionally restricted to
    /// `subset`. Unknown identities in the subset are ignored.
    fn load_all(&self, subset: Option<&[String]>) -> Result<Vec<GalleryEntry>, StoreError>;

    /// Insert or replace the record for `record.identity`.
    fn upsert(&self, record: &EnrollmentRecord) -> Result<(), StoreError>;

    fn contains(&self, identity: &str) -> Result<bool, StoreError>;

    fn list(&self) -> Result<Vec<EnrollmentSummary>, StoreError>;

    /// Delete the record for `identity`. Returns whether one existed.
    fn remove(&self, identity: &str) -> Result<bool, StoreError>;
}

/// Process-local store, mostly for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<EnrollmentRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EnrollmentStore for MemoryStore {
    fn load_all(&self, subset: Option<&[String]>) -> Result<Vec<GalleryEntry>, StoreError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .iter()
            .filter(|r| subset.map_or(true, |ids| ids.iter().any(|id| *id == r.identity)))
            .map(EnrollmentRecord::entry)
            .collect())
    }

    fn upsert(&self, record: &EnrollmentRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        match records.iter_mut().find(|r| r.identity == record.identity) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    fn contains(&self, identity: &str) -> Result<bool, StoreError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.iter().any(|r| r.identity == identity))
    }

    fn list(&self) -> Result<Vec<EnrollmentSummary>, StoreError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.iter().map(EnrollmentRecord::summary).collect())
    }

    fn remove(&self, identity: &str) -> Result<bool, StoreError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|r| r.identity != identity);
        Ok(records.len() != before)
    }
}
