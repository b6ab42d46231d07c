//! Gallery scoring and best-match selection.
//!
//! Embeddings are unit-norm, so a raw dot product is cosine similarity.

use crate::error::PipelineError;
use crate::types::{Embedding, GalleryEntry, MatchResult, NO_MATCH_SCORE};
use ndarray::Array2;
use std::collections::HashSet;

/// Dot product of two embeddings, in [-1, 1] for unit vectors.
///
/// Fails when the dimensions differ, reporting `b` as the expected side so
/// `similarity(q, &refs[i])` agrees with [`similarity_batch`].
pub fn similarity(a: &Embedding, b: &Embedding) -> Result<f32, PipelineError> {
    if a.dim() != b.dim() {
        return Err(PipelineError::DimensionMismatch {
            expected: b.dim(),
            actual: a.dim(),
        });
    }
    Ok(a.view().dot(&b.view()))
}

/// Score `query` against every reference in one matrix–vector product.
///
/// Index-aligned with `references`. Fails if any reference disagrees with
/// the query's dimensionality.
pub fn similarity_batch(
    query: &Embedding,
    references: &[Embedding],
) -> Result<Vec<f32>, PipelineError> {
    if references.is_empty() {
        return Ok(Vec::new());
    }
    let matrix = stack_rows(references.iter())?;
    score_matrix(&matrix, query)
}

/// Stack equally sized embeddings into an `N × D` matrix.
pub(crate) fn stack_rows<'a>(
    rows: impl ExactSizeIterator<Item = &'a Embedding>,
) -> Result<Array2<f32>, PipelineError> {
    let n = rows.len();
    let mut dim = None;
    let mut flat = Vec::new();

    for row in rows {
        let expected = *dim.get_or_insert(row.dim());
        if row.dim() != expected {
            return Err(PipelineError::DimensionMismatch {
                expected,
                actual: row.dim(),
            });
        }
        flat.extend_from_slice(row.values());
    }

    let dim = dim.unwrap_or(0);
    Array2::from_shape_vec((n, dim), flat).map_err(|_| PipelineError::DimensionMismatch {
        expected: n * dim,
        actual: n,
    })
}

fn score_matrix(matrix: &Array2<f32>, query: &Embedding) -> Result<Vec<f32>, PipelineError> {
    if query.dim() != matrix.ncols() {
        return Err(PipelineError::DimensionMismatch {
            expected: matrix.ncols(),
            actual: query.dim(),
        });
    }
    Ok(matrix.dot(&query.view()).to_vec())
}

/// Index and score of the strictly greatest score; earlier entries win ties.
/// NaN scores are never selected.
fn select_best(scores: &[f32]) -> Option<(usize, f32)> {
    let mut best_score = f32::NEG_INFINITY;
    let mut best_idx = None;

    for (i, &score) in scores.iter().enumerate() {
        if score > best_score {
            best_score = score;
            best_idx = Some(i);
        }
    }

    best_idx.map(|i| (i, best_score))
}

/// Immutable snapshot of enrolled identities with their references stacked
/// into a matrix for batched scoring.
#[derive(Debug, Clone)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
    references: Array2<f32>,
}

impl Gallery {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            references: Array2::zeros((0, 0)),
        }
    }

    /// Build a gallery, rejecting mixed dimensionality and repeated identities.
    pub fn from_entries(entries: Vec<GalleryEntry>) -> Result<Self, PipelineError> {
        {
            let mut seen = HashSet::with_capacity(entries.len());
            if let Some(dup) = entries.iter().find(|e| !seen.insert(e.identity.as_str())) {
                return Err(PipelineError::DuplicateIdentity(dup.identity.clone()));
            }
        }

        let references = stack_rows(entries.iter().map(|e| &e.reference))?;
        Ok(Self {
            entries,
            references,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    /// One score per entry, in gallery order.
    pub fn scores(&self, query: &Embedding) -> Result<Vec<f32>, PipelineError> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        score_matrix(&self.references, query)
    }

    /// Best match for `query`. A match needs a best entry scoring at least
    /// `threshold`; an empty gallery is unmatched with [`NO_MATCH_SCORE`].
    pub fn best_match(
        &self,
        query: &Embedding,
        threshold: f32,
    ) -> Result<MatchResult, PipelineError> {
        let scores = self.scores(query)?;
        Ok(self.decide(&scores, threshold))
    }

    fn decide(&self, scores: &[f32], threshold: f32) -> MatchResult {
        match select_best(scores) {
            Some((idx, score)) if score >= threshold => MatchResult {
                matched: true,
                identity: Some(self.entries[idx].identity.clone()),
                score,
                bbox: None,
            },
            Some((_, score)) => MatchResult::unmatched(score),
            None => MatchResult::unmatched(NO_MATCH_SCORE),
        }
    }
}

impl Default for Gallery {
    fn default() -> Self {
        Self::empty()
    }
}
