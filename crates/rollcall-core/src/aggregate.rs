//! Multi-shot enrollment: fold several embeddings of one identity into a
//! single reference vector.

use crate::error::PipelineError;
use crate::matcher::stack_rows;
use crate::types::Embedding;
use ndarray::Axis;

/// Element-wise mean of `embeddings`, re-normalized to unit length.
///
/// The caller drops per-image failures first; an empty slice is an error.
pub fn aggregate(embeddings: &[Embedding]) -> Result<Embedding, PipelineError> {
    if embeddings.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let rows = stack_rows(embeddings.iter())?;
    let mean = rows.mean_axis(Axis(0)).ok_or(PipelineError::EmptyInput)?;

    Ok(Embedding::normalized(mean.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::similarity;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::normalized(values.to_vec())
    }

    fn assert_close(a: &Embedding, b: &Embedding) {
        assert_eq!(a.dim(), b.dim());
        for (x, y) in a.values().iter().zip(b.values()) {
            assert!((x - y).abs() < 1e-6, "{:?} vs {:?}", a.values(), b.values());
        }
    }

    #[test]
    fn test_aggregate_single_is_identity() {
        let e = emb(&[0.2, -0.7, 0.4, 0.1]);
        assert_close(&aggregate(&[e.clone()]).unwrap(), &e);
    }

    #[test]
    fn test_aggregate_identical_pair_is_identity() {
        let e = emb(&[0.6, 0.8, 0.0]);
        assert_close(&aggregate(&[e.clone(), e.clone()]).unwrap(), &e);
    }

    #[test]
    fn test_aggregate_mean_is_renormalized() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[0.0, 1.0]);
        let avg = aggregate(&[a.clone(), b.clone()]).unwrap();

        assert!((avg.norm() - 1.0).abs() < 1e-6);
        let half = std::f32::consts::FRAC_1_SQRT_2;
        assert!((avg.values()[0] - half).abs() < 1e-6);
        let to_a = similarity(&avg, &a).unwrap();
        let to_b = similarity(&avg, &b).unwrap();
        assert!((to_a - to_b).abs() < 1e-6);
    }

    #[test]
    fn test_aggregate_opposites_stay_degenerate() {
        let avg = aggregate(&[emb(&[1.0, 0.0]), emb(&[-1.0, 0.0])]).unwrap();
        assert_eq!(avg.values(), &[0.0, 0.0]);
    }

    #[test]
    fn test_aggregate_empty_is_error() {
        assert!(matches!(aggregate(&[]), Err(PipelineError::EmptyInput)));
    }

    #[test]
    fn test_aggregate_rejects_mixed_dimensions() {
        let result = aggregate(&[emb(&[1.0, 0.0]), emb(&[1.0, 0.0, 0.0])]);
        assert!(matches!(result, Err(PipelineError::DimensionMismatch { .. })));
    }
}
