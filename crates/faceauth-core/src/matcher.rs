//! Distance-based face matching.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default Euclidean distance below which two encodings are the same person.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Fixed-length identity vector produced by the encoding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceEncoding {
    pub values: Vec<f32>,
}

impl FaceEncoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Reject empty vectors and NaN/Inf components.
    pub fn validate(&self) -> Result<(), MatchError> {
        if self.values.is_empty() {
            return Err(MatchError::EmptyEncoding);
        }
        if self.values.iter().any(|v| !v.is_finite()) {
            return Err(MatchError::NonFiniteValue);
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("encoding dimension mismatch: stored {stored}, live {live}")]
    DimensionMismatch { stored: usize, live: usize },
    #[error("encoding is empty")]
    EmptyEncoding,
    #[error("encoding contains a NaN/Inf value")]
    NonFiniteValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchDecision {
    Match,
    NoMatch,
}

/// Decision plus the raw distance, kept for logging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchOutcome {
    pub decision: MatchDecision,
    pub distance: f32,
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        self.decision == MatchDecision::Match
    }
}

/// Euclidean distance between two encodings of the same dimension.
pub fn euclidean_distance(a: &FaceEncoding, b: &FaceEncoding) -> Result<f32, MatchError> {
    if a.dimension() != b.dimension() {
        return Err(MatchError::DimensionMismatch {
            stored: a.dimension(),
            live: b.dimension(),
        });
    }

    let sum: f64 = a
        .values
        .iter()
        .zip(&b.values)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum();

    Ok(sum.sqrt() as f32)
}

pub trait Matcher {
    fn evaluate(&self, stored: &FaceEncoding, live: &FaceEncoding) -> Result<MatchOutcome, MatchError>;
}

/// Matches when the Euclidean distance is strictly below `threshold`.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

impl Matcher for EuclideanMatcher {
    fn evaluate(&self, stored: &FaceEncoding, live: &FaceEncoding) -> Result<MatchOutcome, MatchError> {
        let distance = euclidean_distance(stored, live)?;
        let decision = if distance < self.threshold {
            MatchDecision::Match
        } else {
            MatchDecision::NoMatch
        };
        Ok(MatchOutcome { decision, distance })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn enc(values: &[f32]) -> FaceEncoding {
        FaceEncoding::new(values.to_vec())
    }

    #[test]
    fn test_identical_encodings_match() {
        let a = enc(&[0.1, -0.2, 0.3, 0.05]);
        let outcome = EuclideanMatcher::default().evaluate(&a, &a).unwrap();
        assert_eq!(outcome.decision, MatchDecision::Match);
        assert_eq!(outcome.distance, 0.0);
    }

    #[test]
    fn test_known_distance() {
        let d = euclidean_distance(&enc(&[0.0, 0.0]), &enc(&[3.0, 4.0])).unwrap();
        assert_eq!(d, 5.0);
    }

    #[test]
    fn test_threshold_boundary_is_exclusive() {
        let matcher = EuclideanMatcher { threshold: 5.0 };
        let outcome = matcher.evaluate(&enc(&[0.0, 0.0]), &enc(&[3.0, 4.0])).unwrap();
        assert_eq!(outcome.decision, MatchDecision::NoMatch);

        let outcome = EuclideanMatcher::default()
            .evaluate(&enc(&[0.0]), &enc(&[0.6]))
            .unwrap();
        assert_eq!(outcome.distance, 0.6);
        assert!(!outcome.is_match());
    }

    #[test]
    fn test_far_encoding_no_match() {
        let outcome = EuclideanMatcher::default()
            .evaluate(&enc(&[0.0, 0.0]), &enc(&[0.8, 0.0]))
            .unwrap();
        assert_eq!(outcome.decision, MatchDecision::NoMatch);
        assert!((outcome.distance - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = EuclideanMatcher::default()
            .evaluate(&enc(&[0.0; 128]), &enc(&[0.0; 64]))
            .unwrap_err();
        assert_eq!(err, MatchError::DimensionMismatch { stored: 128, live: 64 });
    }

    #[test]
    fn test_validate() {
        assert_eq!(enc(&[]).validate(), Err(MatchError::EmptyEncoding));
        assert_eq!(enc(&[0.1, f32::NAN]).validate(), Err(MatchError::NonFiniteValue));
        assert_eq!(enc(&[f32::INFINITY]).validate(), Err(MatchError::NonFiniteValue));
        assert!(enc(&[0.1, 0.2]).validate().is_ok());
    }

    fn encoding_pair() -> impl Strategy<Value = (FaceEncoding, FaceEncoding)> {
        (1usize..64).prop_flat_map(|dim| {
            (
                prop::collection::vec(-1.0f32..1.0, dim),
                prop::collection::vec(-1.0f32..1.0, dim),
            )
                .prop_map(|(a, b)| (FaceEncoding::new(a), FaceEncoding::new(b)))
        })
    }

    proptest! {
        #[test]
        fn prop_distance_is_symmetric((a, b) in encoding_pair()) {
            prop_assert_eq!(euclidean_distance(&a, &b).unwrap(), euclidean_distance(&b, &a).unwrap());
        }

        #[test]
        fn prop_match_iff_below_threshold((a, b) in encoding_pair(), threshold in 0.0f32..4.0) {
            let outcome = EuclideanMatcher { threshold }.evaluate(&a, &b).unwrap();
            prop_assert_eq!(outcome.is_match(), outcome.distance < threshold);
        }
    }
}
