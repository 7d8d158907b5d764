//! Scalar liveness signals derived from landmark geometry.
//!
//! - Eye Aspect Ratio (EAR): `(|p2-p6| + |p3-p5|) / (2 * |p1-p4|)` over the six
//!   eye-contour points, averaged across both eyes. Falls as the eyelid closes.
//! - Two-finger gesture: index and middle extended, ring and little folded, thumb
//!   not crossed toward the palm. Evaluated on a horizontally mirrored frame.

use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

use crate::frame::Point;

/// Points per eye required by the EAR formula.
pub const EYE_POINTS: usize = 6;

/// Points in the hand landmark convention.
pub const HAND_POINTS: usize = 21;

/// Hand landmark indices (wrist = 0).
pub mod hand_indices {
    pub const THUMB_IP: usize = 3;
    pub const THUMB_TIP: usize = 4;
    pub const INDEX_TIP: usize = 8;
    pub const MIDDLE_TIP: usize = 12;
    pub const RING_TIP: usize = 16;
    pub const LITTLE_TIP: usize = 20;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignalError {
    #[error("expected at least {expected} landmark points, got {got}")]
    TooFewPoints { expected: usize, got: usize },
    #[error("degenerate eye: outer and inner corners coincide")]
    DegenerateEye,
}

/// Where each eye's six contour points sit in the face landmark list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EyeLayout {
    pub left: Range<usize>,
    pub right: Range<usize>,
}

impl EyeLayout {
    /// The 68-point face landmark convention.
    pub fn face_68() -> Self {
        Self {
            left: 42..48,
            right: 36..42,
        }
    }
}

impl Default for EyeLayout {
    fn default() -> Self {
        Self::face_68()
    }
}

/// Eye aspect ratio of one eye's six contour points.
pub fn eye_aspect_ratio(eye: &[Point]) -> Result<f32, SignalError> {
    if eye.len() < EYE_POINTS {
        return Err(SignalError::TooFewPoints {
            expected: EYE_POINTS,
            got: eye.len(),
        });
    }

    let vertical_a = eye[1].distance(eye[5]);
    let vertical_b = eye[2].distance(eye[4]);
    let horizontal = eye[0].distance(eye[3]);

    if horizontal <= f32::EPSILON {
        return Err(SignalError::DegenerateEye);
    }

    Ok((vertical_a + vertical_b) / (2.0 * horizontal))
}

/// Converts landmark sets into the per-frame signals the challenge consumes.
#[derive(Debug, Clone, Default)]
pub struct SignalExtractor {
    layout: EyeLayout,
}

impl SignalExtractor {
    pub fn new(layout: EyeLayout) -> Self {
        Self { layout }
    }

    /// Mean EAR of both eyes taken from a full face landmark list.
    pub fn session_ear(&self, landmarks: &[Point]) -> Result<f32, SignalError> {
        let left = eye_slice(landmarks, &self.layout.left)?;
        let right = eye_slice(landmarks, &self.layout.right)?;
        Ok((eye_aspect_ratio(left)? + eye_aspect_ratio(right)?) / 2.0)
    }

    pub fn gesture_present(&self, hand: &[Point]) -> Result<bool, SignalError> {
        hand_gesture_present(hand)
    }
}

fn eye_slice<'a>(landmarks: &'a [Point], range: &Range<usize>) -> Result<&'a [Point], SignalError> {
    landmarks
        .get(range.clone())
        .ok_or(SignalError::TooFewPoints {
            expected: range.end,
            got: landmarks.len(),
        })
}

/// Whether the hand shows the two-finger gesture.
///
/// A fingertip is up when its y is strictly above (less than) the joint two
/// landmarks below it. Expects landmarks from a mirrored frame.
pub fn hand_gesture_present(hand: &[Point]) -> Result<bool, SignalError> {
    use hand_indices::*;

    if hand.len() < HAND_POINTS {
        return Err(SignalError::TooFewPoints {
            expected: HAND_POINTS,
            got: hand.len(),
        });
    }

    let is_up = |tip: usize| hand[tip].y < hand[tip - 2].y;
    let thumb_crossed = hand[THUMB_TIP].x < hand[THUMB_IP].x;

    Ok(is_up(INDEX_TIP) && is_up(MIDDLE_TIP) && !is_up(RING_TIP) && !is_up(LITTLE_TIP) && !thumb_crossed)
}
