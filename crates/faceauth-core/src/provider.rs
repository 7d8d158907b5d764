//! Boundaries to the external capability providers: the face/hand models and the camera.
//!
//! The core never runs inference or talks to capture hardware itself. Implementations of
//! these traits live with the binary (or in tests).

use thiserror::Error;

use crate::frame::{Frame, Point, Region};
use crate::matcher::FaceEncoding;

/// A face reported by the detector.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub region: Region,
    /// Ordered landmark points in the landmark model's convention.
    pub landmarks: Vec<Point>,
}

/// Ordered hand landmark points (21-point convention, wrist first).
#[derive(Debug, Clone, PartialEq)]
pub struct HandLandmarks {
    pub points: Vec<Point>,
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("face detection failed: {0}")]
    Detection(String),
    #[error("face encoding failed: {0}")]
    Encoding(String),
    #[error("hand detection failed: {0}")]
    HandDetection(String),
}

/// Face detection, landmarking, encoding and hand landmarking.
pub trait FeatureProvider {
    /// Detect zero or more faces. Ordering is provider-defined.
    fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, ProviderError>;

    /// Compute the encoding of the face inside `region`.
    fn encode(&mut self, frame: &Frame, region: &Region) -> Result<FaceEncoding, ProviderError>;

    /// Detect the first hand in view, if any.
    fn detect_hand(&mut self, frame: &Frame) -> Result<Option<HandLandmarks>, ProviderError>;
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to open camera: {0}")]
    Open(String),
    #[error("frame read failed: {0}")]
    Read(String),
    #[error("camera stream ended")]
    EndOfStream,
}

/// An open capture handle. Dropping it releases the device.
pub trait Camera {
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;
}

/// Opens a scoped [`Camera`] for one verification or liveness run.
pub trait CameraSource {
    type Camera: Camera;

    fn open(&mut self) -> Result<Self::Camera, CaptureError>;
}

/// Read one frame, retrying up to `retries` consecutive read failures.
///
/// End of stream is not retried.
pub fn read_frame_with_retry<C: Camera>(camera: &mut C, retries: u32) -> Result<Frame, CaptureError> {
    let mut failures = 0u32;
    loop {
        match camera.read_frame() {
            Ok(frame) => return Ok(frame),
            Err(CaptureError::EndOfStream) => return Err(CaptureError::EndOfStream),
            Err(e) => {
                failures += 1;
                if failures > retries {
                    tracing::error!(error = %e, failures, "camera read failed persistently");
                    return Err(e);
                }
                tracing::warn!(error = %e, failures, retries, "camera read failed, retrying");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct ScriptedCamera {
        reads: VecDeque<Result<(), CaptureError>>,
        sequence: u64,
    }

    impl Camera for ScriptedCamera {
        fn read_frame(&mut self) -> Result<Frame, CaptureError> {
            match self.reads.pop_front() {
                Some(Ok(())) => {
                    self.sequence += 1;
                    Ok(Frame::captured(
                        RgbImage::new(1, 1),
                        self.sequence,
                        Duration::from_millis(self.sequence * 100),
                    ))
                }
                Some(Err(e)) => Err(e),
                None => Err(CaptureError::EndOfStream),
            }
        }
    }

    fn camera(reads: Vec<Result<(), CaptureError>>) -> ScriptedCamera {
        ScriptedCamera {
            reads: reads.into(),
            sequence: 0,
        }
    }

    #[test]
    fn test_retry_recovers_from_transient_failure() {
        let mut cam = camera(vec![Err(CaptureError::Read("glitch".into())), Ok(())]);
        let frame = read_frame_with_retry(&mut cam, 2).unwrap();
        assert_eq!(frame.captured_at, Duration::from_millis(100));
    }

    #[test]
    fn test_retry_gives_up_after_limit() {
        let mut cam = camera(vec![
            Err(CaptureError::Read("a".into())),
            Err(CaptureError::Read("b".into())),
            Err(CaptureError::Read("c".into())),
            Ok(()),
        ]);
        let err = read_frame_with_retry(&mut cam, 2).unwrap_err();
        assert!(matches!(err, CaptureError::Read(ref m) if m == "c"));
    }

    #[test]
    fn test_end_of_stream_not_retried() {
        let mut cam = camera(vec![]);
        let err = read_frame_with_retry(&mut cam, 5).unwrap_err();
        assert!(matches!(err, CaptureError::EndOfStream));
    }
}
