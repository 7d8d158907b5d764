//! Face authentication core: enrollment, distance-based verification and a
//! two-stage active liveness challenge.
//!
//! Inference and capture sit behind [`provider::FeatureProvider`] and
//! [`provider::CameraSource`]; persistence behind [`enrollment::EncodingStore`].
//! [`session::SessionOrchestrator`] wires them into the enroll → verify → liveness flow.

pub mod enrollment;
pub mod error;
pub mod frame;
pub mod liveness;
pub mod matcher;
pub mod provider;
pub mod session;
pub mod signals;

pub use enrollment::{enroll, EncodingStore, Enrollment, MemoryStore};
pub use error::AuthError;
pub use frame::{Frame, FrameOrigin, Point, Region};
pub use liveness::{FailureReason, LivenessParams, LivenessState, LivenessStateMachine, Stage};
pub use matcher::{EuclideanMatcher, FaceEncoding, MatchDecision, MatchOutcome, Matcher};
pub use provider::{Camera, CameraSource, CaptureError, DetectedFace, FeatureProvider, HandLandmarks, ProviderError};
pub use session::{AuthOutcome, DenialReason, LivenessOutcome, SessionOrchestrator, SessionParams, SessionUi};
pub use signals::{EyeLayout, SignalExtractor};
