//! Session orchestration: enrollment → verification → liveness.
//!
//! Each operation is synchronous. Verification and liveness open their own
//! camera and drop it on every exit path. The frame loop is strictly sequential:
//! one capture, one feature pass, one [`LivenessStateMachine::advance`], one render.

use std::time::Duration;

use crate::enrollment::{self, EncodingStore, Enrollment};
use crate::error::AuthError;
use crate::frame::Frame;
use crate::liveness::{FailureReason, FrameSignals, LivenessParams, LivenessState, LivenessStateMachine, Notice, Stage};
use crate::matcher::{EuclideanMatcher, MatchOutcome, Matcher, DEFAULT_MATCH_THRESHOLD};
use crate::provider::{read_frame_with_retry, CameraSource, CaptureError, FeatureProvider};
use crate::signals::{EyeLayout, SignalExtractor};

/// Receives status lines and per-frame challenge views; polled for quit.
pub trait SessionUi {
    fn status(&mut self, message: &str);

    fn show_challenge(&mut self, _view: &ChallengeView<'_>) {}

    fn quit_requested(&mut self) -> bool {
        false
    }
}

/// What the UI renders for one liveness frame.
#[derive(Debug)]
pub struct ChallengeView<'a> {
    pub frame: &'a Frame,
    pub state: LivenessState,
    pub time_left: Option<Duration>,
    pub ear: Option<f32>,
    pub hold_progress: Option<Duration>,
    pub notices: &'a [Notice],
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionParams {
    pub liveness: LivenessParams,
    pub match_threshold: f32,
    pub eye_layout: EyeLayout,
    /// Frames to scan for a face before verification gives up.
    pub verify_max_frames: usize,
    /// Consecutive camera read failures tolerated before aborting.
    pub capture_retries: u32,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            liveness: LivenessParams::default(),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            eye_layout: EyeLayout::default(),
            verify_max_frames: 150,
            capture_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessOutcome {
    Passed,
    Failed(FailureReason),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DenialReason {
    /// No match; `distance` is absent when no comparison happened.
    VerificationFailed { distance: Option<f32> },
    LivenessFailed(FailureReason),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AuthOutcome {
    AccessGranted,
    AccessDenied(DenialReason),
}

impl AuthOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::AccessGranted)
    }
}

/// Owns the provider, camera source and store for one user session.
pub struct SessionOrchestrator<P, C, S> {
    provider: P,
    cameras: C,
    store: S,
    params: SessionParams,
    extractor: SignalExtractor,
    matcher: EuclideanMatcher,
}

impl<P, C, S> SessionOrchestrator<P, C, S>
where
    P: FeatureProvider,
    C: CameraSource,
    S: EncodingStore,
{
    pub fn new(provider: P, cameras: C, store: S, params: SessionParams) -> Self {
        let extractor = SignalExtractor::new(params.eye_layout.clone());
        let matcher = EuclideanMatcher {
            threshold: params.match_threshold,
        };
        Self {
            provider,
            cameras,
            store,
            params,
            extractor,
            matcher,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn is_enrolled(&self) -> Result<bool, AuthError> {
        Ok(self.store.load().map_err(AuthError::store)?.is_some())
    }

    /// Store the first face of `image` as the enrolled encoding.
    pub fn enroll(&mut self, image: &Frame, ui: &mut dyn SessionUi) -> Result<Enrollment, AuthError> {
        match enrollment::enroll(&mut self.provider, &mut self.store, image) {
            Ok(enrollment) => {
                ui.status("Face successfully saved.");
                Ok(enrollment)
            }
            Err(AuthError::NoFaceFound) => {
                ui.status("No face found in the image. Try another image.");
                Err(AuthError::NoFaceFound)
            }
            Err(e) => {
                tracing::error!(error = %e, "enroll failed");
                ui.status(&format!("Face not saved: {e}"));
                Err(e)
            }
        }
    }

    /// Compare the first face seen by the camera with the enrolled encoding.
    pub fn verify(&mut self, ui: &mut dyn SessionUi) -> Result<MatchOutcome, AuthError> {
        let stored = self
            .store
            .load()
            .map_err(AuthError::store)?
            .ok_or(AuthError::NotEnrolled)?;

        ui.status("Starting face verification...");
        let mut camera = self.cameras.open()?;

        for _ in 0..self.params.verify_max_frames {
            let frame = read_frame_with_retry(&mut camera, self.params.capture_retries)?;
            if ui.quit_requested() {
                ui.status("Verification aborted by user.");
                return Err(AuthError::Aborted);
            }

            let faces = self.provider.detect_faces(&frame)?;
            let Some(face) = faces.first() else {
                continue;
            };
            if faces.len() > 1 {
                tracing::warn!(
                    faces = faces.len(),
                    "verify: several faces in view, using the first reported"
                );
            }

            let live = self.provider.encode(&frame, &face.region)?;
            let outcome = self.matcher.evaluate(&stored, &live).map_err(|e| {
                tracing::error!(error = %e, "verify: encoding comparison failed");
                AuthError::from(e)
            })?;

            tracing::info!(
                distance = outcome.distance,
                threshold = self.matcher.threshold,
                matched = outcome.is_match(),
                "verify complete"
            );
            ui.status(&format!("Distance: {:.3}", outcome.distance));
            ui.status(if outcome.is_match() {
                "Match: same person"
            } else {
                "No match: different person"
            });
            return Ok(outcome);
        }

        tracing::warn!(frames = self.params.verify_max_frames, "verify: no face in any captured frame");
        ui.status("No face detected by the camera.");
        Err(AuthError::NoFaceFound)
    }

    /// Run the two-stage challenge until it passes, fails, or is aborted.
    pub fn run_liveness(&mut self, ui: &mut dyn SessionUi) -> Result<LivenessOutcome, AuthError> {
        ui.status("Starting liveness check...");

        let mut camera = match self.cameras.open() {
            Ok(camera) => camera,
            Err(e) => {
                tracing::error!(error = %e, "liveness: camera unavailable");
                ui.status(&format!("Liveness check failed: {e}"));
                return Ok(LivenessOutcome::Failed(FailureReason::CaptureFailure));
            }
        };

        let mut frame = match read_frame_with_retry(&mut camera, self.params.capture_retries) {
            Ok(frame) => frame,
            Err(e) => return Ok(self.capture_lost(e, ui)),
        };

        let mut machine = LivenessStateMachine::new(self.params.liveness.clone(), frame.captured_at);
        ui.status(Stage::EyeClosure.instruction());

        loop {
            let now = frame.captured_at;

            if ui.quit_requested() {
                machine.abort(FailureReason::Aborted);
            } else {
                let stage_before = machine.state().stage();
                let signals = self.extract_signals(machine.state(), &frame)?;
                for notice in machine.advance(signals, now) {
                    ui.status(&notice.event.message());
                }
                if let Some(stage) = machine.state().stage().filter(|s| Some(*s) != stage_before) {
                    ui.status(stage.instruction());
                }

                let state = machine.state();
                let time_left = machine.time_left(now);
                let notices = machine.visible_notices(now);
                ui.show_challenge(&ChallengeView {
                    frame: &frame,
                    state,
                    time_left,
                    ear: signals.ear,
                    hold_progress: state.hold_progress(now),
                    notices,
                });
            }

            if machine.is_finished(now) {
                break;
            }

            frame = match read_frame_with_retry(&mut camera, self.params.capture_retries) {
                Ok(next) => next,
                Err(e) => {
                    if matches!(machine.state(), LivenessState::Success { .. }) {
                        break;
                    }
                    return Ok(self.capture_lost(e, ui));
                }
            };
        }

        let outcome = match machine.state() {
            LivenessState::Success { .. } => LivenessOutcome::Passed,
            LivenessState::Failure { reason } => LivenessOutcome::Failed(reason),
            _ => LivenessOutcome::Failed(FailureReason::Aborted),
        };
        match outcome {
            LivenessOutcome::Passed => ui.status("Liveness check passed."),
            LivenessOutcome::Failed(FailureReason::Aborted) => ui.status("Liveness check aborted."),
            LivenessOutcome::Failed(_) => ui.status("Liveness check failed."),
        }
        tracing::info!(?outcome, "liveness complete");
        Ok(outcome)
    }

    /// Verification followed, on a match only, by the liveness challenge.
    pub fn authenticate(&mut self, ui: &mut dyn SessionUi) -> Result<AuthOutcome, AuthError> {
        let verification = match self.verify(ui) {
            Ok(outcome) => outcome,
            Err(AuthError::NotEnrolled) => {
                ui.status("No saved face found. Complete enrollment first.");
                return Err(AuthError::NotEnrolled);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::info!(error = %e, "verification did not complete");
                ui.status("Face verification failed.");
                return Ok(AuthOutcome::AccessDenied(DenialReason::VerificationFailed {
                    distance: None,
                }));
            }
        };

        if !verification.is_match() {
            ui.status("Face verification failed. Not a match.");
            return Ok(AuthOutcome::AccessDenied(DenialReason::VerificationFailed {
                distance: Some(verification.distance),
            }));
        }
        ui.status("Face verified successfully.");

        match self.run_liveness(ui)? {
            LivenessOutcome::Passed => {
                ui.status("Liveness check passed. User authenticated.");
                Ok(AuthOutcome::AccessGranted)
            }
            LivenessOutcome::Failed(reason) => Ok(AuthOutcome::AccessDenied(DenialReason::LivenessFailed(reason))),
        }
    }

    /// Forget the enrolled face. Safe to call repeatedly.
    pub fn reset(&mut self, ui: &mut dyn SessionUi) -> Result<(), AuthError> {
        self.store.clear().map_err(AuthError::store)?;
        tracing::info!("session reset");
        ui.status("Reset complete. Please start from enrollment.");
        Ok(())
    }

    fn extract_signals(&mut self, state: LivenessState, frame: &Frame) -> Result<FrameSignals, AuthError> {
        let mut signals = FrameSignals::default();
        match state.stage() {
            Some(Stage::EyeClosure) => {
                let faces = self.provider.detect_faces(frame)?;
                if let Some(face) = faces.first() {
                    match self.extractor.session_ear(&face.landmarks) {
                        Ok(ear) => signals.ear = Some(ear),
                        Err(e) => tracing::warn!(error = %e, "liveness: unusable face landmarks"),
                    }
                }
            }
            Some(Stage::Gesture) => {
                let mirrored = frame.mirrored();
                if let Some(hand) = self.provider.detect_hand(&mirrored)? {
                    match self.extractor.gesture_present(&hand.points) {
                        Ok(present) => signals.gesture = Some(present),
                        Err(e) => tracing::warn!(error = %e, "liveness: unusable hand landmarks"),
                    }
                }
            }
            None => {}
        }
        Ok(signals)
    }

    fn capture_lost(&self, err: CaptureError, ui: &mut dyn SessionUi) -> LivenessOutcome {
        tracing::error!(error = %err, "liveness: camera lost");
        ui.status(&format!("Liveness check failed: {err}"));
        LivenessOutcome::Failed(FailureReason::CaptureFailure)
    }
}
