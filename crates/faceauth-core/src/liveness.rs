//! Active liveness challenge: timed eye closure, then a timed hand-gesture hold.
//!
//! A printed photograph cannot close its eyes on request, and cannot raise two
//! fingers while doing so. The challenge runs as a pure state machine driven one
//! frame at a time by [`advance`]; the capture/render loop that feeds it lives in
//! [`crate::session`].
//!
//! ```text
//! AwaitingEyeClosure --(EAR below threshold for 2s)--> AwaitingGesture
//! AwaitingGesture    --(gesture held for 2s)---------> Success
//! either stage       --(15s stage deadline)----------> Failure
//! ```
//!
//! # Timing rules
//!
//! - Every timestamp is the single monotonic sample taken for the frame.
//! - A frame with no face (stage one) or no hand (stage two) withholds progress:
//!   the hold timer is neither started, continued nor reset.
//! - A satisfied hold is evaluated before the deadline, so a hold completing on
//!   the deadline frame still passes.
//! - Eye closures interrupted after more than `short_closure_min` produce a
//!   "too short" notice; shorter ones are treated as blinks and reset silently.

use serde::Serialize;
use std::time::Duration;

/// Thresholds and durations of the challenge.
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessParams {
    /// EAR strictly below this counts as eyes closed.
    pub ear_threshold: f32,
    /// Continuous closure required to pass stage one.
    pub closure_required: Duration,
    /// Interrupted closures longer than this emit a "too short" notice.
    pub short_closure_min: Duration,
    /// Continuous gesture hold required to pass stage two.
    pub gesture_hold_required: Duration,
    /// Time budget of each stage, from stage entry.
    pub stage_timeout: Duration,
    /// How long transient notices stay visible.
    pub notice_window: Duration,
}

impl Default for LivenessParams {
    fn default() -> Self {
        Self {
            ear_threshold: 0.25,
            closure_required: Duration::from_secs(2),
            short_closure_min: Duration::from_millis(300),
            gesture_hold_required: Duration::from_secs(2),
            stage_timeout: Duration::from_secs(15),
            notice_window: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    EyeClosure,
    Gesture,
}

impl Stage {
    /// Instruction shown while the stage is active.
    pub fn instruction(&self) -> &'static str {
        match self {
            Self::EyeClosure => "STEP 1: Close your eyes for 2 seconds",
            Self::Gesture => "STEP 2: Hold up your index and middle fingers, palm facing the camera",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    /// The stage deadline elapsed before its hold requirement was met.
    StageTimeout(Stage),
    /// The user asked to quit.
    Aborted,
    /// The camera could not deliver frames.
    CaptureFailure,
}

/// Challenge state. Timers exist only inside the stage that owns them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LivenessState {
    AwaitingEyeClosure {
        stage_started: Duration,
        closed_since: Option<Duration>,
    },
    AwaitingGesture {
        stage_started: Duration,
        held_since: Option<Duration>,
    },
    /// Both stages passed. The "hand check passed" notice stays up until `display_until`.
    Success { display_until: Duration },
    Failure { reason: FailureReason },
}

impl LivenessState {
    /// Initial state, entered at `now`.
    pub fn start(now: Duration) -> Self {
        Self::AwaitingEyeClosure {
            stage_started: now,
            closed_since: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Failure { .. })
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::AwaitingEyeClosure { .. } => Some(Stage::EyeClosure),
            Self::AwaitingGesture { .. } => Some(Stage::Gesture),
            _ => None,
        }
    }

    /// Remaining stage budget at `now`, for active stages.
    pub fn time_left(&self, now: Duration, params: &LivenessParams) -> Option<Duration> {
        let started = match self {
            Self::AwaitingEyeClosure { stage_started, .. } | Self::AwaitingGesture { stage_started, .. } => {
                *stage_started
            }
            _ => return None,
        };
        Some((started + params.stage_timeout).saturating_sub(now))
    }

    /// How long the current closure or hold has lasted at `now`.
    pub fn hold_progress(&self, now: Duration) -> Option<Duration> {
        match self {
            Self::AwaitingEyeClosure {
                closed_since: Some(since),
                ..
            }
            | Self::AwaitingGesture {
                held_since: Some(since),
                ..
            } => Some(now.saturating_sub(*since)),
            _ => None,
        }
    }
}

/// Signals extracted from one frame. `None` means nothing was detected.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameSignals {
    pub ear: Option<f32>,
    pub gesture: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum LivenessEvent {
    ClosureTooShort { closed_for: Duration },
    EyeStagePassed,
    GestureStagePassed,
    StageTimedOut(Stage),
}

impl LivenessEvent {
    pub fn message(&self) -> String {
        match self {
            Self::ClosureTooShort { closed_for } => format!(
                "Eyes closed for only {:.1}s, close them for 2s",
                closed_for.as_secs_f32()
            ),
            Self::EyeStagePassed => "Eye check passed".to_string(),
            Self::GestureStagePassed => "Hand check passed".to_string(),
            Self::StageTimedOut(Stage::EyeClosure) => "Time is up: eye check failed".to_string(),
            Self::StageTimedOut(Stage::Gesture) => "Time is up: hand check failed".to_string(),
        }
    }
}

/// A transient UI message and the time it stops being shown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Notice {
    pub event: LivenessEvent,
    pub visible_until: Duration,
}

impl Notice {
    fn new(event: LivenessEvent, now: Duration, params: &LivenessParams) -> Self {
        Self {
            event,
            visible_until: now + params.notice_window,
        }
    }

    pub fn is_visible(&self, now: Duration) -> bool {
        now < self.visible_until
    }
}

/// Result of one [`advance`] step.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: LivenessState,
    pub notices: Vec<Notice>,
}

impl Transition {
    fn to(state: LivenessState, notices: Vec<Notice>) -> Self {
        Self { state, notices }
    }
}

/// Pure per-frame transition function.
pub fn advance(
    state: LivenessState,
    signals: FrameSignals,
    now: Duration,
    params: &LivenessParams,
) -> Transition {
    match state {
        LivenessState::AwaitingEyeClosure {
            stage_started,
            closed_since,
        } => advance_eye_closure(stage_started, closed_since, signals.ear, now, params),
        LivenessState::AwaitingGesture {
            stage_started,
            held_since,
        } => advance_gesture(stage_started, held_since, signals.gesture, now, params),
        terminal => Transition::to(terminal, Vec::new()),
    }
}

fn advance_eye_closure(
    stage_started: Duration,
    mut closed_since: Option<Duration>,
    ear: Option<f32>,
    now: Duration,
    params: &LivenessParams,
) -> Transition {
    let mut notices = Vec::new();

    if let Some(ear) = ear {
        if ear < params.ear_threshold {
            let since = *closed_since.get_or_insert(now);
            if now.saturating_sub(since) >= params.closure_required {
                notices.push(Notice::new(LivenessEvent::EyeStagePassed, now, params));
                return Transition::to(
                    LivenessState::AwaitingGesture {
                        stage_started: now,
                        held_since: None,
                    },
                    notices,
                );
            }
        } else if let Some(since) = closed_since.take() {
            let closed_for = now.saturating_sub(since);
            if closed_for > params.short_closure_min {
                notices.push(Notice::new(
                    LivenessEvent::ClosureTooShort { closed_for },
                    now,
                    params,
                ));
            }
        }
    }

    if deadline_elapsed(stage_started, now, params) {
        return timed_out(Stage::EyeClosure, notices, now, params);
    }

    Transition::to(
        LivenessState::AwaitingEyeClosure {
            stage_started,
            closed_since,
        },
        notices,
    )
}

fn advance_gesture(
    stage_started: Duration,
    mut held_since: Option<Duration>,
    gesture: Option<bool>,
    now: Duration,
    params: &LivenessParams,
) -> Transition {
    match gesture {
        Some(true) => {
            let since = *held_since.get_or_insert(now);
            if now.saturating_sub(since) >= params.gesture_hold_required {
                return Transition::to(
                    LivenessState::Success {
                        display_until: now + params.notice_window,
                    },
                    vec![Notice::new(LivenessEvent::GestureStagePassed, now, params)],
                );
            }
        }
        Some(false) => held_since = None,
        None => {}
    }

    if deadline_elapsed(stage_started, now, params) {
        return timed_out(Stage::Gesture, Vec::new(), now, params);
    }

    Transition::to(
        LivenessState::AwaitingGesture {
            stage_started,
            held_since,
        },
        Vec::new(),
    )
}

fn deadline_elapsed(stage_started: Duration, now: Duration, params: &LivenessParams) -> bool {
    now.saturating_sub(stage_started) >= params.stage_timeout
}

fn timed_out(stage: Stage, mut notices: Vec<Notice>, now: Duration, params: &LivenessParams) -> Transition {
    notices.push(Notice::new(LivenessEvent::StageTimedOut(stage), now, params));
    Transition::to(
        LivenessState::Failure {
            reason: FailureReason::StageTimeout(stage),
        },
        notices,
    )
}

/// Transient notices currently on screen. A newer notice replaces an older one of
/// the same kind.
#[derive(Debug, Clone, Default)]
pub struct NoticeBoard {
    notices: Vec<Notice>,
}

impl NoticeBoard {
    pub fn post(&mut self, notice: Notice) {
        let kind = std::mem::discriminant(&notice.event);
        self.notices
            .retain(|n| std::mem::discriminant(&n.event) != kind);
        self.notices.push(notice);
    }

    /// Notices visible at `now`; expired ones are dropped.
    pub fn visible(&mut self, now: Duration) -> &[Notice] {
        self.notices.retain(|n| n.is_visible(now));
        &self.notices
    }
}

/// One challenge session: current state, parameters and the notice board.
#[derive(Debug, Clone)]
pub struct LivenessStateMachine {
    params: LivenessParams,
    state: LivenessState,
    board: NoticeBoard,
}

impl LivenessStateMachine {
    pub fn new(params: LivenessParams, now: Duration) -> Self {
        Self {
            params,
            state: LivenessState::start(now),
            board: NoticeBoard::default(),
        }
    }

    pub fn state(&self) -> LivenessState {
        self.state
    }

    pub fn params(&self) -> &LivenessParams {
        &self.params
    }

    /// Feed one frame's signals. Returns the notices raised by this frame.
    pub fn advance(&mut self, signals: FrameSignals, now: Duration) -> Vec<Notice> {
        let transition = advance(self.state, signals, now, &self.params);
        if transition.state != self.state {
            tracing::debug!(from = ?self.state, to = ?transition.state, "liveness transition");
        }
        self.state = transition.state;
        for notice in &transition.notices {
            self.board.post(*notice);
        }
        transition.notices
    }

    /// End an active challenge immediately. No effect once terminal.
    pub fn abort(&mut self, reason: FailureReason) {
        if !self.state.is_terminal() {
            tracing::info!(?reason, "liveness challenge aborted");
            self.state = LivenessState::Failure { reason };
        }
    }

    /// Whether the caller may close the session at `now`. A success stays open
    /// for its display window.
    pub fn is_finished(&self, now: Duration) -> bool {
        match self.state {
            LivenessState::Success { display_until } => now >= display_until,
            LivenessState::Failure { .. } => true,
            _ => false,
        }
    }

    pub fn visible_notices(&mut self, now: Duration) -> &[Notice] {
        self.board.visible(now)
    }

    pub fn time_left(&self, now: Duration) -> Option<Duration> {
        self.state.time_left(now, &self.params)
    }
}
