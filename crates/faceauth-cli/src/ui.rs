use std::io::Write;

use faceauth_core::session::{ChallengeView, SessionUi};
use faceauth_core::LivenessState;

use crate::replay::QuitSignal;

/// Line-oriented terminal front end.
///
/// Status messages go to stdout as they arrive. Challenge frames are summarised
/// at most once per second of stage time so the log stays readable; notices still
/// inside their display window ride along on that line.
pub struct TerminalUi<W: Write> {
    out: W,
    quit: Option<QuitSignal>,
    last_countdown: Option<u64>,
}

impl TerminalUi<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> TerminalUi<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            quit: None,
            last_countdown: None,
        }
    }

    pub fn with_quit_signal(mut self, quit: QuitSignal) -> Self {
        self.quit = Some(quit);
        self
    }

    fn line(&mut self, text: &str) {
        if let Err(e) = writeln!(self.out, "{text}") {
            tracing::warn!(error = %e, "failed to write status line");
        }
    }
}

impl<W: Write> SessionUi for TerminalUi<W> {
    fn status(&mut self, message: &str) {
        self.line(message);
    }

    fn show_challenge(&mut self, view: &ChallengeView<'_>) {
        tracing::trace!(
            state = ?view.state,
            ear = ?view.ear,
            notices = view.notices.len(),
            "challenge frame"
        );

        let Some(time_left) = view.time_left else {
            self.last_countdown = None;
            return;
        };
        let seconds = time_left.as_secs();
        if self.last_countdown == Some(seconds) {
            return;
        }
        self.last_countdown = Some(seconds);

        let detail = match view.state {
            LivenessState::AwaitingEyeClosure { .. } => match view.ear {
                Some(ear) => format!("EAR {ear:.2}"),
                None => "no face".to_string(),
            },
            _ => match view.hold_progress {
                Some(held) => format!("held {:.1}s", held.as_secs_f32()),
                None => "waiting for gesture".to_string(),
            },
        };
        let mut line = format!("  {seconds:>2}s left, {detail}");
        for notice in view.notices {
            line.push_str(&format!(" [{}]", notice.event.message()));
        }
        self.line(&line);
    }

    fn quit_requested(&mut self) -> bool {
        self.quit.as_ref().is_some_and(QuitSignal::is_raised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faceauth_core::liveness::{LivenessEvent, Notice};
    use faceauth_core::Frame;
    use image::RgbImage;
    use std::time::Duration;

    fn view<'a>(frame: &'a Frame, state: LivenessState, left_ms: u64, ear: Option<f32>) -> ChallengeView<'a> {
        ChallengeView {
            frame,
            state,
            time_left: Some(Duration::from_millis(left_ms)),
            ear,
            hold_progress: state.hold_progress(frame.captured_at),
            notices: &[],
        }
    }

    fn output(ui: TerminalUi<Vec<u8>>) -> String {
        String::from_utf8(ui.out).unwrap()
    }

    #[test]
    fn test_status_lines() {
        let mut ui = TerminalUi::new(Vec::new());
        ui.status("Face successfully saved.");
        ui.status("Match: same person");
        assert_eq!(output(ui), "Face successfully saved.\nMatch: same person\n");
    }

    #[test]
    fn test_countdown_once_per_second() {
        let frame = Frame::captured(RgbImage::new(1, 1), 0, Duration::from_millis(500));
        let state = LivenessState::start(Duration::ZERO);
        let mut ui = TerminalUi::new(Vec::new());

        ui.show_challenge(&view(&frame, state, 14_500, Some(0.31)));
        ui.show_challenge(&view(&frame, state, 14_200, Some(0.30)));
        ui.show_challenge(&view(&frame, state, 13_900, None));
        assert_eq!(output(ui), "  14s left, EAR 0.31\n  13s left, no face\n");
    }

    #[test]
    fn test_gesture_progress() {
        let frame = Frame::captured(RgbImage::new(1, 1), 0, Duration::from_millis(1500));
        let state = LivenessState::AwaitingGesture {
            stage_started: Duration::ZERO,
            held_since: Some(Duration::from_millis(500)),
        };
        let mut ui = TerminalUi::new(Vec::new());
        ui.show_challenge(&view(&frame, state, 13_500, None));
        assert_eq!(output(ui), "  13s left, held 1.0s\n");
    }

    #[test]
    fn test_visible_notices_on_countdown() {
        let frame = Frame::captured(RgbImage::new(1, 1), 0, Duration::from_millis(3000));
        let state = LivenessState::start(Duration::ZERO);
        let notices = [Notice {
            event: LivenessEvent::ClosureTooShort {
                closed_for: Duration::from_millis(1200),
            },
            visible_until: Duration::from_millis(4000),
        }];
        let mut ui = TerminalUi::new(Vec::new());
        ui.show_challenge(&ChallengeView {
            notices: &notices,
            ..view(&frame, state, 12_000, Some(0.31))
        });
        assert_eq!(
            output(ui),
            "  12s left, EAR 0.31 [Eyes closed for only 1.2s, close them for 2s]\n"
        );
    }

    #[test]
    fn test_quit_signal() {
        let quit = QuitSignal::default();
        let mut ui = TerminalUi::new(Vec::new()).with_quit_signal(quit.clone());
        assert!(!ui.quit_requested());
        quit.raise();
        assert!(ui.quit_requested());
        assert!(!TerminalUi::new(Vec::new()).quit_requested());
    }
}
