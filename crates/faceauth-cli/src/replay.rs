//! Scripted feature provider and camera for headless runs.
//!
//! A replay script is JSON describing what the models would report: the faces of
//! the enrollment still, then a timestamped camera frame sequence.
//!
//! ```json
//! {
//!   "frame_size": [320, 240],
//!   "still": [{ "region": {"left": 80, "top": 40, "width": 120, "height": 120},
//!               "encoding": [0.01, -0.12, 0.07] }],
//!   "frames": [
//!     { "t": 0.0, "faces": [{ "region": {...}, "ear": 0.31, "encoding": [...] }] },
//!     { "t": 0.5, "faces": [{ "region": {...}, "ear": 0.20 }] },
//!     { "t": 3.5, "hand": { "gesture": true } },
//!     { "t": 4.0, "dropped": true },
//!     { "t": 4.5, "quit": true }
//!   ]
//! }
//! ```
//!
//! A face gives either explicit `landmarks` or an `ear` shorthand, which expands to a
//! landmark set with that eye aspect ratio under the configured eye layout. A hand
//! gives explicit 21 `points` (mirrored-frame coordinates) or a `gesture` shorthand.
//! The camera cursor is shared by every opened camera, so verification and the
//! liveness challenge consume consecutive frames.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use faceauth_core::signals::{hand_indices, HAND_POINTS};
use faceauth_core::{
    Camera, CameraSource, CaptureError, DetectedFace, EyeLayout, FaceEncoding, FeatureProvider, Frame,
    FrameOrigin, HandLandmarks, Point, ProviderError, Region,
};
use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("failed to read replay script {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid replay script: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("frame {index}: timestamp must be finite, non-negative and non-decreasing")]
    BadTimestamp { index: usize },
    #[error("frame {index}: ear must be finite and non-negative")]
    BadEar { index: usize },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayScript {
    #[serde(default = "default_frame_size")]
    pub frame_size: [u32; 2],
    #[serde(default)]
    pub still: Vec<FaceSpec>,
    #[serde(default)]
    pub frames: Vec<FrameSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FaceSpec {
    pub region: Region,
    #[serde(default)]
    pub landmarks: Vec<Point>,
    pub ear: Option<f32>,
    pub encoding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandSpec {
    #[serde(default)]
    pub points: Vec<Point>,
    pub gesture: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrameSpec {
    /// Seconds since the stream started.
    pub t: f64,
    #[serde(default)]
    pub faces: Vec<FaceSpec>,
    pub hand: Option<HandSpec>,
    #[serde(default)]
    pub dropped: bool,
    #[serde(default)]
    pub quit: bool,
}

fn default_frame_size() -> [u32; 2] {
    [320, 240]
}

impl Default for ReplayScript {
    fn default() -> Self {
        Self {
            frame_size: default_frame_size(),
            still: Vec::new(),
            frames: Vec::new(),
        }
    }
}

impl ReplayScript {
    pub fn from_path(path: &Path) -> Result<Self, ReplayError> {
        let text = std::fs::read_to_string(path).map_err(|source| ReplayError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ReplayError> {
        let script: Self = serde_json::from_str(text)?;
        script.validate()?;
        Ok(script)
    }

    fn validate(&self) -> Result<(), ReplayError> {
        let mut last = Duration::ZERO;
        for (index, frame) in self.frames.iter().enumerate() {
            let at = timestamp(index, frame.t)?;
            if at < last {
                return Err(ReplayError::BadTimestamp { index });
            }
            last = at;
            let bad_ear = frame
                .faces
                .iter()
                .filter_map(|f| f.ear)
                .any(|ear| !ear.is_finite() || ear < 0.0);
            if bad_ear {
                return Err(ReplayError::BadEar { index });
            }
        }
        Ok(())
    }
}

fn timestamp(index: usize, t: f64) -> Result<Duration, ReplayError> {
    Duration::try_from_secs_f64(t).map_err(|_| ReplayError::BadTimestamp { index })
}

// ── Resolved script ───────────────────────────────────────────────────────────

#[derive(Debug)]
struct ScriptedFace {
    face: DetectedFace,
    encoding: Option<FaceEncoding>,
}

#[derive(Debug)]
struct ScriptedFrame {
    at: Duration,
    faces: Vec<ScriptedFace>,
    hand: Option<HandLandmarks>,
    dropped: bool,
    quit: bool,
}

#[derive(Debug)]
struct Resolved {
    frame_size: [u32; 2],
    still: Vec<ScriptedFace>,
    frames: Vec<ScriptedFrame>,
}

/// Shared flag raised when the replay reaches a frame marked `quit`.
#[derive(Debug, Clone, Default)]
pub struct QuitSignal(Rc<Cell<bool>>);

impl QuitSignal {
    pub fn raise(&self) {
        self.0.set(true);
    }

    pub fn is_raised(&self) -> bool {
        self.0.get()
    }
}

/// Build the provider and camera source for a script.
pub fn replay(
    script: ReplayScript,
    layout: &EyeLayout,
) -> Result<(ReplayProvider, ReplayCameras, QuitSignal), ReplayError> {
    let resolve_faces = |faces: Vec<FaceSpec>| -> Vec<ScriptedFace> {
        faces
            .into_iter()
            .map(|spec| ScriptedFace {
                face: DetectedFace {
                    region: spec.region,
                    landmarks: match spec.ear {
                        Some(ear) if spec.landmarks.is_empty() => synth_face(ear, layout),
                        _ => spec.landmarks,
                    },
                },
                encoding: spec.encoding.map(FaceEncoding::new),
            })
            .collect()
    };

    let frames = script
        .frames
        .into_iter()
        .enumerate()
        .map(|(index, frame)| -> Result<ScriptedFrame, ReplayError> {
            Ok(ScriptedFrame {
                at: timestamp(index, frame.t)?,
                faces: resolve_faces(frame.faces),
                hand: frame.hand.map(|hand| HandLandmarks {
                    points: match hand.gesture {
                        Some(gesture) if hand.points.is_empty() => synth_hand(gesture),
                        _ => hand.points,
                    },
                }),
                dropped: frame.dropped,
                quit: frame.quit,
            })
        })
        .collect::<Result<Vec<_>, ReplayError>>()?;

    let resolved = Resolved {
        frame_size: script.frame_size,
        still: resolve_faces(script.still),
        frames,
    };
    tracing::debug!(frames = resolved.frames.len(), still_faces = resolved.still.len(), "replay script loaded");

    let shared = Rc::new(resolved);
    let quit = QuitSignal::default();
    Ok((
        ReplayProvider {
            script: shared.clone(),
        },
        ReplayCameras {
            script: shared,
            cursor: Rc::new(Cell::new(0)),
            quit: quit.clone(),
        },
        quit,
    ))
}

// ── Provider ──────────────────────────────────────────────────────────────────

pub struct ReplayProvider {
    script: Rc<Resolved>,
}

impl ReplayProvider {
    fn faces(&self, frame: &Frame) -> &[ScriptedFace] {
        match frame.origin {
            FrameOrigin::Still => &self.script.still,
            FrameOrigin::Camera { sequence } => self
                .script
                .frames
                .get(sequence as usize)
                .map(|f| f.faces.as_slice())
                .unwrap_or_default(),
        }
    }
}

impl FeatureProvider for ReplayProvider {
    fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, ProviderError> {
        Ok(self.faces(frame).iter().map(|f| f.face.clone()).collect())
    }

    fn encode(&mut self, frame: &Frame, region: &Region) -> Result<FaceEncoding, ProviderError> {
        self.faces(frame)
            .iter()
            .find(|f| f.face.region == *region)
            .and_then(|f| f.encoding.clone())
            .ok_or_else(|| ProviderError::Encoding(format!("no encoding scripted for region {region:?}")))
    }

    fn detect_hand(&mut self, frame: &Frame) -> Result<Option<HandLandmarks>, ProviderError> {
        Ok(match frame.origin {
            FrameOrigin::Camera { sequence } => self
                .script
                .frames
                .get(sequence as usize)
                .and_then(|f| f.hand.clone()),
            FrameOrigin::Still => None,
        })
    }
}

// ── Camera ────────────────────────────────────────────────────────────────────

pub struct ReplayCameras {
    script: Rc<Resolved>,
    cursor: Rc<Cell<usize>>,
    quit: QuitSignal,
}

pub struct ReplayCamera {
    script: Rc<Resolved>,
    cursor: Rc<Cell<usize>>,
    quit: QuitSignal,
}

impl CameraSource for ReplayCameras {
    type Camera = ReplayCamera;

    fn open(&mut self) -> Result<ReplayCamera, CaptureError> {
        if self.script.frames.is_empty() {
            return Err(CaptureError::Open("replay script has no camera frames".into()));
        }
        tracing::debug!(position = self.cursor.get(), "replay camera opened");
        Ok(ReplayCamera {
            script: self.script.clone(),
            cursor: self.cursor.clone(),
            quit: self.quit.clone(),
        })
    }
}

impl Camera for ReplayCamera {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let index = self.cursor.get();
        let Some(frame) = self.script.frames.get(index) else {
            return Err(CaptureError::EndOfStream);
        };
        self.cursor.set(index + 1);

        if frame.quit {
            self.quit.raise();
        }
        if frame.dropped {
            return Err(CaptureError::Read(format!("frame {index} dropped")));
        }

        let [width, height] = self.script.frame_size;
        Ok(Frame::captured(RgbImage::new(width, height), index as u64, frame.at))
    }
}

// ── Landmark synthesis ────────────────────────────────────────────────────────

/// A face landmark list whose eyes both have aspect ratio `ear` under `layout`.
fn synth_face(ear: f32, layout: &EyeLayout) -> Vec<Point> {
    let len = layout.left.end.max(layout.right.end);
    let mut points = vec![Point::default(); len];
    for (range, cx) in [(&layout.right, 120.0), (&layout.left, 180.0)] {
        // corners 20 apart, both lids 20 * ear apart
        let half = 10.0 * ear;
        let eye = [
            Point::new(cx - 10.0, 100.0),
            Point::new(cx - 4.0, 100.0 - half),
            Point::new(cx + 4.0, 100.0 - half),
            Point::new(cx + 10.0, 100.0),
            Point::new(cx + 4.0, 100.0 + half),
            Point::new(cx - 4.0, 100.0 + half),
        ];
        for (slot, point) in points[range.clone()].iter_mut().zip(eye) {
            *slot = point;
        }
    }
    points
}

/// A 21-point hand: index and middle up when `gesture`, otherwise an open palm.
fn synth_hand(gesture: bool) -> Vec<Point> {
    let mut points = vec![Point::new(160.0, 220.0); HAND_POINTS];
    points[hand_indices::THUMB_IP] = Point::new(120.0, 190.0);
    points[hand_indices::THUMB_TIP] = Point::new(130.0, 180.0);
    let tips = [
        hand_indices::INDEX_TIP,
        hand_indices::MIDDLE_TIP,
        hand_indices::RING_TIP,
        hand_indices::LITTLE_TIP,
    ];
    for (finger, tip) in tips.into_iter().enumerate() {
        let up = !gesture || finger < 2;
        let x = 140.0 + finger as f32 * 15.0;
        points[tip - 2] = Point::new(x, 160.0);
        points[tip] = Point::new(x, if up { 110.0 } else { 175.0 });
    }
    points
}
