use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;

use faceauth_core::signals::EYE_POINTS;
use faceauth_core::{EyeLayout, LivenessParams, SessionParams};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("eye range {0:?} must span exactly 6 landmark indices")]
    InvalidEyeRange(Range<usize>),
}

/// Runtime configuration.
///
/// Precedence, lowest first: built-in defaults, the TOML file named by
/// `--config` or `FACEAUTH_CONFIG`, then `FACEAUTH_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory holding the encrypted encoding, the preview image and `.key`.
    pub state_dir: PathBuf,
    /// Euclidean distance below which a live face matches the enrolled one.
    pub match_threshold: f32,
    /// EAR below which the eyes count as closed.
    pub ear_threshold: f32,
    pub closure_required_ms: u64,
    pub short_closure_min_ms: u64,
    pub gesture_hold_ms: u64,
    pub stage_timeout_secs: u64,
    pub notice_window_ms: u64,
    /// Frames scanned for a face before verification gives up.
    pub verify_max_frames: usize,
    /// Consecutive camera read failures tolerated.
    pub capture_retries: u32,
    pub eye_layout: EyeLayout,
}

impl Default for Config {
    fn default() -> Self {
        let params = SessionParams::default();
        Self {
            state_dir: default_state_dir(),
            match_threshold: params.match_threshold,
            ear_threshold: params.liveness.ear_threshold,
            closure_required_ms: 2000,
            short_closure_min_ms: 300,
            gesture_hold_ms: 2000,
            stage_timeout_secs: 15,
            notice_window_ms: 2000,
            verify_max_frames: params.verify_max_frames,
            capture_retries: params.capture_retries,
            eye_layout: params.eye_layout,
        }
    }
}

/// Mirror of [`Config`] with every field optional, as read from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    state_dir: Option<PathBuf>,
    match_threshold: Option<f32>,
    ear_threshold: Option<f32>,
    closure_required_ms: Option<u64>,
    short_closure_min_ms: Option<u64>,
    gesture_hold_ms: Option<u64>,
    stage_timeout_secs: Option<u64>,
    notice_window_ms: Option<u64>,
    verify_max_frames: Option<usize>,
    capture_retries: Option<u32>,
    eye_layout: Option<EyeLayout>,
}

impl Config {
    /// Load configuration from `FACEAUTH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Defaults, then the optional TOML file, then the environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = config_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("FACEAUTH_CONFIG").ok().map(PathBuf::from));

        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                tracing::debug!(path = %path.display(), "applying config file");
                Self::default()
                    .with_toml(&text)?
                    .with_env(|key| std::env::var(key).ok())
            }
            None => Self::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    fn with_toml(mut self, text: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(text)?;

        if let Some(v) = file.state_dir {
            self.state_dir = v;
        }
        if let Some(v) = file.match_threshold {
            self.match_threshold = v;
        }
        if let Some(v) = file.ear_threshold {
            self.ear_threshold = v;
        }
        if let Some(v) = file.closure_required_ms {
            self.closure_required_ms = v;
        }
        if let Some(v) = file.short_closure_min_ms {
            self.short_closure_min_ms = v;
        }
        if let Some(v) = file.gesture_hold_ms {
            self.gesture_hold_ms = v;
        }
        if let Some(v) = file.stage_timeout_secs {
            self.stage_timeout_secs = v;
        }
        if let Some(v) = file.notice_window_ms {
            self.notice_window_ms = v;
        }
        if let Some(v) = file.verify_max_frames {
            self.verify_max_frames = v;
        }
        if let Some(v) = file.capture_retries {
            self.capture_retries = v;
        }
        if let Some(v) = file.eye_layout {
            self.eye_layout = v;
        }
        Ok(self)
    }

    /// Overlay environment values; unset or unparsable variables keep the current value.
    fn with_env(self, var: impl Fn(&str) -> Option<String>) -> Self {
        let f32_or = |key: &str, current: f32| var(key).and_then(|v| v.parse().ok()).unwrap_or(current);
        let u64_or = |key: &str, current: u64| var(key).and_then(|v| v.parse().ok()).unwrap_or(current);
        let range_or = |key: &str, current: Range<usize>| var(key).and_then(|v| parse_range(&v)).unwrap_or(current);

        Self {
            state_dir: var("FACEAUTH_STATE_DIR").map(PathBuf::from).unwrap_or(self.state_dir),
            match_threshold: f32_or("FACEAUTH_MATCH_THRESHOLD", self.match_threshold),
            ear_threshold: f32_or("FACEAUTH_EAR_THRESHOLD", self.ear_threshold),
            closure_required_ms: u64_or("FACEAUTH_CLOSURE_REQUIRED_MS", self.closure_required_ms),
            short_closure_min_ms: u64_or("FACEAUTH_SHORT_CLOSURE_MIN_MS", self.short_closure_min_ms),
            gesture_hold_ms: u64_or("FACEAUTH_GESTURE_HOLD_MS", self.gesture_hold_ms),
            stage_timeout_secs: u64_or("FACEAUTH_STAGE_TIMEOUT_SECS", self.stage_timeout_secs),
            notice_window_ms: u64_or("FACEAUTH_NOTICE_WINDOW_MS", self.notice_window_ms),
            verify_max_frames: var("FACEAUTH_VERIFY_MAX_FRAMES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(self.verify_max_frames),
            capture_retries: var("FACEAUTH_CAPTURE_RETRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(self.capture_retries),
            eye_layout: EyeLayout {
                left: range_or("FACEAUTH_LEFT_EYE", self.eye_layout.left),
                right: range_or("FACEAUTH_RIGHT_EYE", self.eye_layout.right),
            },
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for range in [&self.eye_layout.left, &self.eye_layout.right] {
            if range.len() != EYE_POINTS {
                return Err(ConfigError::InvalidEyeRange(range.clone()));
            }
        }
        Ok(())
    }

    pub fn session_params(&self) -> SessionParams {
        SessionParams {
            liveness: LivenessParams {
                ear_threshold: self.ear_threshold,
                closure_required: Duration::from_millis(self.closure_required_ms),
                short_closure_min: Duration::from_millis(self.short_closure_min_ms),
                gesture_hold_required: Duration::from_millis(self.gesture_hold_ms),
                stage_timeout: Duration::from_secs(self.stage_timeout_secs),
                notice_window: Duration::from_millis(self.notice_window_ms),
            },
            match_threshold: self.match_threshold,
            eye_layout: self.eye_layout.clone(),
            verify_max_frames: self.verify_max_frames,
            capture_retries: self.capture_retries,
        }
    }
}

fn default_state_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("faceauth")
}

/// Parse `start..end`.
fn parse_range(text: &str) -> Option<Range<usize>> {
    let (start, end) = text.trim().split_once("..")?;
    Some(start.trim().parse().ok()?..end.trim().parse().ok()?)
}
