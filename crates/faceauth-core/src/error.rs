use thiserror::Error;

use crate::matcher::MatchError;
use crate::provider::{CaptureError, ProviderError};

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("no face found")]
    NoFaceFound,
    #[error("no face enrolled, complete enrollment first")]
    NotEnrolled,
    #[error("encoding error: {0}")]
    Encoding(#[from] MatchError),
    #[error("capture failure: {0}")]
    Capture(#[from] CaptureError),
    #[error("feature provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("encoding store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("aborted by user")]
    Aborted,
}

impl AuthError {
    pub fn store<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        Self::Store(Box::new(err))
    }

    /// Errors that point at a broken installation rather than a user retry:
    /// model inconsistencies and storage failures.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Encoding(_) | Self::Provider(_) | Self::Store(_))
    }
}
