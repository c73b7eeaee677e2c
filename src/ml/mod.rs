pub mod classifier;
pub mod ollama;
pub mod adapter;

pub use classifier::*;
pub use ollama::{OllamaClassifier, OllamaLoader};
pub use adapter::*;

use std::time::Duration;

use thiserror::Error;

/// Why an ML attempt did not produce a usable result.
///
/// Every variant is recoverable: callers fall back to the rule-based engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MlError {
    #[error("ML classifier is not initialized")]
    NotInitialized,

    #[error("ML classification timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    #[error("ML classifier returned no predictions")]
    EmptyResult,

    #[error("ML confidence {score:.2} below threshold {threshold:.2}")]
    BelowThreshold { score: f64, threshold: f64 },

    #[error("Malformed ML result: {0}")]
    MalformedResult(String),

    #[error("ML classifier failed: {0}")]
    ClassifierFailed(String),

    #[error("ML model could not be loaded: {0}")]
    LoadFailed(String),

    #[error("ML classifier is unavailable for this process")]
    Unavailable,

    #[error("ML preload already in progress")]
    PreloadInProgress,
}

impl MlError {
    /// Stable identifier for audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotInitialized => "not_initialized",
            Self::TimedOut(_) => "timed_out",
            Self::EmptyResult => "empty_result",
            Self::BelowThreshold { .. } => "below_threshold",
            Self::MalformedResult(_) => "malformed_result",
            Self::ClassifierFailed(_) => "classifier_failed",
            Self::LoadFailed(_) => "load_failed",
            Self::Unavailable => "unavailable",
            Self::PreloadInProgress => "preload_in_progress",
        }
    }
}

impl From<ClassifierError> for MlError {
    fn from(err: ClassifierError) -> Self {
        match err {
            ClassifierError::Malformed(detail) => Self::MalformedResult(detail),
            other => Self::ClassifierFailed(other.to_string()),
        }
    }
}
