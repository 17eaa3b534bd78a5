//! Error taxonomy for the analysis engine.
//!
//! None of these are fatal to the process. Each is recoverable at the
//! sub-test or session level, and none carries a partial score.

use crate::collector::SourceError;

/// Reasons a sub-test fails to produce a score.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// Too few samples for statistical reduction.
    InsufficientSamples {
        what: &'static str,
        required: usize,
        actual: usize,
    },
    /// Capture refused because a precondition was violated.
    ConstraintViolation(String),
    /// No usable input arrived before the deadline.
    Timeout(&'static str),
    /// The sub-test was cancelled; accumulated samples were discarded.
    Aborted,
    /// A frame could not be interpreted.
    InvalidFrame(String),
    /// An operation was requested in the wrong lifecycle state.
    InvalidState(&'static str),
    /// Device or permission failure.
    Source(SourceError),
}

impl AnalysisError {
    /// User-facing retry prompt for this failure.
    pub fn prompt(&self) -> String {
        match self {
            AnalysisError::InsufficientSamples { .. } => {
                "Recording was too short. Please try again.".to_string()
            }
            AnalysisError::ConstraintViolation(reason) => reason.clone(),
            AnalysisError::Timeout(_) => "No input detected. Please try again.".to_string(),
            AnalysisError::Aborted => "Test cancelled.".to_string(),
            AnalysisError::InvalidFrame(_) | AnalysisError::InvalidState(_) => {
                "Something went wrong. Please try again.".to_string()
            }
            AnalysisError::Source(e) => format!("{e}. Please check permissions and retry."),
        }
    }
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisError::InsufficientSamples {
                what,
                required,
                actual,
            } => write!(f, "Insufficient {what}: need {required}, got {actual}"),
            AnalysisError::ConstraintViolation(reason) => {
                write!(f, "Constraint violation: {reason}")
            }
            AnalysisError::Timeout(what) => write!(f, "Timed out waiting for {what}"),
            AnalysisError::Aborted => write!(f, "Sub-test aborted"),
            AnalysisError::InvalidFrame(msg) => write!(f, "Invalid frame: {msg}"),
            AnalysisError::InvalidState(msg) => write!(f, "Invalid state: {msg}"),
            AnalysisError::Source(e) => write!(f, "Source error: {e}"),
        }
    }
}

impl std::error::Error for AnalysisError {}

impl From<SourceError> for AnalysisError {
    fn from(e: SourceError) -> Self {
        AnalysisError::Source(e)
    }
}
