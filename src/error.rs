//! Error types for the estimation pipeline.
//!
//! Structural problems (missing columns, inconsistent shapes, missing static
//! trials) are fatal and surface here. Per-step numeric degeneracies are not
//! errors: the scorer records them as NaN.

use thiserror::Error;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A requested field is absent from the field index.
    #[error("Missing field: {0}")]
    MissingField(String),

    /// A field name appears twice in a field index.
    #[error("Duplicate field: {0}")]
    DuplicateField(String),

    /// Static calibration trial absent or unreadable for a subject.
    #[error("Missing calibration data for subject {subject}: {reason}")]
    MissingCalibrationData { subject: String, reason: String },

    /// Subject arrays disagree on samples-per-step or field count.
    #[error("Shape mismatch for {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Cross-correlation input is degenerate.
    #[error("Synchronization failure: {0}")]
    SynchronizationFailure(String),

    /// The pluggable model does not provide a required operation.
    #[error("Unimplemented capability: {0}")]
    UnimplementedCapability(String),

    /// Calibration was requested on data that is already calibrated.
    #[error("Store already calibrated")]
    AlreadyCalibrated,

    /// Subject id not present in the store.
    #[error("Unknown subject: {0}")]
    UnknownSubject(String),

    /// A scaler was used before being fitted.
    #[error("Scaler for group {0} has not been fitted")]
    NotFitted(String),

    /// Input validation errors.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Create a missing field error.
    #[must_use]
    pub fn missing_field(name: impl Into<String>) -> Self {
        Self::MissingField(name.into())
    }

    /// Create a missing calibration data error.
    #[must_use]
    pub fn missing_calibration(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MissingCalibrationData {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Create a shape mismatch error.
    #[must_use]
    pub fn shape_mismatch(context: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Create a synchronization failure.
    #[must_use]
    pub fn synchronization(msg: impl Into<String>) -> Self {
        Self::SynchronizationFailure(msg.into())
    }

    /// Create an unimplemented capability error.
    #[must_use]
    pub fn unimplemented(capability: impl Into<String>) -> Self {
        Self::UnimplementedCapability(capability.into())
    }

    /// Create an invalid input error.
    #[must_use]
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether the error is structural and must abort the whole run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::SynchronizationFailure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::shape_mismatch("subject s01", &[230, 12], &[200, 12]);
        let msg = err.to_string();
        assert!(msg.contains("s01"));
        assert!(msg.contains("230"));
        assert!(msg.contains("200"));
    }

    #[test]
    fn test_error_constructors() {
        let _ = PipelineError::missing_field("AccelX_L_FOOT");
        let _ = PipelineError::missing_calibration("s01", "file not found");
        let _ = PipelineError::synchronization("constant signal");
        let _ = PipelineError::unimplemented("train");
        let _ = PipelineError::invalid_config("test_fold_size must be positive");
    }

    #[test]
    fn test_fatality() {
        assert!(PipelineError::missing_field("x").is_fatal());
        assert!(!PipelineError::synchronization("flat").is_fatal());
    }
}
