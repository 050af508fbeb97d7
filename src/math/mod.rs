//! Numeric helpers for the pipeline.
//!
//! - [`correlation`]: FFT cross-correlation and summary statistics
//! - [`rotation`]: gravity-aligning sensor rotations

pub mod correlation;
pub mod rotation;

pub use correlation::{cross_correlation, nan_mean, pearson};
pub use rotation::{gravity_rotation, roll_pitch, rotate};
