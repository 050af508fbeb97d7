//! Knee adduction moment estimation pipeline
//!
//! Turns per-subject IMU and force-plate recordings into a leave-subjects-out
//! evaluation of a regression model that predicts the knee adduction moment
//! (KAM) from body-worn sensors.
//!
//! # Stages
//!
//! - **Calibration**: each sensor's static-trial gravity vector defines a
//!   rotation applied to its accelerometer and gyroscope channels
//! - **Synchronization**: FFT cross-correlation aligns two sample streams
//! - **Normalization**: padding-aware scaling fitted once per training fold
//! - **Scoring**: masked per-step R2, RMSE, MAE, relative RMSE and correlation
//! - **Cross-validation**: contiguous subject folds around a pluggable model
//!
//! # Quick Start
//!
//! ```
//! use kam_estimation::{
//!     CrossValidator, FieldGroups, FieldIndex, MeanProfileModel, PipelineConfig,
//!     SubjectStoreBuilder,
//! };
//! use ndarray::Array3;
//!
//! let config = PipelineConfig::default().with_fields(
//!     FieldGroups::new().with_group("input", ["acc"]),
//!     FieldGroups::new().with_group("output", ["kam"]),
//!     FieldGroups::new().with_group("output", ["phase"]),
//! );
//!
//! let mut builder = SubjectStoreBuilder::new(FieldIndex::new(["acc", "kam", "phase"])?);
//! for (i, id) in ["s1", "s2", "s3"].into_iter().enumerate() {
//!     let data = Array3::from_shape_fn((2, 4, 3), |(step, t, f)| match f {
//!         0 => (step + t + i + 1) as f64,
//!         1 => (t as f64).sin() + i as f64,
//!         _ => 1.0,
//!     });
//!     builder.insert(id, data)?;
//! }
//! let store = builder.build()?;
//!
//! let report = CrossValidator::new(&store, &config)
//!     .with_model(MeanProfileModel::new())
//!     .evaluate(&store.subjects(), 1)?;
//! assert_eq!(report.records.len(), 3);
//! assert_eq!(report.means.len(), 1);
//! # Ok::<(), kam_estimation::PipelineError>(())
//! ```
//!
//! # Lifecycle
//!
//! Calibration mutates subject data and therefore runs on a
//! [`SubjectStoreBuilder`]. [`SubjectStoreBuilder::build`] freezes it into a
//! [`SubjectStore`], which folds only ever read from.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

pub mod calibration;
pub mod config;
pub mod cross_validation;
pub mod error;
pub mod fields;
pub mod math;
pub mod model;
pub mod normalizer;
pub mod scorer;
pub mod store;
pub mod sync;

// Re-exports for convenient access
pub use calibration::{Calibrator, CsvStaticTrials, StaticTrial, StaticTrialSource};
pub use config::{imu_fields, PipelineConfig, ScalerKind, ScalerMode};
pub use cross_validation::{fold_plan, CrossValidationReport, CrossValidator, Fold, Split};
pub use error::{PipelineError, Result};
pub use fields::{step_lengths, FieldExtractor, FieldGroup, FieldGroups, FieldIndex, NamedTensors};
pub use model::{
    MeanProfileModel, Predictable, RidgeRegressionModel, Trainable, TrainingSet, ValidationSet,
};
pub use normalizer::{padding_mask, FittedNormalizer, Normalizer, ScaleOp, Scaler};
pub use scorer::{mean_scores, MeanScore, ScoreRecord, Scorer, StepMetrics};
pub use store::{SubjectStore, SubjectStoreBuilder};
pub use sync::{find_delay, synchronize, CropPlan, SampleStream};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
