//! Configuration schema for the estimation pipeline.
//!
//! [`PipelineConfig`] is the single source of column identity: sensor names,
//! IMU axis naming, the x/y/weight field groups and the preprocessing knobs.
//! It is loaded once (usually from JSON) and passed by reference to every
//! component that needs it.
//!
//! # Example
//!
//! ```
//! use kam_estimation::PipelineConfig;
//!
//! let config = PipelineConfig::imu_kam().with_test_fold_size(2);
//! assert!(config.validate().is_ok());
//! assert_eq!(config.accel_columns("R_SHANK")[0], "AccelX_R_SHANK");
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::fields::FieldGroups;

/// IMU segments in column order of the reference dataset.
pub const SENSOR_LIST: [&str; 8] = [
    "L_FOOT", "R_FOOT", "R_SHANK", "R_THIGH", "WAIST", "CHEST", "L_SHANK", "L_THIGH",
];

/// Accelerometer channel prefixes.
pub const ACC_AXES: [&str; 3] = ["AccelX", "AccelY", "AccelZ"];

/// Gyroscope channel prefixes.
pub const GYR_AXES: [&str; 3] = ["GyroX", "GyroY", "GyroZ"];

pub const SUBJECT_WEIGHT: &str = "body weight";
pub const SUBJECT_HEIGHT: &str = "body height";

/// Target column: right knee adduction moment.
pub const R_KAM_COLUMN: &str = "RIGHT_KNEE_ADDUCTION_MOMENT";

/// Gait-phase column used as the scoring mask for KAM.
pub const KAM_PHASE: &str = "kam_phase";

/// Build `<axis>_<sensor>` column names, grouped by sensor.
#[must_use]
pub fn imu_fields<S: AsRef<str>, A: AsRef<str>>(sensors: &[S], axes: &[A]) -> Vec<String> {
    sensors
        .iter()
        .flat_map(|sensor| {
            axes.iter()
                .map(move |axis| format!("{}_{}", axis.as_ref(), sensor.as_ref()))
        })
        .collect()
}

/// Scaler family fitted per field group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerKind {
    /// Map the fitted `[min, max]` onto `[0, 1]`.
    #[default]
    MinMax,
    /// Zero mean, unit variance.
    Standard,
    /// Divide by the largest absolute value.
    MaxAbs,
}

/// Granularity of a group's scaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerMode {
    /// One independent transform per column.
    #[default]
    ByEachColumn,
    /// A single transform pooled over every column of the group.
    ByAllColumns,
}

/// Immutable pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// IMU segment names; each has `Accel{X,Y,Z}_<name>` and `Gyro{X,Y,Z}_<name>` columns.
    pub sensors: Vec<String>,

    /// Model input groups.
    pub x_fields: FieldGroups,

    /// Model output groups.
    pub y_fields: FieldGroups,

    /// Per output group, one mask column per output field.
    /// A sample counts toward a metric when the mask column equals `mask_value`.
    pub weights: FieldGroups,

    pub scaler: ScalerKind,

    pub scaler_mode: ScalerMode,

    /// Seed for the global shuffle of training steps.
    pub shuffle_seed: u64,

    /// Subjects held out per cross-validation fold.
    pub test_fold_size: usize,

    /// Name of the static posture trial used for gravity calibration.
    pub static_trial: String,

    /// Leading samples of each stream considered when searching the delay.
    pub sync_window: usize,

    pub mask_value: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::imu_kam()
    }
}

impl PipelineConfig {
    /// Reference experiment: accelerometer and gyroscope of all eight
    /// segments plus body weight/height, predicting right KAM over the KAM
    /// phase of each step.
    #[must_use]
    pub fn imu_kam() -> Self {
        let sensors: Vec<String> = SENSOR_LIST.iter().map(|s| (*s).to_string()).collect();
        let x_fields = FieldGroups::new()
            .with_group("main_input_acc", imu_fields(&sensors, &ACC_AXES))
            .with_group("main_input_gyr", imu_fields(&sensors, &GYR_AXES))
            .with_group("aux_input", [SUBJECT_WEIGHT, SUBJECT_HEIGHT]);
        Self {
            sensors,
            x_fields,
            y_fields: FieldGroups::new().with_group("output", [R_KAM_COLUMN]),
            weights: FieldGroups::new().with_group("output", [KAM_PHASE]),
            scaler: ScalerKind::MinMax,
            scaler_mode: ScalerMode::ByEachColumn,
            shuffle_seed: 0,
            test_fold_size: 1,
            static_trial: "static_back".to_string(),
            sync_window: 1000,
            mask_value: 1.0,
        }
    }

    /// Parse a configuration from JSON; missing keys take preset values.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or if the result does not validate.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors, malformed JSON or validation failure.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Serialize as pretty JSON.
    ///
    /// # Errors
    ///
    /// Propagates serializer failures.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if self.test_fold_size == 0 {
            return Err(PipelineError::invalid_config(
                "test_fold_size must be at least 1",
            ));
        }
        if self.sync_window < 2 {
            return Err(PipelineError::invalid_config(
                "sync_window must be at least 2",
            ));
        }
        if self.x_fields.is_empty() || self.y_fields.is_empty() {
            return Err(PipelineError::invalid_config(
                "x_fields and y_fields must each contain a group",
            ));
        }
        for group in self.x_fields.iter().chain(self.y_fields.iter()) {
            if group.fields.is_empty() {
                return Err(PipelineError::invalid_config(format!(
                    "group {} has no fields",
                    group.name
                )));
            }
        }
        for weight in &self.weights {
            let Some(output) = self.y_fields.get(&weight.name) else {
                return Err(PipelineError::invalid_config(format!(
                    "weight group {} has no matching output group",
                    weight.name
                )));
            };
            if output.fields.len() != weight.fields.len() {
                return Err(PipelineError::invalid_config(format!(
                    "weight group {} has {} fields, output has {}",
                    weight.name,
                    weight.fields.len(),
                    output.fields.len()
                )));
            }
        }
        if self.static_trial.is_empty() {
            return Err(PipelineError::invalid_config("static_trial must be set"));
        }
        Ok(())
    }

    /// Accelerometer column names of one sensor, X/Y/Z order.
    #[must_use]
    pub fn accel_columns(&self, sensor: &str) -> [String; 3] {
        ACC_AXES.map(|axis| format!("{axis}_{sensor}"))
    }

    /// Gyroscope column names of one sensor, X/Y/Z order.
    #[must_use]
    pub fn gyro_columns(&self, sensor: &str) -> [String; 3] {
        GYR_AXES.map(|axis| format!("{axis}_{sensor}"))
    }

    /// Set the number of held-out subjects per fold.
    #[must_use]
    pub const fn with_test_fold_size(mut self, size: usize) -> Self {
        self.test_fold_size = size;
        self
    }

    /// Set the shuffle seed.
    #[must_use]
    pub const fn with_shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = seed;
        self
    }

    /// Set the scaler family and granularity.
    #[must_use]
    pub const fn with_scaler(mut self, kind: ScalerKind, mode: ScalerMode) -> Self {
        self.scaler = kind;
        self.scaler_mode = mode;
        self
    }

    /// Replace the sensor list.
    #[must_use]
    pub fn with_sensors<S: Into<String>>(mut self, sensors: impl IntoIterator<Item = S>) -> Self {
        self.sensors = sensors.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the input, output and weight groups.
    #[must_use]
    pub fn with_fields(mut self, x: FieldGroups, y: FieldGroups, weights: FieldGroups) -> Self {
        self.x_fields = x;
        self.y_fields = y;
        self.weights = weights;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sensors.len(), 8);
        assert_eq!(config.test_fold_size, 1);
        assert_eq!(config.shuffle_seed, 0);
        assert_eq!(config.x_fields.get("main_input_acc").unwrap().fields.len(), 24);
    }

    #[test]
    fn test_imu_fields_order() {
        let fields = imu_fields(&["A", "B"], &["GyroX", "GyroY"]);
        assert_eq!(fields, vec!["GyroX_A", "GyroY_A", "GyroX_B", "GyroY_B"]);
    }

    #[test]
    fn test_validation() {
        let mut config = PipelineConfig::default();
        config.test_fold_size = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.weights = FieldGroups::new().with_group("output", ["a", "b"]);
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.weights = FieldGroups::new().with_group("other", ["a"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let config = PipelineConfig::imu_kam()
            .with_test_fold_size(3)
            .with_scaler(ScalerKind::Standard, ScalerMode::ByAllColumns);
        let json = config.to_json_string().unwrap();
        let parsed = PipelineConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_json_partial_uses_preset() {
        let parsed = PipelineConfig::from_json_str(r#"{"test_fold_size": 4, "scaler": "max_abs"}"#).unwrap();
        assert_eq!(parsed.test_fold_size, 4);
        assert_eq!(parsed.scaler, ScalerKind::MaxAbs);
        assert_eq!(parsed.static_trial, "static_back");
    }

    #[test]
    fn test_sensor_columns() {
        let config = PipelineConfig::default();
        assert_eq!(
            config.gyro_columns("WAIST"),
            ["GyroX_WAIST", "GyroY_WAIST", "GyroZ_WAIST"]
        );
    }
}
