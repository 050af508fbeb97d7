//! Gravity-based sensor frame calibration.
//!
//! Each subject has a short static posture trial. The mean accelerometer
//! reading of a sensor during that trial is the gravity direction in the
//! sensor's mounting frame; the rotation that maps it onto +Z is applied to
//! every accelerometer and gyroscope triplet of that sensor, for every step
//! of the subject.
//!
//! Calibration runs on a [`SubjectStoreBuilder`] only, so it is complete
//! before any immutable store (and therefore any fold) exists.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use nalgebra::Rotation3;
use ndarray::{Array2, Array3, Axis};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::fields::FieldIndex;
use crate::math::rotation::{gravity_rotation, rotate, roll_pitch};
use crate::store::SubjectStoreBuilder;

/// A static posture recording: `[sample, field]` values with named columns.
#[derive(Debug, Clone)]
pub struct StaticTrial {
    fields: FieldIndex,
    data: Array2<f64>,
}

impl StaticTrial {
    /// # Errors
    ///
    /// Returns [`PipelineError::ShapeMismatch`] if the column count of `data`
    /// differs from `fields`.
    pub fn new(fields: FieldIndex, data: Array2<f64>) -> Result<Self> {
        if data.ncols() != fields.len() {
            return Err(PipelineError::shape_mismatch(
                "static trial columns",
                &[fields.len()],
                &[data.ncols()],
            ));
        }
        Ok(Self { fields, data })
    }

    /// Parse a CSV whose first column is a row index.
    ///
    /// Cells that do not parse as numbers are read as NaN; they only matter
    /// if they fall in a column used for calibration.
    ///
    /// # Errors
    ///
    /// Fails on CSV syntax errors or duplicate headers.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .skip(1)
            .map(str::to_string)
            .collect();
        let fields = FieldIndex::new(headers)?;

        let mut values = Vec::new();
        let mut rows = 0;
        for record in reader.records() {
            let record = record?;
            values.extend(
                record
                    .iter()
                    .skip(1)
                    .chain(std::iter::repeat(""))
                    .take(fields.len())
                    .map(|cell| cell.trim().parse::<f64>().unwrap_or(f64::NAN)),
            );
            rows += 1;
        }
        let data = Array2::from_shape_vec((rows, fields.len()), values).map_err(|e| {
            PipelineError::invalid_input(format!("static trial layout: {e}"))
        })?;
        Self::new(fields, data)
    }

    /// Read a static trial CSV file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or parsed.
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    #[must_use]
    pub fn field_index(&self) -> &FieldIndex {
        &self.fields
    }

    #[must_use]
    pub fn samples(&self) -> usize {
        self.data.nrows()
    }

    /// Mean of three columns over every sample.
    ///
    /// # Errors
    ///
    /// Fails if a column is missing, the trial is empty, or the mean is not finite.
    pub fn mean_of(&self, columns: &[String; 3]) -> Result<[f64; 3]> {
        if self.data.nrows() == 0 {
            return Err(PipelineError::invalid_input("static trial has no samples"));
        }
        let mut out = [0.0; 3];
        for (slot, column) in out.iter_mut().zip(columns.iter()) {
            let loc = self.fields.position(column)?;
            let mean = self.data.column(loc).mean().unwrap_or(f64::NAN);
            if !mean.is_finite() {
                return Err(PipelineError::invalid_input(format!(
                    "column {column} has non-numeric samples"
                )));
            }
            *slot = mean;
        }
        Ok(out)
    }
}

/// Where static calibration trials come from.
pub trait StaticTrialSource {
    /// Load `trial` of `subject`.
    ///
    /// # Errors
    ///
    /// Any failure makes calibration of that subject impossible.
    fn static_trial(&self, subject: &str, trial: &str) -> Result<StaticTrial>;
}

/// Static trials laid out as `<root>/<subject>/combined/<trial>.csv`.
#[derive(Debug, Clone)]
pub struct CsvStaticTrials {
    root: PathBuf,
}

impl CsvStaticTrials {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn path_for(&self, subject: &str, trial: &str) -> PathBuf {
        self.root
            .join(subject)
            .join("combined")
            .join(format!("{trial}.csv"))
    }
}

impl StaticTrialSource for CsvStaticTrials {
    fn static_trial(&self, subject: &str, trial: &str) -> Result<StaticTrial> {
        StaticTrial::from_csv_path(self.path_for(subject, trial))
    }
}

/// In-memory trials keyed by subject id; the trial name is ignored.
impl StaticTrialSource for BTreeMap<String, StaticTrial> {
    fn static_trial(&self, subject: &str, _trial: &str) -> Result<StaticTrial> {
        self.get(subject)
            .cloned()
            .ok_or_else(|| PipelineError::invalid_input("no static trial recorded"))
    }
}

/// Applies per-subject, per-sensor gravity rotations to a store being built.
#[derive(Debug, Clone, Copy)]
pub struct Calibrator<'a> {
    config: &'a PipelineConfig,
}

impl<'a> Calibrator<'a> {
    #[must_use]
    pub const fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Rotation of every configured sensor, derived from one static trial.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingCalibrationData`] if a sensor's
    /// accelerometer columns are absent or unusable.
    pub fn sensor_rotations(
        &self,
        subject: &str,
        trial: &StaticTrial,
    ) -> Result<BTreeMap<String, Rotation3<f64>>> {
        let mut rotations = BTreeMap::new();
        for sensor in &self.config.sensors {
            let gravity = trial
                .mean_of(&self.config.accel_columns(sensor))
                .map_err(|e| PipelineError::missing_calibration(subject, e.to_string()))?;
            let (roll, pitch) = roll_pitch(gravity);
            debug!(
                subject,
                sensor = %sensor,
                roll_deg = roll.to_degrees(),
                pitch_deg = pitch.to_degrees(),
                "Static orientation"
            );
            rotations.insert(sensor.clone(), gravity_rotation(gravity));
        }
        Ok(rotations)
    }

    /// Rotate every subject of `builder` in place.
    ///
    /// All rotations are derived before any array is touched, so a missing
    /// static trial leaves the builder unchanged. A builder is calibrated at
    /// most once.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::AlreadyCalibrated`] on a second call.
    /// Returns [`PipelineError::MissingCalibrationData`] when a subject's
    /// static trial cannot be loaded or lacks accelerometer columns, and
    /// [`PipelineError::MissingField`] when the store lacks a sensor column.
    pub fn calibrate<S>(&self, builder: &mut SubjectStoreBuilder, source: &S) -> Result<()>
    where
        S: StaticTrialSource + ?Sized,
    {
        if builder.is_calibrated() {
            return Err(PipelineError::AlreadyCalibrated);
        }
        let subjects: Vec<String> = builder.subjects().map(str::to_string).collect();
        let mut plan = Vec::with_capacity(subjects.len());
        for subject in subjects {
            let trial = source
                .static_trial(&subject, &self.config.static_trial)
                .map_err(|e| PipelineError::missing_calibration(&subject, e.to_string()))?;
            let rotations = self.sensor_rotations(&subject, &trial)?;
            plan.push((subject, rotations));
        }

        let mut channels = Vec::with_capacity(self.config.sensors.len() * 2);
        for sensor in &self.config.sensors {
            let acc = builder.field_index().positions(&self.config.accel_columns(sensor))?;
            let gyr = builder.field_index().positions(&self.config.gyro_columns(sensor))?;
            channels.push((sensor.clone(), [acc[0], acc[1], acc[2]]));
            channels.push((sensor.clone(), [gyr[0], gyr[1], gyr[2]]));
        }

        for (subject, rotations) in plan {
            info!("Rotating {subject}'s data");
            let Some(data) = builder.record_mut(&subject) else {
                continue;
            };
            for (sensor, cols) in &channels {
                if let Some(rotation) = rotations.get(sensor) {
                    rotate_channel(data, *cols, rotation);
                }
            }
        }
        builder.mark_calibrated();
        Ok(())
    }
}

/// Left-multiply the triplet at `cols` of every `(step, sample)` by `rotation`.
pub fn rotate_channel(data: &mut Array3<f64>, cols: [usize; 3], rotation: &Rotation3<f64>) {
    for mut lane in data.lanes_mut(Axis(2)) {
        let rotated = rotate(rotation, [lane[cols[0]], lane[cols[1]], lane[cols[2]]]);
        lane[cols[0]] = rotated[0];
        lane[cols[1]] = rotated[1];
        lane[cols[2]] = rotated[2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use approx::assert_relative_eq;
    use ndarray::Array3;
    use std::io::Cursor;

    fn config() -> PipelineConfig {
        PipelineConfig::default().with_sensors(["SHANK"])
    }

    fn columns() -> Vec<String> {
        let c = config();
        let mut cols: Vec<String> = c.accel_columns("SHANK").to_vec();
        cols.extend(c.gyro_columns("SHANK"));
        cols
    }

    fn static_trial(gravity: [f64; 3]) -> StaticTrial {
        let fields = FieldIndex::new(columns()).unwrap();
        let data = Array2::from_shape_fn((20, 6), |(i, f)| {
            let noise = if i % 2 == 0 { 0.01 } else { -0.01 };
            if f < 3 { gravity[f] + noise } else { noise }
        });
        StaticTrial::new(fields, data).unwrap()
    }

    #[test]
    fn test_csv_parsing_skips_index_column() {
        let csv = ",AccelX_SHANK,AccelY_SHANK,AccelZ_SHANK\n0,1.0,2.0,3.0\n1,3.0,2.0,1.0\n";
        let trial = StaticTrial::from_csv_reader(Cursor::new(csv)).unwrap();
        assert_eq!(trial.samples(), 2);
        let mean = trial.mean_of(&config().accel_columns("SHANK")).unwrap();
        assert_eq!(mean, [2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_non_numeric_calibration_column_fails() {
        let csv = ",AccelX_SHANK,AccelY_SHANK,AccelZ_SHANK\n0,1.0,abc,3.0\n";
        let trial = StaticTrial::from_csv_reader(Cursor::new(csv)).unwrap();
        assert!(trial.mean_of(&config().accel_columns("SHANK")).is_err());
    }

    #[test]
    fn test_static_trial_is_leveled() {
        let cfg = config();
        let trial = static_trial([2.0, -3.0, 9.0]);
        let rotations = Calibrator::new(&cfg).sensor_rotations("s1", &trial).unwrap();
        let mean = trial.mean_of(&cfg.accel_columns("SHANK")).unwrap();
        let rotated = rotate(&rotations["SHANK"], mean);
        let (roll, pitch) = roll_pitch(rotated);
        assert_relative_eq!(roll, 0.0, epsilon = 1e-9);
        assert_relative_eq!(pitch, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_calibrate_rotates_acc_and_gyro() {
        let cfg = config();
        let gravity = [0.0, 9.81, 0.0];
        let mut builder = SubjectStoreBuilder::new(FieldIndex::new(columns()).unwrap());
        let mut data = Array3::<f64>::zeros((2, 4, 6));
        for step in 0..2 {
            for t in 0..3 {
                data[[step, t, 1]] = 9.81;
                data[[step, t, 4]] = 1.0;
            }
        }
        builder.insert("s1", data).unwrap();
        let trials = BTreeMap::from([("s1".to_string(), static_trial(gravity))]);

        Calibrator::new(&cfg).calibrate(&mut builder, &trials).unwrap();
        let store = builder.build().unwrap();
        let out = store.get("s1").unwrap();

        assert_relative_eq!(out[[0, 0, 1]], 0.0, epsilon = 1e-9);
        assert_relative_eq!(out[[0, 0, 2]], 9.81, epsilon = 1e-9);
        assert_relative_eq!(out[[1, 2, 5]], 1.0, epsilon = 1e-9);
        // padding stays zero
        assert_eq!(out[[1, 3, 2]], 0.0);
    }

    #[test]
    fn test_second_calibration_rejected() {
        let cfg = config();
        let mut builder = SubjectStoreBuilder::new(FieldIndex::new(columns()).unwrap());
        let mut data = Array3::<f64>::zeros((1, 2, 6));
        data[[0, 0, 1]] = 9.81;
        builder.insert("s1", data).unwrap();
        let trials = BTreeMap::from([("s1".to_string(), static_trial([0.0, 9.81, 0.0]))]);

        let calibrator = Calibrator::new(&cfg);
        calibrator.calibrate(&mut builder, &trials).unwrap();
        let err = calibrator.calibrate(&mut builder, &trials).unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyCalibrated));

        let out = builder.build().unwrap();
        let out = out.get("s1").unwrap();
        assert_relative_eq!(out[[0, 0, 1]], 0.0, epsilon = 1e-9);
        assert_relative_eq!(out[[0, 0, 2]], 9.81, epsilon = 1e-9);
    }

    #[test]
    fn test_missing_static_trial_is_fatal_and_atomic() {
        let cfg = config();
        let mut builder = SubjectStoreBuilder::new(FieldIndex::new(columns()).unwrap());
        builder.insert("s1", Array3::from_elem((1, 2, 6), 1.0)).unwrap();
        builder.insert("s2", Array3::from_elem((1, 2, 6), 1.0)).unwrap();
        let trials = BTreeMap::from([("s1".to_string(), static_trial([1.0, 2.0, 9.0]))]);

        let err = Calibrator::new(&cfg).calibrate(&mut builder, &trials).unwrap_err();
        assert!(matches!(err, PipelineError::MissingCalibrationData { ref subject, .. } if subject == "s2"));
        assert_eq!(builder.record_mut("s1").unwrap()[[0, 0, 0]], 1.0);
    }

    #[test]
    fn test_csv_source_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = CsvStaticTrials::new(dir.path());
        let cfg = config();
        let mut builder = SubjectStoreBuilder::new(FieldIndex::new(columns()).unwrap());
        builder.insert("s1", Array3::zeros((1, 2, 6))).unwrap();
        let err = Calibrator::new(&cfg).calibrate(&mut builder, &source).unwrap_err();
        assert!(matches!(err, PipelineError::MissingCalibrationData { .. }));
    }
}
