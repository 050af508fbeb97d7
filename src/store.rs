//! Per-subject data store with a two-phase lifecycle.
//!
//! [`SubjectStoreBuilder`] is the uniquely owned, mutable phase: subjects
//! are inserted (with shape checks) and calibrated in place. [`build`]
//! consumes it into an immutable [`SubjectStore`], the only form the
//! cross-validator accepts. Folds never alias the store: [`concatenate`]
//! always returns a fresh array.
//!
//! [`build`]: SubjectStoreBuilder::build
//! [`concatenate`]: SubjectStore::concatenate

use std::collections::BTreeMap;

use ndarray::{concatenate, Array3, ArrayView3, Axis};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::fields::FieldIndex;

/// Mutable store used while loading and calibrating.
#[derive(Debug, Clone)]
pub struct SubjectStoreBuilder {
    fields: FieldIndex,
    samples_per_step: Option<usize>,
    records: BTreeMap<String, Array3<f64>>,
    calibrated: bool,
}

impl SubjectStoreBuilder {
    #[must_use]
    pub fn new(fields: FieldIndex) -> Self {
        Self {
            fields,
            samples_per_step: None,
            records: BTreeMap::new(),
            calibrated: false,
        }
    }

    /// Add one subject's `[step, sample, field]` array.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShapeMismatch`] if the field count differs
    /// from the index or the samples-per-step differs from earlier subjects,
    /// and [`PipelineError::InvalidInput`] for a duplicate subject id.
    /// Returns [`PipelineError::AlreadyCalibrated`] once the builder has been
    /// calibrated, since a late subject would stay in its mounting frame.
    pub fn insert(&mut self, subject: impl Into<String>, data: Array3<f64>) -> Result<()> {
        if self.calibrated {
            return Err(PipelineError::AlreadyCalibrated);
        }
        let subject = subject.into();
        let (steps, samples, num_fields) = data.dim();
        if num_fields != self.fields.len() {
            return Err(PipelineError::shape_mismatch(
                format!("field count of subject {subject}"),
                &[self.fields.len()],
                &[num_fields],
            ));
        }
        if let Some(expected) = self.samples_per_step {
            if samples != expected {
                return Err(PipelineError::shape_mismatch(
                    format!("samples per step of subject {subject}"),
                    &[expected],
                    &[samples],
                ));
            }
        }
        if self.records.contains_key(&subject) {
            return Err(PipelineError::invalid_input(format!(
                "subject {subject} inserted twice"
            )));
        }
        debug!(subject = %subject, steps, samples, "Loaded subject record");
        self.samples_per_step = Some(samples);
        self.records.insert(subject, data);
        Ok(())
    }

    /// Chainable form of [`insert`](Self::insert).
    ///
    /// # Errors
    ///
    /// Same as [`insert`](Self::insert).
    pub fn with_subject(mut self, subject: impl Into<String>, data: Array3<f64>) -> Result<Self> {
        self.insert(subject, data)?;
        Ok(self)
    }

    #[must_use]
    pub fn field_index(&self) -> &FieldIndex {
        &self.fields
    }

    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    #[must_use]
    pub const fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub(crate) fn mark_calibrated(&mut self) {
        self.calibrated = true;
    }

    /// Mutable access to a subject array; only the calibration phase uses it.
    pub(crate) fn record_mut(&mut self, subject: &str) -> Option<&mut Array3<f64>> {
        self.records.get_mut(subject)
    }

    /// Freeze into an immutable store.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidInput`] when no subject was inserted.
    pub fn build(self) -> Result<SubjectStore> {
        let samples_per_step = self
            .samples_per_step
            .ok_or_else(|| PipelineError::invalid_input("store has no subjects"))?;
        info!(
            subjects = self.records.len(),
            samples_per_step,
            fields = self.fields.len(),
            "Subject store ready"
        );
        Ok(SubjectStore {
            fields: self.fields,
            samples_per_step,
            records: self.records,
        })
    }
}

/// Immutable, shareable subject store.
#[derive(Debug, Clone)]
pub struct SubjectStore {
    fields: FieldIndex,
    samples_per_step: usize,
    records: BTreeMap<String, Array3<f64>>,
}

impl SubjectStore {
    #[must_use]
    pub fn field_index(&self) -> &FieldIndex {
        &self.fields
    }

    #[must_use]
    pub const fn samples_per_step(&self) -> usize {
        self.samples_per_step
    }

    /// Subject ids in store order.
    #[must_use]
    pub fn subjects(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    /// Borrow one subject's array.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnknownSubject`] if the id is not stored.
    pub fn get(&self, subject: &str) -> Result<&Array3<f64>> {
        self.records
            .get(subject)
            .ok_or_else(|| PipelineError::UnknownSubject(subject.to_string()))
    }

    /// Stack the steps of several subjects into a new array, in the order given.
    ///
    /// # Errors
    ///
    /// Fails on an unknown subject or an empty id list.
    pub fn concatenate<S: AsRef<str>>(&self, subjects: &[S]) -> Result<Array3<f64>> {
        if subjects.is_empty() {
            return Err(PipelineError::invalid_input("no subjects to concatenate"));
        }
        let views = subjects
            .iter()
            .map(|s| self.get(s.as_ref()).map(|a| a.view()))
            .collect::<Result<Vec<ArrayView3<'_, f64>>>>()?;
        concatenate(Axis(0), &views).map_err(|e| {
            PipelineError::shape_mismatch(
                format!("subject concatenation ({e})"),
                &[self.samples_per_step, self.fields.len()],
                &[],
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> FieldIndex {
        FieldIndex::new(["a", "b"]).unwrap()
    }

    #[test]
    fn test_shape_checks() {
        let mut builder = SubjectStoreBuilder::new(fields());
        builder.insert("s1", Array3::zeros((3, 10, 2))).unwrap();

        let err = builder.insert("s2", Array3::zeros((3, 9, 2))).unwrap_err();
        assert!(matches!(err, PipelineError::ShapeMismatch { .. }));

        let err = builder.insert("s3", Array3::zeros((3, 10, 3))).unwrap_err();
        assert!(matches!(err, PipelineError::ShapeMismatch { .. }));

        assert!(builder.insert("s1", Array3::zeros((1, 10, 2))).is_err());
        builder.insert("s4", Array3::zeros((7, 10, 2))).unwrap();
    }

    #[test]
    fn test_insert_after_calibration_rejected() {
        let mut builder = SubjectStoreBuilder::new(fields());
        builder.insert("s1", Array3::zeros((1, 10, 2))).unwrap();
        builder.mark_calibrated();
        assert!(builder.is_calibrated());
        let err = builder.insert("s2", Array3::zeros((1, 10, 2))).unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyCalibrated));
    }

    #[test]
    fn test_empty_build_fails() {
        assert!(SubjectStoreBuilder::new(fields()).build().is_err());
    }

    #[test]
    fn test_concatenate_copies_in_order() {
        let store = SubjectStoreBuilder::new(fields())
            .with_subject("s1", Array3::from_elem((2, 4, 2), 1.0))
            .unwrap()
            .with_subject("s2", Array3::from_elem((3, 4, 2), 2.0))
            .unwrap()
            .build()
            .unwrap();

        let mut joined = store.concatenate(&["s2", "s1"]).unwrap();
        assert_eq!(joined.dim(), (5, 4, 2));
        assert_eq!(joined[[0, 0, 0]], 2.0);
        assert_eq!(joined[[4, 0, 0]], 1.0);

        joined.fill(0.0);
        assert_eq!(store.get("s1").unwrap()[[0, 0, 0]], 1.0);

        assert!(matches!(
            store.concatenate(&["s9"]).unwrap_err(),
            PipelineError::UnknownSubject(_)
        ));
    }
}
