//! Temporal synchronization of independently sampled streams.
//!
//! The motion-capture and inertial recordings of a trial start at unrelated
//! instants. The delay between them is the lag that maximizes the
//! cross-correlation of a quantity both modalities observe (e.g. the
//! angular-velocity magnitude of the same segment) over a leading window.
//! Both streams are then cropped to a common instant zero and truncated to
//! the shorter remaining length.

use ndarray::{concatenate, s, Array2, Axis};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::fields::FieldIndex;
use crate::math::correlation::{cross_correlation, variance};

/// A named `[sample, field]` recording of one modality.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleStream {
    fields: FieldIndex,
    data: Array2<f64>,
}

impl SampleStream {
    /// # Errors
    ///
    /// Returns [`PipelineError::ShapeMismatch`] if the column count of `data`
    /// differs from `fields`.
    pub fn new(fields: FieldIndex, data: Array2<f64>) -> Result<Self> {
        if data.ncols() != fields.len() {
            return Err(PipelineError::shape_mismatch(
                "stream columns",
                &[fields.len()],
                &[data.ncols()],
            ));
        }
        Ok(Self { fields, data })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.nrows()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.nrows() == 0
    }

    #[must_use]
    pub fn field_index(&self) -> &FieldIndex {
        &self.fields
    }

    #[must_use]
    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    /// Copy of one column.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingField`] for an unknown column.
    pub fn column(&self, name: &str) -> Result<Vec<f64>> {
        let loc = self.fields.position(name)?;
        Ok(self.data.column(loc).to_vec())
    }

    /// Per-sample Euclidean norm across `columns` (e.g. a segment's gyro axes).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingField`] for an unknown column.
    pub fn channel_norm<S: AsRef<str>>(&self, columns: &[S]) -> Result<Vec<f64>> {
        let locs = self.fields.positions(columns)?;
        Ok(self
            .data
            .outer_iter()
            .map(|row| locs.iter().map(|&l| row[l] * row[l]).sum::<f64>().sqrt())
            .collect())
    }

    /// Drop the first `n` samples (all of them if `n` exceeds the length).
    pub fn crop(&mut self, n: usize) {
        let n = n.min(self.len());
        self.data = self.data.slice(s![n.., ..]).to_owned();
    }

    /// Keep at most `len` samples.
    pub fn truncate(&mut self, len: usize) {
        if len < self.len() {
            self.data = self.data.slice(s![..len, ..]).to_owned();
        }
    }

    /// Side-by-side join of two equally long streams.
    ///
    /// # Errors
    ///
    /// Fails on differing lengths or a column name present in both.
    pub fn combine(self, other: Self) -> Result<Self> {
        if self.len() != other.len() {
            return Err(PipelineError::shape_mismatch(
                "combined stream length",
                &[self.len()],
                &[other.len()],
            ));
        }
        let names = self
            .fields
            .names()
            .iter()
            .chain(other.fields.names().iter())
            .cloned();
        let fields = FieldIndex::new(names)?;
        let data = concatenate(Axis(1), &[self.data.view(), other.data.view()])
            .map_err(|e| PipelineError::invalid_input(format!("stream join: {e}")))?;
        Self::new(fields, data)
    }
}

/// Integer lag maximizing the cross-correlation of `a` and `b`.
///
/// Only the first `window` samples of each signal are used. A positive
/// result `k` means `b` lags `a` by `k` samples (`b[n] = a[n - k]`).
///
/// # Errors
///
/// Returns [`PipelineError::SynchronizationFailure`] if either windowed
/// signal is empty, non-finite or constant.
pub fn find_delay(a: &[f64], b: &[f64], window: usize) -> Result<isize> {
    let a = &a[..a.len().min(window)];
    let b = &b[..b.len().min(window)];
    check_signal(a, "first")?;
    check_signal(b, "second")?;

    let correlation = cross_correlation(a, b);
    let (best, _) = correlation
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, &v)| {
            if v > bv {
                (i, v)
            } else {
                (bi, bv)
            }
        });
    let delay = best as isize - (a.len() as isize - 1);
    debug!(delay, window, "Cross-correlation peak");
    Ok(delay)
}

fn check_signal(signal: &[f64], which: &str) -> Result<()> {
    if signal.is_empty() {
        return Err(PipelineError::synchronization(format!(
            "{which} signal is empty"
        )));
    }
    if signal.iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::synchronization(format!(
            "{which} signal has non-finite samples"
        )));
    }
    if variance(signal) == 0.0 {
        return Err(PipelineError::synchronization(format!(
            "{which} signal is constant"
        )));
    }
    Ok(())
}

/// Crop both streams of a pair by a signed lag, then equalize their lengths.
///
/// A non-negative `lag` crops `b` (it started recording earlier relative to
/// the shared event); a negative one crops `a` by `-lag`.
pub fn crop_pair(a: &mut SampleStream, b: &mut SampleStream, lag: isize) {
    if lag >= 0 {
        b.crop(lag.unsigned_abs());
    } else {
        a.crop(lag.unsigned_abs());
    }
    let len = a.len().min(b.len());
    a.truncate(len);
    b.truncate(len);
}

/// Leading samples to drop from each stream of a synchronized pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropPlan {
    /// Lag found by [`find_delay`].
    pub delay: isize,
    /// Samples removed from the reference stream.
    pub crop_reference: usize,
    /// Samples removed from the delayed stream.
    pub crop_other: usize,
}

impl CropPlan {
    /// Combine the correlation delay with the first detected event so the
    /// crops are never negative: `m = min(-first_event, delay)`, the
    /// reference loses `-m` samples and the other stream `delay - m`.
    #[must_use]
    pub fn new(delay: isize, first_event_index: usize) -> Self {
        let first = isize::try_from(first_event_index).unwrap_or(isize::MAX);
        let minimum = (-first).min(delay);
        Self {
            delay,
            crop_reference: (-minimum).unsigned_abs(),
            crop_other: (delay - minimum).unsigned_abs(),
        }
    }
}

/// Align two streams of one trial and join them column-wise.
///
/// `reference_signal` and `other_signal` are the matching scalar traces used
/// for correlation; `first_event_index` comes from the stream-specific event
/// detector.
///
/// # Errors
///
/// Returns [`PipelineError::SynchronizationFailure`] for degenerate signals
/// and propagates join failures (duplicate column names).
pub fn synchronize(
    mut reference: SampleStream,
    mut other: SampleStream,
    reference_signal: &[f64],
    other_signal: &[f64],
    first_event_index: usize,
    window: usize,
) -> Result<(SampleStream, CropPlan)> {
    let delay = find_delay(reference_signal, other_signal, window)?;
    let plan = CropPlan::new(delay, first_event_index);
    info!(
        delay,
        crop_reference = plan.crop_reference,
        crop_other = plan.crop_other,
        "Synchronized streams"
    );
    reference.crop(plan.crop_reference);
    other.crop(plan.crop_other);
    let len = reference.len().min(other.len());
    reference.truncate(len);
    other.truncate(len);
    Ok((other.combine(reference)?, plan))
}
