//! Padding-aware per-group normalization.
//!
//! Every subject window is zero-padded to a fixed length. A sample whose
//! values are all exactly zero across a group's columns is padding, not a
//! reading: it is masked out (as NaN) while fitting and transforming, and
//! written back as exact zero afterwards.
//!
//! Fitting happens once, on training data, through [`Normalizer`]. Fitting
//! consumes it into a [`FittedNormalizer`], which exposes only transforms:
//! validation and test folds cannot refit.

use ndarray::{Array2, Array3, Axis};

use crate::config::{PipelineConfig, ScalerKind, ScalerMode};
use crate::error::{PipelineError, Result};
use crate::fields::NamedTensors;

/// Scaler operation, dispatched explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleOp {
    Fit,
    Transform,
    FitTransform,
}

#[derive(Debug, Clone, PartialEq)]
struct ScalerParams {
    offset: Vec<f64>,
    scale: Vec<f64>,
}

/// One fitted (or not yet fitted) transform for a field group.
#[derive(Debug, Clone, PartialEq)]
pub struct Scaler {
    kind: ScalerKind,
    mode: ScalerMode,
    params: Option<ScalerParams>,
}

impl Scaler {
    #[must_use]
    pub const fn new(kind: ScalerKind, mode: ScalerMode) -> Self {
        Self {
            kind,
            mode,
            params: None,
        }
    }

    #[must_use]
    pub const fn is_fitted(&self) -> bool {
        self.params.is_some()
    }

    /// Run `op` on one group tensor. `Fit` returns `None`.
    ///
    /// # Errors
    ///
    /// `Transform` on an unfitted scaler returns [`PipelineError::NotFitted`].
    pub fn apply(&mut self, op: ScaleOp, group: &str, data: &Array3<f64>) -> Result<Option<Array3<f64>>> {
        match op {
            ScaleOp::Fit => {
                self.fit(data);
                Ok(None)
            }
            ScaleOp::Transform => self.transform(group, data).map(Some),
            ScaleOp::FitTransform => {
                self.fit(data);
                self.transform(group, data).map(Some)
            }
        }
    }

    fn columns(&self, data: &Array3<f64>) -> usize {
        match self.mode {
            ScalerMode::ByEachColumn => data.len_of(Axis(2)).max(1),
            ScalerMode::ByAllColumns => 1,
        }
    }

    fn fit(&mut self, data: &Array3<f64>) {
        let cols = self.columns(data);
        let values = masked_values(data);
        let mut offset = Vec::with_capacity(cols);
        let mut scale = Vec::with_capacity(cols);
        for c in 0..cols {
            let column: Vec<f64> = values
                .iter()
                .skip(c)
                .step_by(cols)
                .copied()
                .filter(|v| !v.is_nan())
                .collect();
            let (o, s) = column_params(self.kind, &column);
            offset.push(o);
            scale.push(s);
        }
        self.params = Some(ScalerParams { offset, scale });
    }

    fn params(&self, group: &str, data: &Array3<f64>) -> Result<&ScalerParams> {
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| PipelineError::NotFitted(group.to_string()))?;
        let cols = self.columns(data);
        if params.offset.len() != cols {
            return Err(PipelineError::shape_mismatch(
                format!("scaler columns of group {group}"),
                &[params.offset.len()],
                &[cols],
            ));
        }
        Ok(params)
    }

    /// Apply the fitted transform; padding samples come back as exact zero.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NotFitted`] before fitting, or a shape mismatch if
    /// the column count changed since fitting.
    pub fn transform(&self, group: &str, data: &Array3<f64>) -> Result<Array3<f64>> {
        let params = self.params(group, data)?;
        let cols = params.offset.len();
        let mut values = masked_values(data);
        for (i, v) in values.iter_mut().enumerate() {
            let c = i % cols;
            *v = (*v - params.offset[c]) / params.scale[c];
        }
        rebuild(data, values)
    }

    /// Undo the transform on every sample not flagged in `padding`
    /// (`[step, sample]`); flagged samples are set to zero.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NotFitted`] before fitting, or a shape mismatch
    /// between `padding` and `data`.
    pub fn inverse_transform(
        &self,
        group: &str,
        data: &Array3<f64>,
        padding: &Array2<bool>,
    ) -> Result<Array3<f64>> {
        let params = self.params(group, data)?;
        let (steps, samples, _) = data.dim();
        if padding.dim() != (steps, samples) {
            return Err(PipelineError::shape_mismatch(
                format!("padding mask of group {group}"),
                &[steps, samples],
                padding.shape(),
            ));
        }
        let cols = params.offset.len();
        let mut out = data.clone();
        for ((step, sample, field), v) in out.indexed_iter_mut() {
            if padding[[step, sample]] {
                *v = 0.0;
            } else {
                let c = if cols == 1 { 0 } else { field };
                *v = *v * params.scale[c] + params.offset[c];
            }
        }
        Ok(out)
    }
}

fn column_params(kind: ScalerKind, column: &[f64]) -> (f64, f64) {
    if column.is_empty() {
        return (0.0, 1.0);
    }
    let nonzero = |s: f64| if s == 0.0 || !s.is_finite() { 1.0 } else { s };
    match kind {
        ScalerKind::MinMax => {
            let min = column.iter().copied().fold(f64::INFINITY, f64::min);
            let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            (min, nonzero(max - min))
        }
        ScalerKind::Standard => {
            let n = column.len() as f64;
            let mean = column.iter().sum::<f64>() / n;
            let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            (mean, nonzero(var.sqrt()))
        }
        ScalerKind::MaxAbs => {
            let max_abs = column.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
            (0.0, nonzero(max_abs))
        }
    }
}

/// `[step, sample]` flags of samples whose every field is exactly zero.
#[must_use]
pub fn padding_mask(data: &Array3<f64>) -> Array2<bool> {
    let (steps, samples, _) = data.dim();
    Array2::from_shape_fn((steps, samples), |(step, sample)| {
        data.slice(ndarray::s![step, sample, ..])
            .iter()
            .all(|&v| v == 0.0)
    })
}

/// Values in logical `[step, sample, field]` order with padding set to NaN.
fn masked_values(data: &Array3<f64>) -> Vec<f64> {
    let mask = padding_mask(data);
    data.indexed_iter()
        .map(|((step, sample, _), &v)| if mask[[step, sample]] { f64::NAN } else { v })
        .collect()
}

/// Restore the original shape, mapping NaN (padding) back to zero.
fn rebuild(like: &Array3<f64>, values: Vec<f64>) -> Result<Array3<f64>> {
    let values = values
        .into_iter()
        .map(|v| if v.is_nan() { 0.0 } else { v })
        .collect();
    Array3::from_shape_vec(like.raw_dim(), values)
        .map_err(|e| PipelineError::invalid_input(format!("normalized layout: {e}")))
}

/// Per-group scalers before fitting.
#[derive(Debug, Clone)]
pub struct Normalizer {
    kind: ScalerKind,
    mode: ScalerMode,
    scalers: Vec<(String, Scaler)>,
}

impl Normalizer {
    #[must_use]
    pub const fn new(kind: ScalerKind, mode: ScalerMode) -> Self {
        Self {
            kind,
            mode,
            scalers: Vec::new(),
        }
    }

    #[must_use]
    pub const fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.scaler, config.scaler_mode)
    }

    fn scaler_mut(&mut self, group: &str) -> &mut Scaler {
        let pos = match self.scalers.iter().position(|(n, _)| n == group) {
            Some(pos) => pos,
            None => {
                self.scalers
                    .push((group.to_string(), Scaler::new(self.kind, self.mode)));
                self.scalers.len() - 1
            }
        };
        &mut self.scalers[pos].1
    }

    /// Run `op` independently on every group of `data`. `Fit` returns `None`.
    ///
    /// # Errors
    ///
    /// `Transform` on a group that has not been fitted returns
    /// [`PipelineError::NotFitted`].
    pub fn apply(&mut self, op: ScaleOp, data: &NamedTensors) -> Result<Option<NamedTensors>> {
        let mut out = NamedTensors::new();
        for (name, tensor) in data.iter() {
            if let Some(scaled) = self.scaler_mut(name).apply(op, name, tensor)? {
                out.insert(name, scaled);
            }
        }
        Ok(match op {
            ScaleOp::Fit => None,
            ScaleOp::Transform | ScaleOp::FitTransform => Some(out),
        })
    }

    /// Fit on training data and freeze.
    ///
    /// # Errors
    ///
    /// Propagates scaler failures.
    pub fn fit(mut self, train: &NamedTensors) -> Result<FittedNormalizer> {
        self.apply(ScaleOp::Fit, train)?;
        Ok(FittedNormalizer {
            scalers: self.scalers,
        })
    }

    /// Fit on training data, freeze, and return the transformed training data.
    ///
    /// # Errors
    ///
    /// Propagates scaler failures.
    pub fn fit_transform(mut self, train: &NamedTensors) -> Result<(FittedNormalizer, NamedTensors)> {
        let scaled = self
            .apply(ScaleOp::FitTransform, train)?
            .unwrap_or_default();
        Ok((
            FittedNormalizer {
                scalers: self.scalers,
            },
            scaled,
        ))
    }
}

/// Frozen per-group scalers. Only transforms are available.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedNormalizer {
    scalers: Vec<(String, Scaler)>,
}

impl FittedNormalizer {
    fn scaler(&self, group: &str) -> Result<&Scaler> {
        self.scalers
            .iter()
            .find(|(n, _)| n == group)
            .map(|(_, s)| s)
            .ok_or_else(|| PipelineError::NotFitted(group.to_string()))
    }

    /// Transform every group of `data` with the frozen parameters.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NotFitted`] for a group absent at fit time.
    pub fn transform(&self, data: &NamedTensors) -> Result<NamedTensors> {
        let mut out = NamedTensors::new();
        for (name, tensor) in data.iter() {
            out.insert(name, self.scaler(name)?.transform(name, tensor)?);
        }
        Ok(out)
    }

    /// Inverse transform of one group; `padding` marks samples to restore as zero.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NotFitted`] for an unknown group, or a shape mismatch.
    pub fn inverse_transform_group(
        &self,
        group: &str,
        data: &Array3<f64>,
        padding: &Array2<bool>,
    ) -> Result<Array3<f64>> {
        self.scaler(group)?.inverse_transform(group, data, padding)
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.scalers.iter().map(|(n, _)| n.as_str())
    }
}
