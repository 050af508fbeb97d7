//! Pluggable regression capability.
//!
//! The pipeline only needs two operations: [`Trainable::train`] turns a
//! normalized training set (and optional validation set) into a model
//! handle, and [`Predictable::predict`] maps input tensors to output
//! tensors with the same group layout as the training targets. Any
//! architecture can sit behind these traits; two small reference variants
//! are provided for baselines and tests.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, Array3, Axis};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::fields::NamedTensors;
use crate::normalizer::padding_mask;

/// Normalized inputs and raw targets of the training fold.
#[derive(Debug, Clone, Copy)]
pub struct TrainingSet<'a> {
    pub x: &'a NamedTensors,
    pub y: &'a NamedTensors,
}

/// Normalized inputs, targets and scoring weights of a validation fold.
///
/// A sample counts toward the validation loss when its weight equals
/// `mask_value`.
#[derive(Debug, Clone, Copy)]
pub struct ValidationSet<'a> {
    pub x: &'a NamedTensors,
    pub y: &'a NamedTensors,
    pub weights: &'a NamedTensors,
    pub mask_value: f64,
}

impl ValidationSet<'_> {
    /// Mean squared error of `pred` over the weighted samples.
    #[must_use]
    pub fn weighted_mse(&self, pred: &NamedTensors) -> f64 {
        weighted_mse(pred, self.y, self.weights, self.mask_value)
    }
}

/// A trained model handle.
pub trait Predictable {
    /// Predict every output group for the steps of `x`.
    ///
    /// # Errors
    ///
    /// Implementations fail on inputs whose layout differs from training.
    fn predict(&self, x: &NamedTensors) -> Result<NamedTensors>;
}

/// Something that can be trained into a [`Predictable`].
pub trait Trainable {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Fit a model on one fold.
    ///
    /// # Errors
    ///
    /// Implementations fail on malformed or degenerate training data.
    fn train(
        &mut self,
        train: TrainingSet<'_>,
        validation: Option<ValidationSet<'_>>,
    ) -> Result<Box<dyn Predictable>>;
}

/// `[step, sample]` flags of samples where every input group is padding.
fn input_padding(x: &NamedTensors) -> Result<Array2<bool>> {
    Ok(padding_mask(&x.concat_fields()?))
}

/// Mean squared error over samples whose weight equals `mask_value`.
fn weighted_mse(pred: &NamedTensors, y: &NamedTensors, weights: &NamedTensors, mask_value: f64) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for (name, truth) in y.iter() {
        let (Some(p), Some(w)) = (pred.get(name), weights.get(name)) else {
            continue;
        };
        for ((t, p), w) in truth.iter().zip(p.iter()).zip(w.iter()) {
            if *w == mask_value {
                sum += (t - p).powi(2);
                count += 1;
            }
        }
    }
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Predicts, for every sample position, the mean training target at that
/// position over non-padding steps.
#[derive(Debug, Clone, Default)]
pub struct MeanProfileModel;

impl MeanProfileModel {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

struct MeanProfile {
    profiles: Vec<(String, Array2<f64>)>,
}

impl Trainable for MeanProfileModel {
    fn name(&self) -> &str {
        "mean_profile"
    }

    fn train(
        &mut self,
        train: TrainingSet<'_>,
        validation: Option<ValidationSet<'_>>,
    ) -> Result<Box<dyn Predictable>> {
        let padding = input_padding(train.x)?;
        let mut profiles = Vec::with_capacity(train.y.len());
        for (name, y) in train.y.iter() {
            let (_, samples, fields) = y.dim();
            let mut sum = Array2::<f64>::zeros((samples, fields));
            let mut count = vec![0usize; samples];
            for (step, window) in y.outer_iter().enumerate() {
                for (sample, row) in window.outer_iter().enumerate() {
                    if !padding[[step, sample]] {
                        let mut acc = sum.row_mut(sample);
                        acc += &row;
                        count[sample] += 1;
                    }
                }
            }
            for (mut row, &n) in sum.outer_iter_mut().zip(count.iter()) {
                if n > 0 {
                    row /= n as f64;
                }
            }
            profiles.push((name.to_string(), sum));
        }
        let model = MeanProfile { profiles };
        if let Some(v) = validation {
            let loss = v.weighted_mse(&model.predict(v.x)?);
            info!(model = self.name(), validation_mse = loss, "Trained");
        }
        Ok(Box::new(model))
    }
}

impl Predictable for MeanProfile {
    fn predict(&self, x: &NamedTensors) -> Result<NamedTensors> {
        let padding = input_padding(x)?;
        let (steps, samples) = padding.dim();
        let mut out = NamedTensors::new();
        for (name, profile) in &self.profiles {
            if profile.nrows() != samples {
                return Err(PipelineError::shape_mismatch(
                    format!("samples per step for {name}"),
                    &[profile.nrows()],
                    &[samples],
                ));
            }
            let fields = profile.ncols();
            let y = Array3::from_shape_fn((steps, samples, fields), |(step, sample, f)| {
                if padding[[step, sample]] {
                    0.0
                } else {
                    profile[[sample, f]]
                }
            });
            out.insert(name.clone(), y);
        }
        Ok(out)
    }
}

/// Per-sample ridge regression from all input columns to all output columns.
///
/// Every non-padding `(step, sample)` row is one observation; a bias term is
/// appended to the features. Padding rows are excluded from the fit and
/// predicted as zero.
#[derive(Debug, Clone)]
pub struct RidgeRegressionModel {
    lambda: f64,
}

impl Default for RidgeRegressionModel {
    fn default() -> Self {
        Self { lambda: 1e-3 }
    }
}

impl RidgeRegressionModel {
    #[must_use]
    pub const fn new(lambda: f64) -> Self {
        Self { lambda }
    }
}

struct RidgeModel {
    /// `[features + 1, outputs]`, bias last.
    weights: DMatrix<f64>,
    inputs: usize,
    outputs: Vec<(String, usize)>,
}

impl Trainable for RidgeRegressionModel {
    fn name(&self) -> &str {
        "ridge_regression"
    }

    fn train(
        &mut self,
        train: TrainingSet<'_>,
        validation: Option<ValidationSet<'_>>,
    ) -> Result<Box<dyn Predictable>> {
        let x = train.x.concat_fields()?;
        let y = train.y.concat_fields()?;
        if x.len_of(Axis(0)) != y.len_of(Axis(0)) || x.len_of(Axis(1)) != y.len_of(Axis(1)) {
            return Err(PipelineError::shape_mismatch(
                "training inputs vs targets",
                &x.shape()[..2],
                &y.shape()[..2],
            ));
        }
        let padding = padding_mask(&x);
        let inputs = x.len_of(Axis(2));
        let p = inputs + 1;
        let q = y.len_of(Axis(2));

        let mut xtx = DMatrix::<f64>::zeros(p, p);
        let mut xty = DMatrix::<f64>::zeros(p, q);
        let mut rows = 0usize;
        for ((step, sample), &pad) in padding.indexed_iter() {
            if pad {
                continue;
            }
            let features = DVector::<f64>::from_iterator(
                p,
                x.slice(ndarray::s![step, sample, ..]).iter().copied().chain([1.0]),
            );
            let target = DVector::<f64>::from_iterator(
                q,
                y.slice(ndarray::s![step, sample, ..]).iter().copied(),
            );
            xtx.ger(1.0, &features, &features, 1.0);
            xty += &features * target.transpose();
            rows += 1;
        }
        if rows == 0 {
            return Err(PipelineError::invalid_input("training set has only padding"));
        }
        for i in 0..p {
            xtx[(i, i)] += self.lambda;
        }
        let weights = xtx
            .cholesky()
            .ok_or_else(|| PipelineError::invalid_input("normal equations are not positive definite"))?
            .solve(&xty);
        debug!(rows, inputs, outputs = q, "Ridge normal equations solved");

        let model = RidgeModel {
            weights,
            inputs,
            outputs: train
                .y
                .iter()
                .map(|(n, t)| (n.to_string(), t.len_of(Axis(2))))
                .collect(),
        };
        if let Some(v) = validation {
            let loss = v.weighted_mse(&model.predict(v.x)?);
            info!(model = self.name(), validation_mse = loss, "Trained");
        }
        Ok(Box::new(model))
    }
}

impl Predictable for RidgeModel {
    fn predict(&self, x: &NamedTensors) -> Result<NamedTensors> {
        let x = x.concat_fields()?;
        let (steps, samples, inputs) = x.dim();
        if inputs != self.inputs {
            return Err(PipelineError::shape_mismatch(
                "ridge inputs",
                &[self.inputs],
                &[inputs],
            ));
        }
        let padding = padding_mask(&x);
        let mut out = NamedTensors::new();
        let mut offset = 0;
        for (name, width) in &self.outputs {
            let mut y = Array3::<f64>::zeros((steps, samples, *width));
            for ((step, sample, f), v) in y.indexed_iter_mut() {
                if padding[[step, sample]] {
                    continue;
                }
                let col = offset + f;
                let mut acc = self.weights[(inputs, col)];
                for i in 0..inputs {
                    acc += x[[step, sample, i]] * self.weights[(i, col)];
                }
                *v = acc;
            }
            out.insert(name.clone(), y);
            offset += width;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn linear_set(steps: usize) -> (NamedTensors, NamedTensors) {
        let x = Array3::from_shape_fn((steps, 5, 2), |(s, t, f)| {
            if t == 4 {
                0.0
            } else {
                ((s * 7 + t * 3 + f * 5) % 11) as f64 / 10.0 + 0.1
            }
        });
        let y = Array3::from_shape_fn((steps, 5, 1), |(s, t, _)| {
            if t == 4 {
                0.0
            } else {
                2.0 * x[[s, t, 0]] - 0.5 * x[[s, t, 1]] + 1.0
            }
        });
        let mut xs = NamedTensors::new();
        xs.insert("input", x);
        let mut ys = NamedTensors::new();
        ys.insert("output", y);
        (xs, ys)
    }

    #[test]
    fn test_ridge_recovers_linear_map() {
        let (x, y) = linear_set(12);
        let mut trainer = RidgeRegressionModel::new(1e-9);
        let model = trainer.train(TrainingSet { x: &x, y: &y }, None).unwrap();
        let pred = model.predict(&x).unwrap();
        let (p, t) = (pred.get("output").unwrap(), y.get("output").unwrap());
        for (a, b) in p.iter().zip(t.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-5);
        }
        assert_eq!(p[[0, 4, 0]], 0.0);
    }

    #[test]
    fn test_mean_profile() {
        let (x, y) = linear_set(4);
        let model = MeanProfileModel::new()
            .train(TrainingSet { x: &x, y: &y }, None)
            .unwrap();
        let pred = model.predict(&x).unwrap();
        let p = pred.get("output").unwrap();
        let t = y.get("output").unwrap();
        let expected = t.index_axis(Axis(2), 0).column(1).mean().unwrap();
        assert_relative_eq!(p[[2, 1, 0]], expected, epsilon = 1e-12);
        assert_eq!(p[[2, 4, 0]], 0.0);
    }

    #[test]
    fn test_validation_is_optional_and_used() {
        let (x, y) = linear_set(3);
        let mut w = NamedTensors::new();
        w.insert("output", Array3::from_elem((3, 5, 1), 1.0));
        let validation = ValidationSet {
            x: &x,
            y: &y,
            weights: &w,
            mask_value: 1.0,
        };
        assert!(MeanProfileModel::new()
            .train(TrainingSet { x: &x, y: &y }, Some(validation))
            .is_ok());
    }

    #[test]
    fn test_validation_loss_honours_mask_value() {
        let mut y = NamedTensors::new();
        y.insert("output", Array3::from_shape_vec((1, 2, 1), vec![1.0, 2.0]).unwrap());
        let mut pred = NamedTensors::new();
        pred.insert("output", Array3::from_shape_vec((1, 2, 1), vec![1.0, 5.0]).unwrap());
        let mut w = NamedTensors::new();
        w.insert("output", Array3::from_shape_vec((1, 2, 1), vec![2.0, 1.0]).unwrap());
        let x = NamedTensors::new();

        let set = |mask_value: f64| ValidationSet {
            x: &x,
            y: &y,
            weights: &w,
            mask_value,
        };
        assert_relative_eq!(set(2.0).weighted_mse(&pred), 0.0);
        assert_relative_eq!(set(1.0).weighted_mse(&pred), 9.0);
        assert!(set(3.0).weighted_mse(&pred).is_nan());
    }
}
