//! Masked per-step regression metrics and their aggregation.
//!
//! Degenerate steps are not errors: a metric that cannot be computed is
//! recorded as NaN and skipped by [`mean_scores`].

use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::fields::NamedTensors;
use crate::math::correlation::{mean, nan_mean, pearson};

/// Metrics of one subject for one output field, one entry per step.
///
/// `r2_all` holds the pooled R2 over every unmasked sample of the subject,
/// repeated for each step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRecord {
    pub subject: String,
    pub output: String,
    pub field: String,
    pub r2: Vec<f64>,
    pub r2_all: Vec<f64>,
    pub rmse: Vec<f64>,
    pub mae: Vec<f64>,
    pub r_rmse: Vec<f64>,
    pub cor_value: Vec<f64>,
}

/// Mean of every metric for one `(output, field)` across all records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeanScore {
    pub output: String,
    pub field: String,
    pub r2: f64,
    pub r2_all: f64,
    pub rmse: f64,
    pub mae: f64,
    pub r_rmse: f64,
    pub cor_value: f64,
}

/// Metrics of a single step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepMetrics {
    pub r2: f64,
    pub rmse: f64,
    pub mae: f64,
    pub r_rmse: f64,
    pub cor_value: f64,
}

impl StepMetrics {
    const UNDEFINED: Self = Self {
        r2: f64::NAN,
        rmse: f64::NAN,
        mae: f64::NAN,
        r_rmse: f64::NAN,
        cor_value: f64::NAN,
    };
}

/// Coefficient of determination of `pred` against `truth`.
///
/// NaN with fewer than two points or when `truth` is constant.
#[must_use]
pub fn r2_score(truth: &[f64], pred: &[f64]) -> f64 {
    if truth.len() < 2 || truth.len() != pred.len() {
        return f64::NAN;
    }
    let m = mean(truth);
    let ss_tot: f64 = truth.iter().map(|t| (t - m).powi(2)).sum();
    if ss_tot == 0.0 {
        return f64::NAN;
    }
    let ss_res: f64 = truth.iter().zip(pred).map(|(t, p)| (t - p).powi(2)).sum();
    1.0 - ss_res / ss_tot
}

fn extremes(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

/// Metrics over paired points that survived masking.
#[must_use]
pub fn step_metrics(truth: &[f64], pred: &[f64]) -> StepMetrics {
    let n = truth.len();
    if n == 0 || n != pred.len() {
        return StepMetrics::UNDEFINED;
    }
    let mse = truth.iter().zip(pred).map(|(t, p)| (t - p).powi(2)).sum::<f64>() / n as f64;
    let rmse = mse.sqrt();
    let mae = truth.iter().zip(pred).map(|(t, p)| (t - p).abs()).sum::<f64>() / n as f64;

    let (t_min, t_max) = extremes(truth);
    let (p_min, p_max) = extremes(pred);
    let range = (t_max + p_max - t_min - p_min) / 2.0;
    let r_rmse = if range == 0.0 { f64::NAN } else { rmse / range };

    StepMetrics {
        r2: r2_score(truth, pred),
        rmse,
        mae,
        r_rmse,
        cor_value: pearson(truth, pred),
    }
}

/// Computes [`ScoreRecord`]s for the output groups of a configuration.
#[derive(Debug, Clone, Copy)]
pub struct Scorer<'a> {
    config: &'a PipelineConfig,
}

impl<'a> Scorer<'a> {
    #[must_use]
    pub const fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Score one `[step, sample]` field.
    #[must_use]
    pub fn score_field(
        subject: &str,
        output: &str,
        field: &str,
        truth: ArrayView2<'_, f64>,
        pred: ArrayView2<'_, f64>,
        mask: ArrayView2<'_, bool>,
    ) -> ScoreRecord {
        let steps = truth.nrows();
        let mut record = ScoreRecord {
            subject: subject.to_string(),
            output: output.to_string(),
            field: field.to_string(),
            r2: Vec::with_capacity(steps),
            r2_all: Vec::with_capacity(steps),
            rmse: Vec::with_capacity(steps),
            mae: Vec::with_capacity(steps),
            r_rmse: Vec::with_capacity(steps),
            cor_value: Vec::with_capacity(steps),
        };
        let mut all_truth = Vec::new();
        let mut all_pred = Vec::new();

        for ((t_row, p_row), m_row) in truth
            .outer_iter()
            .zip(pred.outer_iter())
            .zip(mask.outer_iter())
        {
            let (t, p): (Vec<f64>, Vec<f64>) = t_row
                .iter()
                .zip(p_row.iter())
                .zip(m_row.iter())
                .filter(|(_, keep)| **keep)
                .map(|((&t, &p), _)| (t, p))
                .unzip();
            let m = step_metrics(&t, &p);
            record.r2.push(m.r2);
            record.rmse.push(m.rmse);
            record.mae.push(m.mae);
            record.r_rmse.push(m.r_rmse);
            record.cor_value.push(m.cor_value);
            all_truth.extend(t);
            all_pred.extend(p);
        }

        let pooled = r2_score(&all_truth, &all_pred);
        record.r2_all = vec![pooled; steps];
        record
    }

    /// Score every field of every configured output group.
    ///
    /// Masks come from the weight group of the same name: a sample counts when
    /// its weight equals the configured mask value. An output with no weight
    /// group has every sample counted.
    ///
    /// # Errors
    ///
    /// Returns an error when a prediction or weight group is missing or its
    /// shape differs from the true values.
    pub fn score(
        &self,
        subject: &str,
        y_true: &NamedTensors,
        y_pred: &NamedTensors,
        weights: Option<&NamedTensors>,
    ) -> Result<Vec<ScoreRecord>> {
        let mut records = Vec::new();
        for group in &self.config.y_fields {
            let truth = y_true.require(&group.name)?;
            let pred = y_pred.require(&group.name)?;
            if truth.shape() != pred.shape() {
                return Err(PipelineError::shape_mismatch(
                    format!("prediction of {}", group.name),
                    truth.shape(),
                    pred.shape(),
                ));
            }
            let (steps, samples, _) = truth.dim();
            for (col, field) in group.fields.iter().enumerate() {
                let mask = match weights.and_then(|w| w.get(&group.name)) {
                    Some(w) => self.weight_mask(w, &group.name, col, (steps, samples))?,
                    None => {
                        warn!(output = %group.name, field = %field, "Default weights used: every sample is scored");
                        Array2::from_elem((steps, samples), true)
                    }
                };
                records.push(Self::score_field(
                    subject,
                    &group.name,
                    field,
                    truth.index_axis(Axis(2), col),
                    pred.index_axis(Axis(2), col),
                    mask.view(),
                ));
            }
        }
        Ok(records)
    }

    fn weight_mask(
        &self,
        w: &Array3<f64>,
        output: &str,
        col: usize,
        shape: (usize, usize),
    ) -> Result<Array2<bool>> {
        let (steps, samples, cols) = w.dim();
        if (steps, samples) != shape {
            return Err(PipelineError::shape_mismatch(
                format!("weights of {output}"),
                &[shape.0, shape.1],
                &[steps, samples],
            ));
        }
        // A single weight column applies to every field of the output.
        let c = if cols == 1 { 0 } else { col };
        if c >= cols {
            return Err(PipelineError::shape_mismatch(
                format!("weight columns of {output}"),
                &[col + 1],
                &[cols],
            ));
        }
        let target = self.config.mask_value;
        Ok(w.index_axis(Axis(2), c).mapv(|v| v == target))
    }
}

/// Average each metric per `(output, field)` over the concatenation of every
/// record's per-step values, ignoring NaN.
#[must_use]
pub fn mean_scores(records: &[ScoreRecord]) -> Vec<MeanScore> {
    let mut keys: Vec<(&str, &str)> = Vec::new();
    for r in records {
        let key = (r.output.as_str(), r.field.as_str());
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    keys.into_iter()
        .map(|(output, field)| {
            let group: Vec<&ScoreRecord> = records
                .iter()
                .filter(|r| r.output == output && r.field == field)
                .collect();
            let pooled = |metric: fn(&ScoreRecord) -> &[f64]| -> f64 {
                let values: Vec<f64> = group.iter().flat_map(|r| metric(r).iter().copied()).collect();
                nan_mean(&values)
            };
            let score = MeanScore {
                output: output.to_string(),
                field: field.to_string(),
                r2: pooled(|r| r.r2.as_slice()),
                r2_all: pooled(|r| r.r2_all.as_slice()),
                rmse: pooled(|r| r.rmse.as_slice()),
                mae: pooled(|r| r.mae.as_slice()),
                r_rmse: pooled(|r| r.r_rmse.as_slice()),
                cor_value: pooled(|r| r.cor_value.as_slice()),
            };
            info!(
                output,
                field,
                r2 = score.r2,
                rmse = score.rmse,
                mae = score.mae,
                r_rmse = score.r_rmse,
                cor = score.cor_value,
                "Mean score"
            );
            score
        })
        .collect()
}
