//! Subject-wise cross-validation.
//!
//! Subjects are split into contiguous held-out folds. For each fold the
//! remaining subjects are concatenated into a private training array,
//! globally shuffled with a fixed seed, normalized, and handed to the model;
//! every held-out subject is then predicted and scored on its own.

use ndarray::Axis;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::fields::{FieldExtractor, NamedTensors};
use crate::model::{Trainable, TrainingSet, ValidationSet};
use crate::normalizer::Normalizer;
use crate::scorer::{mean_scores, MeanScore, ScoreRecord, Scorer};
use crate::store::SubjectStore;

/// One train/test partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub index: usize,
    pub test: Vec<String>,
    pub train: Vec<String>,
}

/// Partition `subjects` into contiguous folds of `test_fold_size` held-out
/// subjects. The last fold may be smaller. Order is preserved.
///
/// # Errors
///
/// Fails when `test_fold_size` is zero.
pub fn fold_plan<S: AsRef<str>>(subjects: &[S], test_fold_size: usize) -> Result<Vec<Fold>> {
    if test_fold_size == 0 {
        return Err(PipelineError::invalid_config("test_fold_size must be at least 1"));
    }
    let ids: Vec<String> = subjects.iter().map(|s| s.as_ref().to_string()).collect();
    Ok(ids
        .chunks(test_fold_size)
        .enumerate()
        .map(|(index, test)| {
            let train = ids
                .iter()
                .filter(|id| !test.contains(id))
                .cloned()
                .collect();
            Fold {
                index,
                test: test.to_vec(),
                train,
            }
        })
        .collect())
}

/// Extracted model inputs, outputs and scoring weights of a subject set.
#[derive(Debug, Clone, Default)]
pub struct Split {
    pub x: NamedTensors,
    pub y: NamedTensors,
    pub weights: NamedTensors,
}

impl Split {
    /// Reorder the steps of every tensor with a permutation seeded by `seed`.
    #[must_use]
    pub fn shuffled(self, seed: u64) -> Self {
        let mut order: Vec<usize> = (0..self.x.steps()).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        order.shuffle(&mut rng);

        let permute = |tensors: NamedTensors| {
            let mut out = NamedTensors::new();
            for (name, t) in tensors.iter() {
                out.insert(name, t.select(Axis(0), &order));
            }
            out
        };
        Self {
            x: permute(self.x),
            y: permute(self.y),
            weights: permute(self.weights),
        }
    }
}

/// Per-subject records and their per-field means.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossValidationReport {
    pub records: Vec<ScoreRecord>,
    pub means: Vec<MeanScore>,
}

/// Runs folds over an immutable [`SubjectStore`].
pub struct CrossValidator<'a> {
    store: &'a SubjectStore,
    config: &'a PipelineConfig,
    model: Option<Box<dyn Trainable + 'a>>,
}

impl<'a> CrossValidator<'a> {
    #[must_use]
    pub fn new(store: &'a SubjectStore, config: &'a PipelineConfig) -> Self {
        Self {
            store,
            config,
            model: None,
        }
    }

    #[must_use]
    pub fn with_model<M: Trainable + 'a>(mut self, model: M) -> Self {
        self.model = Some(Box::new(model));
        self
    }

    /// Concatenate `subjects` and extract the configured field groups.
    ///
    /// # Errors
    ///
    /// Fails on unknown subjects or fields missing from the store.
    pub fn split<S: AsRef<str>>(&self, subjects: &[S]) -> Result<Split> {
        let data = self.store.concatenate(subjects)?;
        let extractor = FieldExtractor::new(self.store.field_index());
        Ok(Split {
            x: extractor.extract(&data, &self.config.x_fields)?,
            y: extractor.extract(&data, &self.config.y_fields)?,
            weights: extractor.extract(&data, &self.config.weights)?,
        })
    }

    /// Train on `train`, optionally validate on `validation`, and score every
    /// subject of `test` separately.
    ///
    /// # Errors
    ///
    /// [`PipelineError::UnimplementedCapability`] without a model; otherwise
    /// any extraction, normalization, model or scoring failure.
    pub fn train_and_evaluate<S: AsRef<str>>(
        &mut self,
        train: &[S],
        validation: Option<&[S]>,
        test: &[S],
    ) -> Result<Vec<ScoreRecord>> {
        if self.model.is_none() {
            return Err(PipelineError::unimplemented("no model to train"));
        }
        let train_split = self.split(train)?.shuffled(self.config.shuffle_seed);
        let (normalizer, x_train) =
            Normalizer::from_config(self.config).fit_transform(&train_split.x)?;

        let validation = match validation {
            Some(ids) => {
                let split = self.split(ids)?;
                let x = normalizer.transform(&split.x)?;
                Some((x, split))
            }
            None => None,
        };

        let model = self
            .model
            .as_mut()
            .ok_or_else(|| PipelineError::unimplemented("no model to train"))?;
        debug!(model = model.name(), steps = x_train.steps(), "Training");
        let handle = model.train(
            TrainingSet {
                x: &x_train,
                y: &train_split.y,
            },
            validation.as_ref().map(|(x, split)| ValidationSet {
                x,
                y: &split.y,
                weights: &split.weights,
                mask_value: self.config.mask_value,
            }),
        )?;

        let scorer = Scorer::new(self.config);
        let mut records = Vec::new();
        for subject in test {
            let subject = subject.as_ref();
            let split = self.split(&[subject])?;
            let x = normalizer.transform(&split.x)?;
            let pred = handle.predict(&x)?;
            let weights = (!split.weights.is_empty()).then_some(&split.weights);
            records.extend(scorer.score(subject, &split.y, &pred, weights)?);
        }
        Ok(records)
    }

    /// Cross-validate over `subject_ids` with `test_fold_size` held-out
    /// subjects per fold. Any fold failure aborts the run.
    ///
    /// # Errors
    ///
    /// [`PipelineError::UnimplementedCapability`] before any fold runs when no
    /// model is set; otherwise the first fold error.
    pub fn run<S: AsRef<str>>(
        &mut self,
        subject_ids: &[S],
        test_fold_size: usize,
    ) -> Result<Vec<ScoreRecord>> {
        if self.model.is_none() {
            return Err(PipelineError::unimplemented("no model to train"));
        }
        let folds = fold_plan(subject_ids, test_fold_size)?;
        let mut records = Vec::new();
        for fold in &folds {
            info!(
                fold = fold.index,
                test = ?fold.test,
                train = fold.train.len(),
                "Cross validation fold"
            );
            records.extend(self.train_and_evaluate(&fold.train, None, &fold.test)?);
        }
        info!(folds = folds.len(), records = records.len(), "Cross validation done");
        Ok(records)
    }

    /// [`run`](Self::run) followed by per-field aggregation.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    pub fn evaluate<S: AsRef<str>>(
        &mut self,
        subject_ids: &[S],
        test_fold_size: usize,
    ) -> Result<CrossValidationReport> {
        let records = self.run(subject_ids, test_fold_size)?;
        let means = mean_scores(&records);
        Ok(CrossValidationReport { records, means })
    }
}
