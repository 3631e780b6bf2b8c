//! The training loop.
//!
//! Drives a [`Seq2SeqModel`] over the train split, evaluates every split
//! at each epoch boundary, and checkpoints through a [`CheckpointStore`]:
//! an unconditional save on a fixed epoch cadence, and best-metric labels
//! whenever validation strictly improves. A step that is best under
//! several metrics is saved once and labelled once per metric.

use std::sync::atomic::{AtomicBool, Ordering};

use candle_core::Device;
use tracing::info;

use crate::checkpoint::{CheckpointHandle, CheckpointMeta, CheckpointStore};
use crate::config::TrainConfig;
use crate::data::{BatchIterator, DataSplits};
use crate::error::{TrainError, TrainResult};
use crate::eval::{evaluate, EvalOptions, EvalResult};
use crate::logging::{append_eval_csv, log_evaluation, log_train_step};
use crate::model::Seq2SeqModel;
use crate::vocab::Vocabulary;

pub const BEST_CROSS_ENT: &str = "best_cross_ent";
pub const BEST_BLEU: &str = "best_bleu";
pub const BEST_PERP: &str = "best_perp";

/// Best validation metrics seen so far. Improvement is strict: equalling
/// the incumbent never labels.
#[derive(Debug, Clone)]
pub struct BestTrackers {
    pub cross_entropy: f64,
    pub bleu: f64,
    pub perplexity: f64,
}

impl Default for BestTrackers {
    fn default() -> Self {
        BestTrackers {
            cross_entropy: f64::INFINITY,
            bleu: 0.0,
            perplexity: f64::INFINITY,
        }
    }
}

impl BestTrackers {
    /// Fold in one validation result; returns the labels that improved.
    pub fn update(&mut self, result: &EvalResult) -> Vec<&'static str> {
        let mut labels = Vec::new();
        if result.cross_entropy < self.cross_entropy {
            self.cross_entropy = result.cross_entropy;
            labels.push(BEST_CROSS_ENT);
        }
        if result.bleu.bleu > self.bleu {
            self.bleu = result.bleu.bleu;
            labels.push(BEST_BLEU);
        }
        if result.perplexity < self.perplexity {
            self.perplexity = result.perplexity;
            labels.push(BEST_PERP);
        }
        labels
    }
}

/// What a completed run reports back.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub steps: usize,
    pub epochs: usize,
    pub best: BestTrackers,
    pub final_test: EvalResult,
}

/// Composition of model, store, data and config into one run.
pub struct TrainingLoop<'a, M: Seq2SeqModel, S: CheckpointStore> {
    model: &'a mut M,
    store: &'a mut S,
    splits: &'a DataSplits,
    words: &'a Vocabulary,
    chars: &'a Vocabulary,
    config: &'a TrainConfig,
    device: Device,
    trackers: BestTrackers,
    /// Last saved step and its handle, for save-once labelling.
    saved: Option<CheckpointHandle>,
}

impl<'a, M: Seq2SeqModel, S: CheckpointStore> TrainingLoop<'a, M, S> {
    pub fn new(
        model: &'a mut M,
        store: &'a mut S,
        splits: &'a DataSplits,
        words: &'a Vocabulary,
        chars: &'a Vocabulary,
        config: &'a TrainConfig,
        device: &Device,
    ) -> Self {
        TrainingLoop {
            model,
            store,
            splits,
            words,
            chars,
            config,
            device: device.clone(),
            trackers: BestTrackers::default(),
            saved: None,
        }
    }

    fn eval_options(&self, max_points: usize) -> EvalOptions {
        EvalOptions {
            batch_size: self.config.batch_size,
            max_points,
            max_infer_len: self.config.max_infer_len,
            sample_count: self.config.sample_count,
        }
    }

    /// Save at `step` unless that step is already on disk.
    fn ensure_saved(
        &mut self,
        step: usize,
        epoch: usize,
        valid: Option<&EvalResult>,
    ) -> TrainResult<CheckpointHandle> {
        if let Some(handle) = &self.saved {
            if handle.step == step {
                return Ok(handle.clone());
            }
        }
        let mut meta = CheckpointMeta::new(step, epoch);
        if let Some(valid) = valid {
            meta.valid_cross_entropy = valid.cross_entropy;
            meta.valid_bleu = valid.bleu.bleu;
            meta.valid_perplexity = valid.perplexity;
        }
        let state = self.model.export_state()?;
        let handle = self.store.save(&state, &meta)?;
        self.saved = Some(handle.clone());
        Ok(handle)
    }

    fn evaluate_split(&self, split_name: &str, epoch: usize, step: usize) -> TrainResult<EvalResult> {
        let (split, points) = match split_name {
            "train" => (&self.splits.train, self.config.eval_train_points),
            "valid" => (&self.splits.valid, self.config.eval_valid_points),
            _ => (&self.splits.test, self.config.eval_test_points),
        };
        let result = evaluate(
            &*self.model,
            split,
            self.words,
            self.chars,
            &self.eval_options(points),
            &self.device,
        )?;
        log_evaluation(split_name, epoch, &result);
        if let Some(csv) = &self.config.metrics_csv {
            append_eval_csv(csv, split_name, epoch, step, &result)?;
        }
        Ok(result)
    }

    /// End-of-epoch work: evals, cadence save, best-metric labelling.
    fn on_epoch_end(&mut self, epoch: usize, step: usize) -> TrainResult<EvalResult> {
        self.evaluate_split("train", epoch, step)?;
        let valid = self.evaluate_split("valid", epoch, step)?;
        self.evaluate_split("test", epoch, step)?;

        for sample in &valid.samples {
            info!("{sample}");
        }

        if epoch % self.config.checkpoint_every_epochs == 0 {
            self.ensure_saved(step, epoch, Some(&valid))?;
        }

        let labels = self.trackers.update(&valid);
        if !labels.is_empty() {
            let handle = self.ensure_saved(step, epoch, Some(&valid))?;
            for label in labels {
                self.store.backup_as(&handle, label)?;
            }
        }
        Ok(valid)
    }

    /// Run to completion or until `cancel` is raised.
    ///
    /// On cancellation the current state is saved before returning
    /// `TrainError::Interrupted`, so no work is lost either way.
    pub fn run(mut self, cancel: &AtomicBool) -> TrainResult<RunSummary> {
        let batches = BatchIterator::new(
            &self.splits.train,
            self.config.batch_size,
            Some(self.config.epochs),
            true,
            self.config.seed,
            &self.device,
        );
        let batches_per_epoch = batches.batches_per_epoch();
        info!(
            total_batches = batches.total_batches(),
            batches_per_epoch,
            epochs = self.config.epochs,
            "starting training"
        );

        let mut step = 0usize;
        let mut last_valid: Option<EvalResult> = None;
        for batch in batches {
            let batch = batch?;
            let stats = self.model.train_step(&batch)?;
            step += 1;
            log_train_step(step, step / batches_per_epoch.max(1), stats.loss);

            if cancel.load(Ordering::Relaxed) {
                let epoch = step / batches_per_epoch.max(1);
                self.ensure_saved(step, epoch, last_valid.as_ref())?;
                return Err(TrainError::Interrupted { step });
            }

            if step % batches_per_epoch == 0 {
                let epoch = step / batches_per_epoch;
                last_valid = Some(self.on_epoch_end(epoch, step)?);
            }
        }

        let epochs = if batches_per_epoch == 0 {
            0
        } else {
            step / batches_per_epoch
        };
        self.ensure_saved(step, epochs, last_valid.as_ref())?;

        let final_test = self.evaluate_split("test", epochs, step)?;
        info!(
            steps = step,
            epochs,
            best_cross_entropy = self.trackers.cross_entropy,
            best_bleu = self.trackers.bleu,
            best_perplexity = self.trackers.perplexity,
            "training finished"
        );
        Ok(RunSummary {
            steps: step,
            epochs,
            best: self.trackers,
            final_test,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argdoc_eval::BleuScore;

    fn result(cross_entropy: f64, bleu: f64, perplexity: f64) -> EvalResult {
        EvalResult {
            cross_entropy,
            perplexity,
            bleu: BleuScore {
                bleu,
                precisions: vec![bleu; 4],
                brevity_penalty: 1.0,
                length_ratio: 1.0,
                candidate_length: 10,
                reference_length: 10,
            },
            points: 10,
            samples: Vec::new(),
        }
    }

    #[test]
    fn test_trackers_label_only_strict_improvement() {
        let mut trackers = BestTrackers::default();
        let mut labelled_at = Vec::new();
        for (i, ce) in [5.0, 4.0, 4.5, 3.0].into_iter().enumerate() {
            let labels = trackers.update(&result(ce, 0.0, f64::INFINITY));
            if labels.contains(&BEST_CROSS_ENT) {
                labelled_at.push(i);
            }
        }
        // The first eval beats the infinite baseline; after that only the
        // two strict improvements label. 4.5 never does.
        assert_eq!(labelled_at, vec![0, 1, 3]);
        assert_eq!(trackers.cross_entropy, 3.0);
    }

    #[test]
    fn test_trackers_are_independent() {
        let mut trackers = BestTrackers::default();
        let labels = trackers.update(&result(2.0, 0.1, 7.0));
        assert_eq!(labels, vec![BEST_CROSS_ENT, BEST_BLEU, BEST_PERP]);

        // Better BLEU, worse everything else.
        let labels = trackers.update(&result(3.0, 0.2, 8.0));
        assert_eq!(labels, vec![BEST_BLEU]);
    }

    #[test]
    fn test_zero_bleu_never_labels() {
        let mut trackers = BestTrackers::default();
        let labels = trackers.update(&result(1.0, 0.0, 2.0));
        assert!(!labels.contains(&BEST_BLEU));
    }

    #[test]
    fn test_infinite_perplexity_never_labels() {
        let mut trackers = BestTrackers::default();
        let labels = trackers.update(&result(1.0, 0.1, f64::INFINITY));
        assert!(!labels.contains(&BEST_PERP));
    }
}
