//! Evaluation: cross-entropy, perplexity and corpus BLEU over a split.

use std::fmt;

use candle_core::Device;

use argdoc_eval::{compute_bleu, corpus_perplexity, BleuScore};
use tracing::warn;

use crate::data::BatchIterator;
use crate::error::TrainResult;
use crate::model::Seq2SeqModel;
use crate::tokenize::EncodedSplit;
use crate::translate::{decode, decode_name, inner_tokens};
use crate::vocab::{Vocabulary, START_TOKEN};

/// BLEU n-gram order used throughout.
pub const BLEU_ORDER: usize = 4;

/// Bounds for one evaluation pass.
#[derive(Debug, Clone)]
pub struct EvalOptions {
    pub batch_size: usize,
    /// Evaluate on at most this many records of the split.
    pub max_points: usize,
    /// Generation budget per record.
    pub max_infer_len: usize,
    /// Number of sample translations to collect for display.
    pub sample_count: usize,
}

/// One record rendered for inspection.
#[derive(Debug, Clone)]
pub struct SampleTranslation {
    /// Decoded name encoding, sentinels included.
    pub name: String,
    /// Raw reference description words.
    pub description: Vec<String>,
    /// The description as the model sees it after vocabulary lookup.
    pub tokenized: Vec<String>,
    /// The model's output, sentinels stripped.
    pub inferred: Vec<String>,
}

impl fmt::Display for SampleTranslation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ARGN: {}", self.name)?;
        writeln!(f, "DESC: {}", self.description.join(" "))?;
        writeln!(f, "TOKN: {}", self.tokenized.join(" "))?;
        write!(f, "INFR: {}", self.inferred.join(" "))
    }
}

/// Metrics from one pass over a split.
#[derive(Debug, Clone)]
pub struct EvalResult {
    /// Mean cross-entropy per record, in nats.
    pub cross_entropy: f64,
    pub perplexity: f64,
    pub bleu: BleuScore,
    pub points: usize,
    pub samples: Vec<SampleTranslation>,
}

/// Run the model over a split without weight updates.
///
/// Batches are cut in stable order. Candidates that come back empty are
/// logged and left empty; BLEU substitutes its no-translation sentinel so
/// corpus lengths stay aligned.
pub fn evaluate(
    model: &dyn Seq2SeqModel,
    split: &EncodedSplit,
    words: &Vocabulary,
    chars: &Vocabulary,
    opts: &EvalOptions,
    device: &Device,
) -> TrainResult<EvalResult> {
    let bounded = split.bounded(opts.max_points);
    let points = bounded.len();

    let mut batch_losses = Vec::new();
    let mut batch_sizes = Vec::new();
    let mut reference_lengths = Vec::with_capacity(points);
    let mut reference_corpus: Vec<Vec<Vec<String>>> = Vec::with_capacity(points);
    let mut candidate_corpus: Vec<Vec<String>> = Vec::with_capacity(points);
    let mut samples = Vec::new();

    let mut record_idx = 0usize;
    for batch in BatchIterator::new(&bounded, opts.batch_size, Some(1), false, 0, device) {
        let batch = batch?;
        batch_losses.push(model.loss(&batch)?);
        batch_sizes.push(batch.len());

        let outputs = model.infer(&batch, opts.max_infer_len)?;
        let name_rows = batch.names.to_vec2::<u32>()?;
        let desc_rows = batch.descs.to_vec2::<u32>()?;

        for (i, reference) in batch.references.iter().enumerate() {
            reference_lengths.push(reference.len());
            reference_corpus.push(vec![reference.clone()]);

            let decoded = decode(&outputs[i], words, true, Some(START_TOKEN))?;
            let candidate = inner_tokens(&decoded);
            if candidate.is_empty() {
                warn!(record = record_idx, "empty translation");
            }

            if samples.len() < opts.sample_count {
                samples.push(SampleTranslation {
                    name: decode_name(&name_rows[i], chars)?,
                    description: reference.clone(),
                    tokenized: decode(&desc_rows[i], words, true, None)?,
                    inferred: candidate.clone(),
                });
            }
            candidate_corpus.push(candidate);
            record_idx += 1;
        }
    }

    let bleu = compute_bleu(&reference_corpus, &candidate_corpus, BLEU_ORDER, false);
    let perplexity = corpus_perplexity(&batch_losses, &batch_sizes, &reference_lengths);
    let total: usize = batch_sizes.iter().sum();
    let cross_entropy = if total == 0 {
        0.0
    } else {
        batch_losses
            .iter()
            .zip(&batch_sizes)
            .map(|(l, &s)| l * s as f64)
            .sum::<f64>()
            / total as f64
    };

    Ok(EvalResult {
        cross_entropy,
        perplexity,
        bleu,
        points,
        samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Batch;
    use crate::error::TrainResult;
    use crate::model::StepStats;
    use crate::vocab::{END_TOKEN, UNKNOWN_TOKEN};

    /// Echoes a fixed output for every record and a fixed loss.
    struct FixedModel {
        output: Vec<u32>,
        loss: f64,
    }

    impl Seq2SeqModel for FixedModel {
        fn train_step(&mut self, _batch: &Batch) -> TrainResult<StepStats> {
            Ok(StepStats { loss: self.loss })
        }
        fn loss(&self, _batch: &Batch) -> TrainResult<f64> {
            Ok(self.loss)
        }
        fn infer(&self, batch: &Batch, _max_len: usize) -> TrainResult<Vec<Vec<u32>>> {
            Ok(vec![self.output.clone(); batch.len()])
        }
        fn export_state(&self) -> TrainResult<Vec<u8>> {
            Ok(Vec::new())
        }
        fn import_state(&mut self, _bytes: &[u8]) -> TrainResult<()> {
            Ok(())
        }
    }

    fn word_vocab() -> Vocabulary {
        let mut v = Vocabulary::with_pad();
        for tok in [UNKNOWN_TOKEN, START_TOKEN, END_TOKEN, "the", "axis", "to", "sum"] {
            v.push(tok);
        }
        v
    }

    fn char_vocab() -> Vocabulary {
        let mut v = Vocabulary::with_pad();
        for tok in ["a", "x", "i", "s", END_TOKEN] {
            v.push(tok);
        }
        v
    }

    // Reference description for every record: "the axis to sum".
    fn reference_ids(words: &Vocabulary) -> Vec<u32> {
        ["the", "axis", "to", "sum"]
            .iter()
            .map(|t| words.index(t).unwrap())
            .collect()
    }

    fn split() -> EncodedSplit {
        let words = word_vocab();
        let start = words.index(START_TOKEN).unwrap();
        let end = words.index(END_TOKEN).unwrap();
        let mut desc = vec![start];
        desc.extend(reference_ids(&words));
        desc.push(end);
        desc.push(0);
        let reference: Vec<String> = ["the", "axis", "to", "sum"]
            .iter()
            .map(|t| t.to_string())
            .collect();
        EncodedSplit {
            name_rows: vec![vec![1, 2, 3, 4, 5, 0]; 3],
            desc_rows: vec![desc; 3],
            src_rows: Vec::new(),
            references: vec![reference; 3],
        }
    }

    #[test]
    fn test_perfect_model_gets_bleu_one() {
        let words = word_vocab();
        let end = words.index(END_TOKEN).unwrap();
        let mut output = reference_ids(&words);
        output.push(end);
        let model = FixedModel { output, loss: 0.5 };
        let opts = EvalOptions {
            batch_size: 2,
            max_points: 100,
            max_infer_len: 10,
            sample_count: 2,
        };
        let result =
            evaluate(&model, &split(), &words, &char_vocab(), &opts, &Device::Cpu).unwrap();
        assert_eq!(result.points, 3);
        assert!((result.bleu.bleu - 1.0).abs() < 1e-9);
        assert!((result.cross_entropy - 0.5).abs() < 1e-12);
        // Total loss mass over 3 * (4 + 1) reference words.
        let expected_perp = (0.5 * 3.0 / 15.0f64).exp();
        assert!((result.perplexity - expected_perp).abs() < 1e-9);
        assert_eq!(result.samples.len(), 2);
    }

    #[test]
    fn test_empty_output_scores_zero_bleu() {
        let words = word_vocab();
        let end = words.index(END_TOKEN).unwrap();
        // Only <END>: nothing left after sentinel stripping.
        let model = FixedModel {
            output: vec![end],
            loss: 1.0,
        };
        let opts = EvalOptions {
            batch_size: 2,
            max_points: 100,
            max_infer_len: 10,
            sample_count: 1,
        };
        let result =
            evaluate(&model, &split(), &words, &char_vocab(), &opts, &Device::Cpu).unwrap();
        assert_eq!(result.bleu.bleu, 0.0);
        assert!(result.samples[0].inferred.is_empty());
    }

    /// Loss equal to the batch size, to expose aggregation weighting.
    struct SizeLossModel;

    impl Seq2SeqModel for SizeLossModel {
        fn train_step(&mut self, batch: &Batch) -> TrainResult<StepStats> {
            Ok(StepStats {
                loss: batch.len() as f64,
            })
        }
        fn loss(&self, batch: &Batch) -> TrainResult<f64> {
            Ok(batch.len() as f64)
        }
        fn infer(&self, batch: &Batch, _max_len: usize) -> TrainResult<Vec<Vec<u32>>> {
            Ok(vec![Vec::new(); batch.len()])
        }
        fn export_state(&self) -> TrainResult<Vec<u8>> {
            Ok(Vec::new())
        }
        fn import_state(&mut self, _bytes: &[u8]) -> TrainResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_cross_entropy_weights_short_final_batch() {
        let words = word_vocab();
        let opts = EvalOptions {
            batch_size: 2,
            max_points: 100,
            max_infer_len: 10,
            sample_count: 0,
        };
        // 3 records in batches of 2 and 1; per-record weighting gives
        // (2*2 + 1*1) / 3, not the per-batch mean of 1.5.
        let result = evaluate(
            &SizeLossModel,
            &split(),
            &words,
            &char_vocab(),
            &opts,
            &Device::Cpu,
        )
        .unwrap();
        assert!((result.cross_entropy - 5.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_max_points_bounds_the_pass() {
        let words = word_vocab();
        let model = FixedModel {
            output: vec![words.index(END_TOKEN).unwrap()],
            loss: 2.0,
        };
        let opts = EvalOptions {
            batch_size: 2,
            max_points: 2,
            max_infer_len: 10,
            sample_count: 0,
        };
        let result =
            evaluate(&model, &split(), &words, &char_vocab(), &opts, &Device::Cpu).unwrap();
        assert_eq!(result.points, 2);
        assert!(result.samples.is_empty());
    }

    #[test]
    fn test_sample_display_layout() {
        let sample = SampleTranslation {
            name: format!("axis{END_TOKEN}"),
            description: vec!["the".into(), "axis".into()],
            tokenized: vec![START_TOKEN.into(), "the".into(), UNKNOWN_TOKEN.into()],
            inferred: vec!["the".into()],
        };
        let text = sample.to_string();
        assert!(text.starts_with("ARGN: axis<END>\n"));
        assert!(text.contains("DESC: the axis\n"));
        assert!(text.contains("TOKN: <START> the <UNK>\n"));
        assert!(text.ends_with("INFR: the"));
    }
}
