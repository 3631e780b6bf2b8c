//! The model seam the training loop drives.
//!
//! The loop never constructs a model itself; it is handed anything
//! implementing [`Seq2SeqModel`]. [`UnigramBaseline`] is the reference
//! implementation: a smoothed unigram language model over description
//! tokens, cheap enough for end-to-end runs and tests.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::data::Batch;
use crate::error::{TrainError, TrainResult};

/// Per-step statistics reported by a model after one optimizer step.
#[derive(Debug, Clone, Copy)]
pub struct StepStats {
    /// Mean cross-entropy over the batch, in nats.
    pub loss: f64,
}

/// Capabilities the training loop needs from a model.
pub trait Seq2SeqModel {
    /// Run one optimizer step on a batch and report its loss.
    fn train_step(&mut self, batch: &Batch) -> TrainResult<StepStats>;

    /// Evaluate mean cross-entropy on a batch without updating weights.
    fn loss(&self, batch: &Batch) -> TrainResult<f64>;

    /// Generate description token ids for each record in the batch, at
    /// most `max_len` ids each. Outputs begin after `<START>` and should
    /// end with the `<END>` id.
    fn infer(&self, batch: &Batch, max_len: usize) -> TrainResult<Vec<Vec<u32>>>;

    /// Serialize the model state for checkpointing.
    fn export_state(&self) -> TrainResult<Vec<u8>>;

    /// Restore state produced by [`Seq2SeqModel::export_state`].
    fn import_state(&mut self, bytes: &[u8]) -> TrainResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UnigramState {
    counts: HashMap<u32, u64>,
    total: u64,
}

/// Add-one-smoothed unigram model over description tokens.
///
/// Ignores the name side entirely; inference emits the most frequent
/// description tokens in rank order, then `<END>`. Useful as a floor for
/// BLEU and perplexity and as the loop's default collaborator.
pub struct UnigramBaseline {
    state: UnigramState,
    vocab_size: usize,
    end_id: u32,
    /// Tokens emitted before `<END>` at inference time.
    infer_tokens: usize,
}

impl UnigramBaseline {
    pub fn new(vocab_size: usize, end_id: u32, infer_tokens: usize) -> Self {
        UnigramBaseline {
            state: UnigramState {
                counts: HashMap::new(),
                total: 0,
            },
            vocab_size,
            end_id,
            infer_tokens,
        }
    }

    /// Interior tokens of one padded description row: everything after
    /// the leading `<START>` up to the first pad.
    fn interior(row: &[u32]) -> &[u32] {
        let end = row.iter().position(|&i| i == 0).unwrap_or(row.len());
        &row[1.min(end)..end]
    }

    fn desc_rows(batch: &Batch) -> TrainResult<Vec<Vec<u32>>> {
        Ok(batch.descs.to_vec2::<u32>()?)
    }

    /// Smoothed negative log-likelihood per token, averaged over the batch.
    fn nll(&self, rows: &[Vec<u32>]) -> f64 {
        let denom = (self.state.total + self.vocab_size as u64) as f64;
        let mut total = 0.0;
        let mut tokens = 0usize;
        for row in rows {
            for &id in Self::interior(row) {
                let count = self.state.counts.get(&id).copied().unwrap_or(0);
                total -= (((count + 1) as f64) / denom).ln();
                tokens += 1;
            }
        }
        if tokens == 0 {
            0.0
        } else {
            total / tokens as f64
        }
    }

    #[cfg(test)]
    pub(crate) fn observed_total(&self) -> u64 {
        self.state.total
    }
}

impl Seq2SeqModel for UnigramBaseline {
    fn train_step(&mut self, batch: &Batch) -> TrainResult<StepStats> {
        let rows = Self::desc_rows(batch)?;
        for row in &rows {
            for &id in Self::interior(row) {
                *self.state.counts.entry(id).or_insert(0) += 1;
                self.state.total += 1;
            }
        }
        Ok(StepStats {
            loss: self.nll(&rows),
        })
    }

    fn loss(&self, batch: &Batch) -> TrainResult<f64> {
        Ok(self.nll(&Self::desc_rows(batch)?))
    }

    fn infer(&self, batch: &Batch, max_len: usize) -> TrainResult<Vec<Vec<u32>>> {
        let mut ranked: Vec<(u32, u64)> = self
            .state
            .counts
            .iter()
            .filter(|&(&id, _)| id != self.end_id)
            .map(|(&id, &count)| (id, count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let body_len = self.infer_tokens.min(max_len.saturating_sub(1));
        let mut output: Vec<u32> = ranked.iter().take(body_len).map(|&(id, _)| id).collect();
        output.push(self.end_id);
        Ok(vec![output; batch.len()])
    }

    fn export_state(&self) -> TrainResult<Vec<u8>> {
        serde_json::to_vec(&self.state)
            .map_err(|e| TrainError::Model(format!("state serialization: {e}")))
    }

    fn import_state(&mut self, bytes: &[u8]) -> TrainResult<()> {
        self.state = serde_json::from_slice(bytes)
            .map_err(|e| TrainError::Model(format!("state deserialization: {e}")))?;
        Ok(())
    }
}

/// Build a `[batch, len]` u32 tensor from rows, for tests and adapters.
#[cfg(test)]
pub(crate) fn tensor_from_rows(
    rows: &[Vec<u32>],
    device: &candle_core::Device,
) -> TrainResult<candle_core::Tensor> {
    crate::tokenize::rows_to_tensor(rows, device)
}
