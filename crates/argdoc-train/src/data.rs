//! Dataset records and batch iteration.
//!
//! Records arrive as JSON lines; batches are cut from padded index arrays
//! with one fresh shuffle per epoch. The iterator covers each epoch
//! exactly once: `epochs * ceil(n / batch_size)` batches in total, with
//! the final batch of an epoch allowed to run short.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{IoResultExt, TrainError, TrainResult};
use crate::tokenize::{rows_to_tensor, EncodedSplit};

/// One documented function argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Enclosing function name.
    pub name: String,
    /// All argument names of the function, in order.
    pub args: Vec<String>,
    /// The argument this record documents.
    pub arg_name: String,
    /// Its natural-language description.
    pub arg_desc: String,
    /// Source text of the enclosing function, may be empty.
    #[serde(default)]
    pub src: String,
}

/// Load a JSON-lines record file. Blank lines are skipped; a malformed
/// line is fatal with its line number.
pub fn load_records(path: &Path) -> TrainResult<Vec<Record>> {
    let file = File::open(path).with_path(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_path(path)?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(&line).map_err(|e| {
            TrainError::DataLoading(format!("{}:{}: {e}", path.display(), lineno + 1))
        })?;
        records.push(record);
    }
    info!(path = %path.display(), records = records.len(), "loaded records");
    Ok(records)
}

/// The three data splits, already encoded and padded.
#[derive(Debug, Clone)]
pub struct DataSplits {
    pub train: EncodedSplit,
    pub valid: EncodedSplit,
    pub test: EncodedSplit,
}

/// One training batch: stacked tensors plus the raw references for the
/// records it covers.
#[derive(Debug)]
pub struct Batch {
    /// `[batch, char_seq + 1]` encoded names.
    pub names: Tensor,
    /// `[batch, desc_seq + 1]` encoded descriptions.
    pub descs: Tensor,
    /// `[batch, src_seq + 1]` when a code strategy is active.
    pub src: Option<Tensor>,
    /// Raw description words per record in batch order.
    pub references: Vec<Vec<String>>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}

/// Cuts shuffled batches out of an encoded split, one permutation per
/// epoch. `epochs: None` streams forever.
pub struct BatchIterator<'a> {
    split: &'a EncodedSplit,
    batch_size: usize,
    epochs: Option<usize>,
    shuffle: bool,
    device: Device,
    rng: StdRng,
    /// Record order for the current epoch.
    order: Vec<usize>,
    epoch: usize,
    /// Next batch index within the current epoch.
    cursor: usize,
    batches_per_epoch: usize,
}

impl<'a> BatchIterator<'a> {
    pub fn new(
        split: &'a EncodedSplit,
        batch_size: usize,
        epochs: Option<usize>,
        shuffle: bool,
        seed: u64,
        device: &Device,
    ) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");
        let mut iter = BatchIterator {
            split,
            batch_size,
            epochs,
            shuffle,
            device: device.clone(),
            rng: StdRng::seed_from_u64(seed),
            order: (0..split.len()).collect(),
            epoch: 0,
            cursor: 0,
            batches_per_epoch: split.len().div_ceil(batch_size),
        };
        iter.reshuffle();
        iter
    }

    /// Epoch currently being served, starting at zero.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn batches_per_epoch(&self) -> usize {
        self.batches_per_epoch
    }

    /// Total batch count; `None` for an unbounded stream.
    pub fn total_batches(&self) -> Option<usize> {
        self.epochs.map(|epochs| self.batches_per_epoch * epochs)
    }

    fn reshuffle(&mut self) {
        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }

    fn cut(&self) -> TrainResult<Batch> {
        let start = self.cursor * self.batch_size;
        let end = (start + self.batch_size).min(self.split.len());
        let indices = &self.order[start..end];

        let name_rows: Vec<Vec<u32>> =
            indices.iter().map(|&i| self.split.name_rows[i].clone()).collect();
        let desc_rows: Vec<Vec<u32>> =
            indices.iter().map(|&i| self.split.desc_rows[i].clone()).collect();
        let references: Vec<Vec<String>> =
            indices.iter().map(|&i| self.split.references[i].clone()).collect();

        let src = if self.split.src_rows.is_empty() {
            None
        } else {
            let src_rows: Vec<Vec<u32>> =
                indices.iter().map(|&i| self.split.src_rows[i].clone()).collect();
            Some(rows_to_tensor(&src_rows, &self.device)?)
        };

        Ok(Batch {
            names: rows_to_tensor(&name_rows, &self.device)?,
            descs: rows_to_tensor(&desc_rows, &self.device)?,
            src,
            references,
        })
    }
}

impl Iterator for BatchIterator<'_> {
    type Item = TrainResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.split.is_empty() {
            return None;
        }
        if let Some(epochs) = self.epochs {
            if self.epoch >= epochs {
                return None;
            }
        }
        let batch = self.cut();
        self.cursor += 1;
        if self.cursor >= self.batches_per_epoch {
            self.cursor = 0;
            self.epoch += 1;
            if self.epochs.map_or(true, |epochs| self.epoch < epochs) {
                self.reshuffle();
            }
        }
        Some(batch)
    }
}
