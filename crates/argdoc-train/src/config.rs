//! Training configuration for argument-description models.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, TrainError, TrainResult};
use crate::tokenize::{CodeStrategy, NameStrategy};
use crate::vocab::SUPPORTED_EMBED_DIMS;

fn default_vocab_size() -> usize {
    30_000
}

fn default_frequency_threshold() -> usize {
    4
}

fn default_char_seq() -> usize {
    60
}

fn default_desc_seq() -> usize {
    60
}

fn default_src_seq() -> usize {
    200
}

fn default_src_context() -> usize {
    5
}

fn default_batch_size() -> usize {
    128
}

fn default_epochs() -> usize {
    50
}

fn default_seed() -> u64 {
    42
}

fn default_eval_train_points() -> usize {
    5_000
}

fn default_eval_points() -> usize {
    10_000
}

fn default_max_infer_len() -> usize {
    60
}

fn default_sample_count() -> usize {
    10
}

fn default_infer_tokens() -> usize {
    6
}

fn default_checkpoint_every() -> usize {
    10
}

/// Hyperparameters and paths for one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    // Data
    /// JSON-lines record files per split.
    pub train_path: PathBuf,
    pub valid_path: PathBuf,
    pub test_path: PathBuf,
    /// Directory holding `glove.6B.<dim>d.txt` embedding files.
    pub embed_dir: PathBuf,
    /// Embedding width, one of 50/100/200/300.
    pub embed_dim: usize,

    // Vocabulary
    #[serde(default = "default_vocab_size")]
    pub vocab_size: usize,
    /// A word must appear strictly more often than this to be selected.
    #[serde(default = "default_frequency_threshold")]
    pub frequency_threshold: usize,

    // Encoding
    pub name_strategy: NameStrategy,
    #[serde(default = "default_code_strategy")]
    pub code_strategy: CodeStrategy,
    /// Source tokens kept on each side of an occurrence.
    #[serde(default = "default_src_context")]
    pub src_context: usize,
    /// Character-sequence budget; padded rows are one longer.
    #[serde(default = "default_char_seq")]
    pub char_seq: usize,
    #[serde(default = "default_desc_seq")]
    pub desc_seq: usize,
    #[serde(default = "default_src_seq")]
    pub src_seq: usize,

    // Loop
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Unconditional checkpoint cadence, in epochs.
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every_epochs: usize,

    // Evaluation budgets
    #[serde(default = "default_eval_train_points")]
    pub eval_train_points: usize,
    #[serde(default = "default_eval_points")]
    pub eval_valid_points: usize,
    #[serde(default = "default_eval_points")]
    pub eval_test_points: usize,
    #[serde(default = "default_max_infer_len")]
    pub max_infer_len: usize,
    #[serde(default = "default_sample_count")]
    pub sample_count: usize,
    /// Output body length for the unigram baseline.
    #[serde(default = "default_infer_tokens")]
    pub infer_tokens: usize,

    // Outputs
    pub checkpoint_dir: PathBuf,
    /// Optional CSV metrics sink.
    #[serde(default)]
    pub metrics_csv: Option<PathBuf>,
}

fn default_code_strategy() -> CodeStrategy {
    CodeStrategy::None
}

impl TrainConfig {
    /// Validate configuration and return the list of errors, if any.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !SUPPORTED_EMBED_DIMS.contains(&self.embed_dim) {
            errors.push(format!(
                "embed_dim ({}) must be one of {SUPPORTED_EMBED_DIMS:?}",
                self.embed_dim
            ));
        }
        if self.vocab_size == 0 {
            errors.push("vocab_size must be greater than 0".to_string());
        }
        if self.batch_size == 0 {
            errors.push("batch_size must be greater than 0".to_string());
        }
        if self.epochs == 0 {
            errors.push("epochs must be greater than 0".to_string());
        }
        if self.char_seq == 0 || self.desc_seq == 0 {
            errors.push("sequence budgets must be greater than 0".to_string());
        }
        if self.checkpoint_every_epochs == 0 {
            errors.push("checkpoint_every_epochs must be greater than 0".to_string());
        }
        if self.code_strategy != CodeStrategy::None && self.src_context == 0 {
            errors.push("src_context must be greater than 0 with a code strategy".to_string());
        }
        if self.max_infer_len < 2 {
            errors.push("max_infer_len must leave room for a token and <END>".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and convert failures into one configuration error.
    pub fn validated(self) -> TrainResult<Self> {
        self.validate()
            .map_err(|errors| TrainError::Config(errors.join("; ")))?;
        Ok(self)
    }

    pub fn from_file(path: &Path) -> TrainResult<Self> {
        let bytes = std::fs::read(path).with_path(path)?;
        let config: TrainConfig = serde_json::from_slice(&bytes)
            .map_err(|e| TrainError::Config(format!("{}: {e}", path.display())))?;
        Ok(config)
    }

    /// Small run for smoke-testing the pipeline end to end.
    pub fn overfit(data_dir: &Path, out_dir: &Path) -> Self {
        TrainConfig {
            train_path: data_dir.join("train.jsonl"),
            valid_path: data_dir.join("valid.jsonl"),
            test_path: data_dir.join("test.jsonl"),
            embed_dir: data_dir.join("embeddings"),
            embed_dim: 50,
            vocab_size: 2_000,
            frequency_threshold: 0,
            name_strategy: NameStrategy::NameOnly,
            code_strategy: CodeStrategy::None,
            src_context: default_src_context(),
            char_seq: 30,
            desc_seq: 30,
            src_seq: default_src_seq(),
            batch_size: 16,
            epochs: 5,
            seed: default_seed(),
            checkpoint_every_epochs: 2,
            eval_train_points: 200,
            eval_valid_points: 200,
            eval_test_points: 200,
            max_infer_len: 30,
            sample_count: 5,
            infer_tokens: default_infer_tokens(),
            checkpoint_dir: out_dir.join("checkpoints"),
            metrics_csv: Some(out_dir.join("metrics.csv")),
        }
    }

    /// Full run with the defaults used for reported results.
    pub fn full(data_dir: &Path, out_dir: &Path) -> Self {
        TrainConfig {
            train_path: data_dir.join("train.jsonl"),
            valid_path: data_dir.join("valid.jsonl"),
            test_path: data_dir.join("test.jsonl"),
            embed_dir: data_dir.join("embeddings"),
            embed_dim: 200,
            vocab_size: default_vocab_size(),
            frequency_threshold: default_frequency_threshold(),
            name_strategy: NameStrategy::NameWithFunctionAndSiblings,
            code_strategy: CodeStrategy::None,
            src_context: default_src_context(),
            char_seq: default_char_seq(),
            desc_seq: default_desc_seq(),
            src_seq: default_src_seq(),
            batch_size: default_batch_size(),
            epochs: default_epochs(),
            seed: default_seed(),
            checkpoint_every_epochs: default_checkpoint_every(),
            eval_train_points: default_eval_train_points(),
            eval_valid_points: default_eval_points(),
            eval_test_points: default_eval_points(),
            max_infer_len: default_max_infer_len(),
            sample_count: default_sample_count(),
            infer_tokens: default_infer_tokens(),
            checkpoint_dir: out_dir.join("checkpoints"),
            metrics_csv: Some(out_dir.join("metrics.csv")),
        }
    }
}
