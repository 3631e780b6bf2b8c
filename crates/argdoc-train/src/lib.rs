//! Training pipeline for argument-description generation.
//!
//! Takes records of documented function arguments, encodes names
//! character-wise and descriptions word-wise against learned
//! vocabularies, and drives a seq2seq model through an epoch-based loop
//! with per-metric best checkpointing (cross-entropy, BLEU, perplexity).

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod eval;
pub mod logging;
pub mod model;
pub mod tokenize;
pub mod train;
pub mod translate;
pub mod vocab;

pub use checkpoint::{CheckpointMeta, CheckpointStore, FsCheckpointStore};
pub use config::TrainConfig;
pub use error::{TrainError, TrainResult};
pub use model::{Seq2SeqModel, StepStats, UnigramBaseline};
pub use train::{BestTrackers, RunSummary, TrainingLoop};
