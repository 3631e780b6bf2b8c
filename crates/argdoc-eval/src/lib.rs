//! Evaluation metrics for description generation.
//!
//! Pure metric functions with no tensor or model dependencies: corpus-level
//! BLEU and the loss-weighted perplexity aggregate used for model selection.

pub mod bleu;
pub mod perplexity;

pub use bleu::{compute_bleu, BleuScore, NO_TRANSLATION_TOKEN};
pub use perplexity::corpus_perplexity;
