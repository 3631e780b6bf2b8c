//! Structured logging for training with tracing.
//!
//! JSON output for long runs, pretty console output for interactive use,
//! and a CSV metrics sink that accumulates one row per evaluation so a
//! run's trajectory can be plotted afterwards.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use tracing::{error, info, span, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{IoResultExt, TrainResult};
use crate::eval::{EvalResult, BLEU_ORDER};

/// Initialize structured logging.
///
/// Reads log level from RUST_LOG environment variable (defaults to "info").
/// Outputs JSON-formatted logs for production monitoring.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,argdoc_train=info,argdoc_eval=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Structured logging initialized");
}

/// Initialize simple console logging (for interactive runs).
pub fn init_console_logging() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,argdoc_train=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().pretty())
        .init();
}

/// Log one training step.
///
/// A non-finite loss is a divergence and logged as an error.
pub fn log_train_step(step: usize, epoch: usize, loss: f64) {
    let span = span!(Level::INFO, "train_step", step = step);
    let _enter = span.enter();

    if !loss.is_finite() {
        error!(loss, step, "Training diverged! NaN or infinite loss detected");
        return;
    }
    info!(loss, epoch, "Training step completed");
}

/// Log the metrics of one evaluation pass over a named split.
pub fn log_evaluation(split: &str, epoch: usize, result: &EvalResult) {
    info!(
        split,
        epoch,
        points = result.points,
        cross_entropy = result.cross_entropy,
        perplexity = result.perplexity,
        bleu = result.bleu.bleu,
        precisions = ?result.bleu.precisions,
        brevity_penalty = result.bleu.brevity_penalty,
        length_ratio = result.bleu.length_ratio,
        candidate_length = result.bleu.candidate_length,
        reference_length = result.bleu.reference_length,
        "Evaluation completed"
    );
    if result.perplexity.is_infinite() {
        warn!(split, "perplexity is infinite, no reference words seen");
    }
}

/// Append one evaluation row to a CSV file, writing the header on first
/// use.
pub fn append_eval_csv(
    path: &Path,
    split: &str,
    epoch: usize,
    step: usize,
    result: &EvalResult,
) -> TrainResult<()> {
    let new_file = !path.exists();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_path(path)?;
    if new_file {
        let precision_cols: Vec<String> = (1..=BLEU_ORDER)
            .map(|order| format!("precision_{order}"))
            .collect();
        writeln!(
            file,
            "timestamp,split,epoch,step,points,cross_entropy,perplexity,bleu,{},\
             brevity_penalty,length_ratio,candidate_length,reference_length",
            precision_cols.join(","),
        )
        .with_path(path)?;
    }
    let precisions: Vec<String> = (0..BLEU_ORDER)
        .map(|i| format!("{:.6}", result.bleu.precisions.get(i).copied().unwrap_or(0.0)))
        .collect();
    writeln!(
        file,
        "{},{},{},{},{},{:.6},{:.6},{:.6},{},{:.6},{:.6},{},{}",
        Utc::now().to_rfc3339(),
        split,
        epoch,
        step,
        result.points,
        result.cross_entropy,
        result.perplexity,
        result.bleu.bleu,
        precisions.join(","),
        result.bleu.brevity_penalty,
        result.bleu.length_ratio,
        result.bleu.candidate_length,
        result.bleu.reference_length,
    )
    .with_path(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use argdoc_eval::BleuScore;

    fn result() -> EvalResult {
        EvalResult {
            cross_entropy: 2.5,
            perplexity: 12.18,
            bleu: BleuScore {
                bleu: 0.25,
                precisions: vec![0.5, 0.25, 0.2, 0.1],
                brevity_penalty: 1.0,
                length_ratio: 1.1,
                candidate_length: 11,
                reference_length: 10,
            },
            points: 100,
            samples: Vec::new(),
        }
    }

    #[test]
    fn test_csv_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        append_eval_csv(&path, "valid", 0, 10, &result()).unwrap();
        append_eval_csv(&path, "test", 1, 20, &result()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,split,epoch"));
        assert!(lines[0].ends_with(
            "precision_1,precision_2,precision_3,precision_4,\
             brevity_penalty,length_ratio,candidate_length,reference_length"
        ));
        assert!(lines[1].contains(",valid,0,10,100,2.500000,"));
        assert!(lines[2].contains(",test,1,20,"));
    }

    #[test]
    fn test_csv_row_carries_full_bleu_breakdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        append_eval_csv(&path, "valid", 2, 30, &result()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let row = contents.lines().nth(1).unwrap();
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields.len(), 16);
        // Per-order precisions, then penalty, ratio and corpus lengths.
        assert_eq!(&fields[8..12], &["0.500000", "0.250000", "0.200000", "0.100000"]);
        assert_eq!(fields[12], "1.000000");
        assert_eq!(fields[13], "1.100000");
        assert_eq!(fields[14], "11");
        assert_eq!(fields[15], "10");
    }

    #[test]
    fn test_log_calls_do_not_panic() {
        log_train_step(1, 0, 1.5);
        log_train_step(2, 0, f64::NAN);
        log_evaluation("valid", 0, &result());
    }
}
