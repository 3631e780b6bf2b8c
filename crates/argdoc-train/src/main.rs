//! CLI entry point for argdoc-train.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use argdoc_train::config::TrainConfig;
use argdoc_train::data::{load_records, DataSplits};
use argdoc_train::error::TrainError;
use argdoc_train::eval::BLEU_ORDER;
use argdoc_train::logging;
use argdoc_train::tokenize::{encode_records, extract_split, CodeStrategy, NameStrategy};
use argdoc_train::train::TrainingLoop;
use argdoc_train::vocab::{
    build_char_vocabulary, build_src_vocabulary, build_word_vocabulary, embedding_file_for,
    CharWeightInit, Vocabulary, END_TOKEN, NAME_ALPHABET,
};
use argdoc_train::{FsCheckpointStore, UnigramBaseline};

fn resolve_train_config(
    preset: &str,
    data_dir: &Path,
    out_dir: &Path,
) -> Option<TrainConfig> {
    match preset {
        "overfit" => Some(TrainConfig::overfit(data_dir, out_dir)),
        "full" => Some(TrainConfig::full(data_dir, out_dir)),
        _ => None,
    }
}

#[derive(Parser)]
#[command(
    name = "argdoc-train",
    about = "Train argument-description generation models"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model
    Train {
        /// Named preset: overfit or full
        #[arg(long, default_value = "full")]
        config: String,

        /// JSON config file; overrides --config entirely
        #[arg(long)]
        config_file: Option<PathBuf>,

        /// Directory with train/valid/test.jsonl and embeddings/
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Output directory for checkpoints and metrics
        #[arg(long, default_value = "out")]
        out_dir: PathBuf,

        #[arg(long)]
        epochs: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long, value_enum)]
        name_strategy: Option<NameStrategy>,

        #[arg(long, value_enum)]
        code_strategy: Option<CodeStrategy>,

        /// Emit JSON logs instead of console output
        #[arg(long, default_value = "false")]
        json_logs: bool,
    },

    /// Print the first records of a JSON-lines data file
    InspectData {
        #[arg(long)]
        path: PathBuf,

        #[arg(long, default_value = "5")]
        limit: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            config,
            config_file,
            data_dir,
            out_dir,
            epochs,
            batch_size,
            name_strategy,
            code_strategy,
            json_logs,
        } => {
            if json_logs {
                logging::init_logging();
            } else {
                logging::init_console_logging();
            }

            let mut cfg = match config_file {
                Some(path) => TrainConfig::from_file(&path)?,
                None => match resolve_train_config(&config, &data_dir, &out_dir) {
                    Some(cfg) => cfg,
                    None => {
                        tracing::error!("Unknown config: {}. Use overfit or full.", config);
                        std::process::exit(1);
                    }
                },
            };
            if let Some(epochs) = epochs {
                cfg.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                cfg.batch_size = batch_size;
            }
            if let Some(strategy) = name_strategy {
                cfg.name_strategy = strategy;
            }
            if let Some(strategy) = code_strategy {
                cfg.code_strategy = strategy;
            }
            let cfg = cfg.validated()?;

            let cancel = Arc::new(AtomicBool::new(false));
            let cancel_flag = Arc::clone(&cancel);
            ctrlc::set_handler(move || {
                cancel_flag.store(true, Ordering::Relaxed);
            })?;

            match run_train(&cfg, &cancel) {
                Ok(()) => Ok(()),
                Err(TrainError::Interrupted { step }) => {
                    tracing::warn!(step, "interrupted, state saved");
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        }

        Commands::InspectData { path, limit } => {
            logging::init_console_logging();
            let records = load_records(&path)?;
            for record in records.iter().take(limit) {
                println!(
                    "{}({}) :: {} -> {}",
                    record.name,
                    record.args.join(", "),
                    record.arg_name,
                    record.arg_desc
                );
            }
            println!("{} records total", records.len());
            Ok(())
        }
    }
}

fn run_train(cfg: &TrainConfig, cancel: &AtomicBool) -> Result<(), TrainError> {
    let device = candle_core::Device::Cpu;

    let train_records = load_records(&cfg.train_path)?;
    let valid_records = load_records(&cfg.valid_path)?;
    let test_records = load_records(&cfg.test_path)?;

    let embed_file = embedding_file_for(&cfg.embed_dir, cfg.embed_dim)?;
    let (_word_weights, words) = build_word_vocabulary(
        &train_records,
        &embed_file,
        cfg.embed_dim,
        cfg.vocab_size,
        cfg.frequency_threshold,
        cfg.seed,
        &device,
    )?;
    let (_char_weights, chars) =
        build_char_vocabulary(NAME_ALPHABET, CharWeightInit::OneHot, cfg.seed, &device)?;
    let src_vocab: Option<Vocabulary> = match cfg.code_strategy {
        CodeStrategy::None => None,
        CodeStrategy::NeighboringTokens => Some(build_src_vocabulary(
            &train_records,
            cfg.vocab_size,
            cfg.frequency_threshold,
        )),
    };

    let src_seq = src_vocab.as_ref().map(|_| cfg.src_seq);
    let encode = |records: &[argdoc_train::data::Record]| {
        encode_records(
            records,
            cfg.name_strategy,
            cfg.code_strategy,
            &words,
            &chars,
            src_vocab.as_ref(),
            cfg.src_context,
        )
        .map(|encoded| extract_split(&encoded, cfg.char_seq, cfg.desc_seq, src_seq))
    };
    let splits = DataSplits {
        train: encode(&train_records)?,
        valid: encode(&valid_records)?,
        test: encode(&test_records)?,
    };
    tracing::info!(
        train = splits.train.len(),
        valid = splits.valid.len(),
        test = splits.test.len(),
        vocab = words.len(),
        bleu_order = BLEU_ORDER,
        "data ready"
    );

    let end_id = words
        .index(END_TOKEN)
        .ok_or_else(|| TrainError::Config("word vocabulary lacks <END>".to_string()))?;
    let mut model = UnigramBaseline::new(words.len(), end_id, cfg.infer_tokens);
    let mut store = FsCheckpointStore::new(&cfg.checkpoint_dir);

    let summary = TrainingLoop::new(
        &mut model,
        &mut store,
        &splits,
        &words,
        &chars,
        cfg,
        &device,
    )
    .run(cancel)?;
    tracing::info!(
        steps = summary.steps,
        epochs = summary.epochs,
        test_bleu = summary.final_test.bleu.bleu,
        test_perplexity = summary.final_test.perplexity,
        "run complete"
    );
    Ok(())
}
