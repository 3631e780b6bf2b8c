//! Word, character, and source-token vocabularies plus embedding weights.
//!
//! Every vocabulary reserves index 0 for `<PAD>`; real tokens always map to
//! nonzero indices so downstream code can detect effective sequence length
//! as "index of first zero" in a padded row. Forward and reverse mappings
//! are kept in lockstep and form a bijection over `0..len`.

use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::data::Record;
use crate::error::{IoResultExt, TrainError, TrainResult};
use crate::tokenize::word_tokenize;

pub const PAD_TOKEN: &str = "<PAD>";
pub const UNKNOWN_TOKEN: &str = "<UNK>";
pub const START_TOKEN: &str = "<START>";
pub const END_TOKEN: &str = "<END>";
pub const SEPARATOR_1: &str = "<SEP-1>";
pub const SEPARATOR_2: &str = "<SEP-2>";
pub const SEPARATOR_3: &str = "<SEP-3>";

/// Identifier alphabet covered by the character vocabulary.
pub const NAME_ALPHABET: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_*:";

/// Embedding dimensions with a pretrained GloVe file.
pub const SUPPORTED_EMBED_DIMS: [usize; 4] = [50, 100, 200, 300];

/// Dense token -> index mapping with a derived reverse mapping.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    token2idx: HashMap<String, u32>,
    idx2token: Vec<String>,
}

impl Vocabulary {
    pub const PAD_INDEX: u32 = 0;

    /// New vocabulary containing only `<PAD>` at index 0.
    pub(crate) fn with_pad() -> Self {
        let mut vocab = Vocabulary {
            token2idx: HashMap::new(),
            idx2token: Vec::new(),
        };
        vocab.push(PAD_TOKEN);
        vocab
    }

    /// Append a token at the next dense index.
    pub(crate) fn push(&mut self, token: &str) -> u32 {
        debug_assert!(
            !self.token2idx.contains_key(token),
            "duplicate vocabulary token {token:?}"
        );
        let idx = self.idx2token.len() as u32;
        self.token2idx.insert(token.to_string(), idx);
        self.idx2token.push(token.to_string());
        idx
    }

    pub fn len(&self) -> usize {
        self.idx2token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idx2token.is_empty()
    }

    pub fn index(&self, token: &str) -> Option<u32> {
        self.token2idx.get(token).copied()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.token2idx.contains_key(token)
    }

    /// Reverse lookup. An out-of-range index is a programmer error.
    pub fn token(&self, index: u32) -> TrainResult<&str> {
        self.idx2token
            .get(index as usize)
            .map(|s| s.as_str())
            .ok_or(TrainError::IndexLookup {
                index,
                len: self.idx2token.len(),
            })
    }
}

/// Resolve the pretrained embedding file for a dimension.
pub fn embedding_file_for(dir: &Path, dim: usize) -> TrainResult<PathBuf> {
    let path = dir.join(format!("glove.6B.{dim}d.txt"));
    if !SUPPORTED_EMBED_DIMS.contains(&dim) || !path.is_file() {
        return Err(TrainError::MissingEmbeddingFile {
            dim,
            path: path.display().to_string(),
        });
    }
    Ok(path)
}

/// Read the `<file>.vocab` token-column cache, generating it on first use.
fn read_or_build_vocab_cache(embed_file: &Path) -> TrainResult<Vec<String>> {
    let cache_path = PathBuf::from(format!("{}.vocab", embed_file.display()));
    if cache_path.is_file() {
        let reader = BufReader::new(std::fs::File::open(&cache_path).with_path(&cache_path)?);
        let mut tokens = Vec::new();
        for line in reader.lines() {
            let line = line.with_path(&cache_path)?;
            let token = line.trim();
            if !token.is_empty() {
                tokens.push(token.to_string());
            }
        }
        return Ok(tokens);
    }

    let reader = BufReader::new(std::fs::File::open(embed_file).with_path(embed_file)?);
    let mut tokens = Vec::new();
    for line in reader.lines() {
        let line = line.with_path(embed_file)?;
        if let Some(token) = line.split_whitespace().next() {
            tokens.push(token.to_string());
        }
    }
    let mut cache = std::fs::File::create(&cache_path).with_path(&cache_path)?;
    cache
        .write_all(tokens.join("\n").as_bytes())
        .with_path(&cache_path)?;
    Ok(tokens)
}

/// Pick the description vocabulary: frequent training tokens that intersect
/// the pretrained file, backfilled with untouched pretrained entries.
fn select_description_vocab(
    train_records: &[Record],
    file_vocab: &[String],
    vocab_size: usize,
    frequency_threshold: usize,
) -> HashSet<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for record in train_records {
        for token in word_tokenize(&record.arg_desc) {
            *counts.entry(token).or_insert(0) += 1;
        }
    }

    // Descending frequency, alphabetical tie-break for determinism.
    let mut most_common: Vec<(String, usize)> = counts.into_iter().collect();
    most_common.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let in_file: HashSet<&str> = file_vocab.iter().map(|s| s.as_str()).collect();
    let mut selected: Vec<String> = Vec::new();
    let mut taken: HashSet<String> = HashSet::new();

    for (token, count) in most_common {
        if selected.len() >= vocab_size {
            break;
        }
        if count > frequency_threshold && in_file.contains(token.as_str()) {
            taken.insert(token.clone());
            selected.push(token);
        }
    }

    for token in file_vocab {
        if selected.len() >= vocab_size {
            break;
        }
        if !taken.contains(token) {
            taken.insert(token.clone());
            selected.push(token.clone());
        }
    }

    selected.into_iter().collect()
}

fn sample_normal_row(rng: &mut StdRng, dim: usize) -> Vec<f32> {
    (0..dim).map(|_| rng.sample::<f32, _>(StandardNormal)).collect()
}

/// Build the description word vocabulary and its embedding weight matrix.
///
/// Row 0 (pad) and the trailing `<UNK>`/`<START>`/`<END>` rows are freshly
/// sampled; every other row comes straight from the pretrained file, in
/// file order, restricted to the selected vocabulary.
pub fn build_word_vocabulary(
    train_records: &[Record],
    embed_file: &Path,
    dim: usize,
    vocab_size: usize,
    frequency_threshold: usize,
    seed: u64,
    device: &Device,
) -> TrainResult<(Tensor, Vocabulary)> {
    let file_vocab = read_or_build_vocab_cache(embed_file)?;
    let desired =
        select_description_vocab(train_records, &file_vocab, vocab_size, frequency_threshold);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut vocab = Vocabulary::with_pad();
    let mut rows: Vec<Vec<f32>> = vec![sample_normal_row(&mut rng, dim)];

    let reader = BufReader::new(std::fs::File::open(embed_file).with_path(embed_file)?);
    for line in reader.lines() {
        let line = line.with_path(embed_file)?;
        let mut fields = line.split_whitespace();
        let word = match fields.next() {
            Some(w) => w,
            None => continue,
        };
        if !desired.contains(word) || vocab.contains(word) {
            continue;
        }
        let row: Vec<f32> = fields
            .map(|v| {
                v.parse::<f32>().map_err(|e| {
                    TrainError::DataLoading(format!(
                        "bad embedding component for {word:?} in {}: {e}",
                        embed_file.display()
                    ))
                })
            })
            .collect::<TrainResult<_>>()?;
        if row.len() != dim {
            return Err(TrainError::DataLoading(format!(
                "embedding row for {word:?} has {} components, expected {dim}",
                row.len()
            )));
        }
        vocab.push(word);
        rows.push(row);
        if rows.len() - 1 >= vocab_size {
            break;
        }
    }

    for sentinel in [UNKNOWN_TOKEN, START_TOKEN, END_TOKEN] {
        vocab.push(sentinel);
        rows.push(sample_normal_row(&mut rng, dim));
    }

    let n = rows.len();
    let flat: Vec<f32> = rows.concat();
    let weights = Tensor::from_vec(flat, (n, dim), device)?;
    Ok((weights, vocab))
}

/// Weight initialization for the character vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharWeightInit {
    /// Identity matrix sized `len x len`.
    OneHot,
    /// Uniform random in `[-0.1, 0.1]`, sized `len x dim`.
    Uniform { dim: usize },
}

/// Build the character vocabulary for argument/function names.
///
/// Alphabet characters occupy indices `1..=n`, followed by `<SEP-1>`,
/// `<SEP-2>`, `<SEP-3>`, and `<END>`. Callers pass [`NAME_ALPHABET`]
/// unless they need a restricted identifier set.
pub fn build_char_vocabulary(
    alphabet: &str,
    init: CharWeightInit,
    seed: u64,
    device: &Device,
) -> TrainResult<(Tensor, Vocabulary)> {
    let mut vocab = Vocabulary::with_pad();
    let mut buf = [0u8; 4];
    for ch in alphabet.chars() {
        vocab.push(ch.encode_utf8(&mut buf));
    }
    for sentinel in [SEPARATOR_1, SEPARATOR_2, SEPARATOR_3, END_TOKEN] {
        vocab.push(sentinel);
    }

    let n = vocab.len();
    let weights = match init {
        CharWeightInit::OneHot => {
            let mut flat = vec![0.0f32; n * n];
            for i in 0..n {
                flat[i * n + i] = 1.0;
            }
            Tensor::from_vec(flat, (n, n), device)?
        }
        CharWeightInit::Uniform { dim } => {
            let mut rng = StdRng::seed_from_u64(seed);
            let flat: Vec<f32> = (0..n * dim).map(|_| rng.gen_range(-0.1..0.1)).collect();
            Tensor::from_vec(flat, (n, dim), device)?
        }
    };
    Ok((weights, vocab))
}

/// Build the source-token vocabulary for the code-context strategy.
///
/// An explicit object, constructed once from the training split and passed
/// into every tokenization call. Sentinels sit at the low indices; word
/// indices start above them so 0 stays pad-only.
pub fn build_src_vocabulary(
    train_records: &[Record],
    vocab_size: usize,
    frequency_threshold: usize,
) -> Vocabulary {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for record in train_records {
        for token in word_tokenize(&record.src) {
            *counts.entry(token).or_insert(0) += 1;
        }
    }
    let mut most_common: Vec<(String, usize)> = counts.into_iter().collect();
    most_common.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut vocab = Vocabulary::with_pad();
    for sentinel in [UNKNOWN_TOKEN, SEPARATOR_1, SEPARATOR_2] {
        vocab.push(sentinel);
    }
    for (token, count) in most_common.into_iter().take(vocab_size) {
        if count > frequency_threshold && !vocab.contains(&token) {
            vocab.push(&token);
        }
    }
    vocab
}
