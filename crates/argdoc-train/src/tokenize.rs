//! Record tokenization: encoding strategies and tensor extraction.
//!
//! Argument names are encoded character by character against the fixed
//! alphabet; descriptions word by word with `<START>`/`<END>` sentinels and
//! `<UNK>` substitution. Each encoded field is padded or truncated to a
//! fixed length plus one guaranteed trailing pad column, so the model can
//! recover effective sequence length as the index of the first zero.

use candle_core::{Device, Tensor};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::data::Record;
use crate::error::{TrainError, TrainResult};
use crate::vocab::{
    Vocabulary, END_TOKEN, SEPARATOR_1, SEPARATOR_2, SEPARATOR_3, START_TOKEN, UNKNOWN_TOKEN,
};

/// Case-folded word tokenization: alphanumeric runs and single punctuation
/// tokens, with escaped newlines treated as spaces.
pub fn word_tokenize(text: &str) -> Vec<String> {
    let lowered = text.replace("\\n", " ").to_lowercase();
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in lowered.chars() {
        if ch.is_alphanumeric() || ch == '\'' {
            current.push(ch);
        } else {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            if !ch.is_whitespace() {
                tokens.push(ch.to_string());
            }
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// How a record's argument name and context are encoded into characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum NameStrategy {
    /// Argument name + `<END>`.
    NameOnly,
    /// Name + `<SEP-1>` + enclosing function name + `<END>`.
    NameWithFunction,
    /// Name + `<SEP-1>` + each other argument + `<SEP-2>` ... + `<END>`.
    NameWithSiblings,
    /// Name + `<SEP-1>` + function + `<SEP-2>` + siblings + `<SEP-3>` ... + `<END>`.
    NameWithFunctionAndSiblings,
}

fn push_chars(ids: &mut Vec<u32>, text: &str, chars: &Vocabulary) -> TrainResult<()> {
    let mut buf = [0u8; 4];
    for ch in text.chars() {
        let idx = chars
            .index(ch.encode_utf8(&mut buf))
            .ok_or(TrainError::VocabularyKey { ch })?;
        ids.push(idx);
    }
    Ok(())
}

fn sentinel(chars: &Vocabulary, token: &str) -> u32 {
    // Sentinels are fixed members of the character vocabulary.
    chars.index(token).unwrap_or(Vocabulary::PAD_INDEX)
}

impl NameStrategy {
    /// Encode one record's name field. Characters outside the alphabet are
    /// fatal: the character vocabulary is exhaustive for valid identifiers.
    pub fn encode(&self, record: &Record, chars: &Vocabulary) -> TrainResult<Vec<u32>> {
        let mut ids = Vec::new();
        push_chars(&mut ids, &record.arg_name, chars)?;

        match self {
            NameStrategy::NameOnly => {}
            NameStrategy::NameWithFunction => {
                ids.push(sentinel(chars, SEPARATOR_1));
                push_chars(&mut ids, &record.name, chars)?;
            }
            NameStrategy::NameWithSiblings => {
                ids.push(sentinel(chars, SEPARATOR_1));
                for arg in &record.args {
                    if arg == &record.arg_name {
                        continue;
                    }
                    push_chars(&mut ids, arg, chars)?;
                    ids.push(sentinel(chars, SEPARATOR_2));
                }
            }
            NameStrategy::NameWithFunctionAndSiblings => {
                ids.push(sentinel(chars, SEPARATOR_1));
                push_chars(&mut ids, &record.name, chars)?;
                ids.push(sentinel(chars, SEPARATOR_2));
                for arg in &record.args {
                    if arg == &record.arg_name {
                        continue;
                    }
                    push_chars(&mut ids, arg, chars)?;
                    ids.push(sentinel(chars, SEPARATOR_3));
                }
            }
        }

        ids.push(sentinel(chars, END_TOKEN));
        Ok(ids)
    }
}

/// Encode a description: `<START>` + words (with `<UNK>` substitution) +
/// `<END>`. Also returns the raw word tokens, kept as the BLEU reference.
pub fn encode_description(record: &Record, words: &Vocabulary) -> (Vec<u32>, Vec<String>) {
    let unk = words.index(UNKNOWN_TOKEN).unwrap_or(Vocabulary::PAD_INDEX);
    let start = words.index(START_TOKEN).unwrap_or(Vocabulary::PAD_INDEX);
    let end = words.index(END_TOKEN).unwrap_or(Vocabulary::PAD_INDEX);

    let raw = word_tokenize(&record.arg_desc);
    let mut ids = Vec::with_capacity(raw.len() + 2);
    ids.push(start);
    for token in &raw {
        ids.push(words.index(token).unwrap_or(unk));
    }
    ids.push(end);
    (ids, raw)
}

/// Optional source-code context encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CodeStrategy {
    /// No code context field.
    None,
    /// Windows of source tokens around each occurrence of the argument
    /// name: `context` before, `<SEP-1>`, `context` after, `<SEP-2>`.
    NeighboringTokens,
}

impl CodeStrategy {
    pub fn encode(
        &self,
        record: &Record,
        src_vocab: &Vocabulary,
        context: usize,
    ) -> Vec<u32> {
        match self {
            CodeStrategy::None => Vec::new(),
            CodeStrategy::NeighboringTokens => {
                let unk = src_vocab
                    .index(UNKNOWN_TOKEN)
                    .unwrap_or(Vocabulary::PAD_INDEX);
                let sep1 = src_vocab
                    .index(SEPARATOR_1)
                    .unwrap_or(Vocabulary::PAD_INDEX);
                let sep2 = src_vocab
                    .index(SEPARATOR_2)
                    .unwrap_or(Vocabulary::PAD_INDEX);

                let src_tokens = word_tokenize(&record.src);
                let mut ids = Vec::new();
                for (i, token) in src_tokens.iter().enumerate() {
                    if token != &record.arg_name {
                        continue;
                    }
                    let before = i.saturating_sub(context);
                    for t in &src_tokens[before..i] {
                        ids.push(src_vocab.index(t).unwrap_or(unk));
                    }
                    ids.push(sep1);
                    let after_end = (i + 1 + context).min(src_tokens.len());
                    for t in &src_tokens[i + 1..after_end] {
                        ids.push(src_vocab.index(t).unwrap_or(unk));
                    }
                    ids.push(sep2);
                }
                ids
            }
        }
    }
}

/// One record with all fields encoded to index sequences.
#[derive(Debug, Clone)]
pub struct EncodedRecord {
    pub name_ids: Vec<u32>,
    pub desc_ids: Vec<u32>,
    pub src_ids: Vec<u32>,
    /// Raw description words, the BLEU reference.
    pub desc_words: Vec<String>,
}

/// Encode a whole split with one name strategy and one code strategy.
pub fn encode_records(
    records: &[Record],
    strategy: NameStrategy,
    code_strategy: CodeStrategy,
    word_vocab: &Vocabulary,
    char_vocab: &Vocabulary,
    src_vocab: Option<&Vocabulary>,
    src_context: usize,
) -> TrainResult<Vec<EncodedRecord>> {
    let mut encoded = Vec::with_capacity(records.len());
    for record in records {
        let name_ids = strategy.encode(record, char_vocab)?;
        let (desc_ids, desc_words) = encode_description(record, word_vocab);
        let src_ids = match (code_strategy, src_vocab) {
            (CodeStrategy::None, _) | (_, None) => Vec::new(),
            (strategy, Some(vocab)) => strategy.encode(record, vocab, src_context),
        };
        encoded.push(EncodedRecord {
            name_ids,
            desc_ids,
            src_ids,
            desc_words,
        });
    }
    Ok(encoded)
}

/// Fixed-shape padding: the result always has length `length + 1`.
///
/// A sequence longer than `length` is cut to `length` and given one pad;
/// a shorter one is right-padded with zeros. Either way the final column
/// is zero whenever the sequence did not fill the budget, which is how
/// downstream length detection works.
pub fn pad_or_truncate(seq: &[u32], length: usize) -> Vec<u32> {
    let mut padded = Vec::with_capacity(length + 1);
    if seq.len() > length {
        padded.extend_from_slice(&seq[..length]);
    } else {
        padded.extend_from_slice(seq);
    }
    padded.resize(length + 1, 0);
    padded
}

/// Parallel padded arrays for one data split, plus the raw references.
#[derive(Debug, Clone)]
pub struct EncodedSplit {
    /// `[N][char_seq + 1]`
    pub name_rows: Vec<Vec<u32>>,
    /// `[N][desc_seq + 1]`
    pub desc_rows: Vec<Vec<u32>>,
    /// `[N][src_seq + 1]`, empty when no code strategy is active.
    pub src_rows: Vec<Vec<u32>>,
    /// Raw description words per record.
    pub references: Vec<Vec<String>>,
}

impl EncodedSplit {
    pub fn len(&self) -> usize {
        self.name_rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name_rows.is_empty()
    }

    /// A copy bounded to the first `max_points` records.
    pub fn bounded(&self, max_points: usize) -> EncodedSplit {
        let n = self.len().min(max_points);
        EncodedSplit {
            name_rows: self.name_rows[..n].to_vec(),
            desc_rows: self.desc_rows[..n].to_vec(),
            src_rows: if self.src_rows.is_empty() {
                Vec::new()
            } else {
                self.src_rows[..n].to_vec()
            },
            references: self.references[..n].to_vec(),
        }
    }
}

/// Pad every encoded record to fixed shapes.
pub fn extract_split(
    records: &[EncodedRecord],
    char_seq: usize,
    desc_seq: usize,
    src_seq: Option<usize>,
) -> EncodedSplit {
    let mut name_rows = Vec::with_capacity(records.len());
    let mut desc_rows = Vec::with_capacity(records.len());
    let mut src_rows = Vec::new();
    let mut references = Vec::with_capacity(records.len());

    for record in records {
        name_rows.push(pad_or_truncate(&record.name_ids, char_seq));
        desc_rows.push(pad_or_truncate(&record.desc_ids, desc_seq));
        if let Some(src_seq) = src_seq {
            src_rows.push(pad_or_truncate(&record.src_ids, src_seq));
        }
        references.push(record.desc_words.clone());
    }

    EncodedSplit {
        name_rows,
        desc_rows,
        src_rows,
        references,
    }
}

/// Stack padded rows into a `[batch, len+1]` tensor.
pub fn rows_to_tensor(rows: &[Vec<u32>], device: &Device) -> TrainResult<Tensor> {
    let batch = rows.len();
    let width = rows.first().map(|r| r.len()).unwrap_or(0);
    let flat: Vec<u32> = rows.iter().flatten().copied().collect();
    Ok(Tensor::from_vec(flat, (batch, width), device)?)
}
