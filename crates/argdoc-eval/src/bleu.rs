//! Corpus-level BLEU with n-gram clipping and brevity penalty.
//!
//! Each corpus entry may carry multiple references. A missing or empty
//! candidate is replaced by the `<NOTRANSLATION>` sentinel so that a
//! zero-length hypothesis never degenerates the length ratio; it simply
//! scores zero n-gram matches.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sentinel substituted for empty candidate translations.
pub const NO_TRANSLATION_TOKEN: &str = "<NOTRANSLATION>";

/// Full BLEU breakdown for one corpus-level computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleuScore {
    /// Geometric mean of n-gram precisions times the brevity penalty.
    pub bleu: f64,
    /// Clipped n-gram precisions, index 0 = unigram.
    pub precisions: Vec<f64>,
    pub brevity_penalty: f64,
    /// Candidate length over reference length.
    pub length_ratio: f64,
    pub candidate_length: usize,
    pub reference_length: usize,
}

fn ngram_counts(tokens: &[String], max_order: usize) -> HashMap<Vec<String>, usize> {
    let mut counts: HashMap<Vec<String>, usize> = HashMap::new();
    for order in 1..=max_order {
        if tokens.len() < order {
            break;
        }
        for window in tokens.windows(order) {
            *counts.entry(window.to_vec()).or_insert(0) += 1;
        }
    }
    counts
}

/// Compute corpus BLEU over parallel references and candidates.
///
/// `reference_corpus[i]` holds one or more references for candidate `i`.
/// Candidates beyond `candidate_corpus.len()`, or empty candidates, are
/// treated as the `<NOTRANSLATION>` sentinel.
pub fn compute_bleu(
    reference_corpus: &[Vec<Vec<String>>],
    candidate_corpus: &[Vec<String>],
    max_order: usize,
    smooth: bool,
) -> BleuScore {
    let mut matches_by_order = vec![0usize; max_order];
    let mut possible_by_order = vec![0usize; max_order];
    let mut reference_length = 0usize;
    let mut candidate_length = 0usize;

    let sentinel = vec![NO_TRANSLATION_TOKEN.to_string()];

    for (i, references) in reference_corpus.iter().enumerate() {
        let candidate = match candidate_corpus.get(i) {
            Some(c) if !c.is_empty() => c,
            _ => &sentinel,
        };

        reference_length += references.iter().map(|r| r.len()).min().unwrap_or(0);
        candidate_length += candidate.len();

        // Clip against the per-ngram maximum over all references.
        let mut merged: HashMap<Vec<String>, usize> = HashMap::new();
        for reference in references {
            for (ngram, count) in ngram_counts(reference, max_order) {
                let entry = merged.entry(ngram).or_insert(0);
                *entry = (*entry).max(count);
            }
        }

        for (ngram, count) in ngram_counts(candidate, max_order) {
            if let Some(&ref_count) = merged.get(&ngram) {
                matches_by_order[ngram.len() - 1] += count.min(ref_count);
            }
        }
        for order in 1..=max_order {
            if candidate.len() >= order {
                possible_by_order[order - 1] += candidate.len() - order + 1;
            }
        }
    }

    let precisions: Vec<f64> = (0..max_order)
        .map(|i| {
            if smooth {
                (matches_by_order[i] as f64 + 1.0) / (possible_by_order[i] as f64 + 1.0)
            } else if possible_by_order[i] > 0 {
                matches_by_order[i] as f64 / possible_by_order[i] as f64
            } else {
                0.0
            }
        })
        .collect();

    // Orders with no possible match (every candidate shorter than the
    // order) are neutral rather than zeroing the score, so an identical
    // pair shorter than `max_order` still scores 1.0.
    let effective: Vec<f64> = (0..max_order)
        .filter(|&i| smooth || possible_by_order[i] > 0)
        .map(|i| precisions[i])
        .collect();
    let geo_mean = if !effective.is_empty() && effective.iter().all(|&p| p > 0.0) {
        let log_sum: f64 = effective.iter().map(|p| p.ln()).sum();
        (log_sum / effective.len() as f64).exp()
    } else {
        0.0
    };

    let length_ratio = if reference_length > 0 {
        candidate_length as f64 / reference_length as f64
    } else {
        0.0
    };
    let brevity_penalty = if length_ratio > 1.0 {
        1.0
    } else if length_ratio > 0.0 {
        (1.0 - 1.0 / length_ratio).exp()
    } else {
        0.0
    };

    BleuScore {
        bleu: geo_mean * brevity_penalty,
        precisions,
        brevity_penalty,
        length_ratio,
        candidate_length,
        reference_length,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_identical_candidate_scores_one() {
        let refs = vec![vec![toks("the cat sat on the mat")]];
        let cands = vec![toks("the cat sat on the mat")];
        let score = compute_bleu(&refs, &cands, 4, false);
        assert!((score.bleu - 1.0).abs() < 1e-12, "bleu = {}", score.bleu);
        assert_eq!(score.brevity_penalty, 1.0);
        assert_eq!(score.candidate_length, score.reference_length);
    }

    #[test]
    fn test_identical_candidate_shorter_than_max_order_scores_one() {
        // A 3-token pair has no possible 4-grams; that order must not
        // drag an exact match down to zero.
        let refs = vec![vec![toks("the cat sat")]];
        let cands = vec![toks("the cat sat")];
        let score = compute_bleu(&refs, &cands, 4, false);
        assert!((score.bleu - 1.0).abs() < 1e-12, "bleu = {}", score.bleu);
        assert_eq!(score.precisions[3], 0.0);
    }

    #[test]
    fn test_disjoint_candidate_scores_zero() {
        let refs = vec![vec![toks("the cat sat")]];
        let cands = vec![toks("a dog ran")];
        let score = compute_bleu(&refs, &cands, 4, false);
        assert_eq!(score.bleu, 0.0);
    }

    #[test]
    fn test_empty_candidate_corpus_does_not_panic() {
        let refs = vec![vec![toks("the cat sat")]];
        let cands: Vec<Vec<String>> = vec![];
        let score = compute_bleu(&refs, &cands, 4, false);
        assert!(score.bleu < 1.0);
        assert!(score.bleu.is_finite());
        // Sentinel substitution keeps the candidate length nonzero.
        assert_eq!(score.candidate_length, 1);
    }

    #[test]
    fn test_empty_candidate_entry_substituted() {
        let refs = vec![vec![toks("the cat sat")], vec![toks("a dog ran")]];
        let cands = vec![toks("the cat sat"), vec![]];
        let score = compute_bleu(&refs, &cands, 4, false);
        assert!(score.bleu.is_finite());
        assert_eq!(score.candidate_length, 4);
    }

    #[test]
    fn test_multiple_references_clip_to_best() {
        let refs = vec![vec![toks("the cat sat"), toks("a cat sat down")]];
        let cands = vec![toks("a cat sat")];
        let score = compute_bleu(&refs, &cands, 2, false);
        // All unigrams and bigrams appear in at least one reference.
        assert!((score.precisions[0] - 1.0).abs() < 1e-12);
        assert!((score.precisions[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_smoothing_lifts_zero_precisions() {
        let refs = vec![vec![toks("the cat")]];
        let cands = vec![toks("the dog")];
        let unsmoothed = compute_bleu(&refs, &cands, 4, false);
        let smoothed = compute_bleu(&refs, &cands, 4, true);
        assert_eq!(unsmoothed.bleu, 0.0);
        assert!(smoothed.bleu > 0.0);
    }

    #[test]
    fn test_brevity_penalty_applied_to_short_candidate() {
        let refs = vec![vec![toks("the cat sat on the mat")]];
        let cands = vec![toks("the cat sat")];
        let score = compute_bleu(&refs, &cands, 1, false);
        assert!((score.length_ratio - 0.5).abs() < 1e-12);
        assert!(score.brevity_penalty < 1.0);
        assert!((score.precisions[0] - 1.0).abs() < 1e-12);
        assert!(score.bleu < 1.0);
    }
}
