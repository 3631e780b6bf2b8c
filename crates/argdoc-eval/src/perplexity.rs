//! Loss-weighted corpus perplexity.

/// Perplexity over a set of evaluation batches.
///
/// Each batch contributes its mean loss weighted by its batch size; the
/// denominator counts one word per reference token plus one (the implicit
/// end-of-sequence prediction), so shorter references are not over-weighted.
///
/// Returns `f64::INFINITY` when there are no reference words.
pub fn corpus_perplexity(
    batch_losses: &[f64],
    batch_sizes: &[usize],
    reference_lengths: &[usize],
) -> f64 {
    debug_assert_eq!(batch_losses.len(), batch_sizes.len());

    let weighted_loss: f64 = batch_losses
        .iter()
        .zip(batch_sizes.iter())
        .map(|(loss, size)| loss * *size as f64)
        .sum();
    let n_words: usize = reference_lengths.iter().map(|len| len + 1).sum();

    if n_words == 0 {
        return f64::INFINITY;
    }
    (weighted_loss / n_words as f64).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_loss_gives_unit_perplexity() {
        let ppl = corpus_perplexity(&[0.0, 0.0], &[4, 4], &[3, 5, 2, 7, 1, 1, 1, 1]);
        assert!((ppl - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_batch_matches_exp_mean() {
        // One batch of 2 examples, each reference 4 words: exp(2*loss / 10).
        let ppl = corpus_perplexity(&[2.5], &[2], &[4, 4]);
        let expected = (2.5 * 2.0 / 10.0f64).exp();
        assert!((ppl - expected).abs() < 1e-12);
    }

    #[test]
    fn test_batch_weighting() {
        // A large batch must pull the aggregate more than a small one.
        let small = corpus_perplexity(&[1.0, 5.0], &[10, 1], &[2; 11]);
        let large = corpus_perplexity(&[1.0, 5.0], &[1, 10], &[2; 11]);
        assert!(small < large);
    }

    #[test]
    fn test_no_references_is_infinite() {
        assert!(corpus_perplexity(&[], &[], &[]).is_infinite());
    }
}
