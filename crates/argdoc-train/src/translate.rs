//! Decoding index sequences back to tokens.

use crate::error::TrainResult;
use crate::vocab::Vocabulary;

/// Map an index sequence back to tokens.
///
/// With `trim_pads` the sequence ends at the first zero, which is how
/// padded rows carry their effective length. `prepend` inserts a literal
/// token in front, used for model output that starts after `<START>`.
pub fn decode(
    ids: &[u32],
    vocab: &Vocabulary,
    trim_pads: bool,
    prepend: Option<&str>,
) -> TrainResult<Vec<String>> {
    let effective: &[u32] = if trim_pads {
        let end = ids.iter().position(|&i| i == 0).unwrap_or(ids.len());
        &ids[..end]
    } else {
        ids
    };

    let mut tokens = Vec::with_capacity(effective.len() + 1);
    if let Some(tok) = prepend {
        tokens.push(tok.to_string());
    }
    for &id in effective {
        tokens.push(vocab.token(id)?.to_string());
    }
    Ok(tokens)
}

/// Decode a character-encoded name row into one display string, sentinels
/// included, e.g. `axis<END>`.
pub fn decode_name(ids: &[u32], chars: &Vocabulary) -> TrainResult<String> {
    Ok(decode(ids, chars, true, None)?.concat())
}

/// Drop the leading and trailing sentinel of a decoded sequence. A
/// sequence of fewer than two tokens has no interior and comes back empty.
pub fn inner_tokens(tokens: &[String]) -> Vec<String> {
    if tokens.len() < 2 {
        return Vec::new();
    }
    tokens[1..tokens.len() - 1].to_vec()
}
