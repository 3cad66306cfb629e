// 🔤 Text Similarity - token overlap between two free-text strings
//
// Pure set overlap, not edit distance: "STARBUCKS #4521" and
// "Starbucks Coffee" share one whole token and nothing else.

use std::collections::HashSet;

/// Tokens of two characters or fewer carry no signal ("de", "x", "#1")
const MIN_TOKEN_CHARS: usize = 3;

fn tokens(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .map(|token| token.to_lowercase())
        .collect()
}

/// Ratio of shared tokens to the larger token set, in [0, 1].
///
/// Returns 0 when either text is empty or has no usable tokens.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let tokens_a = tokens(a);
    let tokens_b = tokens(b);

    let largest = tokens_a.len().max(tokens_b.len());
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let shared = tokens_a.intersection(&tokens_b).count();
    shared as f64 / largest as f64
}
