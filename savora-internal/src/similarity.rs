//! Word-overlap scoring shared by the image matcher and the dedup store.

use std::collections::HashSet;

use lazy_static::lazy_static;

lazy_static! {
    /// Descriptive qualifiers stripped before tokenizing. Keeping the list
    /// fixed (rather than configurable) keeps scores stable across deploys.
    static ref STOP_WORDS: HashSet<&'static str> = [
        "fresh",
        "chopped",
        "minced",
        "diced",
        "sliced",
        "grated",
        "shredded",
        "crushed",
        "peeled",
        "boneless",
        "skinless",
        "ground",
        "dried",
        "frozen",
        "canned",
        "cooked",
        "raw",
        "whole",
        "large",
        "medium",
        "small",
        "extra",
        "organic",
        "finely",
        "thinly",
        "optional",
    ]
    .into_iter()
    .collect();
}

/// Lowercase, split on non-alphanumeric boundaries, drop stop words and
/// tokens of length <= 2, and union everything into one set per side.
fn normalize_tokens<'a>(items: impl IntoIterator<Item = &'a str>) -> HashSet<String> {
    let mut tokens = HashSet::new();
    for item in items {
        for word in item
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
        {
            tokens.insert(word.to_string());
        }
    }
    tokens
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Jaccard similarity over normalized ingredient-word sets. Symmetric,
/// 0.0 when either side is empty, 1.0 for identical non-empty sets.
pub fn word_similarity<A: AsRef<str>, B: AsRef<str>>(items_a: &[A], items_b: &[B]) -> f64 {
    let tokens_a = normalize_tokens(items_a.iter().map(AsRef::as_ref));
    let tokens_b = normalize_tokens(items_b.iter().map(AsRef::as_ref));
    jaccard(&tokens_a, &tokens_b)
}

/// Same scoring applied to two titles, tokenized on the same
/// non-alphanumeric boundaries.
pub fn title_similarity(title_a: &str, title_b: &str) -> f64 {
    let tokens_a = normalize_tokens([title_a]);
    let tokens_b = normalize_tokens([title_b]);
    jaccard(&tokens_a, &tokens_b)
}
