//! Text normalization and similarity primitives shared by the decomposer,
//! query generator, and match scorer.
//!
//! All comparisons in the crate go through `normalize_text` so that cache
//! keys, dedup checks, and similarity scores agree on what "the same text"
//! means.

use std::collections::HashSet;

/// Replaces curly quotes, unicode dashes, and ellipses with their ASCII
/// counterparts and non-breaking spaces with plain spaces.
pub fn fold_punctuation(value: &str) -> String {
    let mut folded = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\u{2018}' | '\u{2019}' | '\u{201a}' | '\u{2032}' => folded.push('\''),
            '\u{201c}' | '\u{201d}' | '\u{201e}' | '\u{2033}' => folded.push('"'),
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}' => {
                folded.push('-')
            }
            '\u{2026}' => folded.push_str("..."),
            '\u{00a0}' | '\u{2009}' | '\u{200a}' | '\u{202f}' => folded.push(' '),
            _ => folded.push(ch),
        }
    }
    folded
}

pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercases, folds punctuation, maps separators to spaces, and drops the
/// remaining punctuation. Apostrophes vanish rather than split words, so
/// "Don't" and "Dont" normalize identically.
pub fn normalize_text(value: &str) -> String {
    let folded = fold_punctuation(value);
    let mut normalized = String::with_capacity(folded.len());
    for ch in folded.chars() {
        if ch.is_alphanumeric() {
            for lowered in ch.to_lowercase() {
                normalized.push(lowered);
            }
        } else if ch.is_whitespace() || ch == '-' || ch == '_' || ch == '/' {
            normalized.push(' ');
        }
    }
    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized text with the spaces removed as well; catches spacing-variant
/// names like "Sample Group" vs "SAMPLEGROUP".
pub fn compact_text(value: &str) -> String {
    normalize_text(value).split_whitespace().collect()
}

/// Share of distinct words the two normalized strings have in common,
/// against the larger word set.
pub fn word_overlap_ratio(left: &str, right: &str) -> f64 {
    let left_words: HashSet<&str> = left.split_whitespace().collect();
    let right_words: HashSet<&str> = right.split_whitespace().collect();
    if left_words.is_empty() || right_words.is_empty() {
        return 0.0;
    }
    let intersection = left_words.intersection(&right_words).count() as f64;
    intersection / left_words.len().max(right_words.len()) as f64
}

/// Share of the smaller word set contained in the larger one; 1.0 when one
/// side is a subset of the other, as with multi-artist credit strings.
pub fn containment_ratio(left: &str, right: &str) -> f64 {
    let left_words: HashSet<&str> = left.split_whitespace().collect();
    let right_words: HashSet<&str> = right.split_whitespace().collect();
    if left_words.is_empty() || right_words.is_empty() {
        return 0.0;
    }
    let intersection = left_words.intersection(&right_words).count() as f64;
    intersection / left_words.len().min(right_words.len()) as f64
}

/// Composite similarity in [0, 1] over raw strings.
///
/// Normalized or compact equality is a full match; otherwise character
/// distance and word overlap are blended so reordered words and small
/// spelling noise both stay recoverable.
pub fn text_similarity(left: &str, right: &str) -> f64 {
    let normalized_left = normalize_text(left);
    let normalized_right = normalize_text(right);
    if normalized_left.is_empty() && normalized_right.is_empty() {
        return 1.0;
    }
    if normalized_left.is_empty() || normalized_right.is_empty() {
        return 0.0;
    }
    if normalized_left == normalized_right {
        return 1.0;
    }
    if compact_text(left) == compact_text(right) {
        return 1.0;
    }
    let distance = strsim::normalized_levenshtein(&normalized_left, &normalized_right);
    let overlap = word_overlap_ratio(&normalized_left, &normalized_right);
    (0.5 * distance + 0.5 * overlap).clamp(0.0, 1.0)
}

/// True when the normalized needle occurs inside the normalized haystack.
pub fn contains_normalized(haystack: &str, needle: &str) -> bool {
    let needle = normalize_text(needle);
    if needle.is_empty() {
        return false;
    }
    normalize_text(haystack).contains(&needle)
}

#[cfg(test)]
mod tests {
    use super::{
        collapse_whitespace, compact_text, containment_ratio, contains_normalized,
        fold_punctuation, normalize_text, text_similarity, word_overlap_ratio,
    };

    #[test]
    fn test_fold_punctuation_maps_curly_quotes_and_dashes() {
        assert_eq!(
            fold_punctuation("Don\u{2019}t Stop \u{2014} Club Mix"),
            "Don't Stop - Club Mix"
        );
    }

    #[test]
    fn test_normalize_text_collapses_symbols_and_case() {
        assert_eq!(
            normalize_text("Sample-Name / RANDOM Value!!"),
            "sample name random value"
        );
    }

    #[test]
    fn test_normalize_text_drops_apostrophes_without_splitting() {
        assert_eq!(normalize_text("Don\u{2019}t Stop"), "dont stop");
    }

    #[test]
    fn test_normalize_text_keeps_accented_letters() {
        assert_eq!(normalize_text("Étienne de Crécy"), "étienne de crécy");
    }

    #[test]
    fn test_compact_text_removes_spacing_and_punctuation() {
        assert_eq!(compact_text("Sample Group!"), "samplegroup");
    }

    #[test]
    fn test_collapse_whitespace_joins_runs() {
        assert_eq!(collapse_whitespace("  a \t b\n c "), "a b c");
    }

    #[test]
    fn test_word_overlap_ratio_uses_larger_set_denominator() {
        let ratio = word_overlap_ratio("midnight city", "midnight city extended mix");
        assert!((ratio - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_containment_ratio_full_for_subset_credit() {
        let ratio = containment_ratio("m83", "m83 artist x");
        assert!((ratio - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_text_similarity_exact_after_normalization() {
        assert!((text_similarity("Midnight City", "midnight   CITY!") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_text_similarity_compact_variant_is_full_match() {
        assert!((text_similarity("M 83", "M83") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_text_similarity_rewards_reordered_words() {
        let similarity = text_similarity("City Midnight", "Midnight City");
        assert!(similarity > 0.6, "got {similarity}");
    }

    #[test]
    fn test_text_similarity_low_for_unrelated_strings() {
        let similarity = text_similarity("Midnight City", "Completely Different Song");
        assert!(similarity < 0.4, "got {similarity}");
    }

    #[test]
    fn test_text_similarity_empty_sides() {
        assert!((text_similarity("", "") - 1.0).abs() < 1e-9);
        assert!(text_similarity("", "something") < 1e-9);
    }

    #[test]
    fn test_contains_normalized_matches_inner_phrase() {
        assert!(contains_normalized(
            "Midnight City (Eric Prydz Remix)",
            "eric prydz"
        ));
        assert!(!contains_normalized("Midnight City", ""));
    }
}
