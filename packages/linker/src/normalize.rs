//! Street normalization and similarity.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::synonyms;

static PUNCTUATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.,#'/\\\-]+").expect("valid regex"));

/// Uppercases, strips punctuation, expands abbreviations and collapses
/// whitespace. "100 n. Main St" becomes "100 NORTH MAIN STREET".
#[must_use]
pub fn normalize(input: &str) -> String {
    let upper = input.to_uppercase();
    let stripped = PUNCTUATION_RE.replace_all(&upper, " ");
    stripped
        .split_whitespace()
        .map(synonyms::expand_token)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized street, or `None` when nothing is left.
#[must_use]
pub fn normalize_street(street: Option<&str>) -> Option<String> {
    street.map(normalize).filter(|s| !s.is_empty())
}

/// Normalized "number street" key, or `None` unless both parts exist.
#[must_use]
pub fn address_key(house_number: Option<&str>, street: Option<&str>) -> Option<String> {
    let number = normalize(house_number?);
    let street = normalize_street(street)?;
    if number.is_empty() {
        return None;
    }
    Some(format!("{number} {street}"))
}

fn bigrams(s: &str) -> BTreeMap<(char, char), usize> {
    let chars: Vec<char> = s.chars().filter(|c| !c.is_whitespace()).collect();
    let mut counts = BTreeMap::new();
    for pair in chars.windows(2) {
        *counts.entry((pair[0], pair[1])).or_insert(0) += 1;
    }
    counts
}

/// Sørensen–Dice coefficient over character bigrams of the normalized
/// strings.
///
/// Equal normalized strings score 1.0 and a missing side scores 0.0.
#[must_use]
pub fn street_similarity(a: Option<&str>, b: Option<&str>) -> f64 {
    let (Some(a), Some(b)) = (normalize_street(a), normalize_street(b)) else {
        return 0.0;
    };
    if a == b {
        return 1.0;
    }

    let (left, right) = (bigrams(&a), bigrams(&b));
    let total: usize = left.values().sum::<usize>() + right.values().sum::<usize>();
    if total == 0 {
        return 0.0;
    }
    let shared: usize = left
        .iter()
        .map(|(gram, &n)| n.min(right.get(gram).copied().unwrap_or(0)))
        .sum();

    #[allow(clippy::cast_precision_loss)]
    let score = 2.0 * shared as f64 / total as f64;
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_punctuation_and_suffixes() {
        assert_eq!(normalize("100 n. Main St."), "100 NORTH MAIN STREET");
        assert_eq!(normalize("  King  St  W "), "KING STREET WEST");
        assert_eq!(normalize("Bloor-Danforth Ave"), "BLOOR DANFORTH AVENUE");
    }

    #[test]
    fn abbreviated_and_full_streets_are_identical() {
        let s = street_similarity(Some("Queen St E"), Some("QUEEN STREET EAST"));
        assert!((s - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_side_scores_zero() {
        assert!(street_similarity(None, Some("Main St")).abs() < f64::EPSILON);
        assert!(street_similarity(Some(" "), Some("Main St")).abs() < f64::EPSILON);
    }

    #[test]
    fn similar_streets_score_between_bounds() {
        let close = street_similarity(Some("Dundas St W"), Some("Dundas St"));
        let far = street_similarity(Some("Dundas St W"), Some("Spadina Ave"));
        assert!(close > 0.7 && close < 1.0, "{close}");
        assert!(far < 0.3, "{far}");
    }

    #[test]
    fn address_key_requires_both_parts() {
        assert_eq!(
            address_key(Some("12b"), Some("Elm Cres")).as_deref(),
            Some("12B ELM CRESCENT")
        );
        assert_eq!(address_key(None, Some("Elm Cres")), None);
        assert_eq!(address_key(Some("12"), None), None);
    }
}
