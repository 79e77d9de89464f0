//! Edit-distance primitives on a 0..=100 scale.

use std::collections::BTreeSet;

/// Plain similarity ratio between two strings.
pub fn ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b) * 100.0
}

/// Best ratio of the shorter string against any equally sized window of the
/// longer one. Rewards "Song Title" buried inside "Song Title (Remastered
/// 2011)".
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    let short_chars: Vec<char> = short.chars().collect();
    let long_chars: Vec<char> = long.chars().collect();

    if short_chars.is_empty() {
        return if long_chars.is_empty() { 100.0 } else { 0.0 };
    }

    let window = short_chars.len();
    let short_str: String = short_chars.iter().collect();
    let mut best = 0.0f64;
    for start in 0..=(long_chars.len() - window) {
        let candidate: String = long_chars[start..start + window].iter().collect();
        let r = ratio(&short_str, &candidate);
        if r > best {
            best = r;
        }
        if best >= 100.0 {
            break;
        }
    }
    best
}

/// Order-insensitive ratio over the token sets of both strings.
///
/// The shared tokens are compared against each full token set, so word
/// reordering ("Artist - Song" vs "Song Artist") does not tank the score.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let ta: BTreeSet<&str> = a.split_whitespace().collect();
    let tb: BTreeSet<&str> = b.split_whitespace().collect();

    let common: Vec<&str> = ta.intersection(&tb).copied().collect();
    let only_a: Vec<&str> = ta.difference(&tb).copied().collect();
    let only_b: Vec<&str> = tb.difference(&ta).copied().collect();

    let base = common.join(" ");
    let with_a = join_nonempty(&base, &only_a.join(" "));
    let with_b = join_nonempty(&base, &only_b.join(" "));

    ratio(&base, &with_a)
        .max(ratio(&base, &with_b))
        .max(ratio(&with_a, &with_b))
}

fn join_nonempty(left: &str, right: &str) -> String {
    match (left.is_empty(), right.is_empty()) {
        (true, _) => right.to_string(),
        (_, true) => left.to_string(),
        _ => format!("{left} {right}"),
    }
}

/// Blended score used everywhere a single similarity number is needed.
///
/// Token-set dominance (0.6 weight) with a short-circuit: once the token
/// sets agree at 90+, surface noise in the raw strings is irrelevant.
pub fn blended(a: &str, b: &str) -> f64 {
    let token_set = token_set_ratio(a, b);
    if token_set >= 90.0 {
        return 100.0;
    }
    0.2 * ratio(a, b) + 0.2 * partial_ratio(a, b) + 0.6 * token_set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_score_100() {
        assert_eq!(ratio("hotline bling", "hotline bling"), 100.0);
        assert_eq!(blended("hotline bling", "hotline bling"), 100.0);
    }

    #[test]
    fn partial_finds_embedded_title() {
        let score = partial_ratio("hotline bling", "hotline bling remastered 2011");
        assert_eq!(score, 100.0);
    }

    #[test]
    fn token_set_ignores_word_order() {
        assert_eq!(token_set_ratio("drake hotline bling", "hotline bling drake"), 100.0);
    }

    #[test]
    fn token_set_short_circuits_blend() {
        // Same tokens, different order: blend must report a perfect match.
        assert_eq!(blended("one dance drake", "drake one dance"), 100.0);
    }

    #[test]
    fn unrelated_strings_score_low() {
        assert!(blended("hotline bling", "bohemian rhapsody") < 40.0);
    }

    #[test]
    fn empty_inputs() {
        assert_eq!(ratio("", ""), 100.0);
        assert_eq!(partial_ratio("", "anything"), 0.0);
    }
}
