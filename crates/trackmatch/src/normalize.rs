//! Title normalization shared by deduplication and search query building.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("word regex"));

/// Filler tokens that carry no identity: upload qualifiers, format tags,
/// featuring markers. Artist tokens are stripped separately per track.
const STOPWORDS: &[&str] = &[
    "feat",
    "featuring",
    "official",
    "music",
    "video",
    "audio",
    "topic",
    "ft",
    "mv",
    "ver",
    "lyrics",
    "live",
    "album",
    "cover",
];

/// Lowercase word tokens, punctuation dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    WORD.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Normalize a title into a space-joined token string.
///
/// HTML entities are decoded first (provider APIs return `&amp;` and
/// friends), then tokens matching the stop-word set or any token of the
/// supplied artist names are dropped.
pub fn normalize_title(title: &str, artists: &[&str]) -> String {
    let decoded = html_escape::decode_html_entities(title);

    let mut drop: HashSet<String> = STOPWORDS.iter().map(|s| (*s).to_string()).collect();
    for group in artists {
        drop.extend(tokenize(group));
    }

    tokenize(&decoded)
        .into_iter()
        .filter(|t| !drop.contains(t))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deduplication key for a playlist item: the normalized title with no
/// artist context.
pub fn dedup_key(title: &str) -> String {
    normalize_title(title, &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_stopwords_and_punctuation() {
        assert_eq!(
            normalize_title("Hotline Bling (Official Music Video)", &[]),
            "hotline bling"
        );
    }

    #[test]
    fn strips_artist_tokens() {
        assert_eq!(
            normalize_title("Free Kutter (feat. Jay Electronica)", &["Big Sean", "Jay Electronica"]),
            "free kutter"
        );
    }

    #[test]
    fn decodes_html_entities() {
        assert_eq!(normalize_title("Rhythm &amp; Blues", &[]), "rhythm blues");
    }

    #[test]
    fn idempotent() {
        let once = normalize_title("Song Title (Official Video) [Lyrics]", &["Some Artist"]);
        let twice = normalize_title(&once, &["Some Artist"]);
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_and_all_stopword_titles_collapse() {
        assert_eq!(normalize_title("", &[]), "");
        assert_eq!(normalize_title("Official Music Video", &[]), "");
    }
}
