//! Candidate scoring and acceptance.
//!
//! A candidate is one row from a target catalog search. The title and artist
//! are scored independently, each as the best of several views of the same
//! strings (raw, normalized, feature-credit stripped, upload-suffix
//! stripped), then combined 70/30. Thresholds were tuned against real
//! search traffic; tests pin them.

use crate::fuzzy::blended;
use crate::normalize::normalize_title;

pub const TITLE_FLOOR: f64 = 60.0;
pub const ARTIST_FLOOR: f64 = 40.0;
pub const TITLE_OVERRIDE: f64 = 80.0;
pub const TITLE_WEIGHT: f64 = 0.7;
pub const ARTIST_WEIGHT: f64 = 0.3;

/// Upload-style suffixes video sites append to titles.
const TITLE_SUFFIXES: &[&str] = &[
    " official video",
    " official audio",
    " music video",
    " mv",
    " lyrics",
];

/// Label-style suffixes on uploader/channel names.
const ARTIST_SUFFIXES: &[&str] = &[" official", " vevo", " records", " music"];

/// One search result, in the order the catalog returned it.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,
    pub title: String,
    pub artist: String,
}

/// An accepted candidate with the scores that admitted it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMatch {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub title_score: f64,
    pub artist_score: f64,
}

impl ScoredMatch {
    pub fn combined(&self) -> f64 {
        combined(self.title_score, self.artist_score)
    }
}

pub fn combined(title_score: f64, artist_score: f64) -> f64 {
    TITLE_WEIGHT * title_score + ARTIST_WEIGHT * artist_score
}

/// Acceptance rule: a solid title with a plausible artist, or a title so
/// close the artist signal is unnecessary.
pub fn acceptable(title_score: f64, artist_score: f64) -> bool {
    (title_score >= TITLE_FLOOR && artist_score >= ARTIST_FLOOR) || title_score >= TITLE_OVERRIDE
}

pub fn title_score(track_name: &str, artists: &str, cand_title: &str, cand_artist: &str) -> f64 {
    let track_lower = track_name.to_lowercase();
    let cand_lower = cand_title.to_lowercase();

    let mut scores = vec![
        blended(&cand_lower, &track_lower),
        blended(
            &normalize_title(cand_title, &[cand_artist]),
            &normalize_title(track_name, &[artists]),
        ),
    ];

    // "Song (feat. X)" rarely keeps its credit on the other side.
    if track_lower.contains("(feat") || track_lower.contains("(ft") {
        if let Some(main) = track_name.split('(').next() {
            scores.push(blended(&cand_lower, &main.trim().to_lowercase()));
        }
    }

    scores.push(blended(&strip_suffixes(&cand_lower, TITLE_SUFFIXES), &track_lower));
    scores.push(word_overlap(&cand_lower, &track_lower));

    max_of(&scores)
}

pub fn artist_score(track_name: &str, artists: &str, cand_title: &str, cand_artist: &str) -> f64 {
    let track_lower = track_name.to_lowercase();
    let artists_lower = artists.to_lowercase();
    let cand_title_lower = cand_title.to_lowercase();
    let cand_artist_lower = cand_artist.to_lowercase();

    let mut scores = vec![blended(&cand_artist_lower, &artists_lower)];

    if !artists_lower.is_empty() && cand_title_lower.contains(&artists_lower) {
        scores.push(90.0);
    }

    // The reverse also happens: source titles that embed the artist name.
    if !cand_artist_lower.is_empty() && track_lower.contains(&cand_artist_lower) {
        scores.push(85.0);
    }

    for word in artists_lower.split_whitespace() {
        if word.len() > 2 {
            if cand_title_lower.contains(word) {
                scores.push(85.0);
            }
            if cand_artist_lower.contains(word) {
                scores.push(75.0);
            }
        }
    }

    scores.push(blended(
        &strip_suffixes(&cand_artist_lower, ARTIST_SUFFIXES),
        &artists_lower,
    ));

    // Collaborations list several artists; any one of them is enough.
    if artists.contains(',') {
        for part in artists_lower.split(',') {
            let part = part.trim();
            if !part.is_empty()
                && (cand_artist_lower.contains(part) || cand_title_lower.contains(part))
            {
                scores.push(80.0);
            }
        }
    }

    max_of(&scores)
}

/// Score every candidate and return the best acceptable one, if any.
///
/// Deterministic for a fixed candidate ordering: ties on the combined score
/// resolve to the earlier index.
pub fn best_match(track_name: &str, artists: &str, candidates: &[Candidate]) -> Option<ScoredMatch> {
    let mut best: Option<ScoredMatch> = None;

    for cand in candidates {
        let t = title_score(track_name, artists, &cand.title, &cand.artist);
        let a = artist_score(track_name, artists, &cand.title, &cand.artist);
        if !acceptable(t, a) {
            continue;
        }
        let beats_current = match &best {
            Some(current) => combined(t, a) > current.combined(),
            None => true,
        };
        if beats_current {
            best = Some(ScoredMatch {
                id: cand.id.clone(),
                title: cand.title.clone(),
                artist: cand.artist.clone(),
                title_score: t,
                artist_score: a,
            });
        }
    }

    best
}

fn strip_suffixes(text: &str, suffixes: &[&str]) -> String {
    let mut out = text.trim().to_string();
    for suffix in suffixes {
        if let Some(stripped) = out.strip_suffix(suffix) {
            out = stripped.trim_end().to_string();
        }
    }
    out
}

fn word_overlap(a: &str, b: &str) -> f64 {
    let words = |s: &str| -> Vec<String> {
        s.replace(['(', ')'], " ")
            .split_whitespace()
            .map(|w| w.to_string())
            .collect()
    };
    let wa: std::collections::HashSet<String> = words(a).into_iter().collect();
    let wb: std::collections::HashSet<String> = words(b).into_iter().collect();
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let common = wa.intersection(&wb).count();
    if common == 0 {
        return 0.0;
    }
    (common as f64 / wa.len().max(wb.len()) as f64) * 100.0
}

fn max_of(scores: &[f64]) -> f64 {
    scores.iter().copied().fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(id: &str, title: &str, artist: &str) -> Candidate {
        Candidate {
            id: id.to_string(),
            title: title.to_string(),
            artist: artist.to_string(),
        }
    }

    #[test]
    fn exact_match_is_accepted() {
        let m = best_match(
            "Hotline Bling",
            "Drake",
            &[cand("v1", "Hotline Bling", "Drake")],
        )
        .expect("match");
        assert_eq!(m.id, "v1");
        assert!(m.title_score >= TITLE_OVERRIDE);
    }

    #[test]
    fn upload_suffix_does_not_block_match() {
        let m = best_match(
            "Hotline Bling",
            "Drake",
            &[cand("v1", "Hotline Bling Official Video", "Drake")],
        )
        .expect("match");
        assert_eq!(m.id, "v1");
    }

    #[test]
    fn feature_credit_is_forgiven() {
        let m = best_match(
            "Free Kutter (feat. Jay Electronica)",
            "Big Sean",
            &[cand("v1", "Free Kutter", "Big Sean")],
        )
        .expect("match");
        assert_eq!(m.id, "v1");
    }

    #[test]
    fn acceptance_thresholds_are_pinned() {
        assert!(acceptable(60.0, 40.0));
        assert!(!acceptable(59.9, 100.0));
        assert!(!acceptable(60.0, 39.9));
        assert!(acceptable(80.0, 0.0));
        assert!(!acceptable(79.9, 39.9));
    }

    #[test]
    fn combined_weights_are_pinned() {
        assert_eq!(combined(100.0, 0.0), 70.0);
        assert_eq!(combined(0.0, 100.0), 30.0);
    }

    #[test]
    fn rejects_when_nothing_clears() {
        assert!(best_match(
            "Hotline Bling",
            "Drake",
            &[cand("v1", "Completely Unrelated Song", "Someone Else")],
        )
        .is_none());
    }

    #[test]
    fn higher_combined_score_wins() {
        let m = best_match(
            "Hotline Bling",
            "Drake",
            &[
                cand("weak", "Hotline Bling Remix Extended Cut", "DJ Nobody"),
                cand("strong", "Hotline Bling", "Drake"),
            ],
        )
        .expect("match");
        assert_eq!(m.id, "strong");
    }

    #[test]
    fn ties_break_to_earlier_candidate() {
        // Identical candidates: the first one must win.
        let m = best_match(
            "Hotline Bling",
            "Drake",
            &[
                cand("first", "Hotline Bling", "Drake"),
                cand("second", "Hotline Bling", "Drake"),
            ],
        )
        .expect("match");
        assert_eq!(m.id, "first");
    }

    #[test]
    fn deterministic_for_fixed_ordering() {
        let candidates = vec![
            cand("a", "Hotline Bling Audio", "Drake"),
            cand("b", "Hotline Bling", "Drake Official"),
        ];
        let first = best_match("Hotline Bling", "Drake", &candidates);
        for _ in 0..10 {
            assert_eq!(first, best_match("Hotline Bling", "Drake", &candidates));
        }
    }

    #[test]
    fn artist_substring_in_title_boosts() {
        let score = artist_score("One Dance", "Drake", "Drake - One Dance", "Random Channel");
        assert!(score >= 85.0);
    }
}
