//! End-to-end matching cases modeled on real cross-catalog search traffic.

use trackmatch::{best_match, dedup_key, normalize_title, Candidate};

fn cand(id: &str, title: &str, artist: &str) -> Candidate {
    Candidate {
        id: id.to_string(),
        title: title.to_string(),
        artist: artist.to_string(),
    }
}

#[test]
fn video_site_listing_matches_clean_track() {
    // Typical video-side search results for a streaming-side track.
    let candidates = vec![
        cand("bad1", "Hotline Miami Full Soundtrack", "GameTunes"),
        cand("good", "Drake - Hotline Bling (Official Video)", "DrakeVEVO"),
        cand("bad2", "Hotline Bling Cover (Acoustic)", "Bedroom Covers"),
    ];

    let m = best_match("Hotline Bling", "Drake", &candidates).expect("match");
    assert_eq!(m.id, "good");
}

#[test]
fn featured_artist_credit_survives_both_directions() {
    let candidates = vec![cand("v", "Big Sean - Free Kutter ft. Jay Electronica", "Big Sean")];
    let m = best_match(
        "Free Kutter (feat. Jay Electronica)",
        "Big Sean",
        &candidates,
    )
    .expect("match");
    assert_eq!(m.id, "v");
}

#[test]
fn no_candidates_means_no_match() {
    assert!(best_match("Anything", "Anyone", &[]).is_none());
}

#[test]
fn dedup_key_aligns_listing_variants() {
    // Two uploads of the same song must collide in a dedup set.
    assert_eq!(
        dedup_key("One Dance (Official Audio)"),
        dedup_key("One Dance [Lyrics]")
    );
}

#[test]
fn normalization_is_idempotent_over_fixtures() {
    let fixtures = [
        "Hotline Bling",
        "Free Kutter (feat. Jay Electronica)",
        "R&amp;B Mix Vol. 2",
        "song official video lyrics",
    ];
    for title in fixtures {
        let once = normalize_title(title, &["Drake"]);
        assert_eq!(once, normalize_title(&once, &["Drake"]), "fixture: {title}");
    }
}
