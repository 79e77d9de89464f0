//! Fuzzy matching for music tracks across streaming catalogs.
//!
//! Search results come back as loosely labelled candidates ("Song (Official
//! Video)" on a topic channel, "Song - Artist" on a fan upload). This crate
//! normalizes titles into comparable token strings and scores candidates
//! against a source track so callers can pick one acceptable match, or none.

pub mod fuzzy;
pub mod normalize;
pub mod score;

pub use normalize::{dedup_key, normalize_title, tokenize};
pub use score::{best_match, Candidate, ScoredMatch};
