//! Title normalization and fuzzy matching
//!
//! Scoring rules:
//! - identical normalized strings score 1.0
//! - a whole-word containment of at least 4 characters covering at least half
//!   of the longer string scores 0.9
//! - anything else scores the Jaccard overlap of the two word sets

use std::collections::HashSet;

/// Direct catalog matching
pub const CATALOG_MATCH_THRESHOLD: f64 = 0.7;
/// Provider candidate selection during auto-import
pub const PROVIDER_MATCH_THRESHOLD: f64 = 0.5;
/// Last resort when a provider returns a single top hit
pub const PROVIDER_FALLBACK_THRESHOLD: f64 = 0.4;

const CONTAINMENT_SCORE: f64 = 0.9;
const YEAR_MATCH_BONUS: f64 = 0.1;
const YEAR_MISMATCH_PENALTY: f64 = 0.3;

/// Lowercase, spell out `&`, strip punctuation, collapse whitespace.
///
/// Punctuation is removed rather than spaced out so "Grey's" and "Greys"
/// normalize to the same word.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .replace('&', " and ")
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Similarity between two free-text titles, 0.0 to 1.0
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_title(a);
    let b = normalize_title(b);

    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let (shorter, longer) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    if shorter.len() >= 4
        && shorter.len() * 2 >= longer.len()
        && contains_whole_words(longer, shorter)
    {
        return CONTAINMENT_SCORE;
    }

    word_jaccard(&a, &b)
}

/// Movie similarity: title score adjusted by the release year when known
pub fn movie_similarity(
    query_title: &str,
    query_year: Option<i32>,
    candidate_title: &str,
    candidate_year: Option<i32>,
) -> f64 {
    let mut score = title_similarity(query_title, candidate_title);
    if let (Some(q), Some(c)) = (query_year, candidate_year) {
        if q == c {
            score += YEAR_MATCH_BONUS;
        } else {
            score -= YEAR_MISMATCH_PENALTY;
        }
    }
    score.clamp(0.0, 1.0)
}

fn contains_whole_words(haystack: &str, needle: &str) -> bool {
    // Both sides are normalized, so words are separated by single spaces
    let padded_hay = format!(" {} ", haystack);
    let padded_needle = format!(" {} ", needle);
    padded_hay.contains(&padded_needle)
}

fn word_jaccard(a: &str, b: &str) -> f64 {
    let wa: HashSet<&str> = a.split(' ').collect();
    let wb: HashSet<&str> = b.split(' ').collect();
    let union = wa.union(&wb).count();
    if union == 0 {
        return 0.0;
    }
    wa.intersection(&wb).count() as f64 / union as f64
}

/// Best-scoring candidate at or above `threshold`
#[derive(Debug, Clone, Copy)]
pub struct BestMatch<'a, T> {
    pub item: &'a T,
    pub score: f64,
}

/// Score every candidate and keep the maximum, if it clears `threshold`.
/// Ties keep the earlier candidate.
pub fn find_best_match<'a, T, I, F>(candidates: I, threshold: f64, score: F) -> Option<BestMatch<'a, T>>
where
    I: IntoIterator<Item = &'a T>,
    F: Fn(&T) -> f64,
{
    let mut best: Option<BestMatch<'a, T>> = None;
    for item in candidates {
        let s = score(item);
        if best.as_ref().is_none_or(|b| s > b.score) {
            best = Some(BestMatch { item, score: s });
        }
    }
    best.filter(|b| b.score >= threshold)
}

/// Highest similarity between `query` and any of `names`
pub fn best_name_score<'n>(query: &str, names: impl IntoIterator<Item = &'n str>) -> f64 {
    names
        .into_iter()
        .map(|n| title_similarity(query, n))
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("Law & Order: SVU"), "law and order svu");
        assert_eq!(normalize_title("  Spider-Man:  No Way Home "), "spiderman no way home");
        assert_eq!(normalize_title("Marvel's Agents of S.H.I.E.L.D."), "marvels agents of shield");
    }

    #[test]
    fn test_apostrophe_titles_match_release_names() {
        for (release, catalog) in [
            ("Greys Anatomy", "Grey's Anatomy"),
            ("Schitts Creek", "Schitt's Creek"),
            ("Bobs Burgers", "Bob's Burgers"),
        ] {
            assert_eq!(title_similarity(release, catalog), 1.0, "{release}");
        }
        assert!(title_similarity("Chicago PD", "Chicago P.D.") >= CATALOG_MATCH_THRESHOLD);
    }

    #[test]
    fn test_identical_titles_score_one() {
        for name in ["The Office", "Dark", "24", "Law & Order", "Shōgun"] {
            assert_eq!(title_similarity(name, name), 1.0, "{name}");
        }
        assert_eq!(title_similarity("Law and Order", "Law & Order"), 1.0);
    }

    #[test]
    fn test_whole_word_containment() {
        assert_eq!(title_similarity("The Office", "The Office US"), 0.9);
        // "office" is not half of "the office of strategic services"
        assert!(title_similarity("Office", "The Office of Strategic Services") < 0.9);
        // "bad" is too short to count
        assert!(title_similarity("Bad", "Bad Sisters") < 0.9);
        // substring but not on a word boundary
        assert!(title_similarity("Archer", "Archers Lane") < 0.9);
    }

    #[test]
    fn test_jaccard_fallback() {
        let s = title_similarity("Chicago Fire", "Chicago Med");
        assert!((s - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(title_similarity("Severance", "Foundation"), 0.0);
        assert_eq!(title_similarity("", "Anything"), 0.0);
    }

    #[test]
    fn test_movie_year_adjustment() {
        assert_eq!(movie_similarity("Dune", Some(2021), "Dune", Some(2021)), 1.0);
        let diff = movie_similarity("Dune", Some(2021), "Dune", Some(1984));
        assert!((diff - 0.7).abs() < 1e-9);
        assert_eq!(movie_similarity("Dune", None, "Dune", Some(1984)), 1.0);
        let bonus = movie_similarity("Chicago Fire", Some(2012), "Chicago Med", Some(2012));
        assert!((bonus - (1.0 / 3.0 + 0.1)).abs() < 1e-9);
    }

    #[test]
    fn test_find_best_match_respects_threshold() {
        let shows = vec!["Chicago Fire", "Chicago Med", "Chicago P.D."];
        let best = find_best_match(&shows, CATALOG_MATCH_THRESHOLD, |s| {
            title_similarity("Chicago Fire", s)
        })
        .unwrap();
        assert_eq!(*best.item, "Chicago Fire");

        let none = find_best_match(&shows, CATALOG_MATCH_THRESHOLD, |s| {
            title_similarity("Chicago Justice", s)
        });
        assert!(none.is_none());
    }

    #[test]
    fn test_best_name_score_uses_aliases() {
        let names = ["Shōgun", "Shogun"];
        assert_eq!(best_name_score("Shogun", names), 1.0);
    }
}
