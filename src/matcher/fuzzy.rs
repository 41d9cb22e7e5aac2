//! Title similarity for non-crypto market matching.
//!
//! Combined score: keyword-set Jaccard overlap blended with a
//! length-normalized edit distance. A match requires the combined score to
//! clear [`MATCH_THRESHOLD`] and the categories to agree.

use lazy_static::lazy_static;
use rayon::prelude::*;
use std::collections::HashSet;

use crate::venues::MarketDescriptor;

/// Combined similarity required for a fuzzy match.
pub const MATCH_THRESHOLD: f64 = 0.72;

const JACCARD_WEIGHT: f64 = 0.6;
const EDIT_WEIGHT: f64 = 0.4;

lazy_static! {
    static ref STOPWORDS: HashSet<&'static str> = [
        "the", "a", "an", "will", "be", "to", "of", "in", "on", "at", "by", "for", "and", "or",
        "is", "are", "does", "do", "than", "with", "before", "after", "over", "under", "vs",
    ]
    .into_iter()
    .collect();
}

/// Lowercased keyword set with stopwords and short tokens removed.
pub fn keywords(title: &str) -> HashSet<String> {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// 1 − edit distance normalized by the longer title.
fn edit_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 0.0;
    }
    1.0 - (levenshtein(&a, &b) as f64 / max_len as f64)
}

pub fn combined_similarity(a_title: &str, b_title: &str) -> f64 {
    let ja = jaccard(&keywords(a_title), &keywords(b_title));
    let ed = edit_similarity(a_title, b_title);
    JACCARD_WEIGHT * ja + EDIT_WEIGHT * ed
}

/// Highest-scoring candidate above threshold, same category only.
pub fn best_match<'a>(
    market: &MarketDescriptor,
    candidates: &'a [MarketDescriptor],
) -> Option<(&'a MarketDescriptor, f64)> {
    candidates
        .par_iter()
        .filter(|c| c.category == market.category)
        .map(|c| (c, combined_similarity(&market.title, &c.title)))
        .filter(|(_, score)| *score >= MATCH_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
}
