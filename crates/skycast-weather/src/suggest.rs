//! Matching a user's city query against geocoding candidates.
//!
//! The provider's ranking is kept: the first candidate that matches wins.
//! Names localized into another script (a Latin query answered in Chinese,
//! say) cannot be compared, so the provider's top hit is trusted then.
//! When nothing matches, the provider's own candidates become suggestions.

use skycast_core::SuggestionConfig;

use crate::lookup::normalize_query;
use crate::types::Candidate;

#[derive(Debug, Clone, PartialEq)]
pub enum CityMatch {
    Found(Candidate),
    /// No acceptable match; labels of provider candidates, best first.
    NotFound { suggestions: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct CityMatcher {
    min_similarity: f64,
    max_suggestions: usize,
}

impl Default for CityMatcher {
    fn default() -> Self {
        Self::from_config(&SuggestionConfig::default())
    }
}

impl CityMatcher {
    pub fn new(min_similarity: f64, max_suggestions: usize) -> Self {
        Self {
            min_similarity: min_similarity.clamp(0.0, 1.0),
            max_suggestions,
        }
    }

    pub fn from_config(config: &SuggestionConfig) -> Self {
        Self::new(config.min_similarity, config.max_suggestions)
    }

    pub fn resolve(&self, query: &str, candidates: &[Candidate]) -> CityMatch {
        let query = normalize_query(query);

        if let Some(found) = candidates.iter().find(|c| self.matches(&query, &c.name)) {
            return CityMatch::Found(found.clone());
        }
        if let Some(top) = candidates.first() {
            if !query.is_empty() && is_latin(&query) != is_latin(&top.name) {
                tracing::debug!(
                    "Query '{}' and '{}' differ in script, taking top hit",
                    query,
                    top.name
                );
                return CityMatch::Found(top.clone());
            }
        }

        let mut suggestions: Vec<String> = Vec::new();
        for label in candidates.iter().map(Candidate::label) {
            if suggestions.len() >= self.max_suggestions {
                break;
            }
            if !suggestions.contains(&label) {
                suggestions.push(label);
            }
        }
        CityMatch::NotFound { suggestions }
    }

    fn matches(&self, query: &str, name: &str) -> bool {
        let name = normalize_query(name);
        if query.is_empty() || name.is_empty() {
            return false;
        }
        name == query
            || name.contains(query)
            || query.contains(name.as_str())
            || similarity(query, &name) >= self.min_similarity
    }
}

/// Every letter is Basic Latin or a Latin supplement/extension.
fn is_latin(text: &str) -> bool {
    text.chars()
        .filter(|c| c.is_alphabetic())
        .all(|c| (c as u32) < 0x0250 || (0x1E00..0x1F00).contains(&(c as u32)))
}

/// `1 - distance / longer_length`, in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

/// Edit distance over chars, two-row table.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}
