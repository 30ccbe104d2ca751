//! Model name resolution: exact, alias, normalized, and fuzzy matching with
//! ranked suggestions for misses.
//!
//! Lookup indexes are built lazily on the first resolve and are immutable
//! afterwards; the store creates a fresh resolver when the catalog refreshes.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::aliases::generate_aliases;
use super::normalizer::normalize_model_name;
use super::types::Catalog;

/// How a name was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Alias,
    Normalized,
    Fuzzy,
}

/// A successful name resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameResolution {
    pub canonical_name: String,
    pub match_type: MatchType,
    /// Exact/alias = 1.0, normalized = 0.95, fuzzy in [0, 0.9].
    pub confidence: f64,
}

struct Index {
    /// Exact canonical names.
    canonical: HashMap<String, String>,
    /// Case-folded canonical names and non-ambiguous aliases.
    alias_folded: HashMap<String, String>,
    /// Normalized canonical-and-alias forms.
    normalized: HashMap<String, String>,
    /// (canonical_name, normalized candidate form) pairs for fuzzy matching
    /// and suggestions.
    candidates: Vec<(String, String)>,
}

/// Resolves user-supplied model names against a catalog snapshot.
pub struct NameResolver {
    catalog: Arc<Catalog>,
    max_aliases_per_model: usize,
    index: OnceCell<Index>,
}

impl NameResolver {
    pub fn new(catalog: Arc<Catalog>, max_aliases_per_model: usize) -> Self {
        Self {
            catalog,
            max_aliases_per_model,
            index: OnceCell::new(),
        }
    }

    /// Resolve a user-supplied name. With `strict` set, fuzzy matching is
    /// skipped. Empty or whitespace input resolves to `None`.
    pub fn resolve(&self, name: &str, strict: bool) -> Option<NameResolution> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return None;
        }

        let index = self.index();

        if let Some(canonical) = index.canonical.get(trimmed) {
            return Some(NameResolution {
                canonical_name: canonical.clone(),
                match_type: MatchType::Exact,
                confidence: 1.0,
            });
        }

        if let Some(canonical) = index.alias_folded.get(&trimmed.to_lowercase()) {
            return Some(NameResolution {
                canonical_name: canonical.clone(),
                match_type: MatchType::Alias,
                confidence: 1.0,
            });
        }

        let normalized = normalize_model_name(trimmed);
        if let Some(canonical) = index.normalized.get(&normalized) {
            return Some(NameResolution {
                canonical_name: canonical.clone(),
                match_type: MatchType::Normalized,
                confidence: 0.95,
            });
        }

        if strict {
            return None;
        }

        self.resolve_fuzzy(&normalized, index)
    }

    fn resolve_fuzzy(&self, normalized_query: &str, index: &Index) -> Option<NameResolution> {
        let threshold = fuzzy_threshold(normalized_query);
        let mut best: Option<(&str, f64)> = None;

        for (canonical, candidate) in &index.candidates {
            let score = if is_substring_match(normalized_query, candidate) {
                similarity_ratio(normalized_query, candidate).max(threshold)
            } else {
                let ratio = similarity_ratio(normalized_query, candidate);
                if ratio < threshold {
                    continue;
                }
                ratio
            };

            if best.is_none_or(|(_, current)| score > current) {
                best = Some((canonical, score));
            }
        }

        best.map(|(canonical, score)| {
            debug!(
                query = normalized_query,
                canonical, score, "fuzzy-resolved model name"
            );
            NameResolution {
                canonical_name: canonical.to_string(),
                match_type: MatchType::Fuzzy,
                confidence: score.min(0.9),
            }
        })
    }

    /// Up to `k` canonical names ranked by similarity to `name`. Every
    /// returned suggestion satisfies the fuzzy threshold or a substring
    /// match. Empty input yields an empty list.
    pub fn suggestions(&self, name: &str, k: usize) -> Vec<String> {
        let normalized_query = normalize_model_name(name);
        if normalized_query.is_empty() || k == 0 {
            return Vec::new();
        }

        let threshold = fuzzy_threshold(&normalized_query);
        let index = self.index();

        // Best score per canonical name across its candidate forms.
        let mut scores: HashMap<&str, f64> = HashMap::new();
        for (canonical, candidate) in &index.candidates {
            let substring = is_substring_match(&normalized_query, candidate);
            let ratio = similarity_ratio(&normalized_query, candidate);
            if !substring && ratio < threshold {
                continue;
            }
            let entry = scores.entry(canonical.as_str()).or_insert(0.0);
            if ratio > *entry {
                *entry = ratio;
            }
        }

        let mut ranked: Vec<(&str, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        ranked
            .into_iter()
            .take(k)
            .map(|(canonical, _)| canonical.to_string())
            .collect()
    }

    fn index(&self) -> &Index {
        self.index.get_or_init(|| self.build_index())
    }

    fn build_index(&self) -> Index {
        let mut canonical = HashMap::new();
        let mut alias_folded = HashMap::new();
        let mut normalized = HashMap::new();
        let mut candidates = Vec::new();

        // Alias -> owning model_id, used to drop ambiguous aliases. Entries
        // sharing the same underlying model id (regional variants) may share
        // aliases.
        let mut alias_owner: HashMap<String, (String, String)> = HashMap::new();
        let mut ambiguous: std::collections::HashSet<String> = Default::default();

        for entry in self.catalog.models.values() {
            let name = entry.canonical_name.clone();
            canonical.insert(name.clone(), name.clone());
            alias_folded.entry(name.to_lowercase()).or_insert_with(|| name.clone());
            normalized
                .entry(normalize_model_name(&name))
                .or_insert_with(|| name.clone());
            candidates.push((name.clone(), normalize_model_name(&name)));

            for alias in generate_aliases(entry, self.max_aliases_per_model) {
                let key = normalize_model_name(&alias);
                match alias_owner.get(&key) {
                    None => {
                        alias_owner.insert(key, (entry.model_id.clone(), name.clone()));
                        alias_folded
                            .entry(alias.to_lowercase())
                            .or_insert_with(|| name.clone());
                        normalized
                            .entry(normalize_model_name(&alias))
                            .or_insert_with(|| name.clone());
                        candidates.push((name.clone(), normalize_model_name(&alias)));
                    }
                    Some((owner_id, _)) if *owner_id != entry.model_id => {
                        ambiguous.insert(key);
                    }
                    Some(_) => {}
                }
            }
        }

        // Drop ambiguous aliases from every lookup structure.
        if !ambiguous.is_empty() {
            debug!(
                count = ambiguous.len(),
                "dropping ambiguous aliases from name index"
            );
            alias_folded.retain(|key, canonical_name| {
                !ambiguous.contains(&normalize_model_name(key))
                    || *key == canonical_name.to_lowercase()
            });
            normalized.retain(|key, canonical_name| {
                !ambiguous.contains(key) || {
                    // Keep entries whose normalized canonical name happens to
                    // collide with a dropped alias.
                    normalize_model_name(canonical_name) == *key
                }
            });
            candidates.retain(|(canonical_name, candidate)| {
                !ambiguous.contains(candidate)
                    || normalize_model_name(canonical_name) == *candidate
            });
        }

        Index {
            canonical,
            alias_folded,
            normalized,
            candidates,
        }
    }
}

fn fuzzy_threshold(normalized_query: &str) -> f64 {
    if normalized_query.chars().count() >= 5 {
        0.3
    } else {
        0.2
    }
}

fn is_substring_match(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a.contains(b) || b.contains(a))
}

/// Ratcliff/Obershelp sequence similarity: `2*M / (|a| + |b|)` where `M` is
/// the total length of matched blocks found by recursively taking the
/// longest common substring.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matched = matching_total(&a, &b);
    (2.0 * matched as f64) / total as f64
}

fn matching_total(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    // Longest common substring via a rolling DP row.
    let mut best_len = 0usize;
    let mut best_a_end = 0usize;
    let mut best_b_end = 0usize;
    let mut prev = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        let mut row = vec![0usize; b.len() + 1];
        for (j, &cb) in b.iter().enumerate() {
            if ca == cb {
                let len = prev[j] + 1;
                row[j + 1] = len;
                if len > best_len {
                    best_len = len;
                    best_a_end = i + 1;
                    best_b_end = j + 1;
                }
            }
        }
        prev = row;
    }

    if best_len == 0 {
        return 0;
    }

    best_len
        + matching_total(&a[..best_a_end - best_len], &b[..best_b_end - best_len])
        + matching_total(&a[best_a_end..], &b[best_b_end..])
}
