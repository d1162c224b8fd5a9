//! Feature-term extraction (§4.5.2): picks the N highest-weighted terms
//! out of a word-tokenized text, for use as inverted-index feature
//! keys rather than raw postings.

use crate::tokenizer::word::{UnifiedPos, WordAnalysis};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Ceiling applied to a single term's occurrence cost before the
    /// term-frequency weighting is applied.
    pub max_occurrence_cost: f64,
    /// Multiplier against `ln(char_count)` for alphabetic candidate
    /// terms; stands in for a dictionary-assigned word cost, which this
    /// tokenizer has no dictionary to supply.
    pub alphabet_cost_factor: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            max_occurrence_cost: 500.0,
            alphabet_cost_factor: 25.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTerm {
    pub term: String,
    pub tf: usize,
    pub weight: f64,
}

fn is_candidate(word: &WordAnalysis) -> bool {
    matches!(word.pos, UnifiedPos::Noun | UnifiedPos::Unknown)
        && word.surface.chars().count() > 1
        && word.surface.chars().all(|c| c.is_alphabetic())
}

/// Extract up to `n` feature terms, highest weight first. Candidate
/// terms are alphabetic words of length > 1 that are not stopwords or
/// numerals (§4.5.2). A term's cost is set on its first occurrence and
/// capped at `max_occurrence_cost`; every later occurrence increments
/// its term frequency but leaves the cost unchanged. Final weight is
/// `ln(tf + 1) * cost`.
///
/// The cutoff at `n` extends to include any run of ties at the
/// boundary weight, up to `2 * n` terms total, rather than cutting a
/// tied group in half arbitrarily.
pub fn extract_features(words: &[WordAnalysis], n: usize, config: &FeatureConfig) -> Vec<FeatureTerm> {
    let mut order: Vec<String> = Vec::new();
    let mut tf: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut cost: std::collections::HashMap<String, f64> = std::collections::HashMap::new();

    for word in words {
        if !is_candidate(word) {
            continue;
        }
        let key = word.surface.to_string();
        if let Some(count) = tf.get_mut(&key) {
            *count += 1;
        } else {
            let char_count = key.chars().count() as f64;
            let raw_cost = config.alphabet_cost_factor * char_count.ln();
            cost.insert(key.clone(), raw_cost.min(config.max_occurrence_cost));
            tf.insert(key.clone(), 1);
            order.push(key);
        }
    }

    let mut terms: Vec<FeatureTerm> = order
        .into_iter()
        .map(|term| {
            let t = *tf.get(&term).unwrap();
            let c = *cost.get(&term).unwrap();
            let weight = ((t + 1) as f64).ln() * c;
            FeatureTerm { term, tf: t, weight }
        })
        .collect();

    select_top(&mut terms, n)
}

fn select_top(terms: &mut [FeatureTerm], n: usize) -> Vec<FeatureTerm> {
    terms.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(Ordering::Equal));
    if terms.len() <= n {
        return terms.to_vec();
    }
    let mut out: Vec<FeatureTerm> = Vec::with_capacity(n);
    let mut i = 0;
    while i < terms.len() {
        if out.len() < n {
            out.push(terms[i].clone());
        } else {
            let boundary = out.last().unwrap().weight;
            if (terms[i].weight - boundary).abs() < 1e-9 && i < 2 * n {
                out.push(terms[i].clone());
            } else {
                break;
            }
        }
        i += 1;
    }
    out
}
