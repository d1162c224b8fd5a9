//! Tokenizer core (§4.5, C10): normalizer, word pass, n-gram pass, and
//! feature-term extraction feeding the inverted-index subsystem.
//!
//! `DualTokenizer` runs both passes over the same normalized text: the
//! word pass for feature-term extraction and exact-term lookups, the
//! n-gram pass for substring/LIKE-prefix matching. Query-time expansion
//! (§4.5.1) reuses the same normalizer and passes so stored and query
//! text are tokenized identically.

pub mod feature;
pub mod ngram;
pub mod normalizer;
pub mod word;

use crate::tokenizer::feature::{extract_features, FeatureConfig, FeatureTerm};
use crate::tokenizer::ngram::NgramTokenizer;
use crate::tokenizer::normalizer::{Normalizer, NormalizerConfig};
use crate::tokenizer::word::{SimpleWordAnalyzer, UnifiedPos, WordAnalysis, WordAnalyzer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single token's surface form and byte-offset span into the
/// normalized text it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSpan {
    pub surface: String,
    pub start: usize,
    pub end: usize,
}

pub type WordToken = WordAnalysis;

#[derive(Debug, Clone, PartialEq)]
pub struct NgramToken(pub TokenSpan);

/// Output of running both tokenizer passes over one piece of text.
#[derive(Debug, Clone)]
pub struct DualTokenizedText {
    pub normalized: String,
    pub words: Vec<WordToken>,
    pub ngrams: Vec<TokenSpan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizerConfig {
    pub normalizer: NormalizerConfig,
    pub ngram_width: usize,
    pub feature: FeatureConfig,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            normalizer: NormalizerConfig::default(),
            ngram_width: 2,
            feature: FeatureConfig::default(),
        }
    }
}

/// Runs the normalizer, word pass, and n-gram pass together so callers
/// only ever see consistently-tokenized text on both the index and
/// query side.
pub struct DualTokenizer {
    normalizer: Normalizer,
    ngram: NgramTokenizer,
    word_analyzer: Arc<dyn WordAnalyzer>,
    config: TokenizerConfig,
}

impl DualTokenizer {
    pub fn new(config: TokenizerConfig) -> Self {
        Self::with_analyzer(config, Arc::new(SimpleWordAnalyzer::new()))
    }

    pub fn with_analyzer(config: TokenizerConfig, word_analyzer: Arc<dyn WordAnalyzer>) -> Self {
        let normalizer = Normalizer::new(config.normalizer);
        let ngram = NgramTokenizer::new(config.ngram_width);
        Self {
            normalizer,
            ngram,
            word_analyzer,
            config,
        }
    }

    pub fn tokenize(&self, text: &str) -> DualTokenizedText {
        let normalized = self.normalizer.normalize(text);
        let words = self.word_analyzer.analyze(&normalized);
        let ngrams = self.ngram.tokenize(&normalized);
        DualTokenizedText {
            normalized,
            words,
            ngrams,
        }
    }

    pub fn extract_features(&self, text: &DualTokenizedText, n: usize) -> Vec<FeatureTerm> {
        extract_features(&text.words, n, &self.config.feature)
    }

    /// Tokenize a query string the same way indexed text was tokenized
    /// (§4.5.1). Dropping stopwords from the word side matters since
    /// they never carry a feature term; the n-gram side is kept intact
    /// for substring matching.
    ///
    /// Returns one `QueryTokenizedResult` per expanded token sequence —
    /// this tokenizer has no dictionary-backed variant generator, so it
    /// always emits exactly one, but callers must OR together whatever
    /// the `Vec` holds rather than assume a single result, per the
    /// spec's multi-expansion contract.
    pub fn expand_query(&self, query: &str) -> Vec<QueryTokenizedResult> {
        let tokenized = self.tokenize(query);
        let words: Vec<String> = tokenized
            .words
            .iter()
            .filter(|w| w.pos != UnifiedPos::Stopword)
            .map(|w| w.surface.clone())
            .collect();

        let mut locations_by_token: Vec<(String, Vec<usize>)> = Vec::new();
        let mut push_location = |surface: String, start: usize| {
            if let Some((_, locs)) = locations_by_token.iter_mut().find(|(s, _)| *s == surface) {
                locs.push(start);
            } else {
                locations_by_token.push((surface, vec![start]));
            }
        };
        for w in tokenized.words.iter().filter(|w| w.pos != UnifiedPos::Stopword) {
            push_location(w.surface.clone(), w.start);
        }
        for span in &tokenized.ngrams {
            push_location(span.surface.clone(), span.start);
        }

        let tokenized_end = tokenized.normalized.len();

        // Short-word handling (§4.5.1): a query shorter than the n-gram
        // width never produces a full-width n-gram of its own, so no
        // exact n-gram lookup is possible. Bound every n-gram that
        // *could* complete it with a literal-prefix range instead,
        // letting the caller run a bounded prefix scan over the n-gram
        // index.
        let normalized_len = tokenized.normalized.chars().count();
        let (short_word_prefix, short_word_from, short_word_to) = if normalized_len > 0 && normalized_len < self.config.ngram_width {
            let prefix = tokenized.normalized.clone();
            let from = prefix.clone().into_bytes();
            let to = next_prefix_bound(prefix.as_bytes());
            (Some(prefix), Some(from), to)
        } else {
            (None, None, None)
        };

        let ngrams = tokenized.ngrams.into_iter().map(|span| span.surface).collect();

        vec![QueryTokenizedResult {
            target_text: tokenized.normalized,
            words,
            ngrams,
            locations_by_token,
            short_word_prefix,
            short_word_from,
            short_word_to,
            tokenized_end,
        }]
    }
}

/// One expanded query-time token sequence (§4.5.1). The query engine
/// iterates every result a `expand_query` call returns and ORs their
/// matches together.
#[derive(Debug, Clone)]
pub struct QueryTokenizedResult {
    /// The normalized text this expansion was tokenized from.
    pub target_text: String,
    pub words: Vec<String>,
    pub ngrams: Vec<String>,
    /// Byte-offset occurrences of each token (word or n-gram) within
    /// `target_text`, in first-seen order.
    pub locations_by_token: Vec<(String, Vec<usize>)>,
    /// Set when `target_text` is shorter than the configured n-gram
    /// width: the literal itself, used as a bounded-prefix-scan lower
    /// bound over the n-gram index.
    pub short_word_prefix: Option<String>,
    pub short_word_from: Option<Vec<u8>>,
    pub short_word_to: Option<Vec<u8>>,
    /// Byte offset marking the end of the tokenized region of
    /// `target_text`.
    pub tokenized_end: usize,
}

/// Smallest byte string strictly greater than every string sharing
/// `prefix`, for compiling a LIKE-prefix predicate into a half-open
/// range scan. Returns `None` when `prefix` is all `0xFF` bytes (or
/// empty), meaning there is no finite upper bound and the scan must
/// run to the end of the index.
pub fn next_prefix_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    while let Some(&last) = bound.last() {
        if last == 0xFF {
            bound.pop();
        } else {
            *bound.last_mut().unwrap() = last + 1;
            return Some(bound);
        }
    }
    None
}
