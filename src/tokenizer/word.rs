//! Word tokenizer pass (§4.5): splits normalized text into maximal runs
//! of alphanumeric characters, classifying each into a small
//! part-of-speech-like category used later by feature extraction.

use serde::{Deserialize, Serialize};

/// Coarse category assigned to a word token. Distinguishing "noun-like"
/// tokens from generic alphabetic runs matters only to feature
/// extraction's candidacy rule (§4.5.2); this tokenizer has no real
/// morphological analyzer, so everything that isn't purely numeric or a
/// known stopword is classified `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnifiedPos {
    Noun,
    Numeral,
    Stopword,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordAnalysis {
    pub surface: String,
    pub pos: UnifiedPos,
    /// Byte offset range into the normalized text this token came from.
    pub start: usize,
    pub end: usize,
}

/// Pluggable word segmentation/classification strategy. `SimpleWordAnalyzer`
/// is a from-scratch Unicode run scanner; a real deployment could swap
/// in a dictionary-backed analyzer without touching feature extraction.
pub trait WordAnalyzer: Send + Sync {
    fn analyze(&self, text: &str) -> Vec<WordAnalysis>;
}

/// Common English stopwords excluded from feature-candidacy (§4.5.2).
/// Kept intentionally small: the original system's stopword list is a
/// tuned dictionary, not a universal list, and false inclusion here
/// only costs a slightly noisier feature set, never correctness.
pub const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is",
    "it", "its", "of", "on", "or", "that", "the", "to", "was", "were", "will", "with",
];

pub struct SimpleWordAnalyzer;

impl SimpleWordAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn classify(word: &str) -> UnifiedPos {
        if STOPWORDS.contains(&word) {
            UnifiedPos::Stopword
        } else if word.chars().all(|c| c.is_ascii_digit()) {
            UnifiedPos::Numeral
        } else if word.chars().all(|c| c.is_alphabetic()) {
            UnifiedPos::Noun
        } else {
            UnifiedPos::Unknown
        }
    }
}

impl Default for SimpleWordAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl WordAnalyzer for SimpleWordAnalyzer {
    fn analyze(&self, text: &str) -> Vec<WordAnalysis> {
        let mut out = Vec::new();
        let mut run_start: Option<usize> = None;

        for (idx, ch) in text.char_indices() {
            if ch.is_alphanumeric() {
                if run_start.is_none() {
                    run_start = Some(idx);
                }
            } else if let Some(start) = run_start.take() {
                let surface = &text[start..idx];
                out.push(WordAnalysis {
                    surface: surface.to_string(),
                    pos: Self::classify(surface),
                    start,
                    end: idx,
                });
            }
        }
        if let Some(start) = run_start {
            let surface = &text[start..];
            out.push(WordAnalysis {
                surface: surface.to_string(),
                pos: Self::classify(surface),
                start,
                end: text.len(),
            });
        }
        out
    }
}
