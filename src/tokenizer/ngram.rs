//! N-gram tokenizer pass (§4.5): overlapping fixed-width character
//! windows used for substring/LIKE-style matching, independent of word
//! boundaries.

use crate::tokenizer::TokenSpan;

pub struct NgramTokenizer {
    n: usize,
}

impl NgramTokenizer {
    pub fn new(n: usize) -> Self {
        assert!(n > 0, "n-gram width must be at least 1");
        Self { n }
    }

    /// Every overlapping window of `n` characters, in order, with byte
    /// offsets into `text`. Text shorter than `n` produces a single
    /// whole-text span.
    pub fn tokenize(&self, text: &str) -> Vec<TokenSpan> {
        let indices: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        if indices.is_empty() {
            return Vec::new();
        }
        if indices.len() <= self.n {
            return vec![TokenSpan {
                surface: text.to_string(),
                start: 0,
                end: text.len(),
            }];
        }
        let mut spans = Vec::with_capacity(indices.len() - self.n + 1);
        for w in 0..=(indices.len() - self.n) {
            let start = indices[w];
            let end = indices
                .get(w + self.n)
                .copied()
                .unwrap_or(text.len());
            spans.push(TokenSpan {
                surface: text[start..end].to_string(),
                start,
                end,
            });
        }
        spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bigrams_of_short_word() {
        let t = NgramTokenizer::new(2);
        let spans = t.tokenize("fox");
        let surfaces: Vec<&str> = spans.iter().map(|s| s.surface.as_str()).collect();
        assert_eq!(surfaces, vec!["fo", "ox"]);
    }

    #[test]
    fn test_text_shorter_than_n_yields_single_span() {
        let t = NgramTokenizer::new(5);
        let spans = t.tokenize("fox");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].surface, "fox");
    }

    #[test]
    fn test_empty_text_yields_no_spans() {
        let t = NgramTokenizer::new(2);
        assert!(t.tokenize("").is_empty());
    }

    #[test]
    fn test_trigrams_cover_whole_text() {
        let t = NgramTokenizer::new(3);
        let spans = t.tokenize("quick");
        let surfaces: Vec<&str> = spans.iter().map(|s| s.surface.as_str()).collect();
        assert_eq!(surfaces, vec!["qui", "uic", "ick"]);
    }
}
