//! Text normalizer (§4.5): case/width folding and whitespace handling
//! ahead of word/n-gram segmentation.

use serde::{Deserialize, Serialize};

/// How the normalizer treats whitespace runs (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WhitespaceMode {
    /// Leave whitespace exactly as written.
    AsIs,
    /// Skip normalization entirely (no case/width folding either).
    NoNormalize,
    /// Collapse every whitespace run to nothing.
    Delete,
    /// Collapse every whitespace run to a single space.
    Reset,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NormalizerConfig {
    pub case_fold: bool,
    pub width_fold: bool,
    pub whitespace: WhitespaceMode,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            case_fold: true,
            width_fold: true,
            whitespace: WhitespaceMode::Reset,
        }
    }
}

/// Normalizes raw text into the buffer both tokenizer passes run
/// against. Case and width folding are applied per character; stemming
/// (when declared for a field) runs afterward at the word level, since
/// it operates on whole tokens rather than raw characters.
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn normalize(&self, text: &str) -> String {
        if self.config.whitespace == WhitespaceMode::NoNormalize {
            return text.to_string();
        }
        let mut out = String::with_capacity(text.len());
        let mut pending_space = false;
        for ch in text.chars() {
            let folded = self.fold_char(ch);
            if folded.is_whitespace() {
                match self.config.whitespace {
                    WhitespaceMode::Delete => {}
                    WhitespaceMode::Reset => pending_space = true,
                    WhitespaceMode::AsIs | WhitespaceMode::NoNormalize => out.push(folded),
                }
                continue;
            }
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(folded);
        }
        out
    }

    fn fold_char(&self, ch: char) -> char {
        let mut c = ch;
        if self.config.width_fold {
            c = fold_width(c);
        }
        if self.config.case_fold {
            c = c.to_lowercase().next().unwrap_or(c);
        }
        c
    }
}

/// Fold fullwidth Latin forms (U+FF01-FF5E) to their halfwidth ASCII
/// equivalent; every other codepoint passes through unchanged.
fn fold_width(ch: char) -> char {
    let cp = ch as u32;
    if (0xFF01..=0xFF5E).contains(&cp) {
        char::from_u32(cp - 0xFEE0).unwrap_or(ch)
    } else {
        ch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_fold_lowercases() {
        let n = Normalizer::new(NormalizerConfig::default());
        assert_eq!(n.normalize("HeLLo"), "hello");
    }

    #[test]
    fn test_reset_collapses_whitespace_runs() {
        let n = Normalizer::new(NormalizerConfig::default());
        assert_eq!(n.normalize("a   b\t\tc"), "a b c");
    }

    #[test]
    fn test_delete_removes_whitespace() {
        let n = Normalizer::new(NormalizerConfig {
            whitespace: WhitespaceMode::Delete,
            ..NormalizerConfig::default()
        });
        assert_eq!(n.normalize("a b  c"), "abc");
    }

    #[test]
    fn test_no_normalize_passes_through() {
        let n = Normalizer::new(NormalizerConfig {
            whitespace: WhitespaceMode::NoNormalize,
            case_fold: true,
            ..NormalizerConfig::default()
        });
        assert_eq!(n.normalize("HeLLo  World"), "HeLLo  World");
    }

    #[test]
    fn test_fullwidth_folds_to_ascii() {
        let n = Normalizer::new(NormalizerConfig::default());
        assert_eq!(n.normalize("\u{FF21}\u{FF22}"), "ab");
    }
}
