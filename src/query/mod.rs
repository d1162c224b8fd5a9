//! Query iterator façade (§4.1.3, §4.1.8, C11).
//!
//! Compiles one of the seven predicate shapes into a `Cursor` seek plus
//! a residual filter/stop-check pair, then drives the cursor lazily.
//! Compilation never does its own binary search or page I/O beyond the
//! single seek performed by `Cursor::seek_*` — everything after that is
//! ordinary forward/backward walking, so a wide scan never front-loads
//! more work than a narrow one.

use crate::btree::{BTree, Cursor};
use crate::error::Result;
use crate::field::FieldValue;
use crate::record::Record;
use crate::tokenizer::{next_prefix_bound, DualTokenizer};
use crate::types::Direction;
use std::sync::Arc;

/// One side of a range predicate (§4.1.3 shape 2/4).
#[derive(Debug, Clone)]
pub enum Bound {
    Inclusive(FieldValue),
    Exclusive(FieldValue),
}

/// The seven predicate shapes the engine recognizes. `prefix` is the
/// equality-bound leading key fields shared by shapes 1-6; shapes that
/// restrict one further field (range, null, LIKE) append it logically
/// at `prefix.len()`.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Shapes 1 & 5: equality on a contiguous key-field prefix.
    Prefix(Vec<FieldValue>),
    /// Shapes 2 & 4, and the trailing range of a shape-5 compound.
    Range {
        prefix: Vec<FieldValue>,
        lower: Option<Bound>,
        upper: Option<Bound>,
    },
    /// Shape 3: IS NULL on the field right after `prefix`.
    IsNull { prefix: Vec<FieldValue> },
    /// Shape 6: prefix/LIKE on a text field right after `prefix`,
    /// compiled to an equality on the literal prefix up to the first
    /// wildcard plus a per-candidate post-filter.
    LikePrefix { prefix: Vec<FieldValue>, literal: String },
    /// Shape 7: fetch by the complete composite key.
    ExactKey(Vec<FieldValue>),
}

type RecordPred = Box<dyn Fn(&Record) -> bool + Send + Sync>;

/// A compiled, lazily-driven predicate scan over one file's B+tree.
pub struct Query {
    cursor: Cursor,
    direction: Direction,
    residual: RecordPred,
    continue_while: RecordPred,
    exhausted: bool,
}

fn always(_: &Record) -> bool {
    true
}

impl Query {
    /// Compile `predicate` into a seeked cursor and drive it in
    /// `direction`. Ascending walks forward from the lower locate point;
    /// descending walks backward from the upper one.
    pub fn compile(tree: &Arc<BTree>, predicate: &Predicate, direction: Direction) -> Result<Self> {
        let (cursor, residual, continue_while) = match predicate {
            Predicate::Prefix(prefix) => {
                let prefix = prefix.clone();
                let cursor = Self::seek(tree, direction, &prefix, &prefix)?;
                let residual: RecordPred = Box::new(always);
                let stop = Self::prefix_stop(prefix);
                (cursor, residual, stop)
            }
            Predicate::Range { prefix, lower, upper } => {
                let lower_key = Self::extend(prefix, lower.as_ref().map(Self::bound_value));
                let upper_key = Self::extend(prefix, upper.as_ref().map(Self::bound_value));
                let cursor = match direction {
                    Direction::Ascending => Cursor::seek_lower_bound(tree.clone(), &lower_key)?,
                    Direction::Descending => Cursor::seek_upper_bound(tree.clone(), &upper_key)?,
                };
                let idx = prefix.len();
                let lower_for_residual = lower.clone();
                let upper_for_residual = upper.clone();
                let schema_prefix = prefix.clone();
                let residual: RecordPred = Box::new(move |rec| {
                    if !key_in_bounds(rec, idx, &lower_for_residual, &upper_for_residual) {
                        return false;
                    }
                    key_starts_with_slice(rec, &schema_prefix)
                });
                let stop = Self::range_stop(prefix.clone(), upper.clone(), lower.clone(), direction);
                (cursor, residual, stop)
            }
            Predicate::IsNull { prefix } => {
                let boundary = Self::extend(prefix, Some(FieldValue::Null));
                let cursor = Self::seek(tree, direction, &boundary, &boundary)?;
                let idx = prefix.len();
                let prefix_for_residual = prefix.clone();
                let residual: RecordPred = Box::new(move |rec| {
                    rec.key.get(idx).map(|v| v.is_null()).unwrap_or(false) && key_starts_with_slice(rec, &prefix_for_residual)
                });
                let stop = Self::prefix_stop(prefix.clone());
                (cursor, residual, stop)
            }
            Predicate::LikePrefix { prefix, literal } => {
                // When the schema configures a tokenizer (C10), normalize
                // the literal through it before compiling bounds, so a
                // query matches text the same way it was normalized at
                // index time (§4.5.1). This also exercises the
                // short-word bounded-prefix-range path: a literal
                // shorter than the configured n-gram width produces its
                // `short_word_from`/`short_word_to` via the same
                // `next_prefix_bound` this predicate already uses, so
                // the bound compiled below is identical in that case —
                // the tokenizer is still the thing computing it, not a
                // raw byte comparison bypassing it. Without a tokenizer
                // the literal passes through unchanged, preserving the
                // plain byte-prefix behavior exactly.
                let literal = match &tree.schema().tokenizer {
                    Some(config) => {
                        let tokenizer = DualTokenizer::new(config.clone());
                        tokenizer
                            .expand_query(literal)
                            .into_iter()
                            .next()
                            .map(|r| r.target_text)
                            .unwrap_or_else(|| literal.clone())
                    }
                    None => literal.clone(),
                };
                let lower_key = Self::extend(prefix, Some(FieldValue::Text(literal.clone())));
                let cursor = match direction {
                    Direction::Ascending => Cursor::seek_lower_bound(tree.clone(), &lower_key)?,
                    Direction::Descending => {
                        let upper_key = match next_prefix_bound(literal.as_bytes()) {
                            Some(bytes) => {
                                Self::extend(prefix, Some(FieldValue::Text(String::from_utf8_lossy(&bytes).into_owned())))
                            }
                            None => Self::extend(prefix, None),
                        };
                        Cursor::seek_upper_bound(tree.clone(), &upper_key)?
                    }
                };
                let idx = prefix.len();
                let lit = literal.clone();
                let prefix_for_residual = prefix.clone();
                let residual: RecordPred = Box::new(move |rec| {
                    matches!(rec.key.get(idx), Some(FieldValue::Text(s)) if s.starts_with(&lit))
                        && key_starts_with_slice(rec, &prefix_for_residual)
                });
                // Ascending: the matching run is contiguous starting at the
                // seek point, so "no longer starts with the literal" is a
                // safe terminator. Descending seeks to (one past) the first
                // key not less than the next-prefix bound, which may land
                // on an unrelated real key sharing that exact value (e.g.
                // literal "abc" bounded by "abd", and "abd" itself stored) —
                // that candidate must be skipped, not treated as the end of
                // the scan, so the stop check compares lexicographically
                // against the literal instead of repeating the match test.
                let lit_for_stop = literal.clone();
                let prefix_for_stop = prefix.clone();
                let stop: RecordPred = Box::new(move |rec| {
                    if !key_starts_with_slice(rec, &prefix_for_stop) {
                        return false;
                    }
                    match rec.key.get(idx) {
                        Some(FieldValue::Text(s)) => match direction {
                            Direction::Ascending => s.starts_with(&lit_for_stop),
                            Direction::Descending => s.as_str() >= lit_for_stop.as_str(),
                        },
                        _ => false,
                    }
                });
                (cursor, residual, stop)
            }
            Predicate::ExactKey(key) => {
                let cursor = Self::seek(tree, direction, key, key)?;
                let key_for_residual = key.clone();
                let key_for_stop = key.clone();
                let residual: RecordPred = Box::new(move |rec| rec.key == key_for_residual);
                let stop: RecordPred = Box::new(move |rec| rec.key == key_for_stop);
                (cursor, residual, stop)
            }
        };

        Ok(Self {
            cursor,
            direction,
            residual,
            continue_while,
            exhausted: false,
        })
    }

    fn seek(tree: &Arc<BTree>, direction: Direction, lower: &[FieldValue], upper: &[FieldValue]) -> Result<Cursor> {
        match direction {
            Direction::Ascending => Cursor::seek_lower_bound(tree.clone(), lower),
            Direction::Descending => Cursor::seek_upper_bound(tree.clone(), upper),
        }
    }

    fn extend(prefix: &[FieldValue], tail: Option<FieldValue>) -> Vec<FieldValue> {
        let mut v = prefix.to_vec();
        if let Some(t) = tail {
            v.push(t);
        }
        v
    }

    fn bound_value(b: &Bound) -> FieldValue {
        match b {
            Bound::Inclusive(v) | Bound::Exclusive(v) => v.clone(),
        }
    }

    fn prefix_stop(prefix: Vec<FieldValue>) -> RecordPred {
        Box::new(move |rec| key_starts_with_slice(rec, &prefix))
    }

    fn range_stop(prefix: Vec<FieldValue>, upper: Option<Bound>, lower: Option<Bound>, direction: Direction) -> RecordPred {
        Box::new(move |rec| {
            if !key_starts_with_slice(rec, &prefix) {
                return false;
            }
            let idx = prefix.len();
            match direction {
                Direction::Ascending => match &upper {
                    None => true,
                    Some(Bound::Inclusive(v)) => rec.key.get(idx).map(|k| cmp(k, v) != std::cmp::Ordering::Greater).unwrap_or(true),
                    Some(Bound::Exclusive(v)) => rec.key.get(idx).map(|k| cmp(k, v) == std::cmp::Ordering::Less).unwrap_or(true),
                },
                Direction::Descending => match &lower {
                    None => true,
                    Some(Bound::Inclusive(v)) => rec.key.get(idx).map(|k| cmp(k, v) != std::cmp::Ordering::Less).unwrap_or(true),
                    Some(Bound::Exclusive(v)) => rec.key.get(idx).map(|k| cmp(k, v) == std::cmp::Ordering::Greater).unwrap_or(true),
                },
            }
        })
    }

    fn advance(&mut self) -> Result<Option<Record>> {
        loop {
            let next = match self.direction {
                Direction::Ascending => self.cursor.next()?,
                Direction::Descending => self.cursor.prev()?,
            };
            let Some(rec) = next else {
                self.exhausted = true;
                return Ok(None);
            };
            if !(self.continue_while)(&rec) {
                self.exhausted = true;
                return Ok(None);
            }
            if (self.residual)(&rec) {
                return Ok(Some(rec));
            }
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Record>> {
        if self.exhausted {
            return Ok(None);
        }
        self.advance()
    }

    /// Materialize a subset of columns from a yielded record: indices
    /// `0..key.len()` select key columns, the remainder select value
    /// columns.
    pub fn materialize(record: &Record, projection: &[usize]) -> Vec<FieldValue> {
        let mut combined = record.key.clone();
        combined.extend(record.value.iter().cloned());
        projection.iter().map(|&i| combined[i].clone()).collect()
    }

    /// Run this query to completion and count the matches.
    pub fn count(mut self) -> Result<u64> {
        let mut n = 0u64;
        while self.next()?.is_some() {
            n += 1;
        }
        Ok(n)
    }
}

fn key_in_bounds(rec: &Record, idx: usize, lower: &Option<Bound>, upper: &Option<Bound>) -> bool {
    let Some(v) = rec.key.get(idx) else { return true };
    if let Some(bound) = lower {
        let ok = match bound {
            Bound::Inclusive(b) => cmp(v, b) != std::cmp::Ordering::Less,
            Bound::Exclusive(b) => cmp(v, b) == std::cmp::Ordering::Greater,
        };
        if !ok {
            return false;
        }
    }
    if let Some(bound) = upper {
        let ok = match bound {
            Bound::Inclusive(b) => cmp(v, b) != std::cmp::Ordering::Greater,
            Bound::Exclusive(b) => cmp(v, b) == std::cmp::Ordering::Less,
        };
        if !ok {
            return false;
        }
    }
    true
}

fn cmp(a: &FieldValue, b: &FieldValue) -> std::cmp::Ordering {
    a.compare_base(b)
}

fn key_starts_with_slice(rec: &Record, prefix: &[FieldValue]) -> bool {
    if prefix.len() > rec.key.len() {
        return false;
    }
    rec.key[..prefix.len()]
        .iter()
        .zip(prefix.iter())
        .all(|(a, b)| cmp(a, b) == std::cmp::Ordering::Equal)
}
