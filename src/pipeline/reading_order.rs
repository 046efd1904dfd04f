//! Reading-order reconstruction for one- and two-column pages.
//!
//! ## Algorithm
//!
//! ```text
//! items ──▶ column split ──▶ y-sort per column ──▶ left ▸ right ▸ span
//!                                                       │
//! words ──▶ centroid ──▶ first containing block ────────┘──▶ line grouping
//! ```
//!
//! Columns are **not** interleaved by vertical position: a full-width block
//! between two-column sections is emitted after both columns. Pages with
//! spanning headings between column bodies therefore come out approximate.
//!
//! Word assignment is first-match-wins in merged order, so each word lands in
//! at most one block even where expanded blocks overlap.

use crate::config::AssemblyConfig;
use crate::types::{LayoutItem, Word};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// Column a block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Column {
    Left,
    Right,
    /// Wide enough to cross the page midline.
    Span,
}

/// A layout item with the words assigned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub item: LayoutItem,
    pub column: Column,
    /// Assigned words, in line order once [`Block::finish`] has run.
    pub words: Vec<Word>,
    /// Words joined with single spaces.
    pub text: String,
}

impl Block {
    fn new(item: LayoutItem, column: Column) -> Self {
        Self {
            item,
            column,
            words: Vec::new(),
            text: String::new(),
        }
    }

    /// Order the assigned words into lines and derive `text`.
    fn finish(&mut self, line_tolerance: f32) {
        let lines = group_lines(std::mem::take(&mut self.words), line_tolerance);
        self.text = lines
            .iter()
            .map(|line| join_words(line))
            .collect::<Vec<_>>()
            .join(" ");
        self.words = lines.into_iter().flatten().collect();
    }
}

/// Classify each item into a column.
///
/// `max_x` is the right-most edge over all items and `mid_x = max_x / 2`.
/// Items at least `span_ratio · max_x` wide span the page (the boundary is
/// inclusive); narrower items go left when their horizontal centre is left
/// of `mid_x`, otherwise right.
pub fn classify_columns(items: &[LayoutItem], span_ratio: f32) -> Vec<Column> {
    let max_x = items
        .iter()
        .map(|i| i.bbox.x_max)
        .fold(f32::NEG_INFINITY, f32::max);
    let mid_x = max_x / 2.0;

    items
        .iter()
        .map(|i| {
            let width = i.bbox.width();
            if width >= span_ratio * max_x {
                Column::Span
            } else if i.bbox.center().0 < mid_x {
                Column::Left
            } else {
                Column::Right
            }
        })
        .collect()
}

/// Column split, stable y-sort inside each column, then left, right, span.
///
/// Items with degenerate boxes are dropped before classification.
pub fn order_blocks(items: &[LayoutItem], config: &AssemblyConfig) -> Vec<Block> {
    let valid: Vec<LayoutItem> = items
        .iter()
        .filter(|i| i.bbox.is_valid())
        .cloned()
        .collect();
    if valid.len() < items.len() {
        debug!(
            "Dropped {} layout item(s) with degenerate boxes",
            items.len() - valid.len()
        );
    }

    let columns = classify_columns(&valid, config.span_ratio);
    let mut left = Vec::new();
    let mut right = Vec::new();
    let mut span = Vec::new();
    for (item, column) in valid.into_iter().zip(columns) {
        let block = Block::new(item, column);
        match column {
            Column::Left => left.push(block),
            Column::Right => right.push(block),
            Column::Span => span.push(block),
        }
    }

    let by_top = |a: &Block, b: &Block| {
        a.item
            .bbox
            .y_min
            .partial_cmp(&b.item.bbox.y_min)
            .unwrap_or(Ordering::Equal)
    };
    left.sort_by(by_top);
    right.sort_by(by_top);
    span.sort_by(by_top);

    left.into_iter().chain(right).chain(span).collect()
}

/// Assign every word to the first block whose box, grown by `margin`,
/// contains the word's centroid. Returns the number of unassigned words.
pub fn assign_words(blocks: &mut [Block], words: &[Word], margin: f32) -> usize {
    let mut dropped = 0;
    for word in words {
        if !word.bbox.is_valid() {
            dropped += 1;
            continue;
        }
        let (cx, cy) = word.bbox.center();
        match blocks
            .iter_mut()
            .find(|b| b.item.bbox.contains_with_margin(cx, cy, margin))
        {
            Some(block) => block.words.push(word.clone()),
            None => dropped += 1,
        }
    }
    dropped
}

/// Full reading-order pass: order blocks, assign words, derive block text.
pub fn build_blocks(items: &[LayoutItem], words: &[Word], config: &AssemblyConfig) -> Vec<Block> {
    let mut blocks = order_blocks(items, config);
    let dropped = assign_words(&mut blocks, words, config.word_margin);
    if dropped > 0 {
        debug!("{} of {} word(s) fell outside every block", dropped, words.len());
    }
    for block in &mut blocks {
        block.finish(config.line_tolerance);
    }
    blocks
}

/// Sort words by `(round(y_min / tolerance), x_min)` and split them into
/// lines, one per vertical bucket. Ties keep input order.
///
/// Rounding is half away from zero ([`f32::round`]): with tolerance 4,
/// `y_min` 10.0 (2.5) lands in bucket 3 alongside 12.0, while 9.9 lands in
/// bucket 2.
pub fn group_lines(mut words: Vec<Word>, tolerance: f32) -> Vec<Vec<Word>> {
    let bucket = |w: &Word| (w.bbox.y_min / tolerance).round() as i64;
    words.sort_by(|a, b| {
        bucket(a)
            .cmp(&bucket(b))
            .then_with(|| a.bbox.x_min.total_cmp(&b.bbox.x_min))
    });

    let mut lines: Vec<Vec<Word>> = Vec::new();
    let mut current: Option<i64> = None;
    for word in words {
        let key = bucket(&word);
        match lines.last_mut() {
            Some(line) if current == Some(key) => line.push(word),
            _ => {
                lines.push(vec![word]);
                current = Some(key);
            }
        }
    }
    lines
}

/// Join word texts with single spaces, skipping empty tokens.
pub fn join_words(words: &[Word]) -> String {
    words
        .iter()
        .map(|w| w.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
