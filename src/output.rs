//! Result types returned by [`crate::convert`].
//!
//! All of them serialise to JSON so the CLI's `--json` mode can emit them
//! as-is.

use crate::error::PageError;
use crate::types::LayoutItem;
use serde::{Deserialize, Serialize};

/// Outcome for one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed page number.
    pub page_num: usize,
    /// Page Markdown; empty when `error` is set.
    pub markdown: String,
    /// Regions the detector reported for this page, after geometry checks.
    pub layout_items: Vec<LayoutItem>,
    /// Words placed in some block (or in the flat-text fallback).
    pub words_assigned: usize,
    /// Words supplied for the page.
    pub words_total: usize,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PageError>,
}

impl PageResult {
    pub fn failed(page_num: usize, error: PageError, duration_ms: u64) -> Self {
        Self {
            page_num,
            markdown: String::new(),
            layout_items: Vec::new(),
            words_assigned: 0,
            words_total: 0,
            duration_ms,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate counters for a document run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStats {
    /// Pages handed to the run.
    pub total_pages: usize,
    /// Pages that matched the page selection.
    pub selected_pages: usize,
    pub processed_pages: usize,
    pub failed_pages: usize,
    pub layout_items: usize,
    pub total_duration_ms: u64,
}

/// Full result of [`crate::convert::analyze_document`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentOutput {
    /// Successful pages joined with the configured separator.
    pub markdown: String,
    /// Every selected page in page order, failed ones included.
    pub pages: Vec<PageResult>,
    pub stats: DocumentStats,
}
