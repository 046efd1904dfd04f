//! Detector label table and the closed set of layout classes.
//!
//! The detector emits integer class ids whose meaning is fixed by the label
//! order it was trained with. [`LabelTable`] holds that order; raw label
//! strings (from the table or from the remote service) are resolved into a
//! [`LayoutClass`] exactly once, when a [`crate::types::LayoutItem`] is built.

use crate::error::LayoutError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Training label order of the layout detector, indexed by class id.
pub const DETECTOR_LABELS: &[&str] = &[
    "Title",         // 0
    "Text",          // 1
    "Figure",        // 2
    "FigureCaption", // 3
    "Table",         // 4
    "TableCaption",  // 5
    "Equation",      // 6
    "List",          // 7
    "Header",        // 8
    "Footer",        // 9
];

/// Semantic class of a layout region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayoutClass {
    Title,
    Text,
    Figure,
    FigureCaption,
    Table,
    TableCaption,
    Equation,
    List,
    Header,
    Footer,
    /// Any label outside the known set; rendered like body text.
    Other,
}

impl LayoutClass {
    /// Resolve a raw detector label.
    ///
    /// Matching is case-insensitive and by substring, checked in this order:
    /// title, figure+caption, figure, table+caption, table,
    /// equation|formula, list, header, footer. Separators such as `-`, `_`
    /// or spaces are ignored, so `figure_caption` and `Figure Caption` both
    /// resolve to [`LayoutClass::FigureCaption`].
    pub fn from_label(raw: &str) -> Self {
        let label = normalise_label(raw);
        let has = |needle: &str| label.contains(needle);

        if has("title") {
            LayoutClass::Title
        } else if has("figure") && has("caption") {
            LayoutClass::FigureCaption
        } else if has("figure") {
            LayoutClass::Figure
        } else if has("table") && has("caption") {
            LayoutClass::TableCaption
        } else if has("table") {
            LayoutClass::Table
        } else if has("equation") || has("formula") {
            LayoutClass::Equation
        } else if has("list") {
            LayoutClass::List
        } else if has("header") {
            LayoutClass::Header
        } else if has("footer") {
            LayoutClass::Footer
        } else if has("text") {
            LayoutClass::Text
        } else {
            LayoutClass::Other
        }
    }

    /// Canonical label, matching [`DETECTOR_LABELS`].
    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutClass::Title => "Title",
            LayoutClass::Text => "Text",
            LayoutClass::Figure => "Figure",
            LayoutClass::FigureCaption => "FigureCaption",
            LayoutClass::Table => "Table",
            LayoutClass::TableCaption => "TableCaption",
            LayoutClass::Equation => "Equation",
            LayoutClass::List => "List",
            LayoutClass::Header => "Header",
            LayoutClass::Footer => "Footer",
            LayoutClass::Other => "Other",
        }
    }

    /// Page furniture that never reaches the Markdown output.
    pub fn is_suppressed(&self) -> bool {
        matches!(self, LayoutClass::Header | LayoutClass::Footer)
    }
}

impl fmt::Display for LayoutClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static RE_LABEL_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s_\-]+").unwrap());

fn normalise_label(raw: &str) -> String {
    RE_LABEL_SEPARATORS
        .replace_all(&raw.to_lowercase(), "")
        .into_owned()
}

/// Mapping from detector class id to label name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    names: Vec<String>,
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::new(DETECTOR_LABELS.iter().map(|s| s.to_string()).collect())
    }
}

impl LabelTable {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Label for `class_id`, or `None` when the id is outside the table.
    pub fn class_name(&self, class_id: usize) -> Option<&str> {
        self.names.get(class_id).map(String::as_str)
    }

    /// Check the label order reported by a detector against this table.
    ///
    /// Comparison is exact and positional; a length difference is reported at
    /// the first index where one side runs out.
    pub fn validate<S: AsRef<str>>(&self, reported: &[S]) -> Result<(), LayoutError> {
        let longest = self.names.len().max(reported.len());
        for index in 0..longest {
            let expected = self.names.get(index).map(String::as_str);
            let found = reported.get(index).map(AsRef::as_ref);
            if expected != found {
                return Err(LayoutError::LabelTableMismatch {
                    index,
                    expected: expected.unwrap_or("<none>").to_string(),
                    found: found.unwrap_or("<none>").to_string(),
                });
            }
        }
        Ok(())
    }
}
