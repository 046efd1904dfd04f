//! Markdown emission from ordered blocks.
//!
//! Each block becomes one fragment according to its [`LayoutClass`];
//! fragments are joined with `\n` and the result is trimmed. Output is a pure
//! function of the inputs, so identical pages produce byte-identical
//! Markdown.

use crate::config::AssemblyConfig;
use crate::labels::LayoutClass;
use crate::pipeline::reading_order::{build_blocks, group_lines, join_words, Block};
use crate::types::{LayoutItem, Word};

/// Markdown for one page and the number of words that made it in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub markdown: String,
    pub words_assigned: usize,
}

/// Reconstruct one page as Markdown.
///
/// Without any usable layout item the words are emitted as flat text, one
/// line per vertical bucket.
pub fn page_to_markdown(items: &[LayoutItem], words: &[Word], config: &AssemblyConfig) -> String {
    render_page(items, words, config).markdown
}

/// [`page_to_markdown`] with word accounting.
pub fn render_page(items: &[LayoutItem], words: &[Word], config: &AssemblyConfig) -> RenderedPage {
    if !items.iter().any(|i| i.bbox.is_valid()) {
        let usable: Vec<Word> = words.iter().filter(|w| w.bbox.is_valid()).cloned().collect();
        return RenderedPage {
            words_assigned: usable.len(),
            markdown: flat_text(usable, config.line_tolerance),
        };
    }

    let blocks = build_blocks(items, words, config);
    let fragments: Vec<String> = blocks.iter().filter_map(render_block).collect();
    RenderedPage {
        markdown: fragments.join("\n").trim().to_string(),
        words_assigned: blocks.iter().map(|b| b.words.len()).sum(),
    }
}

/// Fragment for one block, or `None` when the block contributes nothing.
pub fn render_block(block: &Block) -> Option<String> {
    let text = block.text.as_str();
    let class = block.item.class;

    if class.is_suppressed() {
        return None;
    }
    if text.is_empty() && !matches!(class, LayoutClass::Figure | LayoutClass::Table) {
        return None;
    }

    let fragment = match class {
        LayoutClass::Title => format!("\n# {text}\n"),
        LayoutClass::FigureCaption => format!("\n*Figure Caption*: {text}\n"),
        LayoutClass::Figure => {
            let b = block.item.bbox;
            format!(
                "\n![Figure](#bbox={:.0},{:.0},{:.0},{:.0})\n",
                b.x_min, b.y_min, b.x_max, b.y_max
            )
        }
        LayoutClass::TableCaption => format!("\n*Table Caption*: {text}\n"),
        LayoutClass::Table => format!("\n[Table Data: {text}]\n"),
        LayoutClass::Equation => format!("\n\n$$ {text} $$\n\n"),
        LayoutClass::List => format!("- {text}"),
        LayoutClass::Text | LayoutClass::Other => format!("{text}\n"),
        LayoutClass::Header | LayoutClass::Footer => return None,
    };
    Some(fragment)
}

/// Words in line order; spaces within a line, newlines between.
fn flat_text(words: Vec<Word>, line_tolerance: f32) -> String {
    group_lines(words, line_tolerance)
        .iter()
        .map(|line| join_words(line))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
