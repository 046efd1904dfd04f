//! Remote layout analysis + local reconstruction, per page and per document.
//!
//! The service detects regions; everything after that (geometry checks,
//! reading order, Markdown) happens locally. One failed page never aborts
//! a document: it is recorded as a [`PageError`] and the remaining pages
//! carry on.

use crate::client::protocol::{ImageReference, RemoteRegion};
use crate::client::InferenceClient;
use crate::config::LayoutConfig;
use crate::error::{InferenceError, LayoutError, PageError};
use crate::output::{DocumentOutput, DocumentStats, PageResult};
use crate::pipeline::postprocess::non_max_suppression;
use crate::pipeline::{encode, markdown};
use crate::progress::ProgressCallback;
use crate::types::{LayoutItem, Word};
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Words of one page, as supplied by the caller's text extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct PageWords {
    /// 1-indexed page number.
    pub page_num: usize,
    pub words: Vec<Word>,
}

impl PageWords {
    pub fn new(page_num: usize, words: Vec<Word>) -> Self {
        Self { page_num, words }
    }
}

/// Convert service regions into layout items for `page_num`.
///
/// Regions tagged with another page, with degenerate boxes, or scoring
/// below `config.postprocess.score_threshold` are dropped; the rest go
/// through class-wise NMS.
pub fn items_from_regions(
    regions: Vec<RemoteRegion>,
    page_num: usize,
    config: &LayoutConfig,
) -> Vec<LayoutItem> {
    let total = regions.len();
    let threshold = config.postprocess.score_threshold;
    let candidates: Vec<LayoutItem> = regions
        .into_iter()
        .filter(|r| r.page.map_or(true, |p| p == page_num))
        .filter(|r| r.bbox.is_valid() && r.score.is_finite() && r.score >= threshold)
        .map(LayoutItem::from)
        .collect();
    let items = non_max_suppression(candidates, config.postprocess.iou_threshold);
    if items.len() < total {
        debug!(
            "Page {}: kept {} of {} region(s)",
            page_num,
            items.len(),
            total
        );
    }
    items
}

/// Analyse one page: remote layout, then local reconstruction.
///
/// Never fails outright; a failed call is reported in
/// [`PageResult::error`].
pub async fn analyze_page(
    client: &InferenceClient,
    image_reference: &ImageReference,
    page: PageWords,
    config: &LayoutConfig,
) -> PageResult {
    let start = Instant::now();
    let page_num = page.page_num;
    let subset = [page_num];

    match client.analyze_layout(image_reference, Some(&subset)).await {
        Ok(resp) => {
            let layout_items = items_from_regions(resp.results, page_num, config);
            let rendered = markdown::render_page(&layout_items, &page.words, &config.assembly);
            debug!(
                "Page {}: {} item(s), {}/{} word(s) placed",
                page_num,
                layout_items.len(),
                rendered.words_assigned,
                page.words.len()
            );
            PageResult {
                page_num,
                markdown: rendered.markdown,
                layout_items,
                words_assigned: rendered.words_assigned,
                words_total: page.words.len(),
                duration_ms: start.elapsed().as_millis() as u64,
                error: None,
            }
        }
        Err(e) => {
            warn!("Page {}: {}", page_num, e);
            let error = match e {
                InferenceError::CircuitOpen { .. } => PageError::CircuitOpen { page: page_num },
                other => PageError::AnalysisFailed {
                    page: page_num,
                    detail: other.to_string(),
                },
            };
            let mut result =
                PageResult::failed(page_num, error, start.elapsed().as_millis() as u64);
            result.words_total = page.words.len();
            result
        }
    }
}

/// Analyse an in-memory page image, sent inline as base64 PNG.
pub async fn analyze_image(
    client: &InferenceClient,
    image: &DynamicImage,
    words: Vec<Word>,
    config: &LayoutConfig,
) -> Result<PageResult, LayoutError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(LayoutError::InvalidImage {
            width: image.width(),
            height: image.height(),
        });
    }
    let reference = encode::encode_image(image)
        .map_err(|e| LayoutError::Internal(format!("PNG encoding failed: {e}")))?;
    Ok(analyze_page(client, &reference, PageWords::new(1, words), config).await)
}

/// Analyse every selected page of a document.
///
/// `pages` lists the words of each page, keyed by their own 1-indexed
/// `page_num`; the numbers need not be contiguous. `config.pages` is matched
/// against those numbers. Pages numbered 0 and repeated page numbers are
/// skipped with a warning. Pages run concurrently, at most
/// `config.concurrency` at a time.
///
/// # Errors
/// * [`LayoutError::EmptyPageSelection`] when the selection matches nothing.
/// * [`LayoutError::AllPagesFailed`] when no selected page succeeded.
pub async fn analyze_document(
    client: &InferenceClient,
    image_reference: &ImageReference,
    pages: Vec<PageWords>,
    config: &LayoutConfig,
    progress: Option<&ProgressCallback>,
) -> Result<DocumentOutput, LayoutError> {
    let total_start = Instant::now();
    let total_pages = pages.len();
    let mut seen = BTreeSet::new();
    let pages: Vec<PageWords> = pages
        .into_iter()
        .filter(|p| {
            if p.page_num == 0 {
                warn!("Skipping page 0: page numbers are 1-indexed");
                return false;
            }
            if !seen.insert(p.page_num) {
                warn!("Skipping duplicate words for page {}", p.page_num);
                return false;
            }
            config.pages.contains(p.page_num)
        })
        .collect();
    if pages.is_empty() {
        return Err(LayoutError::EmptyPageSelection { total: total_pages });
    }

    let selected_count = pages.len();
    info!(
        "Analysing {} of {} page(s), {} at a time",
        selected_count, total_pages, config.concurrency
    );
    if let Some(cb) = progress {
        cb.on_conversion_start(selected_count);
    }

    let mut results: Vec<PageResult> = stream::iter(pages.into_iter().map(|page| async move {
        let page_num = page.page_num;
        if let Some(cb) = progress {
            cb.on_page_start(page_num, selected_count);
        }
        let result = analyze_page(client, image_reference, page, config).await;
        if let Some(cb) = progress {
            match &result.error {
                None => cb.on_page_complete(page_num, selected_count, result.markdown.len()),
                Some(e) => cb.on_page_error(page_num, selected_count, &e.to_string()),
            }
        }
        result
    }))
    .buffer_unordered(config.concurrency.max(1))
    .collect()
    .await;

    results.sort_by_key(|p| p.page_num);

    let processed = results.iter().filter(|p| p.is_ok()).count();
    if let Some(cb) = progress {
        cb.on_conversion_complete(selected_count, processed);
    }
    if processed == 0 {
        let first_error = results
            .iter()
            .find_map(|p| p.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(LayoutError::AllPagesFailed {
            total: results.len(),
            first_error,
        });
    }

    let stats = DocumentStats {
        total_pages,
        selected_pages: selected_count,
        processed_pages: processed,
        failed_pages: selected_count - processed,
        layout_items: results.iter().map(|p| p.layout_items.len()).sum(),
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    info!(
        "Document complete: {}/{} page(s), {}ms",
        processed, selected_count, stats.total_duration_ms
    );

    Ok(DocumentOutput {
        markdown: assemble_document(&results, config),
        pages: results,
        stats,
    })
}

/// Join successful pages with the configured separator.
pub fn assemble_document(pages: &[PageResult], config: &LayoutConfig) -> String {
    let mut out = String::new();
    for (i, page) in pages.iter().filter(|p| p.is_ok()).enumerate() {
        if i > 0 {
            out.push_str(&config.page_separator.render(page.page_num));
        }
        out.push_str(&page.markdown);
    }
    out
}

/// Write Markdown to `path` via a temporary sibling and a rename, so readers
/// never see a partial file.
pub async fn write_markdown(path: impl AsRef<Path>, markdown: &str) -> Result<(), LayoutError> {
    let path = path.as_ref();
    let write_err = |source| LayoutError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, markdown).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    debug!("Wrote {} bytes to {}", markdown.len(), path.display());
    Ok(())
}
