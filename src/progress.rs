//! Progress-callback trait for per-page analysis events.
//!
//! Pass an [`Arc<dyn ConversionProgressCallback>`] to
//! [`crate::convert::analyze_document`] to observe pages as they finish.
//!
//! # Example
//!
//! ```rust
//! use layout2md::ConversionProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Counter(AtomicUsize);
//!
//! impl ConversionProgressCallback for Counter {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, markdown_len: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page_num}/{total_pages}: {markdown_len} bytes");
//!     }
//! }
//! ```

use std::sync::Arc;

/// Receives events while a document is analysed.
///
/// Pages run concurrently, so the per-page methods may be called from
/// several tasks at once. All methods default to no-ops.
pub trait ConversionProgressCallback: Send + Sync {
    /// Before the first page, with the number of selected pages.
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Just before the layout request for a page is sent.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// A page produced Markdown of `markdown_len` bytes.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, markdown_len: usize) {
        let _ = (page_num, total_pages, markdown_len);
    }

    /// A page failed; `error` is human-readable.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// After every selected page has been attempted.
    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// Ignores every event.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tally {
        completes: AtomicUsize,
        errors: AtomicUsize,
        bytes: AtomicUsize,
    }

    impl ConversionProgressCallback for Tally {
        fn on_page_complete(&self, _page_num: usize, _total_pages: usize, markdown_len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
            self.bytes.fetch_add(markdown_len, Ordering::SeqCst);
        }

        fn on_page_error(&self, _page_num: usize, _total_pages: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_accepts_every_event() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_conversion_start(2);
        cb.on_page_start(1, 2);
        cb.on_page_complete(1, 2, 10);
        cb.on_page_error(2, 2, "circuit open");
        cb.on_conversion_complete(2, 1);
    }

    #[test]
    fn overridden_methods_receive_events() {
        let tally = Tally::default();
        tally.on_page_start(1, 2);
        tally.on_page_complete(1, 2, 40);
        tally.on_page_error(2, 2, "timeout");
        assert_eq!(tally.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tally.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tally.bytes.load(Ordering::SeqCst), 40);
    }
}
