//! Pipeline stages for layout analysis and Markdown reconstruction.
//!
//! Each submodule implements exactly one transformation step. All stages are
//! pure functions over caller-owned data: no shared state, no locking, safe
//! to call from any number of tasks at once.
//!
//! ## Data Flow
//!
//! ```text
//! image ──▶ preprocess ──▶ (detector) ──▶ postprocess ──▶ reading_order ──▶ markdown
//!           (letterbox)                   (NMS, labels)   (columns, words)   (emission)
//! ```
//!
//! 1. [`preprocess`]: letterbox and normalise a page into the detector canvas
//! 2. [`postprocess`]: map detections back to the page, filter, suppress
//! 3. [`reading_order`]: split columns, order blocks, assign words
//! 4. [`markdown`]: render ordered blocks (or flat text) as Markdown
//! 5. [`encode`]: inline PNG reference for the remote detector

pub mod encode;
pub mod markdown;
pub mod postprocess;
pub mod preprocess;
pub mod reading_order;
