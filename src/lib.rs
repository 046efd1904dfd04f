//! # layout2md
//!
//! Reconstruct Markdown from page images using a layout detector and the
//! page's positioned words.
//!
//! ## Why this crate?
//!
//! Text extractors hand back words with coordinates but no structure:
//! two-column papers come out interleaved, headings look like body text and
//! figures vanish. A document-layout detector knows where the title, the
//! columns, the tables and the figures are. This crate combines the two:
//! detected regions decide reading order and Markdown shape, the words
//! supply the text.
//!
//! ## Pipeline Overview
//!
//! ```text
//! page image
//!  │
//!  ├─ 1. Preprocess   letterbox + normalise into the detector canvas (NCHW)
//!  ├─ 2. Detect       remote service, behind retry + circuit breaker
//!  ├─ 3. Postprocess  undo letterbox, score filter, class-wise NMS, labels
//!  ├─ 4. Order        column split, y-sort, word assignment, line grouping
//!  └─ 5. Emit         per-class Markdown templates (flat text if no layout)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use layout2md::{analyze_document, ClientConfig, ImageReference, InferenceClient,
//!     LayoutConfig, PageWords};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = InferenceClient::new(ClientConfig::from_env()?)?;
//!     let config = LayoutConfig::default();
//!     let pages = vec![PageWords::new(1, Vec::new())];
//!     let doc = analyze_document(&client, &ImageReference::from("paper.pdf"), pages, &config, None)
//!         .await?;
//!     println!("{}", doc.markdown);
//!     Ok(())
//! }
//! ```
//!
//! Offline, with regions already in hand:
//!
//! ```rust
//! use layout2md::{page_to_markdown, AssemblyConfig, BBox, LayoutItem, Word};
//!
//! let items = vec![LayoutItem::new(BBox::new(0.0, 0.0, 500.0, 40.0), "Title", 0.9)];
//! let words = vec![Word::new("Results", BBox::new(10.0, 10.0, 80.0, 30.0))];
//! assert_eq!(page_to_markdown(&items, &words, &AssemblyConfig::default()), "# Results");
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `layout2md` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! ```toml
//! layout2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod client;
pub mod config;
pub mod convert;
pub mod error;
pub mod labels;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod types;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::breaker::BreakerSnapshot;
pub use client::protocol::{HealthResponse, ImageReference, RemoteRegion};
pub use client::transport::{HttpTransport, Transport};
pub use client::InferenceClient;
pub use config::{
    AssemblyConfig, ClientConfig, ClientConfigBuilder, LayoutConfig, LayoutConfigBuilder,
    PageSelection, PageSeparator, PostprocessConfig, PreprocessConfig,
};
pub use convert::{analyze_document, analyze_image, analyze_page, write_markdown, PageWords};
pub use error::{InferenceError, LayoutError, PageError, TransportError};
pub use labels::{LabelTable, LayoutClass, DETECTOR_LABELS};
pub use output::{DocumentOutput, DocumentStats, PageResult};
pub use pipeline::markdown::page_to_markdown;
pub use pipeline::postprocess::{non_max_suppression, postprocess, RawDetection};
pub use pipeline::preprocess::{preprocess, PreprocessMeta, PreprocessedImage};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use types::{BBox, LayoutItem, Word};
