//! Configuration types for layout analysis and the inference client.
//!
//! Two independent configs exist because they have independent lifetimes:
//! [`LayoutConfig`] describes one analysis request (thresholds, page
//! selection, output shape) and is cheap to clone per request, while
//! [`ClientConfig`] is consumed once when the process builds its single
//! [`crate::client::InferenceClient`].
//!
//! Both are built through builders so callers set only what they care about
//! and rely on the documented defaults for the rest.

use crate::error::{InferenceError, LayoutError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ── Stage configs ────────────────────────────────────────────────────────

/// Detector input geometry and normalisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Canvas width fed to the detector. Default: 640.
    pub target_width: u32,
    /// Canvas height fed to the detector. Default: 640.
    pub target_height: u32,
    /// Per-channel (RGB) mean subtracted after scaling to [0, 1].
    pub mean: [f32; 3],
    /// Per-channel (RGB) standard deviation divided out after the mean.
    pub std: [f32; 3],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            target_width: 640,
            target_height: 640,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }
}

/// Detection filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostprocessConfig {
    /// Detections scoring below this are dropped. Default: 0.25.
    pub score_threshold: f32,
    /// Same-class boxes overlapping a kept box by more than this IoU are
    /// suppressed. Default: 0.45.
    pub iou_threshold: f32,
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.25,
            iou_threshold: 0.45,
        }
    }
}

/// Reading-order reconstruction knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// Blocks at least this fraction of the page content width are treated
    /// as spanning both columns. Default: 0.7.
    pub span_ratio: f32,
    /// Pixels added on every side of a block when testing word centroids.
    /// Default: 5.
    pub word_margin: f32,
    /// Vertical bucket size for grouping words into lines. Default: 5.
    pub line_tolerance: f32,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            span_ratio: 0.7,
            word_margin: 5.0,
            line_tolerance: 5.0,
        }
    }
}

// ── LayoutConfig ─────────────────────────────────────────────────────────

/// Configuration for one layout-analysis request.
///
/// # Example
/// ```rust
/// use layout2md::LayoutConfig;
///
/// let config = LayoutConfig::builder()
///     .score_threshold(0.4)
///     .concurrency(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.postprocess.score_threshold, 0.4);
/// ```
#[derive(Debug, Clone)]
pub struct LayoutConfig {
    pub preprocess: PreprocessConfig,
    pub postprocess: PostprocessConfig,
    pub assembly: AssemblyConfig,

    /// Pages analysed at once by [`crate::convert::analyze_document`].
    /// Default: 4.
    ///
    /// The remote detector is itself resource-constrained; this caps the
    /// number of in-flight layout requests from one document.
    pub concurrency: usize,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// Page separator in assembled output. Default: none.
    pub page_separator: PageSeparator,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            preprocess: PreprocessConfig::default(),
            postprocess: PostprocessConfig::default(),
            assembly: AssemblyConfig::default(),
            concurrency: 4,
            pages: PageSelection::default(),
            page_separator: PageSeparator::default(),
        }
    }
}

impl LayoutConfig {
    pub fn builder() -> LayoutConfigBuilder {
        LayoutConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`LayoutConfig`].
#[derive(Debug)]
pub struct LayoutConfigBuilder {
    config: LayoutConfig,
}

impl LayoutConfigBuilder {
    pub fn target_size(mut self, width: u32, height: u32) -> Self {
        self.config.preprocess.target_width = width;
        self.config.preprocess.target_height = height;
        self
    }

    pub fn normalisation(mut self, mean: [f32; 3], std: [f32; 3]) -> Self {
        self.config.preprocess.mean = mean;
        self.config.preprocess.std = std;
        self
    }

    pub fn score_threshold(mut self, t: f32) -> Self {
        self.config.postprocess.score_threshold = t;
        self
    }

    pub fn iou_threshold(mut self, t: f32) -> Self {
        self.config.postprocess.iou_threshold = t;
        self
    }

    pub fn span_ratio(mut self, r: f32) -> Self {
        self.config.assembly.span_ratio = r;
        self
    }

    pub fn word_margin(mut self, px: f32) -> Self {
        self.config.assembly.word_margin = px;
        self
    }

    pub fn line_tolerance(mut self, px: f32) -> Self {
        self.config.assembly.line_tolerance = px;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<LayoutConfig, LayoutError> {
        let c = &self.config;
        if c.preprocess.target_width == 0 || c.preprocess.target_height == 0 {
            return Err(LayoutError::InvalidConfig(format!(
                "target size must be non-zero, got {}x{}",
                c.preprocess.target_width, c.preprocess.target_height
            )));
        }
        if c.preprocess.std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(LayoutError::InvalidConfig(
                "normalisation std must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&c.postprocess.score_threshold) {
            return Err(LayoutError::InvalidConfig(format!(
                "score threshold must be 0–1, got {}",
                c.postprocess.score_threshold
            )));
        }
        if !(0.0..=1.0).contains(&c.postprocess.iou_threshold) {
            return Err(LayoutError::InvalidConfig(format!(
                "IoU threshold must be 0–1, got {}",
                c.postprocess.iou_threshold
            )));
        }
        if !(c.assembly.span_ratio > 0.0 && c.assembly.span_ratio <= 1.0) {
            return Err(LayoutError::InvalidConfig(format!(
                "span ratio must be in (0, 1], got {}",
                c.assembly.span_ratio
            )));
        }
        if c.assembly.line_tolerance <= 0.0 || c.assembly.word_margin < 0.0 {
            return Err(LayoutError::InvalidConfig(
                "line tolerance must be positive and word margin non-negative".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── ClientConfig ─────────────────────────────────────────────────────────

/// Configuration for [`crate::client::InferenceClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the inference service. Default: `http://127.0.0.1:8001`.
    pub base_url: String,

    /// Per-attempt timeout for analysis and translation calls. Default: 30.
    pub request_timeout_secs: u64,

    /// Timeout for the single health-check attempt. Default: 5.
    pub health_timeout_secs: u64,

    /// Consecutive failed calls that open the circuit. Default: 5.
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before calls are let through again.
    /// Default: 60.
    pub recovery_timeout_secs: u64,

    /// Retries after the first attempt of a call. Default: 1.
    pub max_retries: u32,

    /// Backoff base; retry `n` (0-based) waits `retry_backoff_ms · 2ⁿ`.
    /// Default: 1000, i.e. 1 s, 2 s, 4 s …
    pub retry_backoff_ms: u64,

    /// In-flight requests allowed during batch translation. Default: 4.
    pub concurrency: usize,

    /// Texts per `translate-batch` request. Default: 16.
    pub batch_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8001".to_string(),
            request_timeout_secs: 30,
            health_timeout_secs: 5,
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            max_retries: 1,
            retry_backoff_ms: 1000,
            concurrency: 4,
            batch_size: 16,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults overridden by `LAYOUT2MD_*` environment variables.
    ///
    /// Recognised: `LAYOUT2MD_SERVICE_URL`, `LAYOUT2MD_MAX_RETRIES`,
    /// `LAYOUT2MD_FAILURE_THRESHOLD`, `LAYOUT2MD_RECOVERY_TIMEOUT` (seconds).
    /// Unparseable numbers are reported rather than ignored.
    pub fn from_env() -> Result<Self, InferenceError> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("LAYOUT2MD_SERVICE_URL") {
            if !url.is_empty() {
                config.base_url = url;
            }
        }
        if let Some(n) = env_number("LAYOUT2MD_MAX_RETRIES")? {
            config.max_retries = n as u32;
        }
        if let Some(n) = env_number("LAYOUT2MD_FAILURE_THRESHOLD")? {
            config.failure_threshold = n as u32;
        }
        if let Some(n) = env_number("LAYOUT2MD_RECOVERY_TIMEOUT")? {
            config.recovery_timeout_secs = n;
        }
        Self::validate(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    /// Delay before retry `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(1u64 << attempt.min(16)))
    }

    fn validate(config: Self) -> Result<Self, InferenceError> {
        if config.failure_threshold == 0 {
            return Err(InferenceError::InvalidConfig(
                "failure threshold must be ≥ 1".into(),
            ));
        }
        if config.concurrency == 0 || config.batch_size == 0 {
            return Err(InferenceError::InvalidConfig(
                "concurrency and batch size must be ≥ 1".into(),
            ));
        }
        if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
            return Err(InferenceError::InvalidConfig(format!(
                "base URL must be http(s), got '{}'",
                config.base_url
            )));
        }
        Ok(config)
    }
}

fn env_number(key: &str) -> Result<Option<u64>, InferenceError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| InferenceError::InvalidConfig(format!("{key} must be a number, got '{v}'"))),
        _ => Ok(None),
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn health_timeout_secs(mut self, secs: u64) -> Self {
        self.config.health_timeout_secs = secs.max(1);
        self
    }

    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.config.failure_threshold = n;
        self
    }

    pub fn recovery_timeout_secs(mut self, secs: u64) -> Self {
        self.config.recovery_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ClientConfig, InferenceError> {
        ClientConfig::validate(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Specifies which pages of a document to analyse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// All pages (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Whether the 1-indexed `page` is selected, independent of any page
    /// count. Page 0 is never selected.
    pub fn contains(&self, page: usize) -> bool {
        if page == 0 {
            return false;
        }
        match self {
            PageSelection::All => true,
            PageSelection::Single(p) => *p == page,
            PageSelection::Range(start, end) => *start <= page && page <= *end,
            PageSelection::Set(pages) => pages.contains(&page),
        }
    }
}

/// How to separate pages in the assembled Markdown output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSeparator {
    /// No separator; pages joined with "\n\n". (default)
    #[default]
    None,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// HTML comment with page number: "<!-- page N -->"
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator string for the given page number (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_defaults() {
        let c = LayoutConfig::builder().build().unwrap();
        assert_eq!(c.preprocess.target_width, 640);
        assert_eq!(c.postprocess.iou_threshold, 0.45);
        assert_eq!(c.assembly.span_ratio, 0.7);
        assert_eq!(c.assembly.word_margin, 5.0);
        assert_eq!(c.concurrency, 4);
    }

    #[test]
    fn layout_builder_rejects_bad_thresholds() {
        assert!(LayoutConfig::builder().score_threshold(1.5).build().is_err());
        assert!(LayoutConfig::builder().iou_threshold(-0.1).build().is_err());
        assert!(LayoutConfig::builder().span_ratio(0.0).build().is_err());
        assert!(LayoutConfig::builder().target_size(0, 640).build().is_err());
        assert!(LayoutConfig::builder().line_tolerance(0.0).build().is_err());
    }

    #[test]
    fn client_defaults() {
        let c = ClientConfig::default();
        assert_eq!(c.failure_threshold, 5);
        assert_eq!(c.recovery_timeout(), Duration::from_secs(60));
        assert_eq!(c.max_retries, 1);
    }

    #[test]
    fn backoff_doubles_from_one_second() {
        let c = ClientConfig::default();
        assert_eq!(c.backoff(0), Duration::from_secs(1));
        assert_eq!(c.backoff(1), Duration::from_secs(2));
        assert_eq!(c.backoff(3), Duration::from_secs(8));
    }

    #[test]
    fn client_builder_validates() {
        assert!(ClientConfig::builder().failure_threshold(0).build().is_err());
        assert!(ClientConfig::builder().base_url("ftp://x").build().is_err());
        let c = ClientConfig::builder()
            .base_url("http://detector:9000/")
            .build()
            .unwrap();
        assert_eq!(c.base_url, "http://detector:9000");
    }

    #[test]
    fn page_selection_contains_ignores_page_count() {
        assert!(PageSelection::All.contains(42));
        assert!(!PageSelection::All.contains(0));
        assert!(PageSelection::Single(3).contains(3));
        assert!(!PageSelection::Single(3).contains(2));
        assert!(PageSelection::Range(2, 5).contains(5));
        assert!(!PageSelection::Range(2, 5).contains(6));
        assert!(PageSelection::Set(vec![7, 9]).contains(9));
        assert!(!PageSelection::Set(vec![0]).contains(0));
    }

    #[test]
    fn separator_render() {
        assert_eq!(PageSeparator::None.render(2), "\n\n");
        assert_eq!(PageSeparator::HorizontalRule.render(2), "\n\n---\n\n");
        assert!(PageSeparator::Comment.render(7).contains("page 7"));
    }
}
