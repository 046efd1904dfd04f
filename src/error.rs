//! Error types for the layout2md library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`LayoutError`]: **Fatal**: the request cannot proceed at all (empty
//!   image, invalid configuration, label table mismatch, unreadable input).
//!   Returned as `Err(LayoutError)` from the top-level functions.
//!
//! * [`InferenceError`]: a call to the remote detector/translator failed,
//!   either locally (circuit open) or remotely (transport exhausted its
//!   retries, service rejected the request).
//!
//! * [`PageError`]: **Non-fatal**: one page of a multi-page document failed
//!   but the others are fine. Stored inside [`crate::output::PageResult`] so
//!   callers can inspect partial success.
//!
//! Translating these into caller-facing responses (HTTP status codes, user
//! messages) is left to the embedding application.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the layout2md library.
#[derive(Debug, Error)]
pub enum LayoutError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The page image has a zero dimension.
    #[error("Invalid image: {width}x{height} has no pixels")]
    InvalidImage { width: u32, height: u32 },

    /// An input file could not be read.
    #[error("Failed to read '{path}': {source}")]
    InputReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An input file was read but is not the expected JSON shape.
    #[error("Failed to parse '{path}': {detail}")]
    InputParseFailed { path: PathBuf, detail: String },

    // ── Detector contract ─────────────────────────────────────────────────
    /// The detector reports a label order different from the built-in table.
    ///
    /// Any mismatch silently corrupts downstream classification, so this is
    /// checked once at startup rather than tolerated.
    #[error("Label table mismatch at class id {index}: expected '{expected}', detector reports '{found}'")]
    LabelTableMismatch {
        index: usize,
        expected: String,
        found: String,
    },

    // ── Remote errors ─────────────────────────────────────────────────────
    /// The inference service call failed.
    #[error(transparent)]
    Inference(#[from] InferenceError),

    /// Every page failed; output would be empty.
    #[error("All {total} pages failed.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    /// The page selection matched no page.
    #[error("Page selection is empty (document has {total} pages)")]
    EmptyPageSelection { total: usize },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures of a single call through [`crate::client::InferenceClient`].
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The circuit breaker is open; no network attempt was made.
    #[error("Inference service circuit is open after {failure_count} consecutive failures; retry in {retry_after_ms}ms")]
    CircuitOpen {
        failure_count: u32,
        retry_after_ms: u64,
    },

    /// Transport failed on every attempt.
    #[error("Inference service call '{route}' failed after {attempts} attempt(s): {source}")]
    Service {
        route: &'static str,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// The service answered with `success: false`.
    #[error("Inference service rejected '{route}': {message}")]
    Remote {
        route: &'static str,
        message: String,
    },

    /// The service answered with a payload that does not match the contract.
    #[error("Malformed response from '{route}': {detail}")]
    Protocol {
        route: &'static str,
        detail: String,
    },

    /// The client could not be constructed.
    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),
}

impl InferenceError {
    /// True when no request reached the network.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, InferenceError::CircuitOpen { .. })
    }
}

/// Raw failure of one network attempt.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The attempt exceeded its time budget.
    #[error("timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The connection could not be established or broke mid-request.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The service answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The body was not valid JSON.
    #[error("invalid JSON body: {0}")]
    Decode(String),
}

impl TransportError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Timeouts, connection failures, 5xx and 429 are transient; other 4xx
    /// and undecodable bodies are protocol errors.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Timeout { .. } | TransportError::Connect(_) => true,
            TransportError::Status { status, .. } => *status >= 500 || *status == 429,
            TransportError::Decode(_) => false,
        }
    }
}

/// A non-fatal error for a single page.
///
/// Stored alongside [`crate::output::PageResult`] when a page fails.
/// Document analysis continues unless ALL pages fail.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Remote layout analysis failed for this page.
    #[error("Page {page}: layout analysis failed: {detail}")]
    AnalysisFailed { page: usize, detail: String },

    /// The circuit was open when the page was scheduled.
    #[error("Page {page}: skipped, inference circuit open")]
    CircuitOpen { page: usize },
}
