//! Wire types of the inference service.
//!
//! Every response carries `success` and an optional `message`; the
//! [`Envelope`] trait lets the client check both without knowing the route.

use crate::types::{BBox, LayoutItem};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Service endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    LayoutAnalysis,
    Translate,
    TranslateBatch,
    Health,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::LayoutAnalysis => "/layout-analysis",
            Route::Translate => "/translate",
            Route::TranslateBatch => "/translate-batch",
            Route::Health => "/health",
        }
    }

    /// Short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        self.path().trim_start_matches('/')
    }

    /// `GET` routes take no body.
    pub fn is_get(&self) -> bool {
        matches!(self, Route::Health)
    }
}

/// Where the service finds the page image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageReference {
    /// Path or URL the service resolves on its side.
    Path(String),
    /// Base64-encoded image bytes.
    Inline { data: String, mime_type: String },
}

impl From<&str> for ImageReference {
    fn from(s: &str) -> Self {
        ImageReference::Path(s.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LayoutAnalysisRequest<'a> {
    pub image_reference: &'a ImageReference,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_subset: Option<&'a [usize]>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranslateRequest<'a> {
    pub text: &'a str,
    pub source_lang: &'a str,
    pub target_lang: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranslateBatchRequest<'a> {
    pub texts: &'a [String],
    pub source_lang: &'a str,
    pub target_lang: &'a str,
}

/// Common `success` / `message` fields of a response.
pub trait Envelope {
    fn success(&self) -> bool;
    fn message(&self) -> Option<&str>;
}

/// One detected region as returned by the service, in page pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRegion {
    pub bbox: BBox,
    pub class_name: String,
    pub score: f32,
    /// 1-indexed page, when the request covered several pages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
}

impl From<RemoteRegion> for LayoutItem {
    fn from(r: RemoteRegion) -> Self {
        LayoutItem::new(r.bbox, r.class_name, r.score)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LayoutAnalysisResponse {
    pub success: bool,
    #[serde(default)]
    pub results: Vec<RemoteRegion>,
    #[serde(default)]
    pub processing_time: f64,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranslateResponse {
    pub success: bool,
    #[serde(default)]
    pub translation: String,
    #[serde(default)]
    pub processing_time: f64,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranslateBatchResponse {
    pub success: bool,
    #[serde(default)]
    pub translations: Vec<String>,
    #[serde(default)]
    pub processing_time: f64,
    #[serde(default)]
    pub message: Option<String>,
}

/// `GET /health` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub services: BTreeMap<String, serde_json::Value>,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        matches!(self.status.to_lowercase().as_str(), "ok" | "healthy")
    }

    /// Detector label order, when the service advertises it under
    /// `services.layout.labels`.
    pub fn detector_labels(&self) -> Option<Vec<String>> {
        let labels = self.services.get("layout")?.get("labels")?.as_array()?;
        labels
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect()
    }
}

macro_rules! envelope {
    ($($ty:ty),*) => {$(
        impl Envelope for $ty {
            fn success(&self) -> bool {
                self.success
            }
            fn message(&self) -> Option<&str> {
                self.message.as_deref()
            }
        }
    )*};
}

envelope!(LayoutAnalysisResponse, TranslateResponse, TranslateBatchResponse);

impl Envelope for HealthResponse {
    fn success(&self) -> bool {
        true
    }
    fn message(&self) -> Option<&str> {
        None
    }
}
