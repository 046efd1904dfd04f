//! Resilient client for the remote layout detector and translator.
//!
//! Every call goes through the same path:
//!
//! ```text
//! breaker.check ──▶ attempt (timeout) ──▶ ok ──────────────▶ record_success
//!                        │
//!                        ├─ transient ─▶ backoff ─▶ attempt … ─▶ record_failure
//!                        └─ protocol / success:false ─▶ error, breaker untouched
//! ```
//!
//! Transient failures are timeouts, connection errors, HTTP 5xx and 429.
//! A call that exhausts `max_retries` counts as one breaker failure no matter
//! how many attempts it made. Dropping a call future cancels it: nothing is
//! recorded and no further attempt is made.

pub mod breaker;
pub mod protocol;
pub mod transport;

use crate::config::ClientConfig;
use crate::error::{InferenceError, TransportError};
use breaker::{BreakerSnapshot, CircuitBreaker};
use futures::{StreamExt, TryStreamExt};
use protocol::{
    Envelope, HealthResponse, ImageReference, LayoutAnalysisRequest, LayoutAnalysisResponse,
    Route, TranslateBatchRequest, TranslateBatchResponse, TranslateRequest, TranslateResponse,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use transport::{HttpTransport, Transport};

pub struct InferenceClient {
    transport: Arc<dyn Transport>,
    breaker: CircuitBreaker,
    config: ClientConfig,
}

impl std::fmt::Debug for InferenceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceClient")
            .field("config", &self.config)
            .field("breaker", &self.breaker.snapshot())
            .finish()
    }
}

impl InferenceClient {
    /// HTTP client against `config.base_url`.
    pub fn new(config: ClientConfig) -> Result<Self, InferenceError> {
        let transport = HttpTransport::new(&config.base_url, config.request_timeout())?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Client over any [`Transport`].
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let breaker = CircuitBreaker::new(config.failure_threshold, config.recovery_timeout());
        Self {
            transport,
            breaker,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn breaker_state(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    /// Detect layout regions on the referenced image.
    ///
    /// `page_subset` restricts multi-page references to the given 1-indexed
    /// pages.
    pub async fn analyze_layout(
        &self,
        image_reference: &ImageReference,
        page_subset: Option<&[usize]>,
    ) -> Result<LayoutAnalysisResponse, InferenceError> {
        let body = LayoutAnalysisRequest {
            image_reference,
            page_subset,
        };
        let resp: LayoutAnalysisResponse = self
            .call(Route::LayoutAnalysis, Some(body), self.config.request_timeout(), self.config.max_retries)
            .await?;
        debug!(
            "layout-analysis: {} region(s) in {:.3}s",
            resp.results.len(),
            resp.processing_time
        );
        Ok(resp)
    }

    pub async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, InferenceError> {
        let body = TranslateRequest {
            text,
            source_lang,
            target_lang,
        };
        let resp: TranslateResponse = self
            .call(Route::Translate, Some(body), self.config.request_timeout(), self.config.max_retries)
            .await?;
        Ok(resp.translation)
    }

    /// Translate many texts, preserving input order.
    ///
    /// Texts are sent in chunks of `batch_size` with at most `concurrency`
    /// chunks in flight. The first failing chunk fails the whole batch.
    pub async fn translate_batch(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<String>, InferenceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // A hand-built config may carry zeros; treat them as one.
        let batch_size = self.config.batch_size.max(1);
        let concurrency = self.config.concurrency.max(1);
        let chunks: Vec<&[String]> = texts.chunks(batch_size).collect();
        debug!(
            "translate-batch: {} text(s) in {} chunk(s), {} in flight",
            texts.len(),
            chunks.len(),
            concurrency
        );

        let translated: Vec<Vec<String>> = futures::stream::iter(chunks)
            .map(|chunk| self.translate_chunk(chunk, source_lang, target_lang))
            .buffered(concurrency)
            .try_collect()
            .await?;

        Ok(translated.into_iter().flatten().collect())
    }

    async fn translate_chunk(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<String>, InferenceError> {
        let body = TranslateBatchRequest {
            texts,
            source_lang,
            target_lang,
        };
        let resp: TranslateBatchResponse = self
            .call(Route::TranslateBatch, Some(body), self.config.request_timeout(), self.config.max_retries)
            .await?;
        if resp.translations.len() != texts.len() {
            return Err(InferenceError::Protocol {
                route: Route::TranslateBatch.name(),
                detail: format!(
                    "sent {} text(s), received {} translation(s)",
                    texts.len(),
                    resp.translations.len()
                ),
            });
        }
        Ok(resp.translations)
    }

    /// Single attempt with the short health timeout; still gated by and
    /// recorded in the breaker.
    pub async fn health_check(&self) -> Result<HealthResponse, InferenceError> {
        self.call::<HealthResponse, ()>(Route::Health, None, self.config.health_timeout(), 0)
            .await
    }

    async fn call<R, B>(
        &self,
        route: Route,
        body: Option<B>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<R, InferenceError>
    where
        R: DeserializeOwned + Envelope,
        B: Serialize,
    {
        self.breaker.check()?;

        let body = body
            .map(|b| serde_json::to_value(&b))
            .transpose()
            .map_err(|e| InferenceError::Protocol {
                route: route.name(),
                detail: format!("request encoding: {e}"),
            })?;

        let mut last_err = TransportError::Connect("no attempt made".into());
        for attempt in 0..=max_retries {
            match self.attempt(route, body.clone(), timeout).await {
                Ok(value) => {
                    let resp = decode::<R>(route, value)?;
                    self.breaker.record_success();
                    return Ok(resp);
                }
                Err(e) if !e.is_transient() => {
                    warn!("{}: non-retryable failure: {}", route.name(), e);
                    return Err(InferenceError::Protocol {
                        route: route.name(),
                        detail: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(
                        "{}: attempt {}/{} failed: {}",
                        route.name(),
                        attempt + 1,
                        max_retries + 1,
                        e
                    );
                    last_err = e;
                    if attempt < max_retries {
                        let delay = self.config.backoff(attempt);
                        debug!("{}: retrying in {}ms", route.name(), delay.as_millis());
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.breaker.record_failure();
        Err(InferenceError::Service {
            route: route.name(),
            attempts: max_retries + 1,
            source: last_err,
        })
    }

    async fn attempt(
        &self,
        route: Route,
        body: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        match tokio::time::timeout(timeout, self.transport.send(route, body)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                elapsed_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

/// Parse a 2xx body and surface `success: false` as [`InferenceError::Remote`].
fn decode<R: DeserializeOwned + Envelope>(route: Route, value: Value) -> Result<R, InferenceError> {
    let resp: R = serde_json::from_value(value).map_err(|e| InferenceError::Protocol {
        route: route.name(),
        detail: e.to_string(),
    })?;
    if !resp.success() {
        return Err(InferenceError::Remote {
            route: route.name(),
            message: resp.message().unwrap_or("no message").to_string(),
        });
    }
    Ok(resp)
}
