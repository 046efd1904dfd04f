//! End-to-end tests for layout2md.
//!
//! Most tests drive the public API against an in-memory [`Transport`] that
//! plays the inference service, with tokio's paused clock standing in for
//! backoff and recovery delays.
//!
//! One test talks to a real service. It is gated behind `E2E_ENABLED` and
//! `LAYOUT2MD_SERVICE_URL` so it does not run in CI unless requested:
//!
//!   E2E_ENABLED=1 LAYOUT2MD_SERVICE_URL=http://127.0.0.1:8001 \
//!     cargo test --test e2e -- --nocapture

use async_trait::async_trait;
use layout2md::client::protocol::Route;
use layout2md::{
    analyze_document, analyze_page, page_to_markdown, postprocess, AssemblyConfig, BBox,
    ClientConfig, ConversionProgressCallback, ImageReference, InferenceClient, InferenceError,
    LabelTable, LayoutConfig, LayoutError, LayoutItem, PageError, PageSelection, PageSeparator,
    PageWords, PostprocessConfig, PreprocessConfig, PreprocessMeta, ProgressCallback,
    RawDetection, Transport, TransportError, Word, DETECTOR_LABELS,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

// ── Test helpers ─────────────────────────────────────────────────────────────

type Handler = Box<dyn Fn(Route, &Option<Value>) -> Result<Value, TransportError> + Send + Sync>;
type Delay = Box<dyn Fn(Route, &Option<Value>) -> Duration + Send + Sync>;

/// In-memory inference service.
struct MockService {
    handler: Handler,
    delay: Delay,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockService {
    fn new(
        handler: impl Fn(Route, &Option<Value>) -> Result<Value, TransportError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            delay: Box::new(|_, _| Duration::ZERO),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn with_delay(
        mut self,
        delay: impl Fn(Route, &Option<Value>) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.delay = Box::new(delay);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockService {
    async fn send(&self, route: Route, body: Option<Value>) -> Result<Value, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = (self.delay)(route, &body);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.handler)(route, &body)
    }
}

fn unavailable() -> TransportError {
    TransportError::Status {
        status: 503,
        body: "model warming up".into(),
    }
}

fn word(text: &str, b: [f32; 4]) -> Word {
    Word::new(text, BBox::from(b))
}

/// A 1000px-wide two-column page: narrow title over the left column.
fn two_column_regions() -> Value {
    // Deliberately not in reading order.
    json!({
        "success": true,
        "results": [
            {"bbox": [520, 100, 1000, 500], "class_name": "Text", "score": 0.91},
            {"bbox": [0, 100, 480, 500], "class_name": "Text", "score": 0.93},
            {"bbox": [0, 0, 480, 80], "class_name": "Title", "score": 0.97}
        ],
        "processing_time": 0.05
    })
}

fn two_column_words() -> Vec<Word> {
    vec![
        word("right", [530.0, 120.0, 600.0, 140.0]),
        word("column", [70.0, 120.0, 150.0, 140.0]),
        word("Deep", [10.0, 20.0, 60.0, 40.0]),
        word("left", [10.0, 120.0, 60.0, 140.0]),
        word("Layouts", [70.0, 20.0, 150.0, 40.0]),
    ]
}

fn layout_service() -> Arc<MockService> {
    Arc::new(MockService::new(|route, _| match route {
        Route::LayoutAnalysis => Ok(two_column_regions()),
        _ => Err(TransportError::Status {
            status: 404,
            body: "not found".into(),
        }),
    }))
}

fn client_with(service: Arc<MockService>, config: ClientConfig) -> InferenceClient {
    InferenceClient::with_transport(config, service)
}

fn default_client(service: Arc<MockService>) -> InferenceClient {
    client_with(service, ClientConfig::default())
}

fn reference() -> ImageReference {
    ImageReference::from("/shared/paper.pdf")
}

// ── Reconstruction ───────────────────────────────────────────────────────────

#[tokio::test]
async fn two_column_page_reads_title_left_right() {
    let client = default_client(layout_service());
    let config = LayoutConfig::default();

    let page = analyze_page(&client, &reference(), PageWords::new(1, two_column_words()), &config).await;

    assert!(page.error.is_none(), "unexpected error: {:?}", page.error);
    assert!(page.markdown.starts_with("# "), "got: {:?}", page.markdown);
    assert_eq!(page.markdown, "# Deep Layouts\n\nleft column\n\nright");
    assert_eq!(page.layout_items.len(), 3);
    assert_eq!(page.words_assigned, 5);
    assert_eq!(page.words_total, 5);
}

#[tokio::test]
async fn identical_pages_give_identical_markdown() {
    let client = default_client(layout_service());
    let config = LayoutConfig::default();

    let a = analyze_page(&client, &reference(), PageWords::new(1, two_column_words()), &config).await;
    let b = analyze_page(&client, &reference(), PageWords::new(1, two_column_words()), &config).await;
    assert_eq!(a.markdown, b.markdown);
}

#[test]
fn overlapping_blocks_never_share_a_word() {
    let items = vec![
        LayoutItem::new(BBox::new(0.0, 0.0, 300.0, 200.0), "Text", 0.9),
        LayoutItem::new(BBox::new(0.0, 150.0, 300.0, 400.0), "Text", 0.8),
    ];
    let words = vec![
        word("top", [10.0, 10.0, 40.0, 20.0]),
        word("overlap", [10.0, 170.0, 80.0, 180.0]),
        word("bottom", [10.0, 300.0, 70.0, 310.0]),
    ];

    let md = page_to_markdown(&items, &words, &AssemblyConfig::default());
    assert_eq!(md.matches("overlap").count(), 1);
    assert_eq!(md, "top overlap\n\nbottom");
}

#[test]
fn span_boundary_is_inclusive() {
    // max_x = 1000: a 700px block spans, a 699px block does not.
    let items = vec![
        LayoutItem::new(BBox::new(0.0, 0.0, 700.0, 50.0), "Text", 0.9),
        LayoutItem::new(BBox::new(0.0, 100.0, 699.0, 150.0), "Text", 0.9),
        LayoutItem::new(BBox::new(700.0, 200.0, 1000.0, 250.0), "Text", 0.9),
    ];
    let words = vec![
        word("wide", [10.0, 10.0, 50.0, 20.0]),
        word("narrow", [10.0, 110.0, 60.0, 120.0]),
        word("side", [710.0, 210.0, 750.0, 220.0]),
    ];

    // Left column, then right, then the spanning block last.
    let md = page_to_markdown(&items, &words, &AssemblyConfig::default());
    assert_eq!(md, "narrow\n\nside\n\nwide");
}

#[test]
fn detector_boxes_survive_the_letterbox_round_trip() {
    let meta = assert_ok!(PreprocessMeta::compute(1000, 500, &PreprocessConfig::default()));
    let page_box = BBox::new(100.0, 50.0, 300.0, 200.0);
    let canvas = meta.to_canvas(&page_box);

    let detections = vec![RawDetection {
        class_id: 1,
        score: 0.9,
        x1: canvas.x_min,
        y1: canvas.y_min,
        x2: canvas.x_max,
        y2: canvas.y_max,
    }];
    let items = postprocess(
        &detections,
        &meta,
        &LabelTable::default(),
        &PostprocessConfig::default(),
    );

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].class_name, "Text");
    let got = items[0].bbox;
    for (a, b) in [
        (got.x_min, page_box.x_min),
        (got.y_min, page_box.y_min),
        (got.x_max, page_box.x_max),
        (got.y_max, page_box.y_max),
    ] {
        assert!((a - b).abs() <= 1.0, "{got:?} vs {page_box:?}");
    }
}

#[tokio::test]
async fn empty_detection_list_falls_back_to_flat_text() {
    let service = Arc::new(MockService::new(|_, _| {
        Ok(json!({"success": true, "results": [], "processing_time": 0.01}))
    }));
    let client = default_client(service);
    let words = vec![
        word("A", [0.0, 0.0, 10.0, 10.0]),
        word("B", [20.0, 0.0, 30.0, 10.0]),
        word("C", [0.0, 20.0, 10.0, 30.0]),
    ];

    let page = analyze_page(&client, &reference(), PageWords::new(1, words), &LayoutConfig::default()).await;
    assert_eq!(page.markdown, "A B\nC");
    assert!(page.layout_items.is_empty());
}

// ── Circuit breaker and retries ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn circuit_opens_then_lets_one_call_through_after_recovery() {
    let healthy = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&healthy);
    let service = Arc::new(MockService::new(move |_, _| {
        if flag.load(Ordering::SeqCst) {
            Ok(two_column_regions())
        } else {
            Err(unavailable())
        }
    }));
    let client = default_client(Arc::clone(&service));
    let image = reference();

    // Default: threshold 5, one retry per call.
    for _ in 0..5 {
        let err = assert_err!(client.analyze_layout(&image, None).await);
        assert!(matches!(err, InferenceError::Service { attempts: 2, .. }));
    }
    assert_eq!(service.calls(), 10);
    assert!(client.breaker_state().open);

    let err = assert_err!(client.analyze_layout(&image, None).await);
    assert!(err.is_circuit_open());
    assert_eq!(service.calls(), 10, "open circuit must not touch the network");

    healthy.store(true, Ordering::SeqCst);
    tokio::time::advance(Duration::from_secs(61)).await;

    let resp = assert_ok!(client.analyze_layout(&image, None).await);
    assert_eq!(resp.results.len(), 3);
    assert_eq!(service.calls(), 11);
    let state = client.breaker_state();
    assert!(!state.open);
    assert_eq!(state.failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn dropped_call_records_nothing_and_stops_retrying() {
    let service = Arc::new(MockService::new(|_, _| Err(unavailable())));
    let client = default_client(Arc::clone(&service));

    // First attempt fails at t=0, the 1s backoff is still running at 500ms.
    let outcome = tokio::time::timeout(
        Duration::from_millis(500),
        client.translate("Hello", "en", "de"),
    )
    .await;
    assert!(outcome.is_err());
    assert_eq!(service.calls(), 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(service.calls(), 1);
    assert_eq!(client.breaker_state().failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn open_circuit_marks_remaining_pages() {
    let service = Arc::new(MockService::new(|_, _| Err(unavailable())));
    let config = ClientConfig::builder()
        .failure_threshold(1)
        .max_retries(0)
        .build()
        .unwrap();
    let client = client_with(service, config);
    let layout = LayoutConfig::default();

    let first = analyze_page(&client, &reference(), PageWords::new(1, Vec::new()), &layout).await;
    let second = analyze_page(&client, &reference(), PageWords::new(2, Vec::new()), &layout).await;

    assert!(matches!(first.error, Some(PageError::AnalysisFailed { page: 1, .. })));
    assert!(matches!(second.error, Some(PageError::CircuitOpen { page: 2 })));
}

// ── Translation ──────────────────────────────────────────────────────────────

fn texts_of(body: &Option<Value>) -> Vec<String> {
    body.as_ref()
        .and_then(|b| b["texts"].as_array().cloned())
        .unwrap_or_default()
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn batch_translation_keeps_order_under_a_concurrency_cap() {
    let service = Arc::new(
        MockService::new(|_, body| {
            let out: Vec<String> = texts_of(body).iter().map(|t| t.to_uppercase()).collect();
            Ok(json!({"success": true, "translations": out, "processing_time": 0.01}))
        })
        // The first chunk is the slowest, so completion order differs from
        // input order.
        .with_delay(|_, body| {
            if texts_of(body).first().map(String::as_str) == Some("t0") {
                Duration::from_millis(200)
            } else {
                Duration::from_millis(20)
            }
        }),
    );
    let config = ClientConfig::builder()
        .batch_size(2)
        .concurrency(2)
        .build()
        .unwrap();
    let client = client_with(Arc::clone(&service), config);

    let texts: Vec<String> = (0..9).map(|i| format!("t{i}")).collect();
    let out = assert_ok!(client.translate_batch(&texts, "en", "de").await);

    let expected: Vec<String> = texts.iter().map(|t| t.to_uppercase()).collect();
    assert_eq!(out, expected);
    assert_eq!(service.calls(), 5);
    assert_eq!(service.max_in_flight.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn single_translation() {
    let service = Arc::new(MockService::new(|route, body| {
        assert_eq!(route, Route::Translate);
        let text = body.as_ref().map(|b| b["text"].clone()).unwrap_or(Value::Null);
        assert_eq!(text, json!("Hello"));
        Ok(json!({"success": true, "translation": "Bonjour", "processing_time": 0.02}))
    }));
    let client = default_client(service);
    assert_eq!(assert_ok!(client.translate("Hello", "en", "fr").await), "Bonjour");
}

// ── Documents ────────────────────────────────────────────────────────────────

fn page_subset(body: &Option<Value>) -> Option<u64> {
    body.as_ref()?.get("page_subset")?.get(0)?.as_u64()
}

fn document_service(failing_page: u64) -> Arc<MockService> {
    Arc::new(MockService::new(move |_, body| {
        let page = page_subset(body).unwrap_or(1);
        if page == failing_page {
            return Err(TransportError::Status {
                status: 422,
                body: "unreadable page".into(),
            });
        }
        Ok(json!({
            "success": true,
            "results": [{"bbox": [0, 0, 600, 100], "class_name": "Text", "score": 0.9, "page": page}],
            "processing_time": 0.01
        }))
    }))
}

fn document_pages(n: usize) -> Vec<PageWords> {
    (1..=n)
        .map(|p| PageWords::new(p, vec![word(&format!("page{p}"), [10.0, 10.0, 60.0, 20.0])]))
        .collect()
}

#[derive(Default)]
struct Tally {
    started: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl ConversionProgressCallback for Tally {
    fn on_conversion_start(&self, total_pages: usize) {
        self.started.store(total_pages, Ordering::SeqCst);
    }
    fn on_page_complete(&self, _page_num: usize, _total_pages: usize, _markdown_len: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_error(&self, _page_num: usize, _total_pages: usize, _error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn document_keeps_going_past_a_failed_page() {
    let client = default_client(document_service(2));
    let config = LayoutConfig::builder()
        .page_separator(PageSeparator::Comment)
        .concurrency(3)
        .build()
        .unwrap();
    let tally = Arc::new(Tally::default());
    let progress: ProgressCallback = tally.clone();

    let doc = assert_ok!(
        analyze_document(&client, &reference(), document_pages(3), &config, Some(&progress)).await
    );

    let nums: Vec<usize> = doc.pages.iter().map(|p| p.page_num).collect();
    assert_eq!(nums, vec![1, 2, 3]);
    assert!(matches!(
        doc.pages[1].error,
        Some(PageError::AnalysisFailed { page: 2, .. })
    ));
    assert_eq!(doc.markdown, "page1\n\n<!-- page 3 -->\n\npage3");
    assert_eq!(doc.stats.processed_pages, 2);
    assert_eq!(doc.stats.failed_pages, 1);
    assert_eq!(doc.stats.layout_items, 2);

    assert_eq!(tally.started.load(Ordering::SeqCst), 3);
    assert_eq!(tally.completed.load(Ordering::SeqCst), 2);
    assert_eq!(tally.failed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn page_selection_limits_requests() {
    let service = document_service(0);
    let client = default_client(Arc::clone(&service));
    let config = LayoutConfig::builder()
        .pages(PageSelection::Set(vec![2, 4]))
        .build()
        .unwrap();

    let doc = assert_ok!(analyze_document(&client, &reference(), document_pages(4), &config, None).await);
    assert_eq!(service.calls(), 2);
    assert_eq!(doc.stats.total_pages, 4);
    assert_eq!(doc.stats.selected_pages, 2);
    assert!(doc.markdown.contains("page2") && doc.markdown.contains("page4"));
    assert!(!doc.markdown.contains("page1"));
}

#[tokio::test]
async fn empty_selection_is_rejected() {
    let client = default_client(document_service(0));
    let config = LayoutConfig::builder()
        .pages(PageSelection::Single(9))
        .build()
        .unwrap();

    let err = assert_err!(analyze_document(&client, &reference(), document_pages(2), &config, None).await);
    assert!(matches!(err, LayoutError::EmptyPageSelection { total: 2 }));
}

fn numbered_pages(nums: &[usize]) -> Vec<PageWords> {
    nums.iter()
        .map(|&p| PageWords::new(p, vec![word(&format!("page{p}"), [10.0, 10.0, 60.0, 20.0])]))
        .collect()
}

#[tokio::test]
async fn non_contiguous_page_numbers_are_all_analysed() {
    let service = document_service(0);
    let client = default_client(Arc::clone(&service));

    let doc = assert_ok!(
        analyze_document(&client, &reference(), numbered_pages(&[2, 3]), &LayoutConfig::default(), None)
            .await
    );
    let nums: Vec<usize> = doc.pages.iter().map(|p| p.page_num).collect();
    assert_eq!(nums, vec![2, 3]);
    assert_eq!(service.calls(), 2);
    assert_eq!(doc.markdown, "page2\n\npage3");

    let doc = assert_ok!(
        analyze_document(&client, &reference(), numbered_pages(&[3]), &LayoutConfig::default(), None)
            .await
    );
    assert_eq!(doc.markdown, "page3");
    assert_eq!(doc.stats.selected_pages, 1);
}

#[tokio::test]
async fn selection_matches_page_numbers_not_positions() {
    let service = document_service(0);
    let client = default_client(Arc::clone(&service));
    let config = LayoutConfig::builder()
        .pages(PageSelection::Range(5, 7))
        .build()
        .unwrap();

    let doc = assert_ok!(
        analyze_document(&client, &reference(), numbered_pages(&[1, 6, 9]), &config, None).await
    );
    assert_eq!(service.calls(), 1);
    assert_eq!(doc.stats.total_pages, 3);
    assert_eq!(doc.markdown, "page6");
}

#[tokio::test]
async fn page_zero_and_duplicates_are_skipped() {
    let service = document_service(0);
    let client = default_client(Arc::clone(&service));
    let mut pages = numbered_pages(&[0, 1, 1]);
    pages[2].words[0].text = "again".into();

    let doc = assert_ok!(
        analyze_document(&client, &reference(), pages, &LayoutConfig::default(), None).await
    );
    assert_eq!(service.calls(), 1);
    assert_eq!(doc.pages.len(), 1);
    assert_eq!(doc.markdown, "page1");
}

#[tokio::test]
async fn zero_page_concurrency_still_makes_progress() {
    let client = default_client(document_service(0));
    let config = LayoutConfig {
        concurrency: 0,
        ..LayoutConfig::default()
    };

    let doc = assert_ok!(analyze_document(&client, &reference(), document_pages(2), &config, None).await);
    assert_eq!(doc.stats.processed_pages, 2);
}

#[tokio::test]
async fn all_pages_failing_is_fatal() {
    let client = default_client(document_service(1));
    let err = assert_err!(
        analyze_document(&client, &reference(), document_pages(1), &LayoutConfig::default(), None).await
    );
    match err {
        LayoutError::AllPagesFailed { total, first_error } => {
            assert_eq!(total, 1);
            assert!(first_error.contains("unreadable page"), "got: {first_error}");
        }
        other => panic!("expected AllPagesFailed, got {other:?}"),
    }
}

// ── Detector contract ────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reported_labels_are_validated() {
    let mut swapped: Vec<&str> = DETECTOR_LABELS.to_vec();
    swapped.swap(3, 4);
    let labels = json!(swapped);
    let service = Arc::new(MockService::new(move |route, _| {
        assert_eq!(route, Route::Health);
        Ok(json!({"status": "ok", "services": {"layout": {"labels": labels.clone()}}}))
    }));
    let client = default_client(service);

    let health = assert_ok!(client.health_check().await);
    let reported = health.detector_labels().unwrap();
    let err = assert_err!(LabelTable::default().validate(&reported));
    assert!(matches!(err, LayoutError::LabelTableMismatch { index: 3, .. }));

    assert_ok!(LabelTable::default().validate(DETECTOR_LABELS));
}

// ── Live service ─────────────────────────────────────────────────────────────

/// Skip unless a live service was explicitly requested.
macro_rules! e2e_skip_unless_ready {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        match std::env::var("LAYOUT2MD_SERVICE_URL") {
            Ok(url) if !url.is_empty() => url,
            _ => {
                println!("SKIP: LAYOUT2MD_SERVICE_URL is not set");
                return;
            }
        }
    }};
}

#[tokio::test]
async fn live_service_health() {
    let url = e2e_skip_unless_ready!();
    let config = ClientConfig::builder().base_url(url).build().unwrap();
    let client = InferenceClient::new(config).unwrap();

    let health = client.health_check().await.expect("service should answer /health");
    println!("status={} services={:?}", health.status, health.services.keys());
    if let Some(labels) = health.detector_labels() {
        LabelTable::default()
            .validate(&labels)
            .expect("detector label order should match the built-in table");
    }
}
