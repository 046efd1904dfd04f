//! CLI binary for layout2md.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `LayoutConfig` / `ClientConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use layout2md::{
    analyze_document, page_to_markdown, write_markdown, ClientConfig, ConversionProgressCallback,
    ImageReference, InferenceClient, LabelTable, LayoutConfig, LayoutItem, PageSelection,
    PageSeparator, PageWords, ProgressCallback, Word,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished page. Pages may finish
/// out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Analysing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&page_num)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        self.bar.set_length(total_pages as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Analysing {total_pages} page(s)…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(page_num, Instant::now());
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, markdown_len: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{markdown_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} {} page(s) analysed",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} page(s) analysed  ({} failed)",
                if failed == total_pages { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Offline: detector output + words → Markdown
  layout2md assemble --layout page1.layout.json --words page1.words.json

  # Remote layout for a document the service can read
  layout2md analyze /shared/paper.pdf --words paper.words.json -o paper.md

  # Send a local page image inline
  layout2md analyze scan.png --inline --words scan.words.json

  # Translate
  layout2md translate --from en --to de "Hello world"
  cat sentences.txt | layout2md translate --from en --to fr --batch

  # Service and circuit status
  layout2md health

INPUT FORMATS:
  layout JSON  [{"bbox": [x1, y1, x2, y2], "class_name": "Title", "score": 0.93}, …]
  words JSON   [{"text": "Hello", "bbox": [x1, y1, x2, y2]}, …]
               or, per page: [{"page": 1, "words": [ … ]}, …]

ENVIRONMENT VARIABLES:
  LAYOUT2MD_SERVICE_URL        Inference service base URL (default http://127.0.0.1:8001)
  LAYOUT2MD_MAX_RETRIES        Retries after the first attempt (default 1)
  LAYOUT2MD_FAILURE_THRESHOLD  Consecutive failures that open the circuit (default 5)
  LAYOUT2MD_RECOVERY_TIMEOUT   Seconds the circuit stays open (default 60)
  RUST_LOG                     Overrides --verbose / --quiet
"#;

/// Reconstruct Markdown from document layout detections.
#[derive(Parser, Debug)]
#[command(
    name = "layout2md",
    version,
    about = "Reconstruct Markdown from document layout detections",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "LAYOUT2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "LAYOUT2MD_QUIET")]
    quiet: bool,

    /// Print structured JSON instead of Markdown / text.
    #[arg(long, global = true, env = "LAYOUT2MD_JSON")]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build Markdown from layout and words files without calling the service.
    Assemble(AssembleArgs),
    /// Detect layout remotely, then build Markdown from the words file.
    Analyze(AnalyzeArgs),
    /// Translate text through the service.
    Translate(TranslateArgs),
    /// Check the service and print circuit-breaker state.
    Health(ServiceArgs),
}

#[derive(Args, Debug, Clone)]
struct ServiceArgs {
    /// Inference service base URL.
    #[arg(long, env = "LAYOUT2MD_SERVICE_URL")]
    service_url: Option<String>,

    /// Retries after the first attempt of a call.
    #[arg(long, env = "LAYOUT2MD_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Per-attempt timeout in seconds.
    #[arg(long, env = "LAYOUT2MD_TIMEOUT", default_value_t = 30)]
    timeout: u64,
}

#[derive(Args, Debug)]
struct AssemblyArgs {
    /// Fraction of the page width at which a block spans both columns.
    #[arg(long, default_value_t = 0.7)]
    span_ratio: f32,

    /// Pixels a block is grown by when matching word centroids.
    #[arg(long, default_value_t = 5.0)]
    word_margin: f32,

    /// Vertical bucket size for grouping words into lines.
    #[arg(long, default_value_t = 5.0)]
    line_tolerance: f32,
}

#[derive(Args, Debug)]
struct AssembleArgs {
    /// Layout items JSON.
    #[arg(long)]
    layout: PathBuf,

    /// Words JSON (single page).
    #[arg(long)]
    words: Option<PathBuf>,

    /// Write Markdown to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    assembly: AssemblyArgs,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Image or document reference resolved by the service, or a local image
    /// with `--inline`.
    input: String,

    /// Words JSON, single page or per page.
    #[arg(long)]
    words: Option<PathBuf>,

    /// Read `input` locally and send it as a base64 PNG.
    #[arg(long)]
    inline: bool,

    /// Page count when no words file is given.
    #[arg(long, default_value_t = 1)]
    page_count: usize,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "LAYOUT2MD_PAGES", default_value = "all")]
    pages: String,

    /// Page separator: none, hr, comment, or custom string.
    #[arg(long, env = "LAYOUT2MD_SEPARATOR", default_value = "none")]
    separator: String,

    /// Pages analysed concurrently.
    #[arg(short, long, env = "LAYOUT2MD_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Disable progress bar.
    #[arg(long, env = "LAYOUT2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Write Markdown to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    assembly: AssemblyArgs,

    #[command(flatten)]
    service: ServiceArgs,
}

#[derive(Args, Debug)]
struct TranslateArgs {
    /// Texts to translate; read from stdin when omitted.
    text: Vec<String>,

    /// Source language code.
    #[arg(long = "from")]
    source_lang: String,

    /// Target language code.
    #[arg(long = "to")]
    target_lang: String,

    /// Translate every input line separately via the batch endpoint.
    #[arg(long)]
    batch: bool,

    #[command(flatten)]
    service: ServiceArgs,
}

/// Words file: one page as a flat list, or several pages.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WordsFile {
    Pages(Vec<PageEntry>),
    Single(Vec<Word>),
}

#[derive(Debug, Deserialize)]
struct PageEntry {
    page: usize,
    words: Vec<Word>,
}

impl WordsFile {
    fn into_pages(self) -> Vec<PageWords> {
        match self {
            WordsFile::Pages(pages) if !pages.is_empty() => pages
                .into_iter()
                .map(|p| PageWords::new(p.page, p.words))
                .collect(),
            WordsFile::Pages(_) => vec![PageWords::new(1, Vec::new())],
            WordsFile::Single(words) => vec![PageWords::new(1, words)],
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The progress bar is the feedback during `analyze`; keep library INFO
    // logs out of its way unless asked for.
    let show_progress = matches!(&cli.command, Command::Analyze(a) if !a.no_progress)
        && !cli.quiet
        && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Assemble(ref args) => run_assemble(args, cli.json).await,
        Command::Analyze(ref args) => run_analyze(args, cli.json, cli.quiet, show_progress).await,
        Command::Translate(ref args) => run_translate(args, cli.json).await,
        Command::Health(ref args) => run_health(args, cli.json).await,
    }
}

async fn run_assemble(args: &AssembleArgs, json: bool) -> Result<()> {
    let items: Vec<LayoutItem> = read_json(&args.layout).await?;
    let words = match args.words {
        Some(ref path) => {
            let file: WordsFile = read_json(path).await?;
            let mut pages = file.into_pages();
            if pages.len() > 1 {
                warn!("assemble takes one page; using page {}", pages[0].page_num);
            }
            pages.swap_remove(0).words
        }
        None => Vec::new(),
    };

    let config = build_layout_config(&args.assembly, LayoutConfig::builder())?;
    let markdown = page_to_markdown(&items, &words, &config.assembly);

    if json {
        let out = serde_json::json!({ "markdown": markdown, "layout_items": items });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    emit_markdown(&markdown, args.output.as_deref()).await
}

async fn run_analyze(args: &AnalyzeArgs, json: bool, quiet: bool, show_progress: bool) -> Result<()> {
    let client = build_client(&args.service, args.concurrency)?;
    validate_labels(&client).await?;

    let pages = match args.words {
        Some(ref path) => read_json::<WordsFile>(path).await?.into_pages(),
        None => (1..=args.page_count.max(1))
            .map(|n| PageWords::new(n, Vec::new()))
            .collect(),
    };

    let reference = if args.inline {
        let path = PathBuf::from(&args.input);
        let img = tokio::task::spawn_blocking(move || image::open(&path))
            .await
            .context("Image decoding task panicked")?
            .with_context(|| format!("Failed to open image '{}'", args.input))?;
        layout2md::pipeline::encode::encode_image(&img).context("Failed to encode image")?
    } else {
        ImageReference::Path(args.input.clone())
    };

    let builder = LayoutConfig::builder()
        .concurrency(args.concurrency)
        .pages(parse_pages(&args.pages)?)
        .page_separator(parse_separator(&args.separator));
    let config = build_layout_config(&args.assembly, builder)?;

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };

    let output = analyze_document(&client, &reference, pages, &config, progress.as_ref())
        .await
        .context("Analysis failed")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialise output")?
        );
    } else {
        emit_markdown(&output.markdown, args.output.as_deref()).await?;
    }

    if !quiet && !show_progress && !json {
        eprintln!(
            "Analysed {}/{} page(s) in {}ms",
            output.stats.processed_pages, output.stats.selected_pages, output.stats.total_duration_ms
        );
        if output.stats.failed_pages > 0 {
            eprintln!("  {} page(s) failed", output.stats.failed_pages);
        }
    }
    Ok(())
}

async fn run_translate(args: &TranslateArgs, json: bool) -> Result<()> {
    let client = build_client(&args.service, 4)?;

    let texts: Vec<String> = if args.text.is_empty() {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        if args.batch {
            buf.lines()
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string)
                .collect()
        } else {
            vec![buf.trim().to_string()]
        }
    } else {
        args.text.clone()
    };

    let translations = if args.batch || texts.len() > 1 {
        client
            .translate_batch(&texts, &args.source_lang, &args.target_lang)
            .await
            .context("Translation failed")?
    } else {
        let text = texts.first().map(String::as_str).unwrap_or_default();
        vec![client
            .translate(text, &args.source_lang, &args.target_lang)
            .await
            .context("Translation failed")?]
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&translations)?);
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        for line in &translations {
            writeln!(handle, "{line}").context("Failed to write to stdout")?;
        }
    }
    Ok(())
}

async fn run_health(args: &ServiceArgs, json: bool) -> Result<()> {
    let client = build_client(args, 1)?;
    let result = client.health_check().await;
    let breaker = client.breaker_state();

    if json {
        let out = match &result {
            Ok(h) => serde_json::json!({ "health": h, "breaker": breaker }),
            Err(e) => serde_json::json!({ "error": e.to_string(), "breaker": breaker }),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Service:      {}", client.config().base_url);
        match &result {
            Ok(h) => {
                let mark = if h.is_healthy() { green("●") } else { cyan("●") };
                println!("Status:       {} {}", mark, h.status);
                for (name, state) in &h.services {
                    println!("  {:<12}{}", name, dim(&state.to_string()));
                }
            }
            Err(e) => println!("Status:       {} {}", red("●"), e),
        }
        println!(
            "Circuit:      {}  ({}/{} failures)",
            if breaker.open { red("open") } else { green("closed") },
            breaker.failure_count,
            breaker.failure_threshold
        );
    }

    let health = result.context("Health check failed")?;
    if let Some(labels) = health.detector_labels() {
        LabelTable::default()
            .validate(&labels)
            .context("Detector label order does not match the built-in table")?;
    }
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Environment defaults, then explicit flags.
fn build_client(args: &ServiceArgs, concurrency: usize) -> Result<InferenceClient> {
    let env = ClientConfig::from_env().context("Invalid LAYOUT2MD_* environment")?;
    let mut builder = ClientConfig::builder()
        .base_url(args.service_url.clone().unwrap_or(env.base_url))
        .max_retries(args.max_retries.unwrap_or(env.max_retries))
        .failure_threshold(env.failure_threshold)
        .recovery_timeout_secs(env.recovery_timeout_secs)
        .request_timeout_secs(args.timeout)
        .concurrency(concurrency);
    if args.timeout < env.health_timeout_secs {
        builder = builder.health_timeout_secs(args.timeout);
    }
    let config = builder.build().context("Invalid client configuration")?;
    InferenceClient::new(config).context("Failed to create inference client")
}

/// Fail fast when the service reports a label order we would misread.
/// An unreachable service is only a warning here; the analysis reports it.
async fn validate_labels(client: &InferenceClient) -> Result<()> {
    match client.health_check().await {
        Ok(health) => {
            if let Some(labels) = health.detector_labels() {
                LabelTable::default()
                    .validate(&labels)
                    .context("Detector label order does not match the built-in table")?;
            }
        }
        Err(e) => warn!("Health check failed, continuing: {e}"),
    }
    Ok(())
}

fn build_layout_config(
    args: &AssemblyArgs,
    builder: layout2md::LayoutConfigBuilder,
) -> Result<LayoutConfig> {
    builder
        .span_ratio(args.span_ratio)
        .word_margin(args.word_margin)
        .line_tolerance(args.line_tolerance)
        .build()
        .context("Invalid configuration")
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse '{}'", path.display()))
}

async fn emit_markdown(markdown: &str, output: Option<&Path>) -> Result<()> {
    if let Some(path) = output {
        write_markdown(path, markdown)
            .await
            .context("Failed to write output")?;
        return Ok(());
    }
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(markdown.as_bytes())
        .context("Failed to write to stdout")?;
    if !markdown.ends_with('\n') {
        handle.write_all(b"\n").ok();
    }
    Ok(())
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();
    if s == "all" {
        return Ok(PageSelection::All);
    }

    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start.trim().parse().context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;
        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {start})");
        }
        if start > end {
            anyhow::bail!("Invalid page range '{start}-{end}': start must be <= end");
        }
        return Ok(PageSelection::Range(start, end));
    }

    if s.contains(',') {
        let pages = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;
        if let Some(&p) = pages.iter().find(|&&p| p < 1) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {p})");
        }
        return Ok(PageSelection::Set(pages));
    }

    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {page})");
    }
    Ok(PageSelection::Single(page))
}

/// Parse `--separator` string into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "none" => PageSeparator::None,
        "hr" | "---" => PageSeparator::HorizontalRule,
        "comment" => PageSeparator::Comment,
        _ => PageSeparator::Custom(s.to_string()),
    }
}
