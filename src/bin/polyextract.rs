//! CLI binary for polyextract.
//!
//! A thin shim over the library crate: reads one configuration JSON object,
//! maps CLI flags to `ExtractionConfig`, prints exactly one JSON result on
//! stdout. Logs and progress go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use polyextract::{
    BackendId, CascadeObserver, Capability, ContentKind, ExtractionConfig, ExtractionRequest,
    Extractor, ObserverHandle, PolyExtractError, Target, UnifiedResult,
};
use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress observer using indicatif ────────────────────────────────────

/// Spinner plus one log line per cascade attempt, on stderr.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Resolving");
        bar.set_message("input…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl CascadeObserver for CliObserver {
    fn on_cascade_start(&self, kind: ContentKind, candidates: &[BackendId]) {
        let names: Vec<&str> = candidates.iter().map(BackendId::as_str).collect();
        self.bar.println(format!(
            "{} {} content, candidates: {}",
            cyan("◆"),
            kind,
            names.join(" → ")
        ));
        self.bar.set_prefix("Extracting");
    }

    fn on_backend_skipped(&self, backend: BackendId, missing: Capability) {
        self.bar.println(format!(
            "  {} {:<12} {}",
            dim("○"),
            backend.as_str(),
            dim(&format!("skipped, {missing} unavailable"))
        ));
    }

    fn on_backend_start(&self, backend: BackendId, retry: bool) {
        if retry {
            self.bar.set_message(format!("{backend} (retry)"));
        } else {
            self.bar.set_message(backend.to_string());
        }
    }

    fn on_backend_succeeded(&self, backend: BackendId) {
        self.bar
            .println(format!("  {} {}", green("✓"), backend.as_str()));
    }

    fn on_backend_failed(&self, backend: BackendId, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<12} {}",
            red("✗"),
            backend.as_str(),
            red(&msg)
        ));
    }

    fn on_cascade_complete(&self, success: bool, degraded: bool) {
        self.bar.finish_and_clear();
        match (success, degraded) {
            (true, false) => eprintln!("{} extraction succeeded", green("✔")),
            (true, true) => eprintln!("{} extraction succeeded (degraded)", cyan("⚠")),
            (false, _) => eprintln!("{} extraction failed", red("✘")),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # A local file, shorthand for {"target": "report.pdf"}
  polyextract report.pdf

  # Full configuration object
  polyextract '{"target": "https://example.com/a.pdf", "options": {"prefer_tables": true}}'

  # From a file or stdin
  polyextract --config request.json
  echo '{"url": "https://example.com"}' | polyextract

  # Which backends are usable here?
  polyextract --probe --pretty

EXIT STATUS:
  0  the result has success=true
  1  the result has success=false (the JSON result is still printed)
  2  invalid command line

ENVIRONMENT VARIABLES:
  RUST_LOG                       Log filter, overrides --verbose/--quiet
  PDFIUM_LIB_PATH                Path to libpdfium for the in-process PDF backend
  POLYEXTRACT_DOWNLOAD_TIMEOUT   Download timeout in seconds
  POLYEXTRACT_TOOL_TIMEOUT       Per-backend timeout in seconds
"#;

/// Extract content from documents and web pages through whichever backends are installed.
#[derive(Parser, Debug)]
#[command(
    name = "polyextract",
    version,
    about = "Extract content from documents and web pages through whichever backends are installed",
    long_about = "Reads one configuration JSON object (argument, --config file, or stdin), \
tries the extraction backends available on this machine in priority order, and prints one \
unified JSON result on stdout.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Configuration JSON object, or a bare URL / file path.
    request: Option<String>,

    /// Read the configuration JSON object from this file.
    #[arg(short, long, env = "POLYEXTRACT_CONFIG", conflicts_with = "request")]
    config: Option<PathBuf>,

    /// Content type hint used with a bare URL / path (pdf, image, html, …).
    #[arg(long)]
    hint: Option<String>,

    /// Print the capability report instead of extracting.
    #[arg(long)]
    probe: bool,

    /// Pretty-print the JSON output.
    #[arg(long, env = "POLYEXTRACT_PRETTY")]
    pretty: bool,

    /// Show a progress spinner and per-backend lines on stderr.
    #[arg(long, env = "POLYEXTRACT_PROGRESS")]
    progress: bool,

    /// Treat a capability as unavailable (repeatable).
    #[arg(long = "disable", value_name = "CAPABILITY", value_parser = parse_capability)]
    disabled: Vec<Capability>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "POLYEXTRACT_VERBOSE")]
    verbose: bool,

    /// Suppress all logs except errors.
    #[arg(short, long, env = "POLYEXTRACT_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "POLYEXTRACT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-backend subprocess timeout in seconds.
    #[arg(long, env = "POLYEXTRACT_TOOL_TIMEOUT", default_value_t = 300)]
    tool_timeout: u64,

    /// Python interpreter used to probe optional Python features.
    #[arg(long, env = "POLYEXTRACT_PYTHON", default_value = "python3")]
    python: String,

    /// Path to the PDFium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Largest binary payload (figures, screenshot) kept in the result, in bytes.
    #[arg(long, env = "POLYEXTRACT_MAX_BINARY_BYTES", default_value_t = 5 * 1024 * 1024)]
    max_binary_bytes: usize,

    /// Character cap for the minimal text scrapes.
    #[arg(long, env = "POLYEXTRACT_MAX_SCRAPE_CHARS", default_value_t = 10_000)]
    max_scrape_chars: usize,
}

fn parse_capability(s: &str) -> Result<Capability, String> {
    Capability::from_name(s).ok_or_else(|| {
        let names: Vec<&str> = Capability::ALL.iter().map(Capability::as_str).collect();
        format!("unknown capability '{s}' (expected one of: {})", names.join(", "))
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Warnings only by default; the attempt log is in the result anyway.
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || cli.progress {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let observer: Option<ObserverHandle> = if cli.progress && !cli.quiet && !cli.probe {
        Some(CliObserver::new() as Arc<dyn CascadeObserver>)
    } else {
        None
    };

    // ── Probe mode ───────────────────────────────────────────────────────
    if cli.probe {
        match setup(&cli, None).await {
            Ok(extractor) => print_json(extractor.capabilities(), cli.pretty)?,
            Err(e) => {
                print_json(&UnifiedResult::from_error(&e), cli.pretty)?;
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    // ── Run extraction ───────────────────────────────────────────────────
    let result = run(&cli, observer).await;
    print_json(&result, cli.pretty)?;
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

/// Read the request, build the extractor and run it. Every failure on the
/// way becomes a `success=false` result, so stdout always gets one.
async fn run(cli: &Cli, observer: Option<ObserverHandle>) -> UnifiedResult {
    let request = match read_request(cli).and_then(|raw| parse_request(&raw, cli.hint.as_deref())) {
        Ok(request) => request,
        Err(e) => return UnifiedResult::from_error(&e),
    };
    match setup(cli, observer).await {
        Ok(extractor) => extractor.extract(&request).await,
        Err(e) => UnifiedResult::from_error(&e),
    }
}

async fn setup(cli: &Cli, observer: Option<ObserverHandle>) -> Result<Extractor, PolyExtractError> {
    let config = build_config(cli, observer)?;
    Extractor::probed(config).await
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(
    cli: &Cli,
    observer: Option<ObserverHandle>,
) -> Result<ExtractionConfig, PolyExtractError> {
    let mut builder = ExtractionConfig::builder()
        .download_timeout_secs(cli.download_timeout)
        .tool_timeout_secs(cli.tool_timeout)
        .python(cli.python.clone())
        .max_binary_bytes(cli.max_binary_bytes)
        .max_scrape_chars(cli.max_scrape_chars);
    if let Some(ref path) = cli.pdfium_lib {
        builder = builder.pdfium_library_path(path);
    }
    for cap in &cli.disabled {
        builder = builder.disable(*cap);
    }
    if let Some(o) = observer {
        builder = builder.observer(o);
    }
    builder.build()
}

/// The request text: positional argument, `--config` file, or stdin.
fn read_request(cli: &Cli) -> Result<String, PolyExtractError> {
    if let Some(ref request) = cli.request {
        return Ok(request.clone());
    }
    if let Some(ref path) = cli.config {
        return std::fs::read_to_string(path).map_err(|e| {
            PolyExtractError::Configuration(format!(
                "cannot read configuration from {}: {e}",
                path.display()
            ))
        });
    }
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Err(PolyExtractError::Configuration(
            "no request given: pass a JSON object, a path or URL, --config <file>, or pipe JSON on stdin"
                .to_string(),
        ));
    }
    let mut buf = String::new();
    stdin.lock().read_to_string(&mut buf).map_err(|e| {
        PolyExtractError::Configuration(format!("cannot read configuration from stdin: {e}"))
    })?;
    Ok(buf)
}

/// A JSON object is a full configuration; anything else is a bare target.
fn parse_request(raw: &str, hint: Option<&str>) -> Result<ExtractionRequest, PolyExtractError> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        let mut request = ExtractionRequest::from_json(trimmed)?;
        if request.content_type_hint.is_none() {
            request.content_type_hint = hint.map(str::to_string);
        }
        return Ok(request);
    }
    if trimmed.is_empty() {
        return Err(PolyExtractError::MissingTarget);
    }
    let mut request = ExtractionRequest::new(Target::parse(trimmed));
    if let Some(h) = hint {
        request = request.with_hint(h);
    }
    Ok(request)
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .context("Failed to serialise output")?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{json}").context("Failed to write to stdout")?;
    handle.flush().context("Failed to flush stdout")?;
    Ok(())
}
