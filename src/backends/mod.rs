//! Backend adapters: one per extraction backend family.
//!
//! Every adapter implements [`Backend`]: it declares the capabilities it
//! needs, translates the generic [`Options`] bag into native parameters,
//! runs the backend with its diagnostics captured, and returns either a
//! [`RawBackendOutput`] or a classified [`AdapterError`]. Each adapter module
//! also owns the pure mapping function that turns its raw output into a
//! [`crate::output::UnifiedResult`].
//!
//! ## Families
//!
//! | Module | Backends | Runs as |
//! |--------|----------|---------|
//! | [`pdfplumber`] | `pdfplumber` | Python subprocess |
//! | [`pdfium`] | `pdfium` | in-process, `spawn_blocking` |
//! | [`pdftotext`] | `pdftotext` | subprocess |
//! | [`docling`] | `docling` | subprocess |
//! | [`tesseract`] | `tesseract` | subprocess |
//! | [`crawler`] | `crawler` | subprocess |
//! | [`scrape`] | `lopdf`, `html-scrape`, `text-scrape`, `image-probe` | in-process |

pub mod crawler;
pub mod docling;
pub mod pdfium;
pub mod pdfplumber;
pub mod pdftotext;
pub mod scrape;
pub mod tesseract;

use crate::capability::{Capabilities, Capability};
use crate::config::Options;
use crate::error::AdapterError;
use crate::pipeline::input::ResolvedInput;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Identifier of one backend adapter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum BackendId {
    Pdfplumber,
    Pdfium,
    Pdftotext,
    Docling,
    Tesseract,
    Crawler,
    Lopdf,
    HtmlScrape,
    TextScrape,
    ImageProbe,
}

impl BackendId {
    pub const ALL: [BackendId; 10] = [
        BackendId::Pdfplumber,
        BackendId::Pdfium,
        BackendId::Pdftotext,
        BackendId::Docling,
        BackendId::Tesseract,
        BackendId::Crawler,
        BackendId::Lopdf,
        BackendId::HtmlScrape,
        BackendId::TextScrape,
        BackendId::ImageProbe,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendId::Pdfplumber => "pdfplumber",
            BackendId::Pdfium => "pdfium",
            BackendId::Pdftotext => "pdftotext",
            BackendId::Docling => "docling",
            BackendId::Tesseract => "tesseract",
            BackendId::Crawler => "crawler",
            BackendId::Lopdf => "lopdf",
            BackendId::HtmlScrape => "html-scrape",
            BackendId::TextScrape => "text-scrape",
            BackendId::ImageProbe => "image-probe",
        }
    }

    /// Parse a backend name as used in the `backends` option. Accepts the
    /// original wrapper names as aliases.
    pub fn from_name(name: &str) -> Option<BackendId> {
        let n = name.trim().to_ascii_lowercase().replace('_', "-");
        let id = match n.as_str() {
            "crawl4ai" | "crwl" => BackendId::Crawler,
            "deepdoctection" => BackendId::Docling,
            "poppler" => BackendId::Pdftotext,
            other => return BackendId::ALL.into_iter().find(|b| b.as_str() == other),
        };
        Some(id)
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata a PDF text backend can report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PdfInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    pub producer: Option<String>,
    pub version: Option<String>,
}

/// One recognised word from an OCR backend.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub page: u32,
    pub block: u32,
    pub paragraph: u32,
    pub line: u32,
    pub text: String,
    /// 0–100 as reported by the engine.
    pub confidence: f64,
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// Raw, backend-native output before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawBackendOutput {
    /// Document-converter JSON plus the markdown and HTML it rendered
    /// alongside.
    Docling {
        document: Value,
        markdown: Option<String>,
        html: Option<String>,
    },
    /// The crawler's JSON result (object, or list whose first item is used).
    Crawler(Value),
    /// Per-page text and table grids from the table-aware PDF extractor.
    Pdfplumber(Value),
    /// Per-page plain text from a PDF text extractor.
    PdfPages { pages: Vec<String>, info: PdfInfo },
    /// OCR words with boxes.
    OcrWords(Vec<OcrWord>),
    /// Minimal text scrape.
    Scraped {
        text: String,
        html: Option<String>,
        title: Option<String>,
        truncated: bool,
    },
    /// Decoded image summary and a PNG thumbnail.
    Image {
        width: u32,
        height: u32,
        format: String,
        thumbnail_png: Vec<u8>,
    },
}

impl RawBackendOutput {
    /// Whether the output carries anything worth keeping.
    ///
    /// Output whose shape is not recognised counts as content, so that the
    /// normalizer reports it instead of the cascade passing over it.
    pub fn has_content(&self) -> bool {
        match self {
            RawBackendOutput::Docling {
                document, markdown, ..
            } => {
                if markdown.as_deref().is_some_and(|m| !m.trim().is_empty()) {
                    return true;
                }
                let Some(doc) = document.as_object() else {
                    return true;
                };
                let non_empty = |key: &str| {
                    doc.get(key)
                        .and_then(Value::as_array)
                        .is_some_and(|a| !a.is_empty())
                };
                let has_text = doc
                    .get("texts")
                    .and_then(Value::as_array)
                    .is_some_and(|texts| {
                        texts.iter().any(|t| {
                            t.get("text")
                                .and_then(Value::as_str)
                                .is_some_and(|s| !s.trim().is_empty())
                        })
                    });
                has_text || non_empty("tables") || non_empty("pictures")
            }
            RawBackendOutput::Crawler(value) => {
                let item = match value {
                    Value::Array(items) => match items.first() {
                        Some(first) => first,
                        None => return true,
                    },
                    other => other,
                };
                let Some(obj) = item.as_object() else {
                    return true;
                };
                let filled = |v: &Value| match v {
                    Value::String(s) => !s.trim().is_empty(),
                    Value::Object(m) => m.values().any(|v| v.as_str().is_some_and(|s| !s.trim().is_empty())),
                    Value::Null => false,
                    _ => true,
                };
                ["markdown", "cleaned_html", "html", "extracted_content"]
                    .iter()
                    .filter_map(|k| obj.get(*k))
                    .any(filled)
            }
            RawBackendOutput::Pdfplumber(value) => {
                let Some(pages) = value.get("pages").and_then(Value::as_array) else {
                    return true;
                };
                pages.iter().any(|p| {
                    p.get("text")
                        .and_then(Value::as_str)
                        .is_some_and(|s| !s.trim().is_empty())
                        || p.get("tables")
                            .and_then(Value::as_array)
                            .is_some_and(|t| !t.is_empty())
                })
            }
            RawBackendOutput::PdfPages { pages, .. } => pages.iter().any(|p| !p.trim().is_empty()),
            RawBackendOutput::OcrWords(words) => words.iter().any(|w| !w.text.trim().is_empty()),
            RawBackendOutput::Scraped { text, .. } => !text.trim().is_empty(),
            RawBackendOutput::Image { .. } => true,
        }
    }
}

/// Per-invocation context handed to every adapter.
#[derive(Debug, Clone)]
pub struct BackendContext {
    pub capabilities: Arc<Capabilities>,
    pub tool_timeout: Duration,
    pub max_scrape_chars: usize,
    /// Interpreter for backends that run Python code directly.
    pub python: String,
}

impl BackendContext {
    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.is_available(capability)
    }
}

/// Trait implemented by every extraction backend adapter.
#[async_trait]
pub trait Backend: Send + Sync {
    fn id(&self) -> BackendId;

    /// Capabilities that must all be available before the cascade calls
    /// [`Backend::invoke`].
    fn required_capabilities(&self) -> &[Capability];

    /// Run the backend on one resolved input.
    async fn invoke(
        &self,
        input: &ResolvedInput,
        options: &Options,
        ctx: &BackendContext,
    ) -> Result<RawBackendOutput, AdapterError>;
}

/// The built-in adapter set, keyed by identifier.
pub fn default_backends() -> BTreeMap<BackendId, Arc<dyn Backend>> {
    let all: Vec<Arc<dyn Backend>> = vec![
        Arc::new(pdfplumber::PdfplumberBackend),
        Arc::new(pdfium::PdfiumBackend),
        Arc::new(pdftotext::PdftotextBackend),
        Arc::new(docling::DoclingBackend),
        Arc::new(tesseract::TesseractBackend),
        Arc::new(crawler::CrawlerBackend),
        Arc::new(scrape::LopdfBackend),
        Arc::new(scrape::HtmlScrapeBackend),
        Arc::new(scrape::TextScrapeBackend),
        Arc::new(scrape::ImageProbeBackend),
    ];
    all.into_iter().map(|b| (b.id(), b)).collect()
}

// ── Subprocess plumbing ──────────────────────────────────────────────────

/// Captured output of a finished tool run.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Permanent failure describing a non-zero exit.
    pub fn exit_failure(&self, backend: BackendId) -> AdapterError {
        let tail = stderr_tail(&self.stderr);
        if tail.is_empty() {
            AdapterError::permanent(backend, format!("exited with {}", self.status))
        } else {
            AdapterError::permanent(backend, format!("exited with {}: {tail}", self.status))
        }
    }
}

/// Run one external tool with captured output, the quiet environment and
/// the per-tool timeout. The child is killed if the timeout expires.
pub async fn run_tool(
    backend: BackendId,
    program: &str,
    args: Vec<OsString>,
    ctx: &BackendContext,
) -> Result<ToolOutput, AdapterError> {
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    ctx.capabilities.environment().apply(&mut cmd);

    debug!("Running {} {:?}", program, args);

    let output = match tokio::time::timeout(ctx.tool_timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AdapterError::permanent(
                backend,
                format!("`{program}` not found on PATH"),
            ))
        }
        Ok(Err(e)) => {
            return Err(AdapterError::permanent(
                backend,
                format!("failed to start `{program}`: {e}"),
            ))
        }
        Err(_) => {
            return Err(AdapterError::permanent(
                backend,
                format!("timed out after {}s", ctx.tool_timeout.as_secs()),
            ))
        }
    };

    Ok(ToolOutput {
        status: output.status,
        stdout: output.stdout,
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// The last few meaningful stderr lines, bounded in length.
pub fn stderr_tail(stderr: &str) -> String {
    const MAX_LINES: usize = 4;
    const MAX_CHARS: usize = 600;

    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(MAX_LINES);
    let joined = lines[start..].join(" | ");
    if joined.chars().count() > MAX_CHARS {
        let tail: String = joined
            .chars()
            .rev()
            .take(MAX_CHARS)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("…{tail}")
    } else {
        joined
    }
}

static RE_NO_SUCH_OPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"No such option:?\s+'?(--?[A-Za-z0-9][A-Za-z0-9_-]*)").unwrap());

/// The flag named by a CLI usage error such as `Error: No such option: --ocr`.
pub fn rejected_flag(stderr: &str) -> Option<String> {
    RE_NO_SUCH_OPTION
        .captures(stderr)
        .map(|caps| caps[1].to_string())
}

/// Render an option value the way CLI tools expect it (`true`, `42`, `text`).
pub fn cli_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// JSON type name for shape errors.
pub(crate) fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_round_trip() {
        for id in BackendId::ALL {
            assert_eq!(BackendId::from_name(id.as_str()), Some(id));
        }
        assert_eq!(BackendId::from_name("HTML_SCRAPE"), Some(BackendId::HtmlScrape));
        assert_eq!(BackendId::from_name("crawl4ai"), Some(BackendId::Crawler));
        assert_eq!(BackendId::from_name("nope"), None);
    }

    #[test]
    fn backend_id_serialises_kebab_case() {
        let json = serde_json::to_string(&BackendId::ImageProbe).unwrap();
        assert_eq!(json, "\"image-probe\"");
    }

    #[test]
    fn default_set_covers_every_id() {
        let set = default_backends();
        for id in BackendId::ALL {
            assert_eq!(set.get(&id).map(|b| b.id()), Some(id));
        }
    }

    #[test]
    fn rejected_flag_parses_click_errors() {
        let stderr = "Usage: docling [OPTIONS] SOURCE\nTry 'docling --help' for help.\n\nError: No such option: --table-mode Did you mean --tables?";
        assert_eq!(rejected_flag(stderr).as_deref(), Some("--table-mode"));
        assert_eq!(rejected_flag("Error: No such option: '--ocr'").as_deref(), Some("--ocr"));
        assert_eq!(rejected_flag("Segmentation fault"), None);
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let s = "a\n\nb\nc\nd\ne\n";
        assert_eq!(stderr_tail(s), "b | c | d | e");
        let long = "x".repeat(2000);
        assert!(stderr_tail(&long).chars().count() <= 601);
    }

    #[test]
    fn cli_values() {
        assert_eq!(cli_value(&Value::Bool(true)), "true");
        assert_eq!(cli_value(&serde_json::json!(3)), "3");
        assert_eq!(cli_value(&serde_json::json!("main")), "main");
    }

    #[tokio::test]
    async fn missing_tool_is_permanent_failure() {
        let ctx = BackendContext {
            capabilities: Arc::new(Capabilities::only(&[])),
            tool_timeout: Duration::from_secs(5),
            max_scrape_chars: 100,
            python: "python3".into(),
        };
        let err = run_tool(
            BackendId::Docling,
            "polyextract-definitely-missing-tool",
            vec![],
            &ctx,
        )
        .await
        .unwrap_err();
        assert!(!err.is_transient());
        assert!(err.message().contains("not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_tool_times_out() {
        let ctx = BackendContext {
            capabilities: Arc::new(Capabilities::only(&[])),
            tool_timeout: Duration::from_secs(1),
            max_scrape_chars: 100,
            python: "python3".into(),
        };
        let err = run_tool(BackendId::Pdftotext, "sleep", vec!["10".into()], &ctx)
            .await
            .unwrap_err();
        assert!(err.message().contains("timed out"), "got: {err}");
    }

    #[test]
    fn empty_outputs_have_no_content() {
        let blank_pages = RawBackendOutput::PdfPages {
            pages: vec!["  \n".into(), String::new()],
            info: PdfInfo::default(),
        };
        assert!(!blank_pages.has_content());

        let crawl = RawBackendOutput::Crawler(serde_json::json!({
            "markdown": {"raw_markdown": ""},
            "cleaned_html": "  "
        }));
        assert!(!crawl.has_content());

        let docling = RawBackendOutput::Docling {
            document: serde_json::json!({"texts": [{"text": " "}], "tables": []}),
            markdown: Some("\n".into()),
            html: None,
        };
        assert!(!docling.has_content());

        let plumber = RawBackendOutput::Pdfplumber(serde_json::json!({
            "pages": [{"text": "", "tables": [[["a", "b"]]]}]
        }));
        assert!(plumber.has_content());
    }

    #[test]
    fn unrecognised_shapes_count_as_content() {
        assert!(RawBackendOutput::Crawler(serde_json::json!(["not", "objects"])).has_content());
        assert!(RawBackendOutput::Docling {
            document: serde_json::json!([1, 2]),
            markdown: None,
            html: None,
        }
        .has_content());
        assert!(RawBackendOutput::Pdfplumber(serde_json::json!("text")).has_content());
    }
}
