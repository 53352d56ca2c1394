//! Request and runtime configuration.
//!
//! Two things configure an extraction:
//!
//! * [`ExtractionRequest`] — *what* to extract: one target reference, an
//!   optional content-type hint and the backend option bag. It is usually
//!   deserialised from the single JSON configuration object handed to the
//!   entry point and is immutable once built.
//! * [`ExtractionConfig`] — *how* the process runs extractions: timeouts,
//!   interpreter and library locations, payload bounds. Built via its
//!   [`ExtractionConfigBuilder`] and shared by every request.

use crate::capability::Capability;
use crate::error::PolyExtractError;
use crate::progress::ObserverHandle;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

// ── Request ──────────────────────────────────────────────────────────────

/// Where the content to extract comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Target {
    /// HTTP/HTTPS URL.
    Url(String),
    /// Local file path.
    Path(PathBuf),
    /// Inline content: base64 or a `data:` URI.
    Inline(String),
}

impl Target {
    /// Classify a free-form reference string.
    pub fn parse(reference: &str) -> Target {
        let trimmed = reference.trim();
        if is_url(trimmed) {
            Target::Url(trimmed.to_string())
        } else if trimmed.starts_with("data:") {
            Target::Inline(trimmed.to_string())
        } else {
            Target::Path(PathBuf::from(trimmed))
        }
    }

    /// A short human-readable description for logs (inline data is elided).
    pub fn describe(&self) -> String {
        match self {
            Target::Url(u) => u.clone(),
            Target::Path(p) => p.display().to_string(),
            Target::Inline(data) => format!("<inline content, {} chars>", data.len()),
        }
    }
}

/// Check if the reference string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// The detected (or declared) kind of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Pdf,
    Image,
    Tiff,
    Office,
    Html,
    Text,
    Unknown,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Pdf => "pdf",
            ContentKind::Image => "image",
            ContentKind::Tiff => "tiff",
            ContentKind::Office => "office",
            ContentKind::Html => "html",
            ContentKind::Text => "text",
            ContentKind::Unknown => "unknown",
        }
    }

    /// Interpret an explicit type hint. Accepts kind names, file suffixes
    /// and MIME types. Returns `None` for hints that carry no signal.
    pub fn from_hint(hint: &str) -> Option<ContentKind> {
        let h = hint.trim().trim_start_matches('.').to_ascii_lowercase();
        if h.is_empty() {
            return None;
        }
        let kind = match h.as_str() {
            "pdf" | "application/pdf" => ContentKind::Pdf,
            "image" | "png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" | "image/png"
            | "image/jpeg" | "image/gif" | "image/bmp" | "image/webp" => ContentKind::Image,
            "tif" | "tiff" | "image/tiff" => ContentKind::Tiff,
            "office" | "docx" | "doc" | "pptx" | "ppt" | "xlsx" | "xls" | "odt" => {
                ContentKind::Office
            }
            "html" | "htm" | "web" | "webpage" | "text/html" | "application/xhtml+xml" => {
                ContentKind::Html
            }
            "text" | "txt" | "md" | "markdown" | "text/plain" | "text/markdown" => {
                ContentKind::Text
            }
            "unknown" => return None,
            other if other.starts_with("image/") => ContentKind::Image,
            other if other.starts_with("application/vnd.openxmlformats")
                || other.starts_with("application/vnd.ms-")
                || other == "application/msword" =>
            {
                ContentKind::Office
            }
            other if other.starts_with("text/") => ContentKind::Text,
            _ => return None,
        };
        Some(kind)
    }

    /// Temp-file suffix used when the content has to be staged on disk.
    ///
    /// `hint` may be a file suffix or a MIME type. Converters pick their
    /// reader from the extension, so a specific format (`xlsx`, `pptx`,
    /// `jpeg`) is kept when it agrees with this kind.
    pub fn file_suffix(&self, hint: Option<&str>) -> String {
        if let Some(ext) = hint.and_then(specific_suffix) {
            if ContentKind::from_hint(ext) == Some(*self) {
                return format!(".{ext}");
            }
        }
        match self {
            ContentKind::Pdf => ".pdf",
            ContentKind::Image => ".png",
            ContentKind::Tiff => ".tiff",
            ContentKind::Office => ".docx",
            ContentKind::Html => ".html",
            ContentKind::Text => ".txt",
            ContentKind::Unknown => ".bin",
        }
        .to_string()
    }
}

/// The file extension named by a suffix or MIME hint, if it is one the
/// backends distinguish.
fn specific_suffix(hint: &str) -> Option<&'static str> {
    let h = hint.trim().trim_start_matches('.').to_ascii_lowercase();
    let ext = match h.as_str() {
        "docx" | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
            "docx"
        }
        "xlsx" | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "pptx" | "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
            "pptx"
        }
        "doc" | "application/msword" => "doc",
        "xls" | "application/vnd.ms-excel" => "xls",
        "ppt" | "application/vnd.ms-powerpoint" => "ppt",
        "odt" => "odt",
        "png" | "image/png" => "png",
        "jpg" | "jpeg" | "image/jpeg" => "jpg",
        "gif" | "image/gif" => "gif",
        "bmp" | "image/bmp" => "bmp",
        "webp" | "image/webp" => "webp",
        "tif" | "tiff" | "image/tiff" => "tiff",
        "htm" | "html" | "text/html" => "html",
        "md" | "markdown" | "text/markdown" => "md",
        _ => return None,
    };
    Some(ext)
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The backend option bag. Every option is optional; unknown options are
/// ignored by every adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options(Map<String, Value>);

impl Options {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Boolean option; accepts JSON booleans and the strings "true"/"false".
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            _ => None,
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Unsigned option; accepts JSON numbers and numeric strings.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// A copy of the bag with one option removed.
    pub fn without(&self, key: &str) -> Options {
        let mut map = self.0.clone();
        map.remove(key);
        Options(map)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One extraction request. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionRequest {
    pub target: Target,
    pub content_type_hint: Option<String>,
    pub options: Options,
}

impl ExtractionRequest {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            content_type_hint: None,
            options: Options::new(),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.content_type_hint = Some(hint.into());
        self
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// The hint interpreted as a [`ContentKind`], if it carries a signal.
    pub fn hinted_kind(&self) -> Option<ContentKind> {
        self.content_type_hint
            .as_deref()
            .and_then(ContentKind::from_hint)
    }

    /// Parse and validate a JSON configuration object.
    pub fn from_json(json: &str) -> Result<Self, PolyExtractError> {
        let raw: RequestConfig = serde_json::from_str(json)
            .map_err(|e| PolyExtractError::Configuration(format!("malformed request: {e}")))?;
        raw.into_request()
    }

    /// Validate an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, PolyExtractError> {
        let raw: RequestConfig = serde_json::from_value(value)
            .map_err(|e| PolyExtractError::Configuration(format!("malformed request: {e}")))?;
        raw.into_request()
    }
}

/// Wire shape of the configuration object. Accepts the camelCase field
/// names as well as the snake_case names used by older callers.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestConfig {
    #[serde(default, alias = "url", alias = "document_url", alias = "documentUrl", alias = "path")]
    pub target: Option<String>,

    #[serde(default, alias = "document_data", alias = "documentData", alias = "content")]
    pub inline: Option<String>,

    #[serde(default, alias = "content_type_hint", alias = "document_type", alias = "documentType")]
    pub content_type_hint: Option<String>,

    #[serde(default)]
    pub options: Option<Map<String, Value>>,

    #[serde(default, alias = "crawl_config")]
    pub crawl_config: Option<Map<String, Value>>,

    #[serde(default, alias = "crawler_config")]
    pub crawler_config: Option<Map<String, Value>>,
}

impl RequestConfig {
    /// Validate required fields and flatten the option bags.
    pub fn into_request(self) -> Result<ExtractionRequest, PolyExtractError> {
        let inline = self.inline.filter(|s| !s.trim().is_empty());
        let target = self.target.filter(|s| !s.trim().is_empty());

        // Inline bytes win over a reference when both are given.
        let target = match (inline, target) {
            (Some(data), _) => Target::Inline(data),
            (None, Some(reference)) => Target::parse(&reference),
            (None, None) => return Err(PolyExtractError::MissingTarget),
        };

        let mut merged = Map::new();
        for bag in [self.crawler_config, self.crawl_config, self.options]
            .into_iter()
            .flatten()
        {
            for (k, v) in bag {
                merged.insert(k, v);
            }
        }

        Ok(ExtractionRequest {
            target,
            content_type_hint: self.content_type_hint.filter(|h| !h.trim().is_empty()),
            options: Options(merged),
        })
    }
}

// ── Runtime configuration ────────────────────────────────────────────────

/// Process-level settings shared by every extraction.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use polyextract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .download_timeout_secs(30)
///     .python("/usr/bin/python3")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Timeout for downloading a URL target, in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Timeout for one backend subprocess, in seconds. Default: 300.
    ///
    /// The child is killed when it expires and the attempt is recorded as a
    /// permanent failure. Layout models loading on CPU are slow; keep this
    /// generous.
    pub tool_timeout_secs: u64,

    /// Python interpreter used to probe optional Python sub-features.
    /// Default: `python3`.
    pub python: String,

    /// Explicit path to the PDFium shared library. When `None`,
    /// `PDFIUM_LIB_PATH` and then the system library are tried.
    pub pdfium_library_path: Option<PathBuf>,

    /// Upper bound on any binary payload (screenshot, figure image) carried
    /// in the result, in raw bytes. Default: 5 MiB.
    pub max_binary_bytes: usize,

    /// Character cap for the minimal in-process scrapes. Default: 10 000.
    pub max_scrape_chars: usize,

    /// Capabilities to treat as unavailable regardless of the probe.
    pub disabled_capabilities: Vec<Capability>,

    /// Receives cascade events; used for CLI progress output.
    pub observer: Option<ObserverHandle>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            download_timeout_secs: 120,
            tool_timeout_secs: 300,
            python: "python3".to_string(),
            pdfium_library_path: None,
            max_binary_bytes: 5 * 1024 * 1024,
            max_scrape_chars: 10_000,
            disabled_capabilities: Vec::new(),
            observer: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("tool_timeout_secs", &self.tool_timeout_secs)
            .field("python", &self.python)
            .field("pdfium_library_path", &self.pdfium_library_path)
            .field("max_binary_bytes", &self.max_binary_bytes)
            .field("max_scrape_chars", &self.max_scrape_chars)
            .field("disabled_capabilities", &self.disabled_capabilities)
            .field("observer", &self.observer.as_ref().map(|_| "<dyn CascadeObserver>"))
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn tool_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tool_timeout_secs = secs;
        self
    }

    pub fn python(mut self, python: impl Into<String>) -> Self {
        self.config.python = python.into();
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn max_binary_bytes(mut self, n: usize) -> Self {
        self.config.max_binary_bytes = n;
        self
    }

    pub fn max_scrape_chars(mut self, n: usize) -> Self {
        self.config.max_scrape_chars = n;
        self
    }

    pub fn disable(mut self, capability: Capability) -> Self {
        if !self.config.disabled_capabilities.contains(&capability) {
            self.config.disabled_capabilities.push(capability);
        }
        self
    }

    pub fn observer(mut self, observer: ObserverHandle) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, PolyExtractError> {
        let c = &self.config;
        if c.download_timeout_secs == 0 {
            return Err(PolyExtractError::Configuration(
                "download timeout must be ≥ 1 second".into(),
            ));
        }
        if c.tool_timeout_secs == 0 {
            return Err(PolyExtractError::Configuration(
                "tool timeout must be ≥ 1 second".into(),
            ));
        }
        if c.python.trim().is_empty() {
            return Err(PolyExtractError::Configuration(
                "python interpreter must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
