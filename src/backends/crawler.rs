//! Web page crawler (`crwl`) as a subprocess.
//!
//! The crawler renders the page in a headless browser and prints its full
//! result model as JSON (`-o all`). Scalar crawl and browser options travel
//! as `-c k=v,...` / `-b k=v,...`; structured values force a JSON config
//! file instead. An extraction strategy is written to its own config file
//! and passed with `-e`, only when the extraction sub-feature is installed.

use super::{cli_value, json_type, run_tool, Backend, BackendContext, BackendId, RawBackendOutput};
use crate::backends::scrape::html_to_text;
use crate::capability::Capability;
use crate::config::Options;
use crate::error::{AdapterError, PolyExtractError, RecoverableCondition};
use crate::output::{Link, MediaItem, UnifiedResult};
use crate::pipeline::encode::from_base64;
use crate::pipeline::input::ResolvedInput;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::ffi::OsString;
use std::path::Path;
use tracing::{debug, warn};

/// Options forwarded to the crawl run.
pub const CRAWL_OPTIONS: &[&str] = &[
    "word_count_threshold",
    "css_selector",
    "screenshot",
    "user_agent",
    "wait_for",
    "page_timeout",
    "delay_before_return_html",
    "js_code",
    "remove_overlay_elements",
    "simulate_user",
    "override_navigator",
    "magic",
    "session_id",
    "cache_mode",
    "excluded_tags",
    "only_text",
    "process_iframes",
    "remove_forms",
    "headers",
];

/// Options forwarded to the browser.
pub const BROWSER_OPTIONS: &[&str] = &["headless", "user_agent", "viewport_width", "viewport_height"];

const STRATEGY_OPTION: &str = "extraction_strategy";

pub struct CrawlerBackend;

/// How one group of options reaches the crawler.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionGroup {
    None,
    /// `k=v,...` for `-c` / `-b`.
    Inline(String),
    /// Needs a config file (lists, objects, commas in values).
    File(Map<String, Value>),
}

/// Select `keys` from the bag and decide how to pass them.
pub fn option_group(options: &Options, keys: &[&str]) -> OptionGroup {
    let selected: Map<String, Value> = keys
        .iter()
        .filter_map(|k| options.get(k).map(|v| (k.to_string(), v.clone())))
        .collect();
    if selected.is_empty() {
        return OptionGroup::None;
    }
    let inline_safe = selected.values().all(|v| match v {
        Value::Array(_) | Value::Object(_) => false,
        other => {
            let s = cli_value(other);
            !s.contains(',') && !s.contains('=')
        }
    });
    if inline_safe {
        OptionGroup::Inline(
            selected
                .iter()
                .map(|(k, v)| format!("{k}={}", cli_value(v)))
                .collect::<Vec<_>>()
                .join(","),
        )
    } else {
        OptionGroup::File(selected)
    }
}

/// The extraction strategy, when requested and supported.
pub fn strategy(options: &Options, supported: bool) -> Option<&Map<String, Value>> {
    if !supported {
        if options.contains(STRATEGY_OPTION) {
            debug!("extraction strategy requested but not installed; ignoring");
        }
        return None;
    }
    options.get(STRATEGY_OPTION).and_then(Value::as_object)
}

/// A failure message that names the deprecated LLM `provider` parameter.
pub fn is_provider_deprecation(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("deprecated") && lower.contains("provider")
}

fn classify(backend: BackendId, message: String) -> AdapterError {
    if is_provider_deprecation(&message) {
        AdapterError::Transient {
            backend,
            condition: RecoverableCondition::DeprecatedParameter {
                option: STRATEGY_OPTION.to_string(),
            },
            message,
        }
    } else {
        AdapterError::permanent(backend, message)
    }
}

async fn write_config(dir: &Path, name: &str, value: &Map<String, Value>) -> Result<OsString, AdapterError> {
    let path = dir.join(name);
    // JSON is a subset of YAML, which is what the crawler reads.
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| AdapterError::permanent(BackendId::Crawler, format!("config encode: {e}")))?;
    tokio::fs::write(&path, body)
        .await
        .map_err(|e| AdapterError::permanent(BackendId::Crawler, format!("config write: {e}")))?;
    Ok(path.into_os_string())
}

/// Parse stdout, skipping any log lines printed before the JSON document.
pub fn parse_json_output(stdout: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str(stdout.trim()) {
        return Some(v);
    }
    let mut offset = 0;
    for line in stdout.split_inclusive('\n') {
        let t = line.trim_start();
        if t.starts_with('{') || t.starts_with('[') {
            if let Ok(v) = serde_json::from_str(stdout[offset..].trim()) {
                return Some(v);
            }
        }
        offset += line.len();
    }
    None
}

#[async_trait]
impl Backend for CrawlerBackend {
    fn id(&self) -> BackendId {
        BackendId::Crawler
    }

    fn required_capabilities(&self) -> &[Capability] {
        &[Capability::Crawler]
    }

    async fn invoke(
        &self,
        input: &ResolvedInput,
        options: &Options,
        ctx: &BackendContext,
    ) -> Result<RawBackendOutput, AdapterError> {
        let scratch = tempfile::Builder::new()
            .prefix("polyextract-crawl-")
            .tempdir()
            .map_err(|e| AdapterError::permanent(self.id(), format!("scratch dir: {e}")))?;

        // Crawl the original URL; local HTML is crawled via file://.
        let target = match input.source_url() {
            Some(url) => url.to_string(),
            None => format!("file://{}", input.path().display()),
        };

        let mut args: Vec<OsString> = vec![target.into(), "-o".into(), "all".into()];
        for (keys, inline_flag, file_flag, file_name) in [
            (CRAWL_OPTIONS, "-c", "-C", "crawler.yml"),
            (BROWSER_OPTIONS, "-b", "-B", "browser.yml"),
        ] {
            match option_group(options, keys) {
                OptionGroup::None => {}
                OptionGroup::Inline(kv) => {
                    args.push(inline_flag.into());
                    args.push(kv.into());
                }
                OptionGroup::File(map) => {
                    args.push(file_flag.into());
                    args.push(write_config(scratch.path(), file_name, &map).await?);
                }
            }
        }
        if let Some(strategy) = strategy(options, ctx.has(Capability::CrawlerExtraction)) {
            args.push("-e".into());
            args.push(write_config(scratch.path(), "extract.yml", strategy).await?);
        }

        let output = run_tool(self.id(), "crwl", args, ctx).await?;
        let stdout = output.stdout_lossy();

        if !output.success() {
            let message = super::stderr_tail(&output.stderr);
            let message = if message.is_empty() {
                format!("exited with {}", output.status)
            } else {
                message
            };
            return Err(classify(self.id(), message));
        }

        let value = parse_json_output(&stdout)
            .ok_or_else(|| AdapterError::permanent(self.id(), "output is not JSON"))?;

        let first = match &value {
            Value::Array(items) => items.first(),
            other => Some(other),
        };
        if let Some(obj) = first.and_then(Value::as_object) {
            if obj.get("success").and_then(Value::as_bool) == Some(false) {
                let message = obj
                    .get("error_message")
                    .or_else(|| obj.get("error"))
                    .and_then(Value::as_str)
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or("crawl reported failure")
                    .to_string();
                warn!("crawler reported failure: {}", message);
                return Err(classify(self.id(), message));
            }
        }

        Ok(RawBackendOutput::Crawler(value))
    }
}

// ── Normalization ────────────────────────────────────────────────────────

/// Map the crawler's result model into the unified schema.
pub fn normalize(value: &Value) -> Result<UnifiedResult, PolyExtractError> {
    let shape_error = |detail: String| PolyExtractError::Normalization {
        backend: BackendId::Crawler,
        detail,
    };
    let item = match value {
        Value::Array(items) => items
            .first()
            .ok_or_else(|| shape_error("empty result list".to_string()))?,
        other => other,
    };
    let obj = item
        .as_object()
        .ok_or_else(|| shape_error(format!("expected a JSON object, got {}", json_type(item))))?;

    let mut result = UnifiedResult {
        success: true,
        ..Default::default()
    };

    let markdown = match obj.get("markdown") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(m)) => m
            .get("raw_markdown")
            .or_else(|| m.get("markdown_with_citations"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    };
    let html = ["cleaned_html", "html"]
        .iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
        .unwrap_or_default()
        .to_string();

    result.document.text = if html.is_empty() {
        markdown.clone()
    } else {
        html_to_text(&html)
    };
    result.document.markdown = markdown;
    result.document.html = html;
    result.document.structured = match obj.get("extracted_content") {
        Some(Value::String(s)) if !s.trim().is_empty() => {
            serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone()))
        }
        Some(Value::String(_)) | None => Value::Null,
        Some(other) => other.clone(),
    };

    // Metadata
    let meta = &mut result.metadata;
    meta.document_type = "html".to_string();
    meta.page_count = 1;
    if let Some(m) = obj.get("metadata").and_then(Value::as_object) {
        let s = |k: &str| m.get(k).and_then(Value::as_str).unwrap_or("").trim().to_string();
        meta.title = s("title");
        meta.description = s("description");
        meta.author = s("author");
        meta.language = s("language");
        meta.keywords = match m.get("keywords") {
            Some(Value::String(k)) => k
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect(),
            Some(Value::Array(ks)) => ks
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
    }
    for key in ["url", "redirected_url", "status_code", "session_id"] {
        if let Some(v) = obj.get(key).filter(|v| !v.is_null()) {
            meta.extra.insert(key.into(), v.clone());
        }
    }

    // Media
    if let Some(media) = obj.get("media").and_then(Value::as_object) {
        result.media.images = media_items(media.get("images"));
        result.media.videos = media_items(media.get("videos"));
        result.media.audios = media_items(media.get("audios"));
    }
    if result.media.images.is_empty() {
        result.media.images = media_items(obj.get("images"));
    }
    result.media.screenshot = obj
        .get("screenshot")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .and_then(|s| from_base64(s, "image/png"));

    // Links
    if let Some(links) = obj.get("links").and_then(Value::as_object) {
        result.links.internal = links_from(links.get("internal"));
        result.links.external = links_from(links.get("external"));
    }

    Ok(result)
}

fn media_items(value: Option<&Value>) -> Vec<MediaItem> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(src) => Some(MediaItem {
                src: src.clone(),
                ..Default::default()
            }),
            Value::Object(m) => {
                let s = |k: &str| m.get(k).and_then(Value::as_str).unwrap_or("").to_string();
                let extensions = m
                    .iter()
                    .filter(|(k, v)| !matches!(k.as_str(), "src" | "alt" | "desc") && !v.is_null())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Some(MediaItem {
                    src: s("src"),
                    alt: s("alt"),
                    description: s("desc"),
                    extensions,
                })
            }
            _ => None,
        })
        .collect()
}

fn links_from(value: Option<&Value>) -> Vec<Link> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(href) => Some(Link {
                href: href.clone(),
                ..Default::default()
            }),
            Value::Object(m) => {
                let s = |k: &str| m.get(k).and_then(Value::as_str).unwrap_or("").trim().to_string();
                Some(Link {
                    href: s("href"),
                    text: s("text"),
                    title: s("title"),
                })
            }
            _ => None,
        })
        .collect()
}
