//! Minimal in-process backends.
//!
//! These run when every preferred backend for a kind has failed. They need
//! nothing beyond this crate's own dependencies, so they are always
//! available, and they are deliberately shallow: text only (or a thumbnail
//! for images), capped in size.

use super::{Backend, BackendContext, BackendId, PdfInfo, RawBackendOutput};
use crate::capability::Capability;
use crate::config::Options;
use crate::error::{AdapterError, PolyExtractError};
use crate::output::{BoundingBox, Figure, UnifiedResult};
use crate::pipeline::encode::{encode_binary, encode_png, thumbnail};
use crate::pipeline::input::ResolvedInput;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Map;
use std::path::Path;
use tracing::debug;

/// Longest edge of the image-probe thumbnail.
pub const THUMBNAIL_MAX_EDGE: u32 = 512;

/// Fraction of control characters above which content counts as binary.
const BINARY_THRESHOLD: f64 = 0.10;
const BINARY_SAMPLE: usize = 8192;

async fn blocking<T, F>(backend: BackendId, f: F) -> Result<T, AdapterError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AdapterError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AdapterError::permanent(backend, format!("task panicked: {e}")))?
}

/// Cut to at most `max_chars` characters.
pub fn cap_chars(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => (text[..idx].to_string(), true),
        None => (text.to_string(), false),
    }
}

// ── lopdf ────────────────────────────────────────────────────────────────

pub struct LopdfBackend;

#[async_trait]
impl Backend for LopdfBackend {
    fn id(&self) -> BackendId {
        BackendId::Lopdf
    }

    fn required_capabilities(&self) -> &[Capability] {
        &[Capability::Lopdf]
    }

    async fn invoke(
        &self,
        input: &ResolvedInput,
        _options: &Options,
        _ctx: &BackendContext,
    ) -> Result<RawBackendOutput, AdapterError> {
        let path = input.path().to_path_buf();
        blocking(self.id(), move || lopdf_pages(&path)).await
    }
}

fn lopdf_pages(path: &Path) -> Result<RawBackendOutput, AdapterError> {
    let doc = lopdf::Document::load(path)
        .map_err(|e| AdapterError::permanent(BackendId::Lopdf, format!("cannot parse PDF: {e}")))?;

    let mut pages = Vec::new();
    for (number, _) in doc.get_pages() {
        match doc.extract_text(&[number]) {
            Ok(text) => pages.push(text),
            Err(e) => {
                debug!("lopdf: page {} has no extractable text: {}", number, e);
                pages.push(String::new());
            }
        }
    }

    let info_string = |key: &[u8]| -> Option<String> {
        let id = doc.trailer.get(b"Info").ok()?.as_reference().ok()?;
        let dict = doc.get_dictionary(id).ok()?;
        let raw = dict.get(key).ok()?.as_str().ok()?;
        let s = pdf_text_string(raw);
        (!s.trim().is_empty()).then(|| s.trim().to_string())
    };
    let info = PdfInfo {
        title: info_string(b"Title"),
        author: info_string(b"Author"),
        subject: info_string(b"Subject"),
        keywords: info_string(b"Keywords"),
        producer: info_string(b"Producer"),
        version: Some(doc.version.clone()),
    };

    Ok(RawBackendOutput::PdfPages { pages, info })
}

/// Decode a PDF text string: UTF-16BE with BOM, else byte-per-char.
fn pdf_text_string(raw: &[u8]) -> String {
    if let Some(body) = raw.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        raw.iter().map(|&b| b as char).collect()
    }
}

// ── HTML scrape ──────────────────────────────────────────────────────────

pub struct HtmlScrapeBackend;

static RE_DROP_BLOCKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style|noscript|template|svg)\b[^>]*>.*?</(script|style|noscript|template|svg)\s*>|<!--.*?-->").unwrap()
});
static RE_BREAKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</?(p|div|section|article|header|footer|main|h[1-6]|li|ul|ol|tr|table|blockquote|pre)\b[^>]*>").unwrap()
});
static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static RE_TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
static RE_ENTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").unwrap());
static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{00A0}]+").unwrap());

/// Visible text of an HTML document.
pub fn html_to_text(html: &str) -> String {
    let s = RE_DROP_BLOCKS.replace_all(html, " ");
    let s = RE_BREAKS.replace_all(&s, "\n");
    let s = RE_TAGS.replace_all(&s, "");
    let s = decode_entities(&s);
    s.lines()
        .map(|l| RE_SPACES.replace_all(l, " ").trim().to_string())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn html_title(html: &str) -> Option<String> {
    RE_TITLE
        .captures(html)
        .map(|c| decode_entities(RE_TAGS.replace_all(&c[1], "").trim()))
        .filter(|t| !t.is_empty())
}

fn decode_entities(s: &str) -> String {
    RE_ENTITY
        .replace_all(s, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            let decoded = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match name {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    "ndash" => Some('–'),
                    "mdash" => Some('—'),
                    "hellip" => Some('…'),
                    "copy" => Some('©'),
                    _ => None,
                }
            };
            decoded.map(String::from).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[async_trait]
impl Backend for HtmlScrapeBackend {
    fn id(&self) -> BackendId {
        BackendId::HtmlScrape
    }

    fn required_capabilities(&self) -> &[Capability] {
        &[Capability::HtmlScrape]
    }

    async fn invoke(
        &self,
        input: &ResolvedInput,
        _options: &Options,
        ctx: &BackendContext,
    ) -> Result<RawBackendOutput, AdapterError> {
        let bytes = tokio::fs::read(input.path())
            .await
            .map_err(|e| AdapterError::permanent(self.id(), format!("read failed: {e}")))?;
        let html = String::from_utf8_lossy(&bytes);
        let (text, truncated) = cap_chars(&html_to_text(&html), ctx.max_scrape_chars);
        Ok(RawBackendOutput::Scraped {
            text,
            html: None,
            title: html_title(&html),
            truncated,
        })
    }
}

// ── Text scrape ──────────────────────────────────────────────────────────

pub struct TextScrapeBackend;

/// True when more than 10% of the sample is control characters.
pub fn looks_binary(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(BINARY_SAMPLE)];
    if sample.is_empty() {
        return false;
    }
    let text = String::from_utf8_lossy(sample);
    let total = text.chars().count();
    let control = text
        .chars()
        .filter(|c| (c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\u{000C}')) || *c == '\u{FFFD}')
        .count();
    control as f64 / total as f64 > BINARY_THRESHOLD
}

#[async_trait]
impl Backend for TextScrapeBackend {
    fn id(&self) -> BackendId {
        BackendId::TextScrape
    }

    fn required_capabilities(&self) -> &[Capability] {
        &[Capability::TextScrape]
    }

    async fn invoke(
        &self,
        input: &ResolvedInput,
        _options: &Options,
        ctx: &BackendContext,
    ) -> Result<RawBackendOutput, AdapterError> {
        let bytes = tokio::fs::read(input.path())
            .await
            .map_err(|e| AdapterError::permanent(self.id(), format!("read failed: {e}")))?;
        if looks_binary(&bytes) {
            return Err(AdapterError::permanent(self.id(), "content appears to be binary"));
        }
        let (text, truncated) = cap_chars(&String::from_utf8_lossy(&bytes), ctx.max_scrape_chars);
        Ok(RawBackendOutput::Scraped {
            text,
            html: None,
            title: None,
            truncated,
        })
    }
}

/// Map a minimal scrape into the unified schema.
pub fn normalize_scrape(
    text: &str,
    html: Option<&str>,
    title: Option<&str>,
    truncated: bool,
) -> Result<UnifiedResult, PolyExtractError> {
    let mut result = UnifiedResult {
        success: true,
        ..Default::default()
    };
    result.document.text = text.to_string();
    result.document.html = html.unwrap_or_default().to_string();
    result.metadata.title = title.unwrap_or_default().to_string();
    if truncated {
        result.metadata.extra.insert("truncated".into(), true.into());
    }
    Ok(result)
}

// ── Image probe ──────────────────────────────────────────────────────────

pub struct ImageProbeBackend;

#[async_trait]
impl Backend for ImageProbeBackend {
    fn id(&self) -> BackendId {
        BackendId::ImageProbe
    }

    fn required_capabilities(&self) -> &[Capability] {
        &[Capability::ImageProbe]
    }

    async fn invoke(
        &self,
        input: &ResolvedInput,
        _options: &Options,
        _ctx: &BackendContext,
    ) -> Result<RawBackendOutput, AdapterError> {
        let path = input.path().to_path_buf();
        blocking(self.id(), move || probe_image(&path)).await
    }
}

fn probe_image(path: &Path) -> Result<RawBackendOutput, AdapterError> {
    let fail = |msg: String| AdapterError::permanent(BackendId::ImageProbe, msg);

    let reader = image::ImageReader::open(path)
        .map_err(|e| fail(format!("open failed: {e}")))?
        .with_guessed_format()
        .map_err(|e| fail(format!("format detection failed: {e}")))?;
    let format = reader
        .format()
        .map(|f| format!("{f:?}").to_ascii_lowercase())
        .unwrap_or_else(|| "unknown".to_string());
    let img = reader.decode().map_err(|e| fail(format!("decode failed: {e}")))?;

    let thumb = thumbnail(&img, THUMBNAIL_MAX_EDGE);
    let thumbnail_png = encode_png(&thumb).map_err(|e| fail(format!("thumbnail encode failed: {e}")))?;
    debug!(
        "image-probe: {}x{} {} → {} byte thumbnail",
        img.width(),
        img.height(),
        format,
        thumbnail_png.len()
    );

    Ok(RawBackendOutput::Image {
        width: img.width(),
        height: img.height(),
        format,
        thumbnail_png,
    })
}

/// The whole image becomes one figure carrying the thumbnail.
pub fn normalize_image(
    width: u32,
    height: u32,
    format: &str,
    thumbnail_png: &[u8],
) -> Result<UnifiedResult, PolyExtractError> {
    let mut result = UnifiedResult {
        success: true,
        ..Default::default()
    };

    let mut extensions = Map::new();
    extensions.insert("width".into(), width.into());
    extensions.insert("height".into(), height.into());
    extensions.insert("format".into(), format.into());
    extensions.insert("thumbnail_max_edge".into(), THUMBNAIL_MAX_EDGE.into());

    result.figures.push(Figure {
        index: 0,
        page: Some(1),
        caption: String::new(),
        bbox: Some(BoundingBox::new(0.0, 0.0, width as f64, height as f64)),
        image: Some(encode_binary(thumbnail_png, "image/png")),
        extensions,
    });

    let meta = &mut result.metadata;
    meta.page_count = 1;
    meta.extra.insert("width".into(), width.into());
    meta.extra.insert("height".into(), height.into());
    meta.extra.insert("format".into(), format.into());
    Ok(result)
}
