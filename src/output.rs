//! The unified result schema.
//!
//! Every extraction, whichever backend (or chain of backends) produced it,
//! ends in exactly one [`UnifiedResult`]. All collections are ordered and all
//! maps are `BTreeMap`-backed so that serialising the same result twice yields
//! identical bytes.

use crate::backends::BackendId;
use crate::capability::Capability;
use crate::error::{ErrorKind, PolyExtractError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The single output shape of an extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnifiedResult {
    pub success: bool,
    pub document: DocumentContent,
    pub metadata: DocumentMetadata,
    pub tables: Vec<Table>,
    pub figures: Vec<Figure>,
    pub layout_elements: Vec<LayoutElement>,
    pub media: Media,
    pub links: Links,
    /// Present if and only if `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Backends actually invoked, in priority order.
    pub backends_used: Vec<BackendId>,
    /// Full cascade log, including skipped candidates.
    pub attempts: Vec<CascadeAttempt>,
}

impl UnifiedResult {
    /// A failed result carrying a diagnostic message.
    ///
    /// An empty message is replaced so that `success=false` always comes with
    /// a non-empty `error`.
    pub fn failure(message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = "extraction failed".to_string();
        }
        Self {
            success: false,
            error: Some(message),
            ..Default::default()
        }
    }

    /// A failed result for a request-level error, tagged with its kind.
    pub fn from_error(err: &PolyExtractError) -> Self {
        let mut result = Self::failure(err.to_string());
        result.metadata.extra.insert(
            "error_kind".to_string(),
            serde_json::to_value(err.kind()).unwrap_or(Value::Null),
        );
        result
    }

    /// The error kind recorded by [`UnifiedResult::from_error`], if any.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.metadata
            .extra
            .get("error_kind")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// True when the result carries any extracted signal at all.
    pub fn has_content(&self) -> bool {
        !self.document.text.trim().is_empty()
            || !self.document.markdown.trim().is_empty()
            || !self.tables.is_empty()
            || !self.figures.is_empty()
            || !self.layout_elements.is_empty()
    }
}

/// Textual renderings of the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentContent {
    pub text: String,
    pub markdown: String,
    pub html: String,
    /// Backend-native structured output (e.g. a converter's JSON document or
    /// a crawler's extracted content). `null` when the backend has none.
    pub structured: Value,
    /// Detected input format: `pdf`, `image`, `tiff`, `office`, `html`,
    /// `text` or `unknown`.
    pub format: String,
}

/// Document-level metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    pub author: String,
    pub language: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub page_count: usize,
    pub word_count: usize,
    pub document_type: String,
    /// Set when the content came from the minimal fallback after every
    /// preferred backend failed.
    pub degraded: bool,
    /// Backend-specific extras demoted out of the schema.
    pub extra: Map<String, Value>,
}

/// Axis-aligned box in backend page coordinates (`x0,y0` top-left).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BoundingBox {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub index: usize,
    pub page: Option<u32>,
    pub caption: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub num_rows: usize,
    pub num_cols: usize,
    pub bbox: Option<BoundingBox>,
    pub extensions: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    pub index: usize,
    pub page: Option<u32>,
    pub caption: String,
    pub bbox: Option<BoundingBox>,
    pub image: Option<EncodedBinary>,
    pub extensions: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutElement {
    pub category: String,
    pub text: String,
    pub page: Option<u32>,
    pub bbox: Option<BoundingBox>,
    pub confidence: Option<f64>,
    pub extensions: Map<String, Value>,
}

/// Binary payload carried as text.
///
/// `data` is omitted when the payload exceeds the configured byte bound;
/// `byte_len` always reports the original size.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodedBinary {
    pub mime_type: String,
    pub encoding: String,
    pub byte_len: usize,
    pub omitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub src: String,
    pub alt: String,
    pub description: String,
    pub extensions: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub videos: Vec<MediaItem>,
    pub audios: Vec<MediaItem>,
    pub images: Vec<MediaItem>,
    pub screenshot: Option<EncodedBinary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    pub text: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Links {
    pub internal: Vec<Link>,
    pub external: Vec<Link>,
}

// ── Cascade log ──────────────────────────────────────────────────────────

/// One entry of the cascade's attempt log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeAttempt {
    pub backend: BackendId,
    pub outcome: AttemptOutcome,
    /// Retries performed on this backend (0 or 1).
    pub retries: u8,
    /// Set for the minimal in-process fallback run after exhaustion.
    pub fallback: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    SkippedUnavailable { capability: Capability },
    Failed { reason: String, transient: bool },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, AttemptOutcome::SkippedUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_always_has_error() {
        let r = UnifiedResult::failure("");
        assert!(!r.success);
        assert!(!r.error.as_deref().unwrap_or("").is_empty());
    }

    #[test]
    fn success_serialises_without_error_field() {
        let r = UnifiedResult {
            success: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&r).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["success"], Value::Bool(true));
        assert!(json["media"]["videos"].is_array());
        assert!(json["links"]["internal"].is_array());
    }

    #[test]
    fn from_error_records_kind() {
        let r = UnifiedResult::from_error(&PolyExtractError::MissingTarget);
        assert_eq!(r.error_kind(), Some(ErrorKind::Configuration));
        assert!(r.backends_used.is_empty());
    }

    #[test]
    fn has_content_ignores_whitespace() {
        let mut r = UnifiedResult::default();
        r.document.text = "  \n ".into();
        assert!(!r.has_content());
        r.tables.push(Table::default());
        assert!(r.has_content());
    }

    #[test]
    fn bbox_union() {
        let a = BoundingBox::new(10.0, 10.0, 20.0, 20.0);
        let b = BoundingBox::new(5.0, 15.0, 12.0, 30.0);
        assert_eq!(a.union(&b), BoundingBox::new(5.0, 10.0, 20.0, 30.0));
    }

    #[test]
    fn attempt_outcome_tagging() {
        let o = AttemptOutcome::Failed {
            reason: "boom".into(),
            transient: false,
        };
        let json = serde_json::to_value(&o).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "boom");
    }
}
